use crate::store::StoreError;

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors `hashflake` can produce.
///
/// Every failure is returned to the immediate caller. The only retries
/// performed internally belong to a [`LockedCoordinator`]: the lock
/// acquisition backoff and the re-read after a lost conditional write. Both
/// are bounded by the caller's [`LockPolicy`].
///
/// [`LockedCoordinator`]: crate::LockedCoordinator
/// [`LockPolicy`]: crate::LockPolicy
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The layout's bit widths do not add up to 63.
    #[error(
        "bit widths sum to {sum}, expected 63 (timestamp={timestamp_bits}, machine_id={machine_id_bits}, seq={seq_bits})"
    )]
    InvalidBitLayout {
        timestamp_bits: u8,
        machine_id_bits: u8,
        seq_bits: u8,
        sum: u32,
    },

    /// The machine id does not fit in the layout's machine id field.
    #[error("machine id {machine_id} is outside [0, {max}]")]
    InvalidMachineId { machine_id: i64, max: i64 },

    /// A state snapshot carries a timestamp outside `[0, max]`.
    ///
    /// Either the logical clock ran past the configured timestamp width or
    /// the stored record is corrupt. Never recovered automatically.
    #[error("timestamp {timestamp} is outside [0, {max}]")]
    TimestampOutOfRange { timestamp: i64, max: i64 },

    /// A state snapshot carries a sequence outside `[0, max]`.
    #[error("sequence {seq} is outside [0, {max}]")]
    SequenceOutOfRange { seq: i64, max: i64 },

    /// The distributed lock was not obtained within the retry budget.
    ///
    /// The whole call may be retried by the caller.
    #[error("lock `{key}` unavailable after {attempts} attempts")]
    LockUnavailable { key: String, attempts: u32 },

    /// The record kept changing between a locked coordinator's read and its
    /// conditional write, for `attempts` rounds in a row.
    ///
    /// Only happens when lock-free coordinators share the key. The whole
    /// call may be retried by the caller.
    #[error("state record `{key}` changed under {attempts} consecutive updates")]
    Contended { key: String, attempts: u32 },

    /// The backing store failed (connectivity, wrong key type, script error).
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// The stored record is missing a field or holds a non-integer value.
    #[error("state record `{key}` is corrupt: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Bootstrap attached to a record whose layout differs from the
    /// requested one. Only raised under [`AttachPolicy::Strict`].
    ///
    /// [`AttachPolicy::Strict`]: crate::AttachPolicy::Strict
    #[error("state record `{key}` stores {field}={stored}, caller requested {requested}")]
    LayoutMismatch {
        key: String,
        field: &'static str,
        stored: i64,
        requested: i64,
    },

    /// The caller's cancellation token fired before the operation completed.
    #[error("operation cancelled")]
    Cancelled,
}
