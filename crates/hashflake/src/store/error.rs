/// Errors reported by a [`HashStore`] backend.
///
/// They reach callers wrapped in [`Error::StoreUnavailable`], except for
/// tagged script failures which a lock-free coordinator maps back to their
/// typed [`Error`] variant.
///
/// [`HashStore`]: crate::HashStore
/// [`Error`]: crate::Error
/// [`Error::StoreUnavailable`]: crate::Error::StoreUnavailable
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Connectivity, protocol, or other backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// The key holds a value of another type.
    #[error("key `{key}` holds a {found} value, expected a hash")]
    WrongType { key: String, found: String },

    /// The field cannot be incremented because it is not an integer.
    #[error("field `{field}` of `{key}` is not an integer")]
    NotAnInteger { key: String, field: String },

    /// An atomic script aborted. The message starts with a tag when the
    /// abort was a validation failure.
    #[error("atomic script failed: {0}")]
    Script(String),
}
