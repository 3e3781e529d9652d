use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    state::{FieldMap, StateRecord},
    store::HashStore,
};

/// The capability shared by every coordinator variant: hand out the next
/// identifier for one coordination key.
///
/// Implementations differ only in how they make the read-modify-write cycle
/// on the shared [`StateRecord`] exclusive. Each returned identifier encodes
/// the record as it was *before* the call advanced it.
///
/// # Example
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// use std::sync::Arc;
/// use hashflake::{BitLayout, Bootstrap, IdCoordinator, MemoryStore};
///
/// let store = Arc::new(MemoryStore::new());
/// let coordinator = Bootstrap::new(store, "ids", BitLayout::twitter(), 5)
///     .locked("ids:lock")
///     .await?;
///
/// let first = coordinator.generate_id().await?;
/// let second = coordinator.generate_id().await?;
/// assert!(second > first);
/// assert_eq!(hashflake::extract_machine_id(&BitLayout::twitter(), first), 5);
/// # Ok::<(), hashflake::Error>(())
/// # }).unwrap();
/// ```
#[async_trait]
pub trait IdCoordinator: Send + Sync {
    /// The coordination key this coordinator is attached to.
    fn key(&self) -> &str;

    /// Generates the next identifier, giving up with [`Error::Cancelled`]
    /// if `cancel` fires before the store has been asked to advance.
    ///
    /// # Errors
    ///
    /// - [`Error::TimestampOutOfRange`] / [`Error::SequenceOutOfRange`] if the
    ///   stored snapshot violates its bounds; the record is left unchanged
    /// - [`Error::CorruptRecord`] if the stored record cannot be decoded
    /// - [`Error::LockUnavailable`] if a lock could not be obtained in budget
    /// - [`Error::Contended`] if a locked write kept losing to lock-free
    ///   callers on the same key
    /// - [`Error::StoreUnavailable`] on store failure
    /// - [`Error::Cancelled`] if `cancel` fired
    ///
    /// [`Error::Cancelled`]: crate::Error::Cancelled
    /// [`Error::TimestampOutOfRange`]: crate::Error::TimestampOutOfRange
    /// [`Error::SequenceOutOfRange`]: crate::Error::SequenceOutOfRange
    /// [`Error::CorruptRecord`]: crate::Error::CorruptRecord
    /// [`Error::LockUnavailable`]: crate::Error::LockUnavailable
    /// [`Error::Contended`]: crate::Error::Contended
    /// [`Error::StoreUnavailable`]: crate::Error::StoreUnavailable
    async fn generate_id_with(&self, cancel: &CancellationToken) -> Result<i64>;

    /// Generates the next identifier. See [`IdCoordinator::generate_id_with`].
    async fn generate_id(&self) -> Result<i64> {
        self.generate_id_with(&CancellationToken::new()).await
    }

    /// Reads the current record without advancing it.
    ///
    /// The snapshot is stale as soon as it is returned if other coordinators
    /// are generating on the same key.
    async fn snapshot(&self) -> Result<StateRecord>;
}

/// Reads the raw fields of the record at `key`.
pub(crate) async fn read_fields<S: HashStore + ?Sized>(store: &S, key: &str) -> Result<FieldMap> {
    store
        .get_fields(key)
        .await?
        .ok_or_else(|| Error::CorruptRecord {
            key: key.to_owned(),
            reason: "record not found".to_owned(),
        })
}

/// Reads and decodes the record at `key` without advancing it.
pub(crate) async fn read_record<S: HashStore + ?Sized>(store: &S, key: &str) -> Result<StateRecord> {
    StateRecord::from_fields(key, &read_fields(store, key).await?)
}
