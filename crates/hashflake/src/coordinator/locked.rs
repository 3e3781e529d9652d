use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::{debug, instrument, trace};

use crate::{
    coordinator::{Bootstrap, IdCoordinator, read_fields, read_record},
    error::{Error, Result},
    layout::BitLayout,
    lock::{DistributedLock, LockPolicy},
    state::{StateRecord, field},
    store::HashStore,
};

/// A coordinator that serializes the read-modify-write cycle behind a
/// [`DistributedLock`].
///
/// Each call runs `acquire → read → assemble → update → release`, releasing
/// the lock on every exit path once it was obtained.
///
/// The update is a [`HashStore::compare_and_set`] on the `Timestamp` and
/// `Seq` that were read. Lock-free coordinators on the same key never take
/// the lock, so a lost race re-reads and tries again, up to the lock
/// policy's `max_attempts` rounds.
///
/// ## See Also
/// - [`LockFreeCoordinator`]
///
/// [`LockFreeCoordinator`]: crate::LockFreeCoordinator
pub struct LockedCoordinator<S: HashStore + ?Sized> {
    store: Arc<S>,
    key: String,
    lock: DistributedLock<S>,
}

impl<S: HashStore + ?Sized> Clone for LockedCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            lock: self.lock.clone(),
        }
    }
}

impl<S: HashStore + ?Sized> core::fmt::Debug for LockedCoordinator<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockedCoordinator")
            .field("key", &self.key)
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl<S: HashStore + ?Sized> LockedCoordinator<S> {
    /// Bootstraps `key` with the default lock policies and attach policy.
    ///
    /// Shorthand for `Bootstrap::new(store, key, layout, machine_id).locked(lock_key)`.
    pub async fn bootstrap(
        store: Arc<S>,
        key: impl Into<String>,
        lock_key: impl Into<String>,
        layout: BitLayout,
        machine_id: i64,
    ) -> Result<Self> {
        Bootstrap::new(store, key, layout, machine_id)
            .locked(lock_key)
            .await
    }

    pub(crate) fn attached(store: Arc<S>, key: String, lock: DistributedLock<S>) -> Self {
        Self { store, key, lock }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The key of the lock guarding each generate call.
    pub fn lock_key(&self) -> &str {
        self.lock.key()
    }

    pub fn lock_policy(&self) -> &LockPolicy {
        self.lock.policy()
    }

    /// Replaces the lock policy used by subsequent generate calls.
    pub fn with_lock_policy(self, policy: LockPolicy) -> Self {
        let lock = DistributedLock::new(Arc::clone(&self.store), self.lock.key(), policy);
        Self { lock, ..self }
    }

    /// Generates the next identifier. See [`IdCoordinator::generate_id_with`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all, fields(key = %self.key)))]
    pub async fn generate_id_with(&self, cancel: &CancellationToken) -> Result<i64> {
        let handle = self.lock.acquire(cancel).await?;
        let outcome = self.advance().await;
        handle.release().await;
        outcome
    }

    async fn advance(&self) -> Result<i64> {
        let attempts = self.lock.policy().max_attempts.max(1);
        for _attempt in 1..=attempts {
            let fields = read_fields(self.store.as_ref(), &self.key).await?;
            let record = StateRecord::from_fields(&self.key, &fields)?;
            let id = record.assemble()?;
            let update = record.next()?;

            let expected = [
                (field::TIMESTAMP, fields.get(field::TIMESTAMP).cloned()),
                (field::SEQ, fields.get(field::SEQ).cloned()),
            ];
            if self
                .store
                .compare_and_set(&self.key, &expected, &update.fields())
                .await?
            {
                #[cfg(feature = "tracing")]
                if let crate::state::StateUpdate::Tick { timestamp } = update {
                    debug!(key = %self.key, timestamp, "sequence exhausted, advanced logical clock");
                }
                return Ok(id);
            }

            #[cfg(feature = "tracing")]
            trace!(key = %self.key, attempt = _attempt, "record changed since it was read, retrying");
        }

        Err(Error::Contended {
            key: self.key.clone(),
            attempts,
        })
    }
}

#[async_trait]
impl<S: HashStore + ?Sized> IdCoordinator for LockedCoordinator<S> {
    fn key(&self) -> &str {
        &self.key
    }

    async fn generate_id_with(&self, cancel: &CancellationToken) -> Result<i64> {
        LockedCoordinator::generate_id_with(self, cancel).await
    }

    async fn snapshot(&self) -> Result<StateRecord> {
        read_record(self.store.as_ref(), &self.key).await
    }
}
