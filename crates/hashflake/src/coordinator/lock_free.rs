use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::{debug, instrument};

use crate::{
    coordinator::{Bootstrap, IdCoordinator, read_record},
    error::{Error, Result},
    layout::BitLayout,
    script::{self, Scripts},
    state::StateRecord,
    store::HashStore,
};

/// A coordinator that runs the whole read-validate-advance cycle as one
/// atomic routine on the store.
///
/// No lock is taken, so there is no lease to expire and no retry budget to
/// exhaust. Requires a [`HashStore`] that can execute [`Scripts`].
///
/// ## See Also
/// - [`LockedCoordinator`]
///
/// [`LockedCoordinator`]: crate::LockedCoordinator
pub struct LockFreeCoordinator<S: HashStore + ?Sized> {
    store: Arc<S>,
    key: String,
    scripts: Scripts,
}

impl<S: HashStore + ?Sized> Clone for LockFreeCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            scripts: self.scripts.clone(),
        }
    }
}

impl<S: HashStore + ?Sized> core::fmt::Debug for LockFreeCoordinator<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockFreeCoordinator")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<S: HashStore + ?Sized> LockFreeCoordinator<S> {
    /// Bootstraps `key` with the default attach policy.
    ///
    /// Shorthand for `Bootstrap::new(store, key, layout, machine_id).lock_free(scripts)`.
    pub async fn bootstrap(
        store: Arc<S>,
        key: impl Into<String>,
        scripts: Scripts,
        layout: BitLayout,
        machine_id: i64,
    ) -> Result<Self> {
        Bootstrap::new(store, key, layout, machine_id)
            .lock_free(scripts)
            .await
    }

    pub(crate) fn attached(store: Arc<S>, key: String, scripts: Scripts) -> Self {
        Self {
            store,
            key,
            scripts,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn scripts(&self) -> &Scripts {
        &self.scripts
    }

    /// Generates the next identifier. See [`IdCoordinator::generate_id_with`].
    ///
    /// Cancellation is honoured up to the point the routine is sent; once
    /// sent, the call waits for the store's reply.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all, fields(key = %self.key)))]
    pub async fn generate_id_with(&self, cancel: &CancellationToken) -> Result<i64> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let reply = self
            .store
            .run_atomic(self.scripts.generate(), &self.key, &[])
            .await
            .map_err(|e| script::decode_error(&self.key, e))?;
        let record = StateRecord::from_flat(&self.key, &reply)?;

        #[cfg(feature = "tracing")]
        if record.seq >= record.seq_max {
            debug!(key = %self.key, timestamp = record.timestamp + 1, "sequence exhausted, advanced logical clock");
        }
        record.assemble()
    }
}

#[async_trait]
impl<S: HashStore + ?Sized> IdCoordinator for LockFreeCoordinator<S> {
    fn key(&self) -> &str {
        &self.key
    }

    async fn generate_id_with(&self, cancel: &CancellationToken) -> Result<i64> {
        LockFreeCoordinator::generate_id_with(self, cancel).await
    }

    async fn snapshot(&self) -> Result<StateRecord> {
        read_record(self.store.as_ref(), &self.key).await
    }
}
