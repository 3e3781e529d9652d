use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    coordinator::{IdCoordinator, LockFreeCoordinator, LockedCoordinator},
    error::Result,
    script::Scripts,
    state::StateRecord,
    store::HashStore,
};

/// Which coordinator variant [`Bootstrap::coordinator`] builds.
///
/// [`Bootstrap::coordinator`]: crate::Bootstrap::coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Serialize through a distributed lock stored at `lock_key`.
    Locked { lock_key: String },
    /// Run the bundled or custom atomic routines.
    LockFree { scripts: Scripts },
}

/// Either coordinator variant, chosen at runtime.
pub enum Coordinator<S: HashStore + ?Sized> {
    Locked(LockedCoordinator<S>),
    LockFree(LockFreeCoordinator<S>),
}

impl<S: HashStore + ?Sized> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Locked(inner) => Self::Locked(inner.clone()),
            Self::LockFree(inner) => Self::LockFree(inner.clone()),
        }
    }
}

impl<S: HashStore + ?Sized> core::fmt::Debug for Coordinator<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Locked(inner) => inner.fmt(f),
            Self::LockFree(inner) => inner.fmt(f),
        }
    }
}

impl<S: HashStore + ?Sized> From<LockedCoordinator<S>> for Coordinator<S> {
    fn from(inner: LockedCoordinator<S>) -> Self {
        Self::Locked(inner)
    }
}

impl<S: HashStore + ?Sized> From<LockFreeCoordinator<S>> for Coordinator<S> {
    fn from(inner: LockFreeCoordinator<S>) -> Self {
        Self::LockFree(inner)
    }
}

#[async_trait]
impl<S: HashStore + ?Sized> IdCoordinator for Coordinator<S> {
    fn key(&self) -> &str {
        match self {
            Self::Locked(inner) => inner.key(),
            Self::LockFree(inner) => inner.key(),
        }
    }

    async fn generate_id_with(&self, cancel: &CancellationToken) -> Result<i64> {
        match self {
            Self::Locked(inner) => inner.generate_id_with(cancel).await,
            Self::LockFree(inner) => inner.generate_id_with(cancel).await,
        }
    }

    async fn snapshot(&self) -> Result<StateRecord> {
        match self {
            Self::Locked(inner) => IdCoordinator::snapshot(inner).await,
            Self::LockFree(inner) => IdCoordinator::snapshot(inner).await,
        }
    }
}
