use core::time::Duration;
use std::sync::Arc;

use rand::Rng;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::{trace, warn};

use crate::{
    error::{Error, Result},
    store::HashStore,
};

/// Lease and retry budget for acquiring a distributed lock.
///
/// Attempt `n` (1-based) that fails sleeps for a delay drawn from
/// `[backoff / 2, backoff]`, where `backoff` starts at `initial_backoff`
/// and doubles up to `max_backoff`. After `max_attempts` failures the
/// acquisition gives up with [`Error::LockUnavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockPolicy {
    /// How long a held lock stays valid if its holder never releases it.
    pub lease: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl LockPolicy {
    /// Policy for the generate cycle: 500 ms lease, 100 ms backoff doubling
    /// to 200 ms.
    pub const fn generate() -> Self {
        Self {
            lease: Duration::from_millis(500),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(200),
            max_attempts: 16,
        }
    }

    /// Policy for bootstrap: 500 ms lease, 50 ms backoff doubling to 100 ms.
    pub const fn bootstrap() -> Self {
        Self {
            lease: Duration::from_millis(500),
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(100),
            max_attempts: 16,
        }
    }

    /// Upper bound of the sleep after the given failed attempt (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::generate()
    }
}

/// A held lease on a lock key.
///
/// Call [`LockHandle::release`] on every path once the protected work is
/// done. A handle that is dropped instead simply lets the lease expire.
#[must_use = "a lock that is never released blocks other holders until its lease expires"]
pub struct LockHandle<S: HashStore + ?Sized> {
    store: Arc<S>,
    key: String,
    token: String,
}

impl<S: HashStore + ?Sized> core::fmt::Debug for LockHandle<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

fn owner_token() -> String {
    let mut rng = rand::rng();
    format!("{:016x}{:016x}", rng.random::<u64>(), rng.random::<u64>())
}

fn jittered(backoff: Duration) -> Duration {
    let half = backoff / 2;
    let spread = u64::try_from(half.as_micros()).unwrap_or(u64::MAX);
    half + Duration::from_micros(rand::rng().random_range(0..=spread))
}

/// A named mutual-exclusion lock living in a [`HashStore`] keyspace.
///
/// The lock itself is stateless on the client: every [`acquire`] takes a
/// fresh lease under a fresh owner token.
///
/// [`acquire`]: DistributedLock::acquire
pub struct DistributedLock<S: HashStore + ?Sized> {
    store: Arc<S>,
    key: String,
    policy: LockPolicy,
}

impl<S: HashStore + ?Sized> core::fmt::Debug for DistributedLock<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<S: HashStore + ?Sized> Clone for DistributedLock<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            policy: self.policy,
        }
    }
}

impl<S: HashStore + ?Sized> DistributedLock<S> {
    pub fn new(store: Arc<S>, key: impl Into<String>, policy: LockPolicy) -> Self {
        Self {
            store,
            key: key.into(),
            policy,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    /// Acquires the lock, retrying per the lock's [`LockPolicy`].
    ///
    /// # Errors
    ///
    /// - [`Error::LockUnavailable`] once `max_attempts` attempts failed
    /// - [`Error::Cancelled`] if `cancel` fires first
    /// - [`Error::StoreUnavailable`] if the store fails
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<LockHandle<S>> {
        let token = owner_token();
        let policy = &self.policy;

        for attempt in 1..=policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if self.store.try_lease(&self.key, &token, policy.lease).await? {
                return Ok(LockHandle {
                    store: Arc::clone(&self.store),
                    key: self.key.clone(),
                    token,
                });
            }
            if attempt == policy.max_attempts {
                break;
            }

            let delay = jittered(policy.backoff_for(attempt));
            #[cfg(feature = "tracing")]
            trace!(
                key = %self.key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "lock held, backing off"
            );

            tokio::select! {
                () = cancel.cancelled() => return Err(Error::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        Err(Error::LockUnavailable {
            key: self.key.clone(),
            attempts: policy.max_attempts,
        })
    }
}

impl<S: HashStore + ?Sized> LockHandle<S> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the lease.
    ///
    /// Failures are logged, never returned: the lease expires on its own.
    /// Returns `true` if the lease was still ours and is now gone.
    pub async fn release(self) -> bool {
        match self.store.release_lease(&self.key, &self.token).await {
            Ok(true) => true,
            Ok(false) => {
                #[cfg(feature = "tracing")]
                warn!(key = %self.key, "lock lease expired before release");
                false
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                warn!(key = %self.key, error = %_e, "failed to release lock");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn lock(store: &Arc<MemoryStore>, policy: LockPolicy) -> DistributedLock<MemoryStore> {
        DistributedLock::new(Arc::clone(store), "lock", policy)
    }

    fn quick(max_attempts: u32) -> LockPolicy {
        LockPolicy {
            lease: Duration::from_millis(500),
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(4),
            max_attempts,
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = LockPolicy::generate();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(u32::MAX), Duration::from_millis(200));

        let policy = LockPolicy::bootstrap();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(50));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(5), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let backoff = Duration::from_millis(100);
        for _ in 0..100 {
            let delay = jittered(backoff);
            assert!(delay >= Duration::from_millis(50) && delay <= backoff);
        }
    }

    #[tokio::test]
    async fn acquire_excludes_until_release() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let held = lock(&store, quick(3)).acquire(&cancel).await.unwrap();

        let err = lock(&store, quick(3))
            .acquire(&cancel)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::LockUnavailable {
                key: "lock".to_owned(),
                attempts: 3
            }
        );

        assert!(held.release().await);
        let again = lock(&store, quick(1)).acquire(&cancel).await.unwrap();
        assert_eq!(again.key(), "lock");
        assert!(again.release().await);
    }

    #[tokio::test]
    async fn acquire_waits_for_expired_lease() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        assert!(
            store
                .try_lease("lock", "crashed-holder", Duration::from_millis(20))
                .await
                .unwrap()
        );

        let handle = lock(&store, quick(100)).acquire(&cancel).await.unwrap();
        assert!(handle.release().await);
    }

    #[tokio::test]
    async fn release_after_expiry_is_reported_not_raised() {
        let store = Arc::new(MemoryStore::new());
        let policy = LockPolicy {
            lease: Duration::from_millis(10),
            ..quick(1)
        };
        let handle = lock(&store, policy)
            .acquire(&CancellationToken::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.release().await);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let store = Arc::new(MemoryStore::new());
        assert!(
            store
                .try_lease("lock", "other", Duration::from_secs(10))
                .await
                .unwrap()
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let policy = LockPolicy {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5),
            ..quick(10)
        };
        let err = lock(&store, policy)
            .acquire(&cancel)
            .await
            .unwrap_err();
        assert_eq!(err, Error::Cancelled);
    }

    #[tokio::test]
    async fn zero_attempts_never_touches_the_store() {
        let store = Arc::new(MemoryStore::new());
        let err = lock(&store, quick(0))
            .acquire(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LockUnavailable { attempts: 0, .. }));
        assert!(
            store
                .try_lease("lock", "x", Duration::from_secs(1))
                .await
                .unwrap()
        );
    }
}
