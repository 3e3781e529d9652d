use std::sync::Arc;

use tokio_util::sync::CancellationToken;
#[cfg(feature = "tracing")]
use tracing::{debug, instrument, warn};

use crate::{
    coordinator::{Coordinator, LockFreeCoordinator, LockedCoordinator, Mode},
    error::{Error, Result},
    layout::BitLayout,
    lock::{DistributedLock, LockPolicy},
    script::{self, ATTACHED, CREATED, Scripts},
    state::{FIELDS, StateRecord},
    store::{HashStore, KeyType, StoreError},
    time::{SystemClock, TimeSource},
};

/// What bootstrap does when it attaches to an existing record whose layout
/// or machine id differs from the requested one.
///
/// The stored record always wins; it is never rewritten to match the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AttachPolicy {
    /// Adopt the stored configuration silently.
    Adopt,
    /// Adopt the stored configuration and log a warning.
    #[default]
    Warn,
    /// Refuse to attach with [`Error::LayoutMismatch`].
    Strict,
}

/// Builder that validates a configuration and then creates or attaches to
/// the state record at a coordination key.
///
/// Preconditions ([`Error::InvalidBitLayout`], [`Error::InvalidMachineId`])
/// are checked before the store is touched. If a complete record already
/// exists at the key, the coordinator attaches to it and nothing is written;
/// otherwise a fresh record is written with
/// `Timestamp = now - layout.start_timestamp` and `Seq = 0`.
///
/// # Example
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// use std::sync::Arc;
/// use hashflake::{AttachPolicy, BitLayout, Bootstrap, IdCoordinator, MemoryStore, Scripts};
///
/// let store = Arc::new(MemoryStore::new());
/// let layout = BitLayout::new(41, 10, 12);
///
/// let first = Bootstrap::new(Arc::clone(&store), "orders", layout, 1)
///     .lock_free(Scripts::bundled())
///     .await?;
/// let id = first.generate_id().await?;
///
/// // A second process attaching with another machine id is refused.
/// let err = Bootstrap::new(store, "orders", layout, 2)
///     .attach_policy(AttachPolicy::Strict)
///     .lock_free(Scripts::bundled())
///     .await
///     .unwrap_err();
/// assert!(matches!(err, hashflake::Error::LayoutMismatch { field: "MachineId", .. }));
/// # let _ = id;
/// # Ok::<(), hashflake::Error>(())
/// # }).unwrap();
/// ```
pub struct Bootstrap<S: HashStore + ?Sized, C = SystemClock> {
    store: Arc<S>,
    key: String,
    layout: BitLayout,
    machine_id: i64,
    attach: AttachPolicy,
    clock: C,
    generate_policy: LockPolicy,
    bootstrap_policy: LockPolicy,
    cancel: CancellationToken,
}

impl<S: HashStore + ?Sized> Bootstrap<S> {
    pub fn new(store: Arc<S>, key: impl Into<String>, layout: BitLayout, machine_id: i64) -> Self {
        Self {
            store,
            key: key.into(),
            layout,
            machine_id,
            attach: AttachPolicy::default(),
            clock: SystemClock,
            generate_policy: LockPolicy::generate(),
            bootstrap_policy: LockPolicy::bootstrap(),
            cancel: CancellationToken::new(),
        }
    }
}

impl<S, C> Bootstrap<S, C>
where
    S: HashStore + ?Sized,
    C: TimeSource + Send + Sync,
{
    pub fn attach_policy(mut self, attach: AttachPolicy) -> Self {
        self.attach = attach;
        self
    }

    /// Replaces the wall clock read when a fresh record is created.
    pub fn clock<C2: TimeSource + Send + Sync>(self, clock: C2) -> Bootstrap<S, C2> {
        Bootstrap {
            store: self.store,
            key: self.key,
            layout: self.layout,
            machine_id: self.machine_id,
            attach: self.attach,
            clock,
            generate_policy: self.generate_policy,
            bootstrap_policy: self.bootstrap_policy,
            cancel: self.cancel,
        }
    }

    /// Lock policy a [`LockedCoordinator`] uses for each generate call.
    pub fn lock_policy(mut self, policy: LockPolicy) -> Self {
        self.generate_policy = policy;
        self
    }

    /// Lock policy for the locked check-and-create step.
    pub fn bootstrap_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.bootstrap_policy = policy;
        self
    }

    /// Aborts bootstrap with [`Error::Cancelled`] once `cancel` fires.
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn check_preconditions(&self) -> Result<()> {
        self.layout.validate()?;
        self.layout.validate_machine_id(self.machine_id)
    }

    fn initial_record(&self) -> StateRecord {
        StateRecord::initial(&self.layout, self.machine_id, self.clock.current_millis())
    }

    fn verify_attached(&self, stored: &StateRecord) -> Result<()> {
        let Some((field, stored_value, requested)) = stored.mismatch(&self.layout, self.machine_id)
        else {
            return Ok(());
        };
        match self.attach {
            AttachPolicy::Adopt => Ok(()),
            AttachPolicy::Warn => {
                #[cfg(feature = "tracing")]
                warn!(
                    key = %self.key,
                    field,
                    stored = stored_value,
                    requested,
                    "attached to a record with a different configuration, using the stored one"
                );
                Ok(())
            }
            AttachPolicy::Strict => Err(Error::LayoutMismatch {
                key: self.key.clone(),
                field,
                stored: stored_value,
                requested,
            }),
        }
    }

    /// Creates or attaches to the record under a bootstrap-scoped lock and
    /// returns a [`LockedCoordinator`] generating under `lock_key`.
    ///
    /// The bootstrap lock is `"{lock_key}:bootstrap"`, distinct from the
    /// generate lock, so a bootstrapping caller never waits on a generating
    /// one.
    ///
    /// # Errors
    ///
    /// Precondition errors, [`Error::LockUnavailable`], [`Error::CorruptRecord`]
    /// for a complete but undecodable record, [`Error::LayoutMismatch`] under
    /// [`AttachPolicy::Strict`], [`Error::StoreUnavailable`] if the key holds
    /// a non-hash value or the store fails, [`Error::Cancelled`].
    /// [`Error::Contended`] if lock-free bootstraps keep rewriting a partial
    /// record for the whole bootstrap policy budget.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all, fields(key = %self.key)))]
    pub async fn locked(self, lock_key: impl Into<String>) -> Result<LockedCoordinator<S>> {
        self.check_preconditions()?;
        let lock_key = lock_key.into();

        let bootstrap_lock = DistributedLock::new(
            Arc::clone(&self.store),
            format!("{lock_key}:bootstrap"),
            self.bootstrap_policy,
        );
        let handle = bootstrap_lock.acquire(&self.cancel).await?;
        let outcome = self.create_or_attach().await;
        handle.release().await;
        outcome?;

        let lock = DistributedLock::new(Arc::clone(&self.store), lock_key, self.generate_policy);
        Ok(LockedCoordinator::attached(self.store, self.key, lock))
    }

    // Lock-free bootstraps never take the bootstrap lock, so the create is a
    // conditional write on exactly what was read; losing it means someone
    // else created the record and the next round attaches to it.
    async fn create_or_attach(&self) -> Result<()> {
        let attempts = self.bootstrap_policy.max_attempts.max(1);
        for _ in 0..attempts {
            let existing = match self.store.key_type(&self.key).await? {
                KeyType::None => None,
                KeyType::Hash => self.store.get_fields(&self.key).await?,
                KeyType::Other(found) => {
                    return Err(StoreError::WrongType {
                        key: self.key.clone(),
                        found,
                    }
                    .into());
                }
            };

            if let Some(fields) = existing
                .as_ref()
                .filter(|fields| StateRecord::is_complete(fields))
            {
                let stored = StateRecord::from_fields(&self.key, fields)?;
                self.verify_attached(&stored)?;
                #[cfg(feature = "tracing")]
                debug!(key = %self.key, timestamp = stored.timestamp, seq = stored.seq, "attached to existing record");
                return Ok(());
            }

            let expected: Vec<(&str, Option<String>)> = FIELDS
                .iter()
                .map(|name| {
                    let current = existing.as_ref().and_then(|fields| fields.get(*name).cloned());
                    (*name, current)
                })
                .collect();
            let record = self.initial_record();
            if self
                .store
                .compare_and_set(&self.key, &expected, &record.to_fields())
                .await?
            {
                #[cfg(feature = "tracing")]
                debug!(key = %self.key, timestamp = record.timestamp, machine_id = record.machine_id, "created record");
                return Ok(());
            }
        }

        Err(Error::Contended {
            key: self.key.clone(),
            attempts,
        })
    }

    /// Creates or attaches to the record with one atomic check-and-initialize
    /// routine and returns a [`LockFreeCoordinator`] running `scripts`.
    ///
    /// # Errors
    ///
    /// Same as [`Bootstrap::locked`], minus [`Error::LockUnavailable`] and
    /// [`Error::Contended`].
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all, fields(key = %self.key)))]
    pub async fn lock_free(self, scripts: Scripts) -> Result<LockFreeCoordinator<S>> {
        self.check_preconditions()?;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let record = self.initial_record();
        let reply = self
            .store
            .run_atomic(scripts.bootstrap(), &self.key, &record.to_flat())
            .await
            .map_err(|e| script::decode_error(&self.key, e))?;

        let Some((status, pairs)) = reply.split_first() else {
            return Err(StoreError::Script("empty bootstrap reply".to_owned()).into());
        };
        let stored = StateRecord::from_flat(&self.key, pairs)?;
        match status.as_str() {
            CREATED => {
                #[cfg(feature = "tracing")]
                debug!(key = %self.key, timestamp = stored.timestamp, machine_id = stored.machine_id, "created record");
            }
            ATTACHED => {
                self.verify_attached(&stored)?;
                #[cfg(feature = "tracing")]
                debug!(key = %self.key, timestamp = stored.timestamp, seq = stored.seq, "attached to existing record");
            }
            other => {
                return Err(StoreError::Script(format!("unexpected bootstrap status {other:?}")).into());
            }
        }

        Ok(LockFreeCoordinator::attached(self.store, self.key, scripts))
    }

    /// Bootstraps the variant selected by `mode`.
    pub async fn coordinator(self, mode: Mode) -> Result<Coordinator<S>> {
        Ok(match mode {
            Mode::Locked { lock_key } => Coordinator::Locked(self.locked(lock_key).await?),
            Mode::LockFree { scripts } => Coordinator::LockFree(self.lock_free(scripts).await?),
        })
    }
}
