//! Snowflake-style 63-bit identifiers handed out by many independent
//! processes that share nothing but a remote hash store.
//!
//! Every coordination key holds one [`StateRecord`]. A coordinator attached
//! to the key reads the record, packs it into an identifier with
//! [`assemble`], and advances it, either behind a [`DistributedLock`]
//! ([`LockedCoordinator`]) or as one atomic routine on the store
//! ([`LockFreeCoordinator`]). No two calls on the same key ever observe the
//! same `(Timestamp, Seq)` pair.
//!
//! ```
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! use std::sync::Arc;
//! use hashflake::{BitLayout, Bootstrap, IdCoordinator, MemoryStore, Mode, Scripts};
//!
//! let store = Arc::new(MemoryStore::new());
//! let layout = BitLayout::twitter();
//! let coordinator = Bootstrap::new(store, "users", layout, 7)
//!     .coordinator(Mode::LockFree { scripts: Scripts::bundled() })
//!     .await?;
//!
//! let id = coordinator.generate_id().await?;
//! let parts = layout.decompose(id);
//! assert_eq!(parts.machine_id, 7);
//! assert_eq!(parts.seq, 0);
//! # Ok::<(), hashflake::Error>(())
//! # }).unwrap();
//! ```

mod codec;
mod coordinator;
mod error;
mod layout;
mod lock;
mod script;
mod state;
mod store;
mod time;

pub use crate::codec::*;
pub use crate::coordinator::*;
pub use crate::error::*;
pub use crate::layout::*;
pub use crate::lock::*;
pub use crate::script::{AtomicScript, ScriptKind, Scripts};
pub use crate::state::*;
pub use crate::store::*;
pub use crate::time::*;

pub use tokio_util::sync::CancellationToken;
