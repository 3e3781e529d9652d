mod bootstrap;
mod interface;
mod lock_free;
mod locked;
mod mode;

pub use bootstrap::*;
pub use interface::*;
pub use lock_free::*;
pub use locked::*;
pub use mode::*;
