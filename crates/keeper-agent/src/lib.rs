pub mod error;
pub mod events;
pub mod process_table;
pub mod supervisor;
pub mod support;

mod os;
mod watch;

pub use error::{ConfigError, SupervisorError};
pub use events::{LifecycleEvent, StopSignal};
pub use process_table::ProcessTable;
pub use supervisor::Supervisor;
pub use support::{RestartBackoff, SupervisorConfig};
