//! Per-instance connection tracking.

mod events;
mod repository;
mod supervisor;
mod watchdog;

pub use events::ConnectionEvent;
pub use repository::{InMemoryInstanceRepository, InstanceRepository};
pub use supervisor::WatchdogSupervisor;
pub use watchdog::{DisconnectCallback, InstanceWatchdog};
