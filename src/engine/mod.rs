//! Synchronization engine: position diffing, bounded activity log, and the
//! lifecycle/worker orchestration.

mod activity;
mod reconcile;
mod sync;

pub use activity::{ActivityLog, LogEntry};
pub use reconcile::{reconcile, IntentKind, OrderIntent, SidePolicy};
pub use sync::{Broker, EngineConfig, EngineError, EngineStatus, Lifecycle, SyncEngine};
