//! Offline-first synchronization.
//!
//! Local mutations go into a persisted [`SyncQueue`]. The [`SyncProcessor`]
//! delivers them in priority order whenever a trigger fires: an enqueue,
//! connectivity coming back, the periodic timer, or an explicit full sync.
//! Pulled remote changes pass through the [`ConflictResolver`], which parks
//! divergent entities as conflict records until a caller settles them.

mod connectivity;
mod engine;
mod events;
mod processor;
mod queue;
mod resolver;
mod scheduler;


pub use connectivity::ConnectivityMonitor;
pub use engine::SyncEngine;
pub use events::{DrainReport, DrainSkipped, EventBus, SyncEvent, SyncFailure};
pub use processor::SyncProcessor;
pub use queue::{NextItem, SyncQueue};
pub use resolver::{ConflictResolver, ReconcileReport, Reconciled};
pub use scheduler::PeriodicScheduler;
