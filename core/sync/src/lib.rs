//! Offline-first synchronization for tillsync.
//!
//! Everything that moves queued writes to the remote store lives here:
//! - Drain engine with batching, priority ordering, and retry accounting
//! - Conflict detection and resolution strategies
//! - Offline-first document access for application code
//! - Scheduling: periodic, connectivity-driven, and on-demand drains
//! - A shared status surface for interactive callers

pub mod config;
pub mod conflict;
pub mod engine;
pub mod scheduler;
pub mod status;
pub mod store;

// Re-export main types
pub use config::SyncConfig;
pub use conflict::ConflictKind;
pub use engine::{DrainOutcome, DrainSummary, SyncEngine, SyncStats};
pub use scheduler::{DrainLoop, DrainRequest, SchedulerHandle};
pub use status::{StatusHub, SubscriptionId, SyncStatusSnapshot};
pub use store::{OfflineStore, StoreProbe, WriteOutcome};
