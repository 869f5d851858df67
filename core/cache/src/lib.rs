//! Local cache and operation log for tillsync.
//!
//! The leaf component of the sync stack: a persistent, process-local
//! store holding cached mirrors of remote documents for offline reads
//! and a durable, ordered log of write operations not yet confirmed by
//! the remote store.
//!
//! # Design Principles
//! - Serialized access: one lock guards all shared state
//! - Durable before visible: mutations are persisted before the lock
//!   is released
//! - Surfaced failures: a storage error on a queued write is reported,
//!   never swallowed

pub mod document;
pub mod local;
pub mod operation;

pub use document::CachedDocument;
pub use local::LocalStore;
pub use operation::{
    CollectionPriorities, NewOperation, OpKind, OpStatus, PendingOperation, PriorityClass,
    SyncLogEntry,
};
