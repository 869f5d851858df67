//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use tillsync_cache::CollectionPriorities;
use tillsync_common::ConflictStrategy;

/// Tunable behavior of the sync engine and its scheduler.
///
/// Durations are carried as milliseconds so the struct round-trips
/// through a plain JSON config file. Every field has a default, so a
/// partial file is enough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How often the scheduler triggers an automatic drain.
    pub auto_sync_interval_ms: u64,
    /// Failed attempts allowed per operation before it stays failed.
    pub max_retry_count: u32,
    /// Fixed delay before a failed operation re-enters the queue.
    pub retry_delay_ms: u64,
    /// Operations applied concurrently within one batch.
    pub batch_size: usize,
    /// Strategy applied to conflicts on operations that carry no
    /// explicit directive.
    pub default_strategy: ConflictStrategy,
    /// Collections drained before everything else.
    pub high_priority_collections: Vec<String>,
    /// Collections drained after the high class, before the rest.
    pub medium_priority_collections: Vec<String>,
}

impl SyncConfig {
    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_millis(self.auto_sync_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// The priority policy implied by the collection lists.
    pub fn priorities(&self) -> CollectionPriorities {
        CollectionPriorities {
            high: self.high_priority_collections.clone(),
            medium: self.medium_priority_collections.clone(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        let priorities = CollectionPriorities::default();
        Self {
            auto_sync_interval_ms: 60_000,
            max_retry_count: 5,
            retry_delay_ms: 5_000,
            batch_size: 10,
            default_strategy: ConflictStrategy::ServerWins,
            high_priority_collections: priorities.high,
            medium_priority_collections: priorities.medium,
        }
    }
}
