//! Core sync engine: drains the operation queue against the remote store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use tillsync_cache::{LocalStore, OpKind, OpStatus, PendingOperation, SyncLogEntry};
use tillsync_common::{ConflictStrategy, Error, Result};
use tillsync_net::ConnectivityMonitor;
use tillsync_remote::{RemoteDocument, RemoteStore};

use crate::config::SyncConfig;
use crate::conflict::{self, ConflictKind};
use crate::status::StatusHub;

/// What one drain call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The drain ran (possibly over an empty queue).
    Ran(DrainSummary),
    /// Another drain held the claim; this call did nothing.
    AlreadyRunning,
    /// The monitor reported offline; this call did nothing.
    Offline,
}

/// Counters for one completed drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Operations that were queued when the drain started.
    pub total: usize,
    pub completed: usize,
    /// Failed attempts, whether or not retries remain.
    pub failed: usize,
    /// Operations parked for manual resolution.
    pub conflicts: usize,
    pub duration: Duration,
}

/// Lifetime counters for one engine.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub drains: u64,
    pub operations_completed: u64,
    pub operations_failed: u64,
    pub conflicts_seen: u64,
    pub last_drain_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Outcome of processing one claimed operation.
enum OpOutcome {
    Completed,
    Failed,
    Conflict,
}

/// What one apply attempt decided.
enum Attempt {
    Applied,
    Parked(ConflictKind),
}

/// Clears the drain claim when a drain ends, on every exit path.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Replays the pending operation queue against the remote store.
///
/// One engine owns the drain: a claim flag guarantees at most one
/// drain runs at a time, no matter how many triggers fire. Within a
/// drain, operations are sorted by explicit priority, then collection
/// class, then age, and applied in batches; operations within a batch
/// run concurrently, batches run in sequence.
pub struct SyncEngine<R: RemoteStore + ?Sized> {
    remote: Arc<R>,
    local: Arc<LocalStore>,
    monitor: Arc<ConnectivityMonitor>,
    status: Arc<StatusHub>,
    config: SyncConfig,
    draining: AtomicBool,
    stats: Mutex<SyncStats>,
    status_subscription: tillsync_net::SubscriptionId,
}

impl<R: RemoteStore + ?Sized> SyncEngine<R> {
    /// Create an engine over the given stores and monitor.
    ///
    /// The engine immediately begins forwarding connectivity
    /// transitions into the status hub and publishes the current queue
    /// depth.
    pub async fn new(
        remote: Arc<R>,
        local: Arc<LocalStore>,
        monitor: Arc<ConnectivityMonitor>,
        status: Arc<StatusHub>,
        config: SyncConfig,
    ) -> Self {
        let status_subscription = monitor.subscribe({
            let hub = status.clone();
            move |online| hub.set_online(online)
        });
        status.set_pending(local.pending_count().await);

        Self {
            remote,
            local,
            monitor,
            status,
            config,
            draining: AtomicBool::new(false),
            stats: Mutex::new(SyncStats::default()),
            status_subscription,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The status surface this engine publishes into.
    pub fn status(&self) -> Arc<StatusHub> {
        self.status.clone()
    }

    /// Lifetime counters, copied out.
    pub fn stats(&self) -> SyncStats {
        self.stats.lock().unwrap().clone()
    }

    /// Stop forwarding connectivity transitions to the status surface.
    pub fn detach(&self) {
        self.monitor.unsubscribe(self.status_subscription);
    }

    /// Operations currently parked for manual resolution.
    pub async fn pending_conflicts(&self) -> Vec<PendingOperation> {
        self.local.pending_operations(Some(OpStatus::Conflict)).await
    }

    /// Replay every pending operation against the remote store.
    ///
    /// Concurrent calls coalesce: whoever loses the claim gets
    /// [`DrainOutcome::AlreadyRunning`] back immediately. A drain
    /// checks connectivity before each batch and stops early when the
    /// monitor reports offline, leaving the remainder queued. An empty
    /// queue returns at once without touching the network.
    ///
    /// # Errors
    /// - Local storage failures abort the drain and are surfaced;
    ///   remote failures are absorbed into per-operation retry handling
    pub async fn drain(&self) -> Result<DrainOutcome> {
        if self.draining.swap(true, Ordering::SeqCst) {
            debug!("Drain trigger ignored: a drain is already running");
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let _guard = DrainGuard(&self.draining);

        if !self.monitor.is_online() {
            debug!("Drain skipped: offline");
            return Ok(DrainOutcome::Offline);
        }

        let mut queue = self.local.pending_operations(Some(OpStatus::Pending)).await;
        if queue.is_empty() {
            return Ok(DrainOutcome::Ran(DrainSummary::default()));
        }

        let started = Instant::now();
        let total = queue.len();
        info!("Draining {} pending operations", total);
        self.status.set_progress(0);

        let priorities = self.config.priorities();
        queue.sort_by_key(|op| {
            (
                op.priority,
                priorities.class_of(op.key.collection()).rank(),
                op.queued_at,
            )
        });

        let mut summary = DrainSummary {
            total,
            ..DrainSummary::default()
        };
        let batch_size = self.config.batch_size.max(1);
        let mut processed = 0usize;

        for batch in queue.chunks(batch_size) {
            if !self.monitor.is_online() {
                info!(
                    "Connectivity lost; drain stopped with {} operations still queued",
                    total - processed
                );
                break;
            }

            // Claim the whole batch before any remote work, so a
            // concurrent reader sees these operations as taken.
            let mut claimed = Vec::with_capacity(batch.len());
            for op in batch {
                match self
                    .local
                    .update_operation_status(&op.id, OpStatus::InProgress, None)
                    .await
                {
                    Ok(()) => claimed.push(op.clone()),
                    Err(Error::NotFound(_)) | Err(Error::InvalidInput(_)) => {
                        debug!("Skipping operation {}: no longer pending", op.id);
                    }
                    Err(e) => return Err(e),
                }
            }

            let results =
                futures::future::join_all(claimed.iter().map(|op| self.process_operation(op)))
                    .await;
            for outcome in results {
                match outcome? {
                    OpOutcome::Completed => summary.completed += 1,
                    OpOutcome::Failed => summary.failed += 1,
                    OpOutcome::Conflict => summary.conflicts += 1,
                }
            }

            processed += batch.len();
            self.status.set_progress(((processed * 100) / total) as u8);
            self.status.set_pending(self.local.pending_count().await);
        }

        summary.duration = started.elapsed();
        {
            let mut stats = self.stats.lock().unwrap();
            stats.drains += 1;
            stats.last_drain_at = Some(Utc::now());
            stats.operations_completed += summary.completed as u64;
            stats.operations_failed += summary.failed as u64;
            stats.conflicts_seen += summary.conflicts as u64;
        }

        info!(
            "Drain finished in {:?}: {} completed, {} failed, {} conflicts",
            summary.duration, summary.completed, summary.failed, summary.conflicts
        );
        Ok(DrainOutcome::Ran(summary))
    }

    /// Settle a parked conflict with an explicit strategy.
    ///
    /// Unknown ids and operations that are not parked are ignored, so
    /// callers may blindly replay resolutions. On success the operation
    /// completes and gets its audit record; on failure it stays parked
    /// and the call can simply be retried.
    ///
    /// # Errors
    /// - `InvalidInput` when `strategy` is `Manual`, which cannot
    ///   settle anything
    /// - Remote or storage errors from applying the resolution
    pub async fn resolve_conflict(&self, op_id: &str, strategy: ConflictStrategy) -> Result<()> {
        let Some(op) = self.local.operation(op_id).await else {
            debug!("Resolution for unknown operation {} ignored", op_id);
            return Ok(());
        };
        if op.status != OpStatus::Conflict {
            debug!("Resolution for non-conflicted operation {} ignored", op_id);
            return Ok(());
        }
        if strategy == ConflictStrategy::Manual {
            return Err(Error::InvalidInput(
                "manual strategy cannot settle a conflict".to_string(),
            ));
        }

        info!("Resolving conflict on operation {} with {}", op_id, strategy);
        let started = Instant::now();

        let current = self.remote.get(&op.key).await?;
        self.settle(&op, strategy, current).await?;

        self.local
            .update_operation_status(op_id, OpStatus::Completed, None)
            .await?;
        self.local
            .append_sync_log(SyncLogEntry::for_operation(
                &op,
                OpStatus::Completed,
                None,
                started.elapsed().as_millis() as u64,
            ))
            .await?;

        self.status.set_pending(self.local.pending_count().await);
        self.stats.lock().unwrap().operations_completed += 1;
        Ok(())
    }

    /// Run one claimed operation to a terminal or retryable state.
    ///
    /// Only local storage failures come back as `Err`; remote failures
    /// are folded into the operation's retry accounting.
    async fn process_operation(&self, op: &PendingOperation) -> Result<OpOutcome> {
        let started = Instant::now();
        match self.attempt(op).await {
            Ok(Attempt::Applied) => {
                self.local
                    .update_operation_status(&op.id, OpStatus::Completed, None)
                    .await?;
                self.local
                    .append_sync_log(SyncLogEntry::for_operation(
                        op,
                        OpStatus::Completed,
                        None,
                        started.elapsed().as_millis() as u64,
                    ))
                    .await?;
                debug!("Operation {} completed", op.id);
                Ok(OpOutcome::Completed)
            }
            Ok(Attempt::Parked(kind)) => {
                self.local
                    .update_operation_status(&op.id, OpStatus::Conflict, Some(kind.to_string()))
                    .await?;
                info!("Operation {} parked for manual resolution: {}", op.id, kind);
                Ok(OpOutcome::Conflict)
            }
            Err(e) => match e {
                Error::Io(_) | Error::Serialization(_) => Err(e),
                e => self.record_failure(op, e, started).await,
            },
        }
    }

    /// Apply one operation, resolving any conflict it runs into.
    async fn attempt(&self, op: &PendingOperation) -> Result<Attempt> {
        // Deletes skip the conflict read: a missing target means the
        // delete already happened.
        let current = if op.kind == OpKind::Delete {
            None
        } else {
            self.remote.get(&op.key).await?
        };

        match conflict::detect(op, current.as_ref()) {
            None => {
                self.apply_clean(op).await?;
                Ok(Attempt::Applied)
            }
            Some(kind) => {
                let strategy = op.resolution.unwrap_or(self.config.default_strategy);
                debug!(
                    "Conflict on operation {} ({}); resolving with {}",
                    op.id, kind, strategy
                );
                if strategy == ConflictStrategy::Manual {
                    return Ok(Attempt::Parked(kind));
                }
                self.settle(op, strategy, current).await?;
                Ok(Attempt::Applied)
            }
        }
    }

    /// Apply an operation that has no conflict, then refresh the local
    /// mirror with what the remote store committed.
    async fn apply_clean(&self, op: &PendingOperation) -> Result<()> {
        match op.kind {
            OpKind::Create | OpKind::Update => {
                let payload = op.data.clone().ok_or_else(|| {
                    Error::InvalidInput(format!("{} operation without payload", op.kind))
                })?;
                let committed = match op.kind {
                    OpKind::Create => self.remote.set(&op.key, payload).await?,
                    _ => self.remote.update(&op.key, payload).await?,
                };
                self.local
                    .cache_document(op.key.clone(), committed.data, false, Some(committed.revision))
                    .await
            }
            OpKind::Delete => {
                self.remote.delete(&op.key).await?;
                self.local.delete_cached_document(&op.key).await
            }
        }
    }

    /// Apply a non-manual resolution.
    ///
    /// Client-wins force-writes the locally intended document and
    /// re-caches the committed result. Server-wins touches nothing
    /// remote: it re-caches the remote document, or drops the mirror
    /// when the document is gone.
    async fn settle(
        &self,
        op: &PendingOperation,
        strategy: ConflictStrategy,
        remote: Option<RemoteDocument>,
    ) -> Result<()> {
        match strategy {
            ConflictStrategy::ClientWins => {
                // The dirty mirror holds the full intended post-state;
                // for updates the operation itself only carries the patch.
                let payload = match self.local.cached_document(&op.key).await {
                    Some(doc) => doc.data,
                    None => op.data.clone().ok_or_else(|| {
                        Error::InvalidInput(format!("{} operation without payload", op.kind))
                    })?,
                };
                let committed = self.remote.set(&op.key, payload).await?;
                self.local
                    .cache_document(op.key.clone(), committed.data, false, Some(committed.revision))
                    .await
            }
            ConflictStrategy::ServerWins => match remote {
                Some(doc) => {
                    self.local
                        .cache_document(op.key.clone(), doc.data, false, Some(doc.revision))
                        .await
                }
                None => self.local.delete_cached_document(&op.key).await,
            },
            ConflictStrategy::Manual => Err(Error::InvalidInput(
                "manual strategy cannot settle a conflict".to_string(),
            )),
        }
    }

    /// Record a failed attempt and decide whether the operation retries.
    async fn record_failure(
        &self,
        op: &PendingOperation,
        error: Error,
        started: Instant,
    ) -> Result<OpOutcome> {
        warn!("Operation {} failed: {}", op.id, error);
        self.local
            .update_operation_status(&op.id, OpStatus::Failed, Some(error.to_string()))
            .await?;

        let failed = self
            .local
            .operation(&op.id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Operation not found: {}", op.id)))?;

        if failed.retry_count < self.config.max_retry_count {
            debug!(
                "Operation {} will retry (attempt {} of {})",
                op.id, failed.retry_count, self.config.max_retry_count
            );
            self.schedule_requeue(op.id.clone());
        } else {
            error!(
                "Operation {} exhausted its {} attempts",
                op.id, self.config.max_retry_count
            );
            self.local
                .append_sync_log(SyncLogEntry::for_operation(
                    op,
                    OpStatus::Failed,
                    Some(error.to_string()),
                    started.elapsed().as_millis() as u64,
                ))
                .await?;
            self.stats.lock().unwrap().last_error = Some(error.to_string());
        }
        Ok(OpOutcome::Failed)
    }

    /// Return a failed operation to the queue after the retry delay.
    fn schedule_requeue(&self, op_id: String) {
        let local = self.local.clone();
        let status = self.status.clone();
        let delay = self.config.retry_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match local
                .update_operation_status(&op_id, OpStatus::Pending, None)
                .await
            {
                Ok(()) => status.set_pending(local.pending_count().await),
                Err(e) => warn!("Requeue of operation {} failed: {}", op_id, e),
            }
        });
    }
}
