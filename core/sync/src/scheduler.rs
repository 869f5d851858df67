//! Drain scheduling - periodic, connectivity-driven, and on-demand.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info};

use tillsync_net::{ConnectivityMonitor, SubscriptionId};
use tillsync_remote::RemoteStore;

use crate::engine::{DrainOutcome, SyncEngine};

/// Requests understood by the drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainRequest {
    /// Drain now, asked for by the application.
    Drain,
    /// Drain now, prompted by connectivity returning.
    Reconnected,
    /// Stop the loop.
    Shutdown,
}

/// Sends requests to a running [`DrainLoop`].
#[derive(Clone)]
pub struct SchedulerHandle {
    request_tx: mpsc::Sender<DrainRequest>,
}

impl SchedulerHandle {
    /// Ask for a drain. Best-effort: if the loop is gone or its queue
    /// is full the request is dropped, and the next periodic tick
    /// covers it.
    pub fn request_drain(&self) {
        let _ = self.request_tx.try_send(DrainRequest::Drain);
    }

    /// Stop the loop after any drain currently running.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(DrainRequest::Shutdown).await;
    }

    /// Wire a monitor to the loop: every transition to online requests
    /// a drain. Subscribing delivers the current status immediately, so
    /// attaching while online requests a catch-up drain right away.
    pub fn attach_monitor(&self, monitor: &ConnectivityMonitor) -> SubscriptionId {
        let tx = self.request_tx.clone();
        monitor.subscribe(move |online| {
            if online {
                let _ = tx.try_send(DrainRequest::Reconnected);
            }
        })
    }
}

/// Owns the periodic timer and executes requested drains.
///
/// Overlap needs no handling here: the engine's drain claim already
/// coalesces concurrent triggers.
pub struct DrainLoop<R: RemoteStore + ?Sized> {
    engine: Arc<SyncEngine<R>>,
    request_rx: mpsc::Receiver<DrainRequest>,
}

impl<R: RemoteStore + ?Sized> DrainLoop<R> {
    /// Create a loop over the given engine and a handle for feeding it.
    pub fn new(engine: Arc<SyncEngine<R>>) -> (Self, SchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(16);
        (
            Self { engine, request_rx },
            SchedulerHandle { request_tx },
        )
    }

    /// Run until shutdown. Spawn this in a tokio task.
    ///
    /// The first periodic tick fires immediately, so operations queued
    /// by an earlier run are drained at startup without waiting a full
    /// interval.
    pub async fn run(mut self) {
        let mut ticker = interval(self.engine.config().auto_sync_interval());
        info!("Drain scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Periodic drain tick");
                    self.execute().await;
                }
                request = self.request_rx.recv() => match request {
                    Some(DrainRequest::Shutdown) | None => {
                        info!("Drain scheduler stopping");
                        break;
                    }
                    Some(request) => {
                        debug!("Drain requested: {:?}", request);
                        self.execute().await;
                    }
                },
            }
        }
    }

    async fn execute(&self) {
        match self.engine.drain().await {
            Ok(DrainOutcome::Ran(summary)) if summary.total > 0 => {
                info!(
                    "Scheduled drain: {} completed, {} failed, {} conflicts",
                    summary.completed, summary.failed, summary.conflicts
                );
            }
            Ok(_) => {}
            Err(e) => error!("Scheduled drain failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::status::StatusHub;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use tillsync_cache::{LocalStore, NewOperation, OpKind, OpStatus};
    use tillsync_common::{DocKey, Owner};
    use tillsync_net::{MonitorConfig, StaticProbe};
    use tillsync_remote::MemoryStore;

    struct Rig {
        local: Arc<LocalStore>,
        probe: Arc<StaticProbe>,
        monitor: Arc<ConnectivityMonitor>,
        engine: Arc<SyncEngine<MemoryStore>>,
    }

    async fn rig(temp: &TempDir, online: bool) -> Rig {
        let config = SyncConfig::default();
        let local = Arc::new(
            LocalStore::open(temp.path(), config.priorities())
                .await
                .unwrap(),
        );
        let probe = Arc::new(StaticProbe::new(online));
        let monitor = Arc::new(ConnectivityMonitor::new(
            probe.clone(),
            MonitorConfig {
                probe_timeout: Duration::from_millis(100),
                check_interval: Duration::from_secs(3600),
                assume_online: online,
            },
        ));
        let engine = Arc::new(
            SyncEngine::new(
                Arc::new(MemoryStore::new()),
                local.clone(),
                monitor.clone(),
                Arc::new(StatusHub::new()),
                config,
            )
            .await,
        );
        Rig {
            local,
            probe,
            monitor,
            engine,
        }
    }

    async fn enqueue(local: &LocalStore, id: &str) -> String {
        local
            .enqueue_operation(NewOperation {
                key: DocKey::new("orders", id).unwrap(),
                kind: OpKind::Create,
                data: Some(json!({})),
                owner: Owner::new("u-1", "tenant-1", "store-1"),
                base_revision: None,
                resolution: None,
                initial_error: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_requested_drain_executes() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, true).await;

        let (drain_loop, handle) = DrainLoop::new(rig.engine.clone());
        let task = tokio::spawn(drain_loop.run());

        // Let the startup tick pass over the empty queue first.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let op_id = enqueue(&rig.local, "ord-1").await;
        handle.request_drain();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            rig.local.operation(&op_id).await.unwrap().status,
            OpStatus::Completed
        );

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_triggers_drain() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, false).await;

        let (drain_loop, handle) = DrainLoop::new(rig.engine.clone());
        handle.attach_monitor(&rig.monitor);
        let task = tokio::spawn(drain_loop.run());

        let op_id = enqueue(&rig.local, "ord-1").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            rig.local.operation(&op_id).await.unwrap().status,
            OpStatus::Pending
        );

        // Connectivity returns, verified by the probe.
        rig.probe.set_online(true);
        rig.monitor.passive_hint(true).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            rig.local.operation(&op_id).await.unwrap().status,
            OpStatus::Completed
        );

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_loop() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, true).await;

        let (drain_loop, handle) = DrainLoop::new(rig.engine.clone());
        let task = tokio::spawn(drain_loop.run());

        handle.shutdown().await;
        task.await.unwrap();
    }
}
