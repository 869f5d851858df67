//! Background runner for periodic reachability checks.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::info;

use crate::monitor::ConnectivityMonitor;

/// Stops a running [`MonitorRunner`].
#[derive(Clone)]
pub struct RunnerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl RunnerHandle {
    /// Ask the runner to stop after its current check.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Drives periodic active probes against the monitor.
///
/// The first check runs immediately, validating the assumed startup
/// status; afterwards checks repeat every `check_interval`.
pub struct MonitorRunner {
    monitor: Arc<ConnectivityMonitor>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl MonitorRunner {
    /// Create a runner and its shutdown handle.
    pub fn new(monitor: Arc<ConnectivityMonitor>) -> (Self, RunnerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                monitor,
                shutdown_rx,
            },
            RunnerHandle { shutdown_tx },
        )
    }

    /// Run periodic checks until shutdown. Spawn this in a tokio task.
    pub async fn run(mut self) {
        let mut ticker = interval(self.monitor.config().check_interval);
        info!("Connectivity monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.monitor.manual_check().await;
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Connectivity monitor stopping");
                    break;
                }
            }
        }
    }
}
