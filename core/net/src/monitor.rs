//! Connectivity monitoring with passive hints and active probes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::probe::ReachabilityProbe;

/// Monitor tuning knobs.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Deadline for a single active probe.
    pub probe_timeout: Duration,
    /// How often the background runner probes.
    pub check_interval: Duration,
    /// Status assumed at startup, before the first probe answers.
    pub assume_online: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            check_interval: Duration::from_secs(30),
            assume_online: true,
        }
    }
}

/// Identifies one registered subscriber.
pub type SubscriptionId = u64;

type StatusCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Tracks whether the remote store is reachable.
///
/// Combines the platform's passive online/offline signal with an active
/// reachability probe: a passive "offline" is believed immediately, a
/// passive "online" is verified by a probe before it is trusted.
/// Transitions are debounced and fan out synchronously to subscribers
/// in registration order.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    config: MonitorConfig,
    online: AtomicBool,
    subscribers: Mutex<Vec<(SubscriptionId, StatusCallback)>>,
    next_id: AtomicU64,
}

impl ConnectivityMonitor {
    /// Create a monitor over the given probe.
    pub fn new(probe: Arc<dyn ReachabilityProbe>, config: MonitorConfig) -> Self {
        let online = AtomicBool::new(config.assume_online);
        Self {
            probe,
            config,
            online,
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The monitor's configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Current best-known status.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Register a subscriber. It is invoked immediately with the current
    /// status, then again on every transition, in registration order.
    pub fn subscribe(&self, callback: impl Fn(bool) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let callback: StatusCallback = Arc::new(callback);
        callback(self.is_online());
        self.subscribers.lock().unwrap().push((id, callback));
        id
    }

    /// Remove a subscriber. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().unwrap().retain(|(sid, _)| *sid != id);
    }

    /// Run one active probe under the configured timeout and record the
    /// outcome. Returns the resulting status.
    pub async fn manual_check(&self) -> bool {
        let online = match timeout(self.config.probe_timeout, self.probe.check()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Reachability probe failed: {}", e);
                false
            }
            Err(_) => {
                debug!(
                    "Reachability probe timed out after {:?}",
                    self.config.probe_timeout
                );
                false
            }
        };
        self.apply_status(online);
        online
    }

    /// Feed in the platform's passive signal.
    ///
    /// An offline hint is applied immediately. An online hint only means
    /// link-layer connectivity, so it triggers an active probe instead
    /// of being trusted directly.
    pub async fn passive_hint(&self, online: bool) {
        if online {
            self.manual_check().await;
        } else {
            self.apply_status(false);
        }
    }

    /// Record a status, debounced: an unchanged status notifies nobody.
    fn apply_status(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        info!(
            "Connectivity changed: {}",
            if online { "online" } else { "offline" }
        );

        // Snapshot under the lock, invoke outside it, so a callback may
        // subscribe or unsubscribe without deadlocking.
        let subscribers: Vec<StatusCallback> = {
            let guard = self.subscribers.lock().unwrap();
            guard.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in subscribers {
            callback(online);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StaticProbe;
    use async_trait::async_trait;
    use tillsync_common::Result;

    fn monitor_with(probe: Arc<StaticProbe>, assume_online: bool) -> ConnectivityMonitor {
        ConnectivityMonitor::new(
            probe,
            MonitorConfig {
                probe_timeout: Duration::from_millis(100),
                check_interval: Duration::from_secs(3600),
                assume_online,
            },
        )
    }

    #[tokio::test]
    async fn test_starts_with_assumed_status() {
        let probe = Arc::new(StaticProbe::new(true));
        assert!(monitor_with(probe.clone(), true).is_online());
        assert!(!monitor_with(probe, false).is_online());
    }

    #[tokio::test]
    async fn test_subscribe_invokes_immediately() {
        let probe = Arc::new(StaticProbe::new(true));
        let monitor = monitor_with(probe, true);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        monitor.subscribe(move |online| sink.lock().unwrap().push(online));

        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_transitions_are_debounced() {
        let probe = Arc::new(StaticProbe::new(false));
        let monitor = monitor_with(probe, true);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        monitor.subscribe(move |online| sink.lock().unwrap().push(online));

        monitor.passive_hint(false).await;
        monitor.passive_hint(false).await;
        monitor.passive_hint(false).await;

        // Immediate invoke plus exactly one transition.
        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_subscribers_notified_in_registration_order() {
        let probe = Arc::new(StaticProbe::new(true));
        let monitor = monitor_with(probe, false);

        let order = Arc::new(Mutex::new(Vec::new()));
        let first = order.clone();
        let second = order.clone();
        monitor.subscribe(move |_| first.lock().unwrap().push("first"));
        monitor.subscribe(move |_| second.lock().unwrap().push("second"));
        order.lock().unwrap().clear();

        monitor.manual_check().await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_notifications() {
        let probe = Arc::new(StaticProbe::new(false));
        let monitor = monitor_with(probe, true);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = monitor.subscribe(move |online| sink.lock().unwrap().push(online));
        monitor.unsubscribe(id);

        monitor.passive_hint(false).await;

        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_manual_check_follows_probe() {
        let probe = Arc::new(StaticProbe::new(false));
        let monitor = monitor_with(probe.clone(), true);

        assert!(!monitor.manual_check().await);
        assert!(!monitor.is_online());

        probe.set_online(true);
        assert!(monitor.manual_check().await);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn test_passive_offline_is_believed_without_probe() {
        // Probe would answer online; the offline hint still wins.
        let probe = Arc::new(StaticProbe::new(true));
        let monitor = monitor_with(probe, true);

        monitor.passive_hint(false).await;
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_passive_online_is_verified_by_probe() {
        let probe = Arc::new(StaticProbe::new(false));
        let monitor = monitor_with(probe.clone(), false);

        // Link-layer online with an unreachable store stays offline.
        monitor.passive_hint(true).await;
        assert!(!monitor.is_online());

        probe.set_online(true);
        monitor.passive_hint(true).await;
        assert!(monitor.is_online());
    }

    struct SlowProbe;

    #[async_trait]
    impl ReachabilityProbe for SlowProbe {
        async fn check(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_probe_timeout_marks_offline() {
        let monitor = ConnectivityMonitor::new(
            Arc::new(SlowProbe),
            MonitorConfig {
                probe_timeout: Duration::from_millis(20),
                check_interval: Duration::from_secs(3600),
                assume_online: true,
            },
        );

        assert!(!monitor.manual_check().await);
        assert!(!monitor.is_online());
    }
}
