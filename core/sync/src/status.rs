//! Process-wide sync status surface.
//!
//! One hub carries the three values interactive callers watch:
//! connectivity, drain progress, and queue depth. The engine and the
//! wrapper publish into it; UI layers subscribe.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Identifier handed back by `subscribe`, used to unsubscribe.
pub type SubscriptionId = u64;

type StatusCallback = Arc<dyn Fn(SyncStatusSnapshot) + Send + Sync>;

/// Point-in-time view of the sync stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatusSnapshot {
    /// Current connectivity belief.
    pub online: bool,
    /// Drain progress, 0 to 100. Reset when a drain starts.
    pub progress: u8,
    /// Operations waiting for a drain.
    pub pending: usize,
}

/// Shared publisher for [`SyncStatusSnapshot`] changes.
///
/// Notifications are synchronous and debounced: subscribers run on the
/// publishing thread, in registration order, and only when a value
/// actually changed. Reads never block on a notification in flight.
pub struct StatusHub {
    state: Mutex<SyncStatusSnapshot>,
    subscribers: Mutex<Vec<(SubscriptionId, StatusCallback)>>,
    next_id: AtomicU64,
}

impl StatusHub {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyncStatusSnapshot {
                online: true,
                progress: 0,
                pending: 0,
            }),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The current status values.
    pub fn snapshot(&self) -> SyncStatusSnapshot {
        *self.state.lock().unwrap()
    }

    /// Register a callback for status changes.
    ///
    /// The callback is invoked immediately with the current snapshot,
    /// so a late subscriber never has to wait for the next change to
    /// learn the state.
    pub fn subscribe(
        &self,
        callback: impl Fn(SyncStatusSnapshot) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let callback: StatusCallback = Arc::new(callback);
        callback(self.snapshot());

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().push((id, callback));
        id
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|(sub_id, _)| *sub_id != id);
    }

    pub fn set_online(&self, online: bool) {
        self.update(|s| {
            let changed = s.online != online;
            s.online = online;
            changed
        });
    }

    /// Publish drain progress. Values above 100 are clamped.
    pub fn set_progress(&self, progress: u8) {
        let progress = progress.min(100);
        self.update(|s| {
            let changed = s.progress != progress;
            s.progress = progress;
            changed
        });
    }

    pub fn set_pending(&self, pending: usize) {
        self.update(|s| {
            let changed = s.pending != pending;
            s.pending = pending;
            changed
        });
    }

    fn update(&self, apply: impl FnOnce(&mut SyncStatusSnapshot) -> bool) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            if !apply(&mut state) {
                return;
            }
            *state
        };

        // Snapshot the list, then invoke outside the lock so a callback
        // may subscribe or unsubscribe without deadlocking.
        let subscribers: Vec<StatusCallback> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in subscribers {
            callback(snapshot);
        }
    }
}

impl Default for StatusHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_hub() -> (Arc<StatusHub>, Arc<Mutex<Vec<SyncStatusSnapshot>>>) {
        let hub = Arc::new(StatusHub::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.subscribe(move |snapshot| sink.lock().unwrap().push(snapshot));
        (hub, seen)
    }

    #[test]
    fn test_subscribe_invokes_immediately() {
        let (_hub, seen) = recording_hub();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].online);
        assert_eq!(seen[0].pending, 0);
    }

    #[test]
    fn test_changes_are_debounced() {
        let (hub, seen) = recording_hub();

        hub.set_pending(3);
        hub.set_pending(3);
        hub.set_online(true);

        let seen = seen.lock().unwrap();
        // Initial invoke plus the single real change.
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].pending, 3);
    }

    #[test]
    fn test_subscribers_run_in_registration_order() {
        let hub = StatusHub::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            hub.subscribe(move |_| order.lock().unwrap().push(tag));
        }
        order.lock().unwrap().clear();

        hub.set_pending(1);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let hub = StatusHub::new();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();
        let id = hub.subscribe(move |_| *counter.lock().unwrap() += 1);

        hub.unsubscribe(id);
        hub.set_pending(5);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_progress_is_clamped() {
        let hub = StatusHub::new();
        hub.set_progress(150);
        assert_eq!(hub.snapshot().progress, 100);
    }
}
