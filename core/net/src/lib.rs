//! Connectivity monitoring for tillsync.
//!
//! The platform's passive online/offline signal only reflects link-layer
//! state; it says nothing about whether the remote store actually
//! answers. This module pairs that signal with an active reachability
//! probe so the sync engine is never woken into a doomed drain.

pub mod monitor;
pub mod probe;
pub mod runner;

pub use monitor::{ConnectivityMonitor, MonitorConfig, SubscriptionId};
pub use probe::{HttpProbe, ReachabilityProbe, StaticProbe};
pub use runner::{MonitorRunner, RunnerHandle};
