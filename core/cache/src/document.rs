//! Cached document mirror.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tillsync_common::DocKey;

/// A local mirror of one remote document.
///
/// At most one mirror exists per key; the store overwrites on every
/// successful remote read and every local write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDocument {
    /// Which remote document this mirrors.
    pub key: DocKey,
    /// Document payload, opaque to the sync layer.
    pub data: Value,
    /// Locally modified but not yet confirmed by the remote store.
    pub dirty: bool,
    /// Last remote revision this mirror was confirmed against.
    /// `None` until the document has round-tripped once.
    pub revision: Option<u64>,
    /// When this mirror was written.
    pub cached_at: DateTime<Utc>,
}

impl CachedDocument {
    /// Create a new mirror stamped with the current time.
    pub fn new(key: DocKey, data: Value, dirty: bool, revision: Option<u64>) -> Self {
        Self {
            key,
            data,
            dirty,
            revision,
            cached_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_document_round_trip() {
        let doc = CachedDocument::new(
            DocKey::new("orders", "ord-1").unwrap(),
            serde_json::json!({"total": 15.0}),
            true,
            Some(4),
        );

        let json = serde_json::to_string(&doc).unwrap();
        let restored: CachedDocument = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.key, doc.key);
        assert_eq!(restored.data, doc.data);
        assert!(restored.dirty);
        assert_eq!(restored.revision, Some(4));
    }
}
