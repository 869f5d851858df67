//! Remote store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tillsync_common::{DocKey, Result};

/// One document as the remote store holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteDocument {
    /// Document payload. The sync layer treats it as opaque JSON.
    pub data: Value,
    /// Server-assigned revision, incremented on every committed write.
    /// Strictly monotonic per document; the baseline for conflict detection.
    pub revision: u64,
    /// Server-side time of the last committed write. Audit only.
    pub updated_at: DateTime<Utc>,
}

/// Remote document store interface.
///
/// All operations are async round trips to the backing service.
/// Implementations must not retry internally; the sync engine owns the
/// retry policy.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the store name (e.g., "rest", "memory").
    fn name(&self) -> &str;

    /// Fetch one document.
    ///
    /// # Postconditions
    /// - Returns `None` when the document does not exist; absence is not
    ///   an error
    ///
    /// # Errors
    /// - Network/remote/timeout errors
    async fn get(&self, key: &DocKey) -> Result<Option<RemoteDocument>>;

    /// Create or replace one document.
    ///
    /// # Postconditions
    /// - The document exists with exactly `data` as its payload
    /// - Returns the committed document with its new revision
    ///
    /// # Errors
    /// - Network/remote/timeout errors
    async fn set(&self, key: &DocKey, data: Value) -> Result<RemoteDocument>;

    /// Shallow-merge a patch into an existing document.
    ///
    /// Top-level fields of `patch` overwrite the stored fields; fields not
    /// named in the patch are preserved.
    ///
    /// # Errors
    /// - `NotFound` when the document does not exist
    /// - Network/remote/timeout errors
    async fn update(&self, key: &DocKey, patch: Value) -> Result<RemoteDocument>;

    /// Delete one document.
    ///
    /// Idempotent: deleting an absent document succeeds.
    async fn delete(&self, key: &DocKey) -> Result<()>;

    /// List all documents in a collection.
    async fn list(&self, collection: &str) -> Result<Vec<(DocKey, RemoteDocument)>>;

    /// One cheap reachability round trip.
    ///
    /// Success means the service answered; any error means it is not
    /// usable right now.
    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_document_serialization() {
        let doc = RemoteDocument {
            data: serde_json::json!({"name": "Flat White", "price": 4.2}),
            revision: 7,
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&doc).unwrap();
        let deserialized: RemoteDocument = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.revision, doc.revision);
        assert_eq!(deserialized.data, doc.data);
    }
}
