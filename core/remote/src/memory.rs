//! In-memory remote store for testing.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::store::{RemoteDocument, RemoteStore};
use tillsync_common::{DocKey, Error, Result};

/// In-memory remote store.
///
/// Useful for testing and development. Behaves like the real service:
/// revisions increment on every committed write, and the store can be
/// made unreachable or told to fail the next N calls.
pub struct MemoryStore {
    docs: Arc<RwLock<HashMap<DocKey, RemoteDocument>>>,
    reachable: AtomicBool,
    fail_next: AtomicU32,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            docs: Arc::new(RwLock::new(HashMap::new())),
            reachable: AtomicBool::new(true),
            fail_next: AtomicU32::new(0),
        }
    }

    /// Make the store unreachable (all calls fail with a network error)
    /// or reachable again.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Fail the next `count` calls with a server-side error, then recover.
    pub fn inject_failures(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of stored documents across all collections.
    pub fn len(&self) -> usize {
        self.docs.read().unwrap().len()
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every call passes this gate before touching the map.
    fn gate(&self) -> Result<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(Error::Network("remote unreachable".to_string()));
        }
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Remote("injected failure".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &DocKey) -> Result<Option<RemoteDocument>> {
        self.gate()?;
        Ok(self.docs.read().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &DocKey, data: Value) -> Result<RemoteDocument> {
        self.gate()?;
        let mut docs = self.docs.write().unwrap();

        let revision = docs.get(key).map(|d| d.revision + 1).unwrap_or(1);
        let doc = RemoteDocument {
            data,
            revision,
            updated_at: Utc::now(),
        };
        docs.insert(key.clone(), doc.clone());

        Ok(doc)
    }

    async fn update(&self, key: &DocKey, patch: Value) -> Result<RemoteDocument> {
        self.gate()?;
        let mut docs = self.docs.write().unwrap();

        let current = docs
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("Document not found: {}", key)))?;

        let mut data = current.data.clone();
        match (data.as_object_mut(), patch.as_object()) {
            (Some(base), Some(fields)) => {
                for (field, value) in fields {
                    base.insert(field.clone(), value.clone());
                }
            }
            // Non-object payloads cannot be merged field-wise.
            _ => data = patch,
        }

        let doc = RemoteDocument {
            data,
            revision: current.revision + 1,
            updated_at: Utc::now(),
        };
        docs.insert(key.clone(), doc.clone());

        Ok(doc)
    }

    async fn delete(&self, key: &DocKey) -> Result<()> {
        self.gate()?;
        self.docs.write().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(DocKey, RemoteDocument)>> {
        self.gate()?;
        let docs = self.docs.read().unwrap();

        let mut results: Vec<(DocKey, RemoteDocument)> = docs
            .iter()
            .filter(|(key, _)| key.collection() == collection)
            .map(|(key, doc)| (key.clone(), doc.clone()))
            .collect();
        results.sort_by(|(a, _), (b, _)| a.id().cmp(b.id()));

        Ok(results)
    }

    async fn ping(&self) -> Result<()> {
        self.gate()
    }
}
