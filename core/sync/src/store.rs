//! Offline-first document access for application code.
//!
//! [`OfflineStore`] is the layer CRUD screens build on: try the remote
//! store while online, and on failure (or while offline) apply the
//! write locally and queue it, so the caller's work is never lost and
//! reads always reflect their own writes.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use tillsync_cache::{LocalStore, NewOperation, OpKind};
use tillsync_common::{DocKey, Owner, Result};
use tillsync_net::{ConnectivityMonitor, ReachabilityProbe};
use tillsync_remote::RemoteStore;

use crate::status::StatusHub;

/// How a wrapper write was satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Confirmed by the remote store synchronously.
    Applied,
    /// Recorded locally and queued for the next drain.
    Queued { op_id: String },
}

/// Remote-first document access with a durable offline fallback.
///
/// All writes are attributed to one owner, taken at construction.
pub struct OfflineStore<R: RemoteStore + ?Sized> {
    remote: Arc<R>,
    local: Arc<LocalStore>,
    monitor: Arc<ConnectivityMonitor>,
    status: Arc<StatusHub>,
    owner: Owner,
}

impl<R: RemoteStore + ?Sized> OfflineStore<R> {
    pub fn new(
        remote: Arc<R>,
        local: Arc<LocalStore>,
        monitor: Arc<ConnectivityMonitor>,
        status: Arc<StatusHub>,
        owner: Owner,
    ) -> Self {
        Self {
            remote,
            local,
            monitor,
            status,
            owner,
        }
    }

    /// Who this store's writes are attributed to.
    pub fn owner(&self) -> &Owner {
        &self.owner
    }

    /// Create a document.
    ///
    /// Online, the create goes straight to the remote store and the
    /// mirror is refreshed with what it committed. Offline or on
    /// failure, the document is cached dirty and a create operation is
    /// queued.
    pub async fn create(&self, collection: &str, id: &str, data: Value) -> Result<WriteOutcome> {
        let key = DocKey::new(collection, id)?;

        if self.monitor.is_online() {
            match self.remote.set(&key, data.clone()).await {
                Ok(committed) => {
                    self.local
                        .cache_document(key, committed.data, false, Some(committed.revision))
                        .await?;
                    return Ok(WriteOutcome::Applied);
                }
                Err(e) => {
                    warn!("Create of {} failed remotely; queueing: {}", key, e);
                    return self.queue_create(key, data, Some(e.to_string())).await;
                }
            }
        }
        self.queue_create(key, data, None).await
    }

    /// Update a document with a shallow field patch.
    ///
    /// The queued fallback caches the intended post-state (current
    /// mirror with the patch folded in) and records the mirror's
    /// revision as the operation's conflict baseline.
    pub async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<WriteOutcome> {
        let key = DocKey::new(collection, id)?;

        if self.monitor.is_online() {
            match self.remote.update(&key, patch.clone()).await {
                Ok(committed) => {
                    self.local
                        .cache_document(key, committed.data, false, Some(committed.revision))
                        .await?;
                    return Ok(WriteOutcome::Applied);
                }
                Err(e) => {
                    warn!("Update of {} failed remotely; queueing: {}", key, e);
                    return self.queue_update(key, patch, Some(e.to_string())).await;
                }
            }
        }
        self.queue_update(key, patch, None).await
    }

    /// Delete a document. The mirror is removed either way; offline or
    /// on failure a delete operation is queued.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<WriteOutcome> {
        let key = DocKey::new(collection, id)?;

        if self.monitor.is_online() {
            match self.remote.delete(&key).await {
                Ok(()) => {
                    self.local.delete_cached_document(&key).await?;
                    return Ok(WriteOutcome::Applied);
                }
                Err(e) => {
                    warn!("Delete of {} failed remotely; queueing: {}", key, e);
                    return self.queue_delete(key, Some(e.to_string())).await;
                }
            }
        }
        self.queue_delete(key, None).await
    }

    /// Read one document, remote-first with a cache fallback.
    ///
    /// A dirty mirror is the caller's own unconfirmed write and wins
    /// reads until the queue drains. A confirmed remote absence removes
    /// any clean mirror.
    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let key = DocKey::new(collection, id)?;

        if let Some(doc) = self.local.cached_document(&key).await {
            if doc.dirty {
                return Ok(Some(doc.data));
            }
        }

        if self.monitor.is_online() {
            match self.remote.get(&key).await {
                Ok(Some(doc)) => {
                    self.local
                        .cache_document(key, doc.data.clone(), false, Some(doc.revision))
                        .await?;
                    return Ok(Some(doc.data));
                }
                Ok(None) => {
                    self.local.delete_cached_document(&key).await?;
                    return Ok(None);
                }
                Err(e) => {
                    debug!("Read of {} failed remotely; serving cache: {}", key, e);
                }
            }
        }

        Ok(self.local.cached_document(&key).await.map(|d| d.data))
    }

    /// List a collection as `(document id, data)` pairs, ordered by id.
    ///
    /// Online, the remote listing refreshes clean mirrors and dirty
    /// mirrors overlay it, so documents created or edited offline stay
    /// visible. Offline, the cached mirrors are the listing.
    pub async fn list(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        if self.monitor.is_online() {
            match self.remote.list(collection).await {
                Ok(remote_docs) => {
                    let mut merged: BTreeMap<String, Value> = BTreeMap::new();
                    for (key, doc) in remote_docs {
                        let dirty = self
                            .local
                            .cached_document(&key)
                            .await
                            .map_or(false, |d| d.dirty);
                        if dirty {
                            continue;
                        }
                        self.local
                            .cache_document(key.clone(), doc.data.clone(), false, Some(doc.revision))
                            .await?;
                        merged.insert(key.id().to_string(), doc.data);
                    }
                    for doc in self.local.collection_documents(collection).await {
                        if doc.dirty {
                            merged.insert(doc.key.id().to_string(), doc.data);
                        }
                    }
                    return Ok(merged.into_iter().collect());
                }
                Err(e) => {
                    debug!("Listing {} failed remotely; serving cache: {}", collection, e);
                }
            }
        }

        Ok(self
            .local
            .collection_documents(collection)
            .await
            .into_iter()
            .map(|d| (d.key.id().to_string(), d.data))
            .collect())
    }

    async fn queue_create(
        &self,
        key: DocKey,
        data: Value,
        initial_error: Option<String>,
    ) -> Result<WriteOutcome> {
        self.local
            .cache_document(key.clone(), data.clone(), true, None)
            .await?;
        let op_id = self
            .local
            .enqueue_operation(NewOperation {
                key,
                kind: OpKind::Create,
                data: Some(data),
                owner: self.owner.clone(),
                base_revision: None,
                resolution: None,
                initial_error,
            })
            .await?;
        self.publish_pending().await;
        Ok(WriteOutcome::Queued { op_id })
    }

    async fn queue_update(
        &self,
        key: DocKey,
        patch: Value,
        initial_error: Option<String>,
    ) -> Result<WriteOutcome> {
        let cached = self.local.cached_document(&key).await;
        let base_revision = cached.as_ref().and_then(|d| d.revision);
        let mut post = cached
            .map(|d| d.data)
            .unwrap_or_else(|| Value::Object(Default::default()));
        merge_fields(&mut post, &patch);

        self.local
            .cache_document(key.clone(), post, true, base_revision)
            .await?;
        let op_id = self
            .local
            .enqueue_operation(NewOperation {
                key,
                kind: OpKind::Update,
                data: Some(patch),
                owner: self.owner.clone(),
                base_revision,
                resolution: None,
                initial_error,
            })
            .await?;
        self.publish_pending().await;
        Ok(WriteOutcome::Queued { op_id })
    }

    async fn queue_delete(
        &self,
        key: DocKey,
        initial_error: Option<String>,
    ) -> Result<WriteOutcome> {
        self.local.delete_cached_document(&key).await?;
        let op_id = self
            .local
            .enqueue_operation(NewOperation {
                key,
                kind: OpKind::Delete,
                data: None,
                owner: self.owner.clone(),
                base_revision: None,
                resolution: None,
                initial_error,
            })
            .await?;
        self.publish_pending().await;
        Ok(WriteOutcome::Queued { op_id })
    }

    async fn publish_pending(&self) {
        self.status.set_pending(self.local.pending_count().await);
    }
}

/// Adapts a remote store's ping into a reachability probe, so the
/// monitor checks the same endpoint the sync engine writes to.
pub struct StoreProbe<R: RemoteStore + ?Sized> {
    remote: Arc<R>,
}

impl<R: RemoteStore + ?Sized> StoreProbe<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl<R: RemoteStore + ?Sized> ReachabilityProbe for StoreProbe<R> {
    async fn check(&self) -> Result<()> {
        self.remote.ping().await
    }
}

/// Shallow field merge, mirroring how the remote store applies patches.
fn merge_fields(base: &mut Value, patch: &Value) {
    match (base.as_object_mut(), patch.as_object()) {
        (Some(fields), Some(updates)) => {
            for (field, value) in updates {
                fields.insert(field.clone(), value.clone());
            }
        }
        _ => *base = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use tillsync_cache::{CollectionPriorities, OpStatus};
    use tillsync_net::{MonitorConfig, StaticProbe};
    use tillsync_remote::MemoryStore;

    struct Rig {
        remote: Arc<MemoryStore>,
        local: Arc<LocalStore>,
        probe: Arc<StaticProbe>,
        monitor: Arc<ConnectivityMonitor>,
        status: Arc<StatusHub>,
        store: OfflineStore<MemoryStore>,
    }

    async fn rig(temp: &TempDir, online: bool) -> Rig {
        let remote = Arc::new(MemoryStore::new());
        let local = Arc::new(
            LocalStore::open(temp.path(), CollectionPriorities::default())
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
        let status = Arc::new(StatusHub::new());
        let store = OfflineStore::new(
            remote.clone(),
            local.clone(),
            monitor.clone(),
            status.clone(),
            Owner::new("u-1", "tenant-1", "store-1"),
        );
        Rig {
            remote,
            local,
            probe,
            monitor,
            status,
            store,
        }
    }

    fn key(collection: &str, id: &str) -> DocKey {
        DocKey::new(collection, id).unwrap()
    }

    #[tokio::test]
    async fn test_online_create_applies_directly() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, true).await;

        let outcome = rig
            .store
            .create("orders", "ord-1", json!({"total": 4.0}))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);

        let k = key("orders", "ord-1");
        assert!(rig.remote.get(&k).await.unwrap().is_some());

        let mirror = rig.local.cached_document(&k).await.unwrap();
        assert!(!mirror.dirty);
        assert_eq!(mirror.revision, Some(1));
        assert_eq!(rig.local.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_offline_create_queues_and_caches_dirty() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, false).await;

        let outcome = rig
            .store
            .create("orders", "ord-1", json!({"total": 4.0}))
            .await
            .unwrap();
        let op_id = match outcome {
            WriteOutcome::Queued { op_id } => op_id,
            other => panic!("expected a queued write, got {:?}", other),
        };

        let mirror = rig.local.cached_document(&key("orders", "ord-1")).await.unwrap();
        assert!(mirror.dirty);
        assert_eq!(mirror.revision, None);

        let op = rig.local.operation(&op_id).await.unwrap();
        assert_eq!(op.status, OpStatus::Pending);
        assert_eq!(op.kind, OpKind::Create);
        assert!(op.last_error.is_none());
        assert!(rig.remote.is_empty());
        assert_eq!(rig.status.snapshot().pending, 1);
    }

    #[tokio::test]
    async fn test_remote_failure_queues_with_the_error() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, true).await;
        rig.remote.inject_failures(1);

        let outcome = rig
            .store
            .create("orders", "ord-1", json!({}))
            .await
            .unwrap();
        let op_id = match outcome {
            WriteOutcome::Queued { op_id } => op_id,
            other => panic!("expected a queued write, got {:?}", other),
        };

        let op = rig.local.operation(&op_id).await.unwrap();
        assert_eq!(op.status, OpStatus::Pending);
        let recorded = op.last_error.expect("queued write keeps its cause");
        assert!(recorded.contains("injected failure"));
    }

    #[tokio::test]
    async fn test_dirty_mirror_wins_reads() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, false).await;

        rig.store
            .create("orders", "ord-1", json!({"total": 4.0}))
            .await
            .unwrap();

        // Back online with the create still queued: the remote store
        // has no such document, yet the read shows the local write.
        rig.probe.set_online(true);
        rig.monitor.passive_hint(true).await;
        assert!(rig.monitor.is_online());
        let seen = rig.store.get("orders", "ord-1").await.unwrap();
        assert_eq!(seen, Some(json!({"total": 4.0})));
        assert!(rig
            .local
            .cached_document(&key("orders", "ord-1"))
            .await
            .unwrap()
            .dirty);
    }

    #[tokio::test]
    async fn test_get_serves_cache_when_offline() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, false).await;
        rig.local
            .cache_document(key("orders", "ord-1"), json!({"total": 2.0}), false, Some(3))
            .await
            .unwrap();

        let seen = rig.store.get("orders", "ord-1").await.unwrap();
        assert_eq!(seen, Some(json!({"total": 2.0})));
        assert_eq!(rig.store.get("orders", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_reconciles_remote_deletion() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, true).await;
        let k = key("orders", "ord-1");

        // A clean mirror survives from an earlier sync, but the
        // document is gone remotely.
        rig.local
            .cache_document(k.clone(), json!({"total": 2.0}), false, Some(3))
            .await
            .unwrap();

        assert_eq!(rig.store.get("orders", "ord-1").await.unwrap(), None);
        assert!(rig.local.cached_document(&k).await.is_none());
    }

    #[tokio::test]
    async fn test_offline_update_merges_post_state() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, false).await;
        let k = key("orders", "ord-1");

        rig.local
            .cache_document(k.clone(), json!({"state": "open", "total": 4.0}), false, Some(4))
            .await
            .unwrap();

        let outcome = rig
            .store
            .update("orders", "ord-1", json!({"state": "paid"}))
            .await
            .unwrap();
        let op_id = match outcome {
            WriteOutcome::Queued { op_id } => op_id,
            other => panic!("expected a queued write, got {:?}", other),
        };

        let mirror = rig.local.cached_document(&k).await.unwrap();
        assert!(mirror.dirty);
        assert_eq!(mirror.data, json!({"state": "paid", "total": 4.0}));

        // The operation carries the patch and the revision it was
        // based on, not the merged document.
        let op = rig.local.operation(&op_id).await.unwrap();
        assert_eq!(op.data, Some(json!({"state": "paid"})));
        assert_eq!(op.base_revision, Some(4));
    }

    #[tokio::test]
    async fn test_offline_delete_drops_mirror_and_queues() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, false).await;
        let k = key("orders", "ord-1");

        rig.local
            .cache_document(k.clone(), json!({}), false, Some(1))
            .await
            .unwrap();

        let outcome = rig.store.delete("orders", "ord-1").await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Queued { .. }));
        assert!(rig.local.cached_document(&k).await.is_none());
        assert_eq!(rig.local.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_list_overlays_offline_writes() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, false).await;

        // One document lives remotely; another was created offline.
        rig.remote
            .set(&key("orders", "ord-remote"), json!({"src": "remote"}))
            .await
            .unwrap();
        rig.store
            .create("orders", "ord-local", json!({"src": "local"}))
            .await
            .unwrap();

        rig.probe.set_online(true);
        rig.monitor.passive_hint(true).await;
        let listed = rig.store.list("orders").await.unwrap();
        assert_eq!(
            listed,
            vec![
                ("ord-local".to_string(), json!({"src": "local"})),
                ("ord-remote".to_string(), json!({"src": "remote"})),
            ]
        );

        // The remote document got mirrored clean along the way.
        let mirror = rig
            .local
            .cached_document(&key("orders", "ord-remote"))
            .await
            .unwrap();
        assert!(!mirror.dirty);
    }

    #[tokio::test]
    async fn test_list_serves_cache_when_offline() {
        let temp = TempDir::new().unwrap();
        let rig = rig(&temp, false).await;

        rig.local
            .cache_document(key("orders", "b"), json!({"n": 2}), false, Some(1))
            .await
            .unwrap();
        rig.local
            .cache_document(key("orders", "a"), json!({"n": 1}), true, None)
            .await
            .unwrap();

        let listed = rig.store.list("orders").await.unwrap();
        assert_eq!(
            listed,
            vec![
                ("a".to_string(), json!({"n": 1})),
                ("b".to_string(), json!({"n": 2})),
            ]
        );
    }

    #[tokio::test]
    async fn test_store_probe_follows_reachability() {
        let remote = Arc::new(MemoryStore::new());
        let probe = StoreProbe::new(remote.clone());

        assert!(probe.check().await.is_ok());
        remote.set_reachable(false);
        assert!(probe.check().await.is_err());
    }
}
