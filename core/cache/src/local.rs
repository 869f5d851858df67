//! Durable local store: document cache, operation log, audit log.

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::document::CachedDocument;
use crate::operation::{
    CollectionPriorities, NewOperation, OpStatus, PendingOperation, SyncLogEntry,
};
use tillsync_common::{DocKey, Error, Result};

/// In-memory image of the persisted state.
struct StoreState {
    documents: HashMap<DocKey, CachedDocument>,
    operations: Vec<PendingOperation>,
}

/// Persistent local store backing offline reads and queued writes.
///
/// Holds cached mirrors of remote documents and the durable log of
/// pending operations, plus an append-only audit log of terminal sync
/// outcomes. All access is serialized through one internal lock; every
/// mutation is persisted before the lock is released, so concurrent
/// readers never observe a state that is not on disk.
pub struct LocalStore {
    documents_path: PathBuf,
    operations_path: PathBuf,
    log_path: PathBuf,
    priorities: CollectionPriorities,
    state: RwLock<StoreState>,
}

impl LocalStore {
    /// Open a store rooted at `dir`, loading any persisted state.
    ///
    /// Operations left claimed by an interrupted run are returned to
    /// the queue, so a crash mid-drain never strands a write.
    ///
    /// # Errors
    /// - I/O errors creating the directory or reading state files
    /// - Serialization errors when persisted state is unreadable; a
    ///   corrupt operation log is surfaced, not discarded
    pub async fn open(dir: impl AsRef<Path>, priorities: CollectionPriorities) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(Error::Io)?;

        let documents_path = dir.join("documents.json");
        let operations_path = dir.join("operations.json");
        let log_path = dir.join("sync_log.jsonl");

        let documents = if documents_path.exists() {
            let content = fs::read_to_string(&documents_path).await.map_err(Error::Io)?;
            let docs: Vec<CachedDocument> = serde_json::from_str(&content)
                .map_err(|e| Error::Serialization(format!("Unreadable document cache: {}", e)))?;
            docs.into_iter().map(|d| (d.key.clone(), d)).collect()
        } else {
            HashMap::new()
        };

        let mut operations: Vec<PendingOperation> = if operations_path.exists() {
            let content = fs::read_to_string(&operations_path)
                .await
                .map_err(Error::Io)?;
            serde_json::from_str(&content)
                .map_err(|e| Error::Serialization(format!("Unreadable operation log: {}", e)))?
        } else {
            Vec::new()
        };

        let mut recovered = 0;
        for op in operations.iter_mut() {
            if op.status == OpStatus::InProgress {
                op.status = OpStatus::Pending;
                recovered += 1;
            }
        }

        let store = Self {
            documents_path,
            operations_path,
            log_path,
            priorities,
            state: RwLock::new(StoreState {
                documents,
                operations,
            }),
        };

        if recovered > 0 {
            let state = store.state.read().await;
            store.persist_operations(&state).await?;
        }

        Ok(store)
    }

    /// The collection priority policy this store derives priorities from.
    pub fn priorities(&self) -> &CollectionPriorities {
        &self.priorities
    }

    /// Idempotent upsert of a document mirror.
    pub async fn cache_document(
        &self,
        key: DocKey,
        data: Value,
        dirty: bool,
        revision: Option<u64>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let doc = CachedDocument::new(key.clone(), data, dirty, revision);
        state.documents.insert(key, doc);
        self.persist_documents(&state).await
    }

    /// Fetch one cached mirror. Purely local; absence is `None`.
    pub async fn cached_document(&self, key: &DocKey) -> Option<CachedDocument> {
        self.state.read().await.documents.get(key).cloned()
    }

    /// All cached mirrors in one collection, ordered by document id.
    pub async fn collection_documents(&self, collection: &str) -> Vec<CachedDocument> {
        let state = self.state.read().await;
        let mut docs: Vec<CachedDocument> = state
            .documents
            .values()
            .filter(|d| d.key.collection() == collection)
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.key.cmp(&b.key));
        docs
    }

    /// Remove a mirror. Removing an absent mirror is a no-op.
    pub async fn delete_cached_document(&self, key: &DocKey) -> Result<()> {
        let mut state = self.state.write().await;
        if state.documents.remove(key).is_none() {
            return Ok(());
        }
        self.persist_documents(&state).await
    }

    /// Append a new operation in `Pending` status and return its id.
    ///
    /// Priority is derived from the collection's class under the store's
    /// priority policy.
    pub async fn enqueue_operation(&self, new_op: NewOperation) -> Result<String> {
        let priority = self.priorities.class_of(new_op.key.collection()).rank();
        let op = PendingOperation::new(new_op, priority)?;
        let id = op.id.clone();

        let mut state = self.state.write().await;
        state.operations.push(op);
        self.persist_operations(&state).await?;

        Ok(id)
    }

    /// All operations matching a status, in insertion order.
    /// `None` returns the whole log.
    pub async fn pending_operations(&self, filter: Option<OpStatus>) -> Vec<PendingOperation> {
        let state = self.state.read().await;
        state
            .operations
            .iter()
            .filter(|op| filter.map_or(true, |s| op.status == s))
            .cloned()
            .collect()
    }

    /// Fetch one operation by id.
    pub async fn operation(&self, op_id: &str) -> Option<PendingOperation> {
        let state = self.state.read().await;
        state.operations.iter().find(|op| op.id == op_id).cloned()
    }

    /// The only mutator of operation status.
    ///
    /// Atomic with respect to concurrent reads: the transition and its
    /// persistence happen under the store's write lock. A transition to
    /// `Failed` increments the retry counter and records the error.
    ///
    /// # Errors
    /// - `NotFound` for an unknown operation id
    /// - `InvalidInput` for a transition the status machine forbids
    pub async fn update_operation_status(
        &self,
        op_id: &str,
        status: OpStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let op = state
            .operations
            .iter_mut()
            .find(|op| op.id == op_id)
            .ok_or_else(|| Error::NotFound(format!("Operation not found: {}", op_id)))?;

        if !op.status.can_transition_to(status) {
            return Err(Error::InvalidInput(format!(
                "Invalid status transition: {} -> {}",
                op.status, status
            )));
        }

        op.status = status;
        match status {
            OpStatus::Failed => {
                op.retry_count += 1;
                if error.is_some() {
                    op.last_error = error;
                }
            }
            OpStatus::Completed => {
                op.last_error = None;
            }
            _ => {
                if error.is_some() {
                    op.last_error = error;
                }
            }
        }

        self.persist_operations(&state).await
    }

    /// Number of operations waiting for a drain.
    pub async fn pending_count(&self) -> usize {
        let state = self.state.read().await;
        state
            .operations
            .iter()
            .filter(|op| op.status == OpStatus::Pending)
            .count()
    }

    /// Operation counts broken down by status.
    pub async fn counts_by_status(&self) -> HashMap<OpStatus, usize> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for op in &state.operations {
            *counts.entry(op.status).or_insert(0) += 1;
        }
        counts
    }

    /// Drop completed operations from the log, returning how many were
    /// removed. The audit log keeps their terminal records.
    pub async fn compact_completed(&self) -> Result<usize> {
        let mut state = self.state.write().await;
        let before = state.operations.len();
        state.operations.retain(|op| op.status != OpStatus::Completed);
        let removed = before - state.operations.len();

        if removed > 0 {
            self.persist_operations(&state).await?;
        }
        Ok(removed)
    }

    /// Append one audit record. Write-once; the log is never replayed.
    pub async fn append_sync_log(&self, entry: SyncLogEntry) -> Result<()> {
        let mut line = serde_json::to_string(&entry)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        line.push('\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(Error::Io)?;
        file.write_all(line.as_bytes()).await.map_err(Error::Io)?;
        file.flush().await.map_err(Error::Io)
    }

    /// The most recent `limit` audit records, oldest first.
    pub async fn recent_sync_log(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.log_path).await.map_err(Error::Io)?;

        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let entry: SyncLogEntry = serde_json::from_str(line)
                .map_err(|e| Error::Serialization(format!("Unreadable audit record: {}", e)))?;
            entries.push(entry);
        }

        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }

    async fn persist_documents(&self, state: &StoreState) -> Result<()> {
        let mut docs: Vec<&CachedDocument> = state.documents.values().collect();
        docs.sort_by(|a, b| a.key.cmp(&b.key));
        let json = serde_json::to_string_pretty(&docs)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(&self.documents_path, json).await.map_err(Error::Io)
    }

    async fn persist_operations(&self, state: &StoreState) -> Result<()> {
        let json = serde_json::to_string_pretty(&state.operations)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(&self.operations_path, json)
            .await
            .map_err(Error::Io)
    }
}
