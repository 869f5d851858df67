//! Pending operation records, status machine, and priority policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use tillsync_common::{ConflictStrategy, DocKey, Error, Owner, Result};

/// Kind of write a pending operation replays against the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    /// New document.
    Create,
    /// Partial update of an existing document.
    Update,
    /// Document removal.
    Delete,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle status of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    /// Waiting for a drain to pick it up.
    Pending,
    /// Claimed by the active drain.
    InProgress,
    /// Applied (or resolved) successfully. Terminal.
    Completed,
    /// Last attempt failed. Re-enters `Pending` while retries remain.
    Failed,
    /// Parked for an external resolution decision.
    Conflict,
}

impl OpStatus {
    /// Whether the status machine permits moving from `self` to `next`.
    ///
    /// `pending -> in_progress -> {completed | failed | conflict}`;
    /// `failed` re-enters `pending` on requeue; `conflict` terminates in
    /// `completed` once a resolution is applied.
    pub fn can_transition_to(self, next: OpStatus) -> bool {
        use OpStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Conflict)
                | (Failed, Pending)
                | (Conflict, Completed)
        )
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpStatus::Pending => "pending",
            OpStatus::InProgress => "in_progress",
            OpStatus::Completed => "completed",
            OpStatus::Failed => "failed",
            OpStatus::Conflict => "conflict",
        };
        write!(f, "{}", s)
    }
}

/// Urgency class of a collection, used to order the drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    High,
    Medium,
    Low,
}

impl PriorityClass {
    /// Numeric rank; lower drains first.
    pub fn rank(self) -> u8 {
        match self {
            PriorityClass::High => 0,
            PriorityClass::Medium => 1,
            PriorityClass::Low => 2,
        }
    }
}

/// Static collection-to-urgency mapping.
///
/// Collections not named in either list are low priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionPriorities {
    pub high: Vec<String>,
    pub medium: Vec<String>,
}

impl CollectionPriorities {
    /// Look up the class of one collection.
    pub fn class_of(&self, collection: &str) -> PriorityClass {
        if self.high.iter().any(|c| c == collection) {
            PriorityClass::High
        } else if self.medium.iter().any(|c| c == collection) {
            PriorityClass::Medium
        } else {
            PriorityClass::Low
        }
    }
}

impl Default for CollectionPriorities {
    fn default() -> Self {
        Self {
            high: vec!["orders".to_string(), "payments".to_string()],
            medium: vec!["inventory".to_string(), "menuItems".to_string()],
        }
    }
}

/// Everything a caller supplies when queueing a write.
///
/// Priority is not part of this: the store derives it from the
/// collection's class at enqueue time.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub key: DocKey,
    pub kind: OpKind,
    /// Payload; required for create/update.
    pub data: Option<Value>,
    pub owner: Owner,
    /// Remote revision the write was based on, when known.
    pub base_revision: Option<u64>,
    /// Explicit per-operation conflict directive.
    pub resolution: Option<ConflictStrategy>,
    /// The remote failure that caused this write to queue, if the
    /// caller attempted it directly first.
    pub initial_error: Option<String>,
}

/// A durable record of one write intended for the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique operation id.
    pub id: String,
    /// Which remote document the write targets.
    pub key: DocKey,
    /// What to replay.
    pub kind: OpKind,
    /// Payload; present for create/update, absent for delete.
    pub data: Option<Value>,
    /// Who recorded the write.
    pub owner: Owner,
    /// Priority snapshot taken at enqueue time; lower drains first.
    pub priority: u8,
    /// Remote revision the write was based on, when known.
    pub base_revision: Option<u64>,
    /// Client clock at creation.
    pub queued_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: OpStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Error message from the most recent failed attempt.
    pub last_error: Option<String>,
    /// Explicit per-operation conflict directive, overriding the
    /// configured default.
    pub resolution: Option<ConflictStrategy>,
}

impl PendingOperation {
    /// Create a new operation in `Pending` status.
    ///
    /// # Errors
    /// - Returns error if `kind` is create/update and `data` is absent
    pub fn new(new_op: NewOperation, priority: u8) -> Result<Self> {
        if new_op.data.is_none() && !matches!(new_op.kind, OpKind::Delete) {
            return Err(Error::InvalidInput(format!(
                "{} operation requires a payload",
                new_op.kind
            )));
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            key: new_op.key,
            kind: new_op.kind,
            data: new_op.data,
            owner: new_op.owner,
            priority,
            base_revision: new_op.base_revision,
            queued_at: Utc::now(),
            status: OpStatus::Pending,
            retry_count: 0,
            last_error: new_op.initial_error,
            resolution: new_op.resolution,
        })
    }
}

/// One append-only audit record for a terminal sync outcome.
///
/// Write-once; never replayed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub collection: String,
    pub doc_id: String,
    pub kind: OpKind,
    pub status: OpStatus,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub logged_at: DateTime<Utc>,
}

impl SyncLogEntry {
    /// Record the terminal outcome of one operation.
    pub fn for_operation(
        op: &PendingOperation,
        status: OpStatus,
        error: Option<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            collection: op.key.collection().to_string(),
            doc_id: op.key.id().to_string(),
            kind: op.kind,
            status,
            error,
            duration_ms,
            logged_at: Utc::now(),
        }
    }
}
