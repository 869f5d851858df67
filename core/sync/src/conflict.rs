//! Conflict detection between queued operations and remote state.
//!
//! Detection is pure: it looks at one operation and the current remote
//! document and says whether applying the operation would collide.
//! Deciding what to do about a collision is the engine's job.

use std::fmt;

use tillsync_cache::{OpKind, PendingOperation};
use tillsync_remote::RemoteDocument;

/// Why a queued operation collides with the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// A create found the document already present remotely.
    RemoteExists { remote_revision: u64 },
    /// An update found the document gone remotely.
    RemoteMissing,
    /// An update found a remote revision newer than the one the
    /// operation was based on.
    RemoteNewer {
        base_revision: u64,
        remote_revision: u64,
    },
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::RemoteExists { remote_revision } => {
                write!(
                    f,
                    "document already exists remotely (revision {})",
                    remote_revision
                )
            }
            ConflictKind::RemoteMissing => write!(f, "document no longer exists remotely"),
            ConflictKind::RemoteNewer {
                base_revision,
                remote_revision,
            } => write!(
                f,
                "remote revision {} is newer than base revision {}",
                remote_revision, base_revision
            ),
        }
    }
}

/// Decide whether applying `op` against the current remote state would
/// collide.
///
/// Deletes never conflict: a missing target means the delete already
/// happened. A create conflicts with any existing remote document. An
/// update conflicts when the document is gone, or when the remote
/// revision is strictly newer than the operation's base revision. An
/// update with no recorded base revision has nothing to compare
/// against and applies cleanly.
pub fn detect(op: &PendingOperation, remote: Option<&RemoteDocument>) -> Option<ConflictKind> {
    match (op.kind, remote) {
        (OpKind::Delete, _) => None,
        (OpKind::Create, Some(doc)) => Some(ConflictKind::RemoteExists {
            remote_revision: doc.revision,
        }),
        (OpKind::Create, None) => None,
        (OpKind::Update, None) => Some(ConflictKind::RemoteMissing),
        (OpKind::Update, Some(doc)) => match op.base_revision {
            Some(base) if doc.revision > base => Some(ConflictKind::RemoteNewer {
                base_revision: base,
                remote_revision: doc.revision,
            }),
            _ => None,
        },
    }
}
