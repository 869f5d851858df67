//! Common types used throughout tillsync.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of one document in the remote store: a collection name plus a
/// document id. The local cache holds at most one entry per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocKey {
    collection: String,
    id: String,
}

impl DocKey {
    /// Create a new DocKey from a collection name and a document id.
    ///
    /// # Preconditions
    /// - Both parts must be non-empty
    /// - Neither part may contain a path separator
    ///
    /// # Errors
    /// - Returns error if either part is empty or contains '/'
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> crate::Result<Self> {
        let collection = collection.into();
        let id = id.into();
        if collection.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Collection name cannot be empty".to_string(),
            ));
        }
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Document id cannot be empty".to_string(),
            ));
        }
        if collection.contains('/') || id.contains('/') {
            return Err(crate::Error::InvalidInput(
                "Collection and id cannot contain separators".to_string(),
            ));
        }
        Ok(Self { collection, id })
    }

    /// Get the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Get the document id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// Identity of the actor a queued operation was recorded for.
///
/// Stamped on every pending operation so replayed writes stay attributable
/// after the session that produced them is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: String,
    pub tenant_id: String,
    pub store_id: String,
}

impl Owner {
    /// Create a new Owner stamp.
    pub fn new(
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        store_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            store_id: store_id.into(),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.user_id, self.tenant_id, self.store_id)
    }
}

/// How a detected conflict between a queued operation and the remote
/// document should be settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// The queued local payload overwrites the remote document.
    ClientWins,
    /// The remote document stands; the local intent is discarded.
    ServerWins,
    /// Park the operation until a caller supplies a decision.
    Manual,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictStrategy::ClientWins => "client-wins",
            ConflictStrategy::ServerWins => "server-wins",
            ConflictStrategy::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ConflictStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "client-wins" => Ok(ConflictStrategy::ClientWins),
            "server-wins" => Ok(ConflictStrategy::ServerWins),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown conflict strategy: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_key_creation() {
        let key = DocKey::new("orders", "ord-1001").unwrap();
        assert_eq!(key.collection(), "orders");
        assert_eq!(key.id(), "ord-1001");
        assert_eq!(key.to_string(), "orders/ord-1001");
    }

    #[test]
    fn test_doc_key_empty_fails() {
        assert!(DocKey::new("", "ord-1001").is_err());
        assert!(DocKey::new("orders", "").is_err());
    }

    #[test]
    fn test_doc_key_separator_fails() {
        assert!(DocKey::new("orders/archive", "ord-1001").is_err());
        assert!(DocKey::new("orders", "a/b").is_err());
    }

    #[test]
    fn test_strategy_parse_round_trip() {
        for s in ["client-wins", "server-wins", "manual"] {
            let parsed: ConflictStrategy = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("newest-wins".parse::<ConflictStrategy>().is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn doc_key_accepts_separator_free_parts(
                collection in "[A-Za-z0-9_-]{1,32}",
                id in "[A-Za-z0-9_-]{1,32}",
            ) {
                let key = DocKey::new(collection.clone(), id.clone()).unwrap();
                prop_assert_eq!(key.collection(), collection);
                prop_assert_eq!(key.id(), id);
            }

            #[test]
            fn doc_key_rejects_separators(part in ".*/.*") {
                prop_assert!(DocKey::new(part.clone(), "x").is_err());
                prop_assert!(DocKey::new("x", part).is_err());
            }

            #[test]
            fn doc_key_serde_round_trip(
                collection in "[a-z]{1,16}",
                id in "[a-z0-9-]{1,16}",
            ) {
                let key = DocKey::new(collection, id).unwrap();
                let json = serde_json::to_string(&key).unwrap();
                let back: DocKey = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(back, key);
            }
        }
    }
}
