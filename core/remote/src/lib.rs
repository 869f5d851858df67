//! Remote document store abstraction for tillsync.
//!
//! This module defines the interface the sync layer speaks to the backing
//! document service, plus two implementations: an in-memory store for
//! tests and development, and a client for a JSON document API.
//!
//! # Design Principles
//! - One uniform async interface: callers never adapt to backend quirks
//! - No hidden retries: transient failures surface to the sync engine
//! - Server-assigned revisions: the store is the only party that
//!   advances a document's revision

pub mod memory;
pub mod rest;
pub mod store;

pub use memory::MemoryStore;
pub use rest::RestStore;
pub use store::{RemoteDocument, RemoteStore};
