//! Common types shared across tillsync crates.
//!
//! The error taxonomy and the small identity types every other crate
//! speaks: document keys, owner stamps, and conflict strategies.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ConflictStrategy, DocKey, Owner};
