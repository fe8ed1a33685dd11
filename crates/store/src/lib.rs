//! Knowledge store implementations for BLV.
//!
//! Both backends implement `blv_core::KnowledgeStore`. The [`Deduplicator`]
//! sits in front of them on every finding and request write.

pub mod cleaning;
pub mod dedup;
pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cleaning::clean_request;
pub use dedup::{Deduplicator, WriteOutcome, fingerprint};
pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
