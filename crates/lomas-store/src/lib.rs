//! Metadata & Credentials Store (MCS) and Administration Store (AS).
//!
//! `traits` defines the two seams the core depends on; `memory` and
//! `postgres` are the two backends; `bulk_load` seeds either one from a
//! YAML document.

pub mod bulk_load;
pub mod memory;
pub mod postgres;
pub mod traits;
pub mod types;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::{AdminStore, MetadataStore};
pub use types::{
    AccessKind, Archive, ArchiveStatus, Budget, BudgetEntry, ColumnSpec, Dataset, Metadata, User,
    hash_payload,
};
