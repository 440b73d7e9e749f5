//! Persistent timestamp store.
//!
//! Provides:
//! - The [`CheckpointStore`] contract (load / compare-and-swap save)
//! - An in-memory store for tests and single-process simulation
//! - A SQLite store shared by every member of a cluster on one host
//! - Schema initialization for checkpoints and leader leases

pub mod checkpoint;
pub mod memory;
pub mod schema;
pub mod sqlite;

pub use checkpoint::{Checkpoint, CheckpointStore, StoreError};
pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
