//! Durable task and chunk metadata for resumable transfers.
//!
//! The store keeps two tables (`transfer_tasks`, `transfer_chunks`) in an
//! embedded SQLite database so that a process crash or an explicit pause
//! leaves enough state on disk to resume from the last completed chunk.
//! Committed operations survive a crash; an in-flight operation may be lost
//! but leaves the database consistent.

mod error;
mod store;
mod types;

pub use error::StoreError;
pub use store::{StatusStore, StoreConfig};
pub use types::{ChunkRecord, ChunkStatus, TaskCounts, TaskRecord, TaskStatus};
