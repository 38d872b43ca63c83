//! Resumable chunked file transfer with durable metadata.
//!
//! The engine splits a source byte stream into fixed-size chunks, moves them
//! independently with retries and integrity checks, merges them into the
//! destination, and verifies the result. Task and chunk state is persisted
//! through [`ferryman-store`](ferryman_store) so a crash or an explicit pause
//! resumes from the last completed chunk.
//!
//! ## Basic usage
//!
//! ```no_run
//! use std::path::Path;
//! use ferryman_transfer::{TransferConfig, TransferManager};
//!
//! # fn main() -> Result<(), ferryman_transfer::TransferError> {
//! let manager = TransferManager::new(TransferConfig::default());
//! manager.initialize()?;
//!
//! manager.start_transfer(
//!     "flight-0042",
//!     Path::new("/media/staging/flight-0042.mp4"),
//!     Path::new("/srv/archive/flight-0042.mp4"),
//!     None,
//!     Some(std::sync::Arc::new(|task_id, success, error| {
//!         if success {
//!             println!("{task_id} done");
//!         } else {
//!             eprintln!("{task_id} failed: {error}");
//!         }
//!     })),
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **checksum**: streaming MD5 over files and byte ranges
//! - **planner**: chunk layout and planning-time digests
//! - **executor**: per-chunk copy and verification against temp artifacts
//! - **runner**: the per-task state machine (transfer, merge, verify)
//! - **progress**: sliding-window transfer speed and ETA estimation
//! - **manager**: worker pool, task queue, and the public facade
//! - **supervisor**: heartbeat stamping and zombie reaping
//! - **config**: the typed configuration value the engine consumes

mod checksum;
mod config;
mod error;
mod executor;
mod health;
mod manager;
mod planner;
mod progress;
mod runner;
mod supervisor;
mod types;

pub use checksum::{bytes_md5, file_md5, range_md5};
pub use config::{DEFAULT_CHUNK_SIZE, StoreConfig, TransferConfig};
pub use error::TransferError;
pub use executor::{chunk_artifact_path, copy_chunk, verify_artifact};
pub use ferryman_store::{ChunkStatus, TaskStatus};
pub use manager::TransferManager;
pub use planner::{ChunkSpec, plan_chunks};
pub use progress::SpeedCalculator;
pub use types::{
    ChunkState, CompletionCallback, ProgressCallback, TaskState, TransferSnapshot,
};
