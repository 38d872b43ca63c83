use std::path::PathBuf;

use ferryman_store::StoreError;

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer manager is not initialized")]
    NotInitialized,

    /// A task with this id exists and is not paused.
    #[error("transfer already exists: {0}")]
    AlreadyExists(String),

    #[error("transfer not found: {0}")]
    NotFound(String),

    /// Resume was requested for a task that is not in the paused state.
    #[error("transfer is not paused: {0}")]
    NotPaused(String),

    #[error("source file does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to seek in {path}: {source}")]
    Seek {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The source or an artifact ended before the expected byte count.
    #[error("short read from {path}: expected {expected} bytes, got {actual}")]
    ShortRead {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("size mismatch for {path}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("transfer interrupted by shutdown")]
    Interrupted,

    /// A chunk failed `max_retries + 1` consecutive attempts.
    #[error("chunk transfer failed: {chunk_index}")]
    ExhaustedRetries { chunk_index: u32, attempts: u32 },
}
