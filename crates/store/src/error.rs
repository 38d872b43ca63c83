use std::path::PathBuf;

/// Errors produced by the status store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open status database {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error("failed to create status database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A task row already exists for this source path.
    #[error("task already exists for source path: {0}")]
    AlreadyExists(String),

    /// The database stayed busy/locked through every retry attempt.
    #[error("status database busy after {attempts} attempts")]
    Busy { attempts: u32 },

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
}
