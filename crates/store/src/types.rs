/// Lifecycle state of a transfer task.
///
/// `Paused` is quasi-terminal: the current run stops at the next chunk
/// boundary, but the task can re-enter `Downloading` via resume or a new
/// start with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Downloading => "DOWNLOADING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "DOWNLOADING" => Some(TaskStatus::Downloading),
            "PAUSED" => Some(TaskStatus::Paused),
            "COMPLETED" => Some(TaskStatus::Completed),
            "FAILED" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states never re-enter the queue.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// State of a single chunk within a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkStatus::Pending => "PENDING",
            ChunkStatus::Downloading => "DOWNLOADING",
            ChunkStatus::Completed => "COMPLETED",
            ChunkStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ChunkStatus::Pending),
            "DOWNLOADING" => Some(ChunkStatus::Downloading),
            "COMPLETED" => Some(ChunkStatus::Completed),
            "FAILED" => Some(ChunkStatus::Failed),
            _ => None,
        }
    }
}

/// One row of `transfer_tasks`.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Monotonic integer id assigned by the store on creation.
    pub db_task_id: i64,
    /// Source path; UNIQUE across live tasks.
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    /// Nominal chunk size the task was planned with.
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub status: TaskStatus,
    pub created_at: String,
    pub updated_at: String,
    pub last_heartbeat: String,
    pub error_message: String,
}

/// One row of `transfer_chunks`.
///
/// `chunk_size` is the nominal size; the actual size of the final chunk is
/// derived from the owning task's `file_size` and is never stored.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_id: i64,
    pub db_task_id: i64,
    pub chunk_index: u32,
    pub chunk_size: u64,
    pub offset: u64,
    pub status: ChunkStatus,
    /// Hex MD5 of the source byte range; write-once, set at planning time.
    pub md5_hash: String,
    pub retry_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl ChunkRecord {
    /// Actual byte count of this chunk given the owning file's size.
    pub fn actual_size(&self, file_size: u64) -> u64 {
        self.chunk_size.min(file_size.saturating_sub(self.offset))
    }
}

/// Aggregate task counts for statistics and maintenance tooling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
}
