use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use ferryman_store::{ChunkStatus, TaskStatus};

use crate::planner::ChunkSpec;
use crate::progress::SpeedCalculator;

/// Progress callback: `(task_id, transferred_bytes, total_bytes, percent)`.
/// Fires after each successfully transferred chunk.
pub type ProgressCallback = Arc<dyn Fn(&str, u64, u64, f64) + Send + Sync>;

/// Completion callback: `(task_id, success, error_message)`. Fires exactly
/// once per terminal run; it does not fire when a task pauses.
pub type CompletionCallback = Arc<dyn Fn(&str, bool, &str) + Send + Sync>;

/// In-memory state of one chunk.
#[derive(Debug, Clone)]
pub struct ChunkState {
    pub index: u32,
    /// Byte offset from the start of the source.
    pub offset: u64,
    /// Actual byte count; equals the nominal chunk size except possibly for
    /// the final chunk.
    pub size: u64,
    /// Hex MD5 of the source byte range, fixed at planning time.
    pub md5_hash: String,
    pub status: ChunkStatus,
    pub retry_count: u32,
    /// Last local activity on this chunk; drives zombie detection.
    pub last_update: Instant,
}

impl From<ChunkSpec> for ChunkState {
    fn from(spec: ChunkSpec) -> Self {
        Self {
            index: spec.index,
            offset: spec.offset,
            size: spec.size,
            md5_hash: spec.md5_hash,
            status: ChunkStatus::Pending,
            retry_count: 0,
            last_update: Instant::now(),
        }
    }
}

/// In-memory record of one transfer task, including its owned callbacks.
pub struct TaskState {
    /// Caller-supplied opaque id.
    pub task_id: String,
    /// Id assigned by the status store.
    pub db_task_id: i64,
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub file_size: u64,
    /// Hex MD5 of the whole source, computed at planning time.
    pub file_checksum: String,
    pub status: TaskStatus,
    pub chunks: Vec<ChunkState>,
    pub transferred_bytes: u64,
    /// Retry budget captured from configuration at creation.
    pub max_retries: u32,
    pub start_time: Instant,
    pub last_update: Instant,
    pub error_message: String,
    /// Sliding-window transfer speed over completed chunks.
    pub speed: SpeedCalculator,
    pub progress_callback: Option<ProgressCallback>,
    pub completion_callback: Option<CompletionCallback>,
}

impl std::fmt::Debug for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskState")
            .field("task_id", &self.task_id)
            .field("db_task_id", &self.db_task_id)
            .field("status", &self.status)
            .field("transferred_bytes", &self.transferred_bytes)
            .finish_non_exhaustive()
    }
}

impl TaskState {
    pub fn progress_percent(&self) -> f64 {
        if self.file_size > 0 {
            self.transferred_bytes as f64 / self.file_size as f64 * 100.0
        } else {
            0.0
        }
    }

    /// Re-establishes `transferred_bytes` from chunk statuses.
    pub fn recompute_transferred(&mut self) {
        self.transferred_bytes = self
            .chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Completed)
            .map(|c| c.size)
            .sum();
    }
}

/// Shared slot in the task map.
///
/// The map hands out `Arc<TaskSlot>` clones so that workers and the facade
/// mutate task state without holding the map lock; the slot's own mutex is
/// never held across store calls or chunk I/O.
pub struct TaskSlot {
    state: Mutex<TaskState>,
    running: std::sync::atomic::AtomicBool,
}

impl TaskSlot {
    pub fn new(state: TaskState) -> Self {
        Self {
            state: Mutex::new(state),
            running: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Claims the slot for a run; a task is executed by at most one worker at
    /// a time, so a duplicate dequeue is dropped by the caller.
    pub fn try_begin_run(&self) -> bool {
        !self.running.swap(true, std::sync::atomic::Ordering::SeqCst)
    }

    pub fn end_run(&self) {
        self.running.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap()
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn set_status(&self, status: TaskStatus) {
        let mut s = self.lock();
        s.status = status;
        s.last_update = Instant::now();
    }

    pub fn db_task_id(&self) -> i64 {
        self.lock().db_task_id
    }

    pub fn progress_percent(&self) -> f64 {
        self.lock().progress_percent()
    }

    pub fn attach_callbacks(
        &self,
        progress: Option<ProgressCallback>,
        completion: Option<CompletionCallback>,
    ) {
        let mut s = self.lock();
        s.progress_callback = progress;
        s.completion_callback = completion;
    }

    pub fn snapshot(&self) -> TransferSnapshot {
        let s = self.lock();
        let remaining = s.file_size.saturating_sub(s.transferred_bytes);
        TransferSnapshot {
            bytes_per_second: s.speed.bytes_per_second(),
            eta_seconds: s.speed.eta(remaining).map(|d| d.as_secs()),
            task_id: s.task_id.clone(),
            db_task_id: s.db_task_id,
            source_path: s.source_path.clone(),
            dest_path: s.dest_path.clone(),
            file_size: s.file_size,
            file_checksum: s.file_checksum.clone(),
            status: s.status,
            total_chunks: s.chunks.len() as u32,
            completed_chunks: s
                .chunks
                .iter()
                .filter(|c| c.status == ChunkStatus::Completed)
                .count() as u32,
            transferred_bytes: s.transferred_bytes,
            percent: s.progress_percent(),
            error_message: s.error_message.clone(),
        }
    }
}

/// Read-only view of a task for queries.
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub task_id: String,
    pub db_task_id: i64,
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub file_size: u64,
    pub file_checksum: String,
    pub status: TaskStatus,
    pub total_chunks: u32,
    pub completed_chunks: u32,
    pub transferred_bytes: u64,
    pub percent: f64,
    pub bytes_per_second: f64,
    /// Seconds left at the current speed; `None` while speed is unknown.
    pub eta_seconds: Option<u64>,
    pub error_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> TaskState {
        TaskState {
            task_id: "t1".into(),
            db_task_id: 1,
            source_path: "/src/a".into(),
            dest_path: "/dst/a".into(),
            file_size: 100,
            file_checksum: String::new(),
            status: TaskStatus::Pending,
            chunks: vec![
                ChunkState {
                    index: 0,
                    offset: 0,
                    size: 60,
                    md5_hash: String::new(),
                    status: ChunkStatus::Completed,
                    retry_count: 0,
                    last_update: Instant::now(),
                },
                ChunkState {
                    index: 1,
                    offset: 60,
                    size: 40,
                    md5_hash: String::new(),
                    status: ChunkStatus::Pending,
                    retry_count: 0,
                    last_update: Instant::now(),
                },
            ],
            transferred_bytes: 0,
            max_retries: 3,
            start_time: Instant::now(),
            last_update: Instant::now(),
            error_message: String::new(),
            speed: SpeedCalculator::default(),
            progress_callback: None,
            completion_callback: None,
        }
    }

    #[test]
    fn recompute_transferred_sums_completed_chunks() {
        let mut state = sample_state();
        state.recompute_transferred();
        assert_eq!(state.transferred_bytes, 60);
        assert_eq!(state.progress_percent(), 60.0);
    }

    #[test]
    fn zero_size_file_reports_zero_percent() {
        let mut state = sample_state();
        state.file_size = 0;
        state.chunks.clear();
        state.recompute_transferred();
        assert_eq!(state.progress_percent(), 0.0);
    }

    #[test]
    fn snapshot_counts_completed_chunks() {
        let slot = TaskSlot::new(sample_state());
        slot.lock().recompute_transferred();
        let snap = slot.snapshot();
        assert_eq!(snap.total_chunks, 2);
        assert_eq!(snap.completed_chunks, 1);
        assert_eq!(snap.transferred_bytes, 60);
    }
}
