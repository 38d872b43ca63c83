use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ferryman_store::{ChunkStatus, StatusStore, TaskStatus};
use tracing::{debug, info, warn};

use crate::checksum::file_md5;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::health;
use crate::planner::plan_chunks;
use crate::runner::{RunOutcome, TaskRunner};
use crate::supervisor::{CHUNK_ACTIVITY_WINDOW, Supervisor};
use crate::types::{ChunkState, CompletionCallback, ProgressCallback, TaskSlot, TaskState, TransferSnapshot};

/// Lock-free engine counters; the health and statistics reports read these
/// without taking any lock.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub active_transfers: AtomicU64,
    pub total_transfers: AtomicU64,
    pub completed_transfers: AtomicU64,
    pub failed_transfers: AtomicU64,
    pub total_bytes_transferred: AtomicU64,
    pub zombie_tasks_cleaned: AtomicU64,
    pub last_heartbeat: AtomicI64,
    pub heartbeat_running: AtomicBool,
}

/// State shared between the facade, the worker pool, and the supervisor.
pub(crate) struct ManagerInner {
    pub(crate) config: RwLock<TransferConfig>,
    pub(crate) store: RwLock<Option<Arc<StatusStore>>>,
    pub(crate) tasks: Mutex<HashMap<String, Arc<TaskSlot>>>,
    pub(crate) queue: Mutex<VecDeque<String>>,
    pub(crate) queue_cv: Condvar,
    pub(crate) shutdown: AtomicBool,
    pub(crate) initialized: AtomicBool,
    pub(crate) stats: Stats,
    pub(crate) started_at: Instant,
    pub(crate) health_lock: Mutex<()>,
}

impl ManagerInner {
    fn new(config: TransferConfig) -> Self {
        Self {
            config: RwLock::new(config),
            store: RwLock::new(None),
            tasks: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            stats: Stats::default(),
            started_at: Instant::now(),
            health_lock: Mutex::new(()),
        }
    }

    pub(crate) fn store(&self) -> Result<Arc<StatusStore>, TransferError> {
        self.store
            .read()
            .unwrap()
            .clone()
            .ok_or(TransferError::NotInitialized)
    }

    fn slot(&self, task_id: &str) -> Option<Arc<TaskSlot>> {
        self.tasks.lock().unwrap().get(task_id).cloned()
    }

    fn enqueue(&self, task_id: &str) {
        self.queue.lock().unwrap().push_back(task_id.to_string());
        self.queue_cv.notify_one();
    }

    /// Marks a task paused in memory and in the store. Cancellation routes
    /// here too: on-disk progress is always preserved for resumption.
    ///
    /// Membership is tested under the map lock, which is released before the
    /// store update; holding it across store calls would invert the lock
    /// order against workers inside store operations.
    pub(crate) fn pause_task(&self, task_id: &str) -> Result<(), TransferError> {
        let slot = self
            .slot(task_id)
            .ok_or_else(|| TransferError::NotFound(task_id.to_string()))?;
        slot.set_status(TaskStatus::Paused);
        let db_task_id = slot.db_task_id();
        self.store()?
            .update_task_status(db_task_id, TaskStatus::Paused, "")?;
        info!(task_id, "pause requested; worker stops at the next chunk boundary");
        Ok(())
    }

    /// Tasks in DOWNLOADING whose run is older than `zombie_timeout` and
    /// whose chunks have shown no activity within `activity_window`.
    pub(crate) fn detect_zombies(
        &self,
        zombie_timeout: Duration,
        activity_window: Duration,
    ) -> Vec<String> {
        let now = Instant::now();
        let tasks = self.tasks.lock().unwrap();
        tasks
            .iter()
            .filter_map(|(task_id, slot)| {
                let s = slot.lock();
                if s.status != TaskStatus::Downloading {
                    return None;
                }
                if now.duration_since(s.start_time) <= zombie_timeout {
                    return None;
                }
                let has_active_chunk = s.chunks.iter().any(|c| {
                    c.status == ChunkStatus::Downloading
                        && now.duration_since(c.last_update) < activity_window
                });
                if has_active_chunk {
                    None
                } else {
                    Some(task_id.clone())
                }
            })
            .collect()
    }

    /// Cancels every detected zombie (a pause request, so progress survives)
    /// and returns how many were reaped.
    pub(crate) fn cleanup_zombies(&self) -> usize {
        let zombie_timeout = self.config.read().unwrap().zombie_timeout;
        let zombies = self.detect_zombies(zombie_timeout, CHUNK_ACTIVITY_WINDOW);
        let mut cleaned = 0;
        for task_id in zombies {
            warn!(task_id, "zombie transfer detected; requesting pause");
            if self.pause_task(&task_id).is_ok() {
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            self.stats
                .zombie_tasks_cleaned
                .fetch_add(cleaned as u64, Ordering::Relaxed);
        }
        cleaned
    }

    fn process_task(&self, task_id: &str) {
        let Some(slot) = self.slot(task_id) else {
            warn!(task_id, "dequeued task is no longer tracked");
            return;
        };
        let Ok(store) = self.store() else {
            return;
        };
        if !slot.try_begin_run() {
            debug!(task_id, "task already running; dropping duplicate dequeue");
            return;
        }
        let verify_checksum = self.config.read().unwrap().enable_integrity_check;

        self.stats.active_transfers.fetch_add(1, Ordering::Relaxed);
        let runner = TaskRunner {
            store: &store,
            shutdown: &self.shutdown,
            verify_checksum,
            bytes_transferred: &self.stats.total_bytes_transferred,
        };
        let outcome = runner.run(&slot);
        slot.end_run();
        self.stats.active_transfers.fetch_sub(1, Ordering::Relaxed);

        match outcome {
            RunOutcome::Completed => {
                self.stats.completed_transfers.fetch_add(1, Ordering::Relaxed);
            }
            RunOutcome::Failed => {
                self.stats.failed_transfers.fetch_add(1, Ordering::Relaxed);
            }
            RunOutcome::Paused => {}
        }
    }
}

fn worker_loop(inner: Arc<ManagerInner>) {
    debug!("transfer worker started");
    loop {
        let task_id = {
            let mut queue = inner.queue.lock().unwrap();
            loop {
                if inner.shutdown.load(Ordering::SeqCst) {
                    debug!("transfer worker exiting");
                    return;
                }
                if let Some(id) = queue.pop_front() {
                    break id;
                }
                queue = inner.queue_cv.wait(queue).unwrap();
            }
        };
        inner.process_task(&task_id);
    }
}

/// Public facade of the transfer engine.
///
/// Owns the worker pool, the task queue, the in-memory task map, and the
/// heartbeat supervisor. All operations are safe to call from any thread.
pub struct TransferManager {
    inner: Arc<ManagerInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl TransferManager {
    /// Creates an engine with the given configuration. No threads run and no
    /// database is opened until [`initialize`](Self::initialize).
    pub fn new(config: TransferConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner::new(config)),
            workers: Mutex::new(Vec::new()),
            supervisor: Mutex::new(None),
        }
    }

    /// Opens the store, logs unfinished tasks, spawns the worker pool, and
    /// starts the supervisor. Idempotent.
    ///
    /// Unfinished tasks found in the store are only reported; they re-enter
    /// the engine when the caller issues `start_transfer` with the same id
    /// and paths again.
    pub fn initialize(&self) -> Result<(), TransferError> {
        if self.inner.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        let config = self.inner.config.read().unwrap().clone();
        let store = Arc::new(StatusStore::open(&config.store)?);

        match store.get_incomplete_tasks() {
            Ok(tasks) => {
                for task in &tasks {
                    let done = store.completed_bytes(task.db_task_id).unwrap_or(0);
                    info!(
                        db_task_id = task.db_task_id,
                        file = %task.file_name,
                        status = task.status.as_str(),
                        completed_bytes = done,
                        "unfinished transfer in store; waiting for restart"
                    );
                }
                info!(count = tasks.len(), "recovery check complete");
            }
            // Recovery reporting is best-effort; the engine still comes up.
            Err(e) => warn!(error = %e, "failed to read unfinished transfers"),
        }

        *self.inner.store.write().unwrap() = Some(store);
        self.inner.shutdown.store(false, Ordering::SeqCst);

        let mut workers = self.workers.lock().unwrap();
        for _ in 0..config.worker_threads {
            let inner = Arc::clone(&self.inner);
            workers.push(std::thread::spawn(move || worker_loop(inner)));
        }

        *self.supervisor.lock().unwrap() = Some(Supervisor::start(Arc::clone(&self.inner)));
        self.inner.initialized.store(true, Ordering::SeqCst);
        info!(workers = config.worker_threads, "transfer manager initialized");
        Ok(())
    }

    /// Stops the supervisor, wakes and joins all workers, and clears the
    /// in-memory maps. Idempotent. A worker mid-task observes the shutdown
    /// flag at its next chunk boundary and fails that run as interrupted.
    pub fn shutdown(&self) {
        if !self.inner.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("shutting down transfer manager");

        if let Some(supervisor) = self.supervisor.lock().unwrap().take() {
            supervisor.stop();
        }

        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.queue_cv.notify_all();
        let workers: Vec<_> = self.workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }

        self.inner.tasks.lock().unwrap().clear();
        self.inner.queue.lock().unwrap().clear();
        info!("transfer manager shut down");
    }

    /// Admits a transfer task.
    ///
    /// - A task known in memory and PAUSED gets the callbacks reattached and
    ///   is re-enqueued.
    /// - A task known in memory in any other state is rejected with
    ///   [`TransferError::AlreadyExists`].
    /// - A task unknown to memory whose source path has an unfinished row in
    ///   the store is reattached from durable state: chunk statuses and
    ///   digests are reloaded and already-completed chunks are not re-copied.
    /// - Otherwise the task is planned, persisted, and enqueued.
    pub fn start_transfer(
        &self,
        task_id: &str,
        source_path: &Path,
        dest_path: &Path,
        progress_cb: Option<ProgressCallback>,
        completion_cb: Option<CompletionCallback>,
    ) -> Result<(), TransferError> {
        if !self.inner.initialized.load(Ordering::SeqCst) {
            return Err(TransferError::NotInitialized);
        }
        let meta = std::fs::metadata(source_path)
            .map_err(|_| TransferError::SourceMissing(source_path.to_path_buf()))?;
        let file_size = meta.len();
        let store = self.inner.store()?;

        // Known in memory: only a paused task may be re-admitted.
        if let Some(slot) = self.inner.slot(task_id) {
            {
                let mut s = slot.lock();
                if s.status != TaskStatus::Paused {
                    return Err(TransferError::AlreadyExists(task_id.to_string()));
                }
                s.status = TaskStatus::Pending;
                s.progress_callback = progress_cb;
                s.completion_callback = completion_cb;
            }
            let db_task_id = slot.db_task_id();
            store.update_task_status(db_task_id, TaskStatus::Pending, "")?;
            self.inner.enqueue(task_id);
            self.inner.stats.total_transfers.fetch_add(1, Ordering::Relaxed);
            info!(task_id, "paused transfer re-admitted");
            return Ok(());
        }

        // Unknown to memory: reattach from durable state when the store still
        // tracks this source unfinished (crash recovery).
        let source_key = source_path.to_string_lossy();
        if let Some(record) = store.find_task_by_path(&source_key)? {
            if !record.status.is_terminal() {
                return self.reattach_task(
                    task_id,
                    source_path,
                    dest_path,
                    record.db_task_id,
                    record.file_size,
                    progress_cb,
                    completion_cb,
                );
            }
        }

        // Fresh task: persist, plan, enqueue.
        let (chunk_size, max_retries) = {
            let c = self.inner.config.read().unwrap();
            (c.chunk_size, c.max_retries)
        };
        let file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_key.clone().into_owned());

        let db_task_id = store
            .create_task(&source_key, &file_name, file_size, chunk_size)
            .map_err(|e| match e {
                ferryman_store::StoreError::AlreadyExists(_) => {
                    TransferError::AlreadyExists(task_id.to_string())
                }
                other => other.into(),
            })?;

        let planned = (|| {
            let plan = plan_chunks(source_path, file_size, chunk_size)?;
            for spec in &plan {
                store.update_chunk_status(
                    db_task_id,
                    spec.index,
                    ChunkStatus::Pending,
                    Some(&spec.md5_hash),
                )?;
            }
            let file_checksum = file_md5(source_path)?;
            Ok::<_, TransferError>((plan, file_checksum))
        })();
        let (plan, file_checksum) = match planned {
            Ok(v) => v,
            Err(e) => {
                // Planning failed; drop the half-created durable task.
                if let Err(del) = store.delete_task(db_task_id) {
                    warn!(db_task_id, error = %del, "failed to roll back task row");
                }
                return Err(e);
            }
        };

        let total_chunks = plan.len();
        let state = TaskState {
            task_id: task_id.to_string(),
            db_task_id,
            source_path: source_path.to_path_buf(),
            dest_path: dest_path.to_path_buf(),
            file_size,
            file_checksum,
            status: TaskStatus::Pending,
            chunks: plan.into_iter().map(ChunkState::from).collect(),
            transferred_bytes: 0,
            max_retries,
            start_time: Instant::now(),
            last_update: Instant::now(),
            error_message: String::new(),
            speed: crate::progress::SpeedCalculator::default(),
            progress_callback: progress_cb,
            completion_callback: completion_cb,
        };

        {
            let mut tasks = self.inner.tasks.lock().unwrap();
            if tasks.contains_key(task_id) {
                drop(tasks);
                if let Err(del) = store.delete_task(db_task_id) {
                    warn!(db_task_id, error = %del, "failed to roll back task row");
                }
                return Err(TransferError::AlreadyExists(task_id.to_string()));
            }
            tasks.insert(task_id.to_string(), Arc::new(TaskSlot::new(state)));
        }

        self.inner.enqueue(task_id);
        self.inner.stats.total_transfers.fetch_add(1, Ordering::Relaxed);
        info!(
            task_id,
            db_task_id,
            file_size,
            chunks = total_chunks,
            "transfer task enqueued"
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn reattach_task(
        &self,
        task_id: &str,
        source_path: &Path,
        dest_path: &Path,
        db_task_id: i64,
        file_size: u64,
        progress_cb: Option<ProgressCallback>,
        completion_cb: Option<CompletionCallback>,
    ) -> Result<(), TransferError> {
        let store = self.inner.store()?;
        let records = store.get_task_chunks(db_task_id)?;
        // Planning is deterministic, so the whole-file digest can be
        // recomputed instead of replanning the chunk layout.
        let file_checksum = file_md5(source_path)?;
        let max_retries = self.inner.config.read().unwrap().max_retries;

        let chunks: Vec<ChunkState> = records
            .iter()
            .map(|r| ChunkState {
                index: r.chunk_index,
                offset: r.offset,
                size: r.actual_size(file_size),
                md5_hash: r.md5_hash.clone(),
                // A chunk caught mid-copy by the crash cannot be trusted.
                status: if r.status == ChunkStatus::Downloading {
                    ChunkStatus::Pending
                } else {
                    r.status
                },
                retry_count: r.retry_count,
                last_update: Instant::now(),
            })
            .collect();

        let mut state = TaskState {
            task_id: task_id.to_string(),
            db_task_id,
            source_path: source_path.to_path_buf(),
            dest_path: dest_path.to_path_buf(),
            file_size,
            file_checksum,
            status: TaskStatus::Pending,
            chunks,
            transferred_bytes: 0,
            max_retries,
            start_time: Instant::now(),
            last_update: Instant::now(),
            error_message: String::new(),
            speed: crate::progress::SpeedCalculator::default(),
            progress_callback: progress_cb,
            completion_callback: completion_cb,
        };
        state.recompute_transferred();
        let transferred = state.transferred_bytes;

        {
            let mut tasks = self.inner.tasks.lock().unwrap();
            if tasks.contains_key(task_id) {
                return Err(TransferError::AlreadyExists(task_id.to_string()));
            }
            tasks.insert(task_id.to_string(), Arc::new(TaskSlot::new(state)));
        }
        store.update_task_status(db_task_id, TaskStatus::Pending, "")?;

        self.inner.enqueue(task_id);
        self.inner.stats.total_transfers.fetch_add(1, Ordering::Relaxed);
        info!(
            task_id,
            db_task_id,
            transferred_bytes = transferred,
            "reattached unfinished transfer from store"
        );
        Ok(())
    }

    /// Requests a pause. The running worker observes it at the next chunk
    /// boundary; completed chunk artifacts are retained.
    pub fn pause_transfer(&self, task_id: &str) -> Result<(), TransferError> {
        if !self.inner.initialized.load(Ordering::SeqCst) {
            return Err(TransferError::NotInitialized);
        }
        self.inner.pause_task(task_id)
    }

    /// Re-enqueues a paused task.
    pub fn resume_transfer(&self, task_id: &str) -> Result<(), TransferError> {
        if !self.inner.initialized.load(Ordering::SeqCst) {
            return Err(TransferError::NotInitialized);
        }
        let slot = self
            .inner
            .slot(task_id)
            .ok_or_else(|| TransferError::NotFound(task_id.to_string()))?;
        {
            let mut s = slot.lock();
            if s.status != TaskStatus::Paused {
                return Err(TransferError::NotPaused(task_id.to_string()));
            }
            s.status = TaskStatus::Downloading;
        }
        let db_task_id = slot.db_task_id();
        self.inner
            .store()?
            .update_task_status(db_task_id, TaskStatus::Downloading, "")?;
        self.inner.enqueue(task_id);
        info!(task_id, "transfer resumed");
        Ok(())
    }

    /// Cancels a transfer.
    ///
    /// Equivalent to [`pause_transfer`](Self::pause_transfer) by design:
    /// on-disk progress and temp artifacts are preserved so a later start
    /// with the same id resumes from the last completed chunk.
    pub fn cancel_transfer(&self, task_id: &str) -> Result<(), TransferError> {
        self.pause_transfer(task_id)
    }

    /// Progress in percent, `0.0` for an unknown id.
    pub fn get_transfer_progress(&self, task_id: &str) -> f64 {
        self.inner
            .slot(task_id)
            .map(|slot| slot.progress_percent())
            .unwrap_or(0.0)
    }

    /// Current status of a task.
    ///
    /// Returns [`TaskStatus::Failed`] for an unknown id, which makes a
    /// missing task indistinguishable from a genuinely failed one; callers
    /// that need the distinction should use
    /// [`get_transfer_info`](Self::get_transfer_info).
    pub fn get_transfer_status(&self, task_id: &str) -> TaskStatus {
        self.inner
            .slot(task_id)
            .map(|slot| slot.status())
            .unwrap_or(TaskStatus::Failed)
    }

    /// Ids of tasks in PENDING or DOWNLOADING.
    pub fn get_active_transfers(&self) -> Vec<String> {
        let tasks = self.inner.tasks.lock().unwrap();
        tasks
            .iter()
            .filter(|(_, slot)| {
                matches!(
                    slot.status(),
                    TaskStatus::Pending | TaskStatus::Downloading
                )
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn get_transfer_info(&self, task_id: &str) -> Option<TransferSnapshot> {
        self.inner.slot(task_id).map(|slot| slot.snapshot())
    }

    /// Applies to tasks created after the call.
    pub fn set_chunk_size(&self, chunk_size: u64) {
        self.inner.config.write().unwrap().chunk_size = chunk_size.max(1);
    }

    /// Applies to tasks created after the call.
    pub fn set_max_concurrent_transfers(&self, max_concurrent: u32) {
        self.inner.config.write().unwrap().max_concurrent_transfers = max_concurrent;
    }

    /// Applies to tasks created after the call.
    pub fn set_max_retries(&self, max_retries: u32) {
        self.inner.config.write().unwrap().max_retries = max_retries;
    }

    /// JSON health report; see the crate docs for the field list.
    pub fn get_health_report(&self) -> String {
        let _guard = self.inner.health_lock.lock().unwrap();
        health::health_json(&self.inner)
    }

    /// JSON transfer statistics.
    pub fn get_transfer_statistics(&self) -> String {
        let _guard = self.inner.health_lock.lock().unwrap();
        health::statistics_json(&self.inner)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Detects and cancels zombie tasks; returns how many were reaped. The
    /// supervisor runs this periodically, but it can be invoked directly.
    pub fn cleanup_zombie_tasks(&self) -> usize {
        self.inner.cleanup_zombies()
    }
}

impl Drop for TransferManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use ferryman_store::StoreConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> TransferConfig {
        TransferConfig {
            chunk_size: 1024,
            worker_threads: 2,
            store: StoreConfig::at(dir.path().join("status.db")),
            ..TransferConfig::default()
        }
    }

    #[test]
    fn operations_require_initialization() {
        let dir = TempDir::new().unwrap();
        let manager = TransferManager::new(test_config(&dir));

        let err = manager
            .start_transfer("t", Path::new("/nope"), Path::new("/out"), None, None)
            .unwrap_err();
        assert!(matches!(err, TransferError::NotInitialized));
        assert!(matches!(
            manager.pause_transfer("t").unwrap_err(),
            TransferError::NotInitialized
        ));
        assert!(matches!(
            manager.resume_transfer("t").unwrap_err(),
            TransferError::NotInitialized
        ));
    }

    #[test]
    fn initialize_and_shutdown_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = TransferManager::new(test_config(&dir));
        manager.initialize().unwrap();
        manager.initialize().unwrap();
        manager.shutdown();
        manager.shutdown();
    }

    #[test]
    fn unknown_task_queries_have_defined_answers() {
        let dir = TempDir::new().unwrap();
        let manager = TransferManager::new(test_config(&dir));
        manager.initialize().unwrap();

        assert_eq!(manager.get_transfer_progress("ghost"), 0.0);
        assert_eq!(manager.get_transfer_status("ghost"), TaskStatus::Failed);
        assert!(manager.get_transfer_info("ghost").is_none());
        assert!(matches!(
            manager.pause_transfer("ghost").unwrap_err(),
            TransferError::NotFound(_)
        ));
        manager.shutdown();
    }

    #[test]
    fn missing_source_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = TransferManager::new(test_config(&dir));
        manager.initialize().unwrap();

        let err = manager
            .start_transfer(
                "t",
                &dir.path().join("missing.bin"),
                &dir.path().join("out.bin"),
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, TransferError::SourceMissing(_)));
        manager.shutdown();
    }

    #[test]
    fn health_report_shape_is_stable() {
        let dir = TempDir::new().unwrap();
        let manager = TransferManager::new(test_config(&dir));
        manager.initialize().unwrap();

        let health: serde_json::Value =
            serde_json::from_str(&manager.get_health_report()).unwrap();
        assert_eq!(health["system_status"], "running");
        assert_eq!(health["worker_threads"], 2);
        assert!(health["memory_usage"]["active_tasks"].is_number());
        assert!(health["memory_usage"]["queue_size"].is_number());

        let stats: serde_json::Value =
            serde_json::from_str(&manager.get_transfer_statistics()).unwrap();
        assert_eq!(stats["total_transfers"], 0);
        assert_eq!(stats["success_rate"], 0.0);
        assert_eq!(stats["configuration"]["chunk_size"], 1024);

        manager.shutdown();
        let health: serde_json::Value =
            serde_json::from_str(&manager.get_health_report()).unwrap();
        assert_eq!(health["system_status"], "stopped");
    }

    #[test]
    fn config_setters_affect_new_tasks_only() {
        let dir = TempDir::new().unwrap();
        let manager = TransferManager::new(test_config(&dir));
        manager.set_chunk_size(2048);
        manager.set_max_retries(7);
        manager.set_max_concurrent_transfers(9);

        let config = manager.inner.config.read().unwrap();
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.max_concurrent_transfers, 9);
    }

    #[test]
    fn zombie_detection_requires_downloading_and_silence() {
        let dir = TempDir::new().unwrap();
        let manager = TransferManager::new(test_config(&dir));
        let inner = &manager.inner;

        let old = Instant::now() - Duration::from_secs(3600);
        let mk = |status: TaskStatus, chunk_status: ChunkStatus, chunk_age: Duration| {
            let mut state = TaskState {
                task_id: String::new(),
                db_task_id: 1,
                source_path: "/s".into(),
                dest_path: "/d".into(),
                file_size: 10,
                file_checksum: String::new(),
                status,
                chunks: vec![crate::types::ChunkState {
                    index: 0,
                    offset: 0,
                    size: 10,
                    md5_hash: String::new(),
                    status: chunk_status,
                    retry_count: 0,
                    last_update: Instant::now() - chunk_age,
                }],
                transferred_bytes: 0,
                max_retries: 0,
                start_time: old,
                last_update: old,
                error_message: String::new(),
                speed: crate::progress::SpeedCalculator::default(),
                progress_callback: None,
                completion_callback: None,
            };
            state.recompute_transferred();
            Arc::new(TaskSlot::new(state))
        };

        {
            let mut tasks = inner.tasks.lock().unwrap();
            // Stale and silent: zombie.
            tasks.insert(
                "silent".into(),
                mk(TaskStatus::Downloading, ChunkStatus::Failed, Duration::from_secs(600)),
            );
            // Stale but with a recently active chunk: alive.
            tasks.insert(
                "active".into(),
                mk(TaskStatus::Downloading, ChunkStatus::Downloading, Duration::ZERO),
            );
            // Silent but paused: not a zombie.
            tasks.insert(
                "paused".into(),
                mk(TaskStatus::Paused, ChunkStatus::Failed, Duration::from_secs(600)),
            );
        }

        let zombies =
            inner.detect_zombies(Duration::from_secs(1800), Duration::from_secs(300));
        assert_eq!(zombies, vec!["silent".to_string()]);
    }
}
