use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ferryman_store::{ChunkStatus, StatusStore, TaskStatus};
use tracing::{debug, info, warn};

use crate::checksum::{IO_BUF_SIZE, file_md5};
use crate::error::TransferError;
use crate::executor::{chunk_artifact_path, copy_chunk, verify_artifact};
use crate::types::TaskSlot;

/// How a single run of a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Completed,
    Failed,
    /// The task observed a pause request at a chunk boundary; chunk state and
    /// temp artifacts are retained for resumption.
    Paused,
}

/// Drives one task end to end: transfer chunks sequentially, merge, verify,
/// finalize. Parallelism is across tasks, never within one.
pub(crate) struct TaskRunner<'a> {
    pub store: &'a StatusStore,
    pub shutdown: &'a AtomicBool,
    pub verify_checksum: bool,
    pub bytes_transferred: &'a AtomicU64,
}

impl TaskRunner<'_> {
    pub fn run(&self, slot: &TaskSlot) -> RunOutcome {
        let (task_id, db_task_id, source, dest, file_size, file_checksum, max_retries, total) = {
            let mut s = slot.lock();
            s.status = TaskStatus::Downloading;
            s.start_time = Instant::now();
            s.last_update = Instant::now();
            s.error_message.clear();
            s.recompute_transferred();
            s.speed.reset();
            (
                s.task_id.clone(),
                s.db_task_id,
                s.source_path.clone(),
                s.dest_path.clone(),
                s.file_size,
                s.file_checksum.clone(),
                s.max_retries,
                s.chunks.len(),
            )
        };
        self.record_task_status(db_task_id, TaskStatus::Downloading, "");
        info!(task_id, chunks = total, "transfer run started");

        // Temp artifacts live next to the destination, so its parent
        // directory must exist before the first chunk is written.
        let mut failure: Option<String> = ensure_parent_dir(&dest).err().map(|e| e.to_string());

        for i in 0..total {
            if failure.is_some() {
                break;
            }
            // Safepoint: cooperative signals are observed between chunks.
            if slot.status() == TaskStatus::Paused {
                info!(task_id, "pause observed at chunk boundary; progress retained");
                return RunOutcome::Paused;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                failure = Some(TransferError::Interrupted.to_string());
                break;
            }

            let chunk = slot.lock().chunks[i].clone();
            let artifact = chunk_artifact_path(&dest, chunk.index);

            if chunk.status == ChunkStatus::Completed {
                match verify_artifact(&artifact, chunk.size, &chunk.md5_hash, self.verify_checksum)
                {
                    Ok(()) => continue,
                    Err(e) => {
                        warn!(
                            task_id,
                            chunk = chunk.index,
                            error = %e,
                            "completed chunk failed re-verification; retransferring"
                        );
                        {
                            let mut s = slot.lock();
                            s.chunks[i].status = ChunkStatus::Pending;
                            s.transferred_bytes = s.transferred_bytes.saturating_sub(chunk.size);
                        }
                        self.record_chunk_status(db_task_id, chunk.index, ChunkStatus::Pending);
                    }
                }
            }

            match self.transfer_with_retries(
                slot,
                i,
                &task_id,
                db_task_id,
                &source,
                &artifact,
                max_retries,
            ) {
                Ok(()) => {
                    let (progress_cb, transferred) = {
                        let s = slot.lock();
                        (s.progress_callback.clone(), s.transferred_bytes)
                    };
                    if let Some(cb) = progress_cb {
                        let percent = if file_size > 0 {
                            transferred as f64 / file_size as f64 * 100.0
                        } else {
                            0.0
                        };
                        cb(&task_id, transferred, file_size, percent);
                    }
                }
                Err(e) => {
                    failure = Some(e.to_string());
                    break;
                }
            }
        }

        if failure.is_none() {
            if let Err(e) = self.merge_and_verify(&task_id, &dest, file_size, &file_checksum, total)
            {
                failure = Some(e.to_string());
            }
        }

        match failure {
            None => {
                slot.set_status(TaskStatus::Completed);
                self.record_task_status(db_task_id, TaskStatus::Completed, "");
                cleanup_artifacts(&dest, total);
                let completion_cb = slot.lock().completion_callback.clone();
                if let Some(cb) = completion_cb {
                    cb(&task_id, true, "");
                }
                info!(task_id, "transfer completed");
                RunOutcome::Completed
            }
            Some(message) => {
                {
                    let mut s = slot.lock();
                    s.status = TaskStatus::Failed;
                    s.error_message = message.clone();
                    s.last_update = Instant::now();
                }
                self.record_task_status(db_task_id, TaskStatus::Failed, &message);
                cleanup_artifacts(&dest, total);
                let completion_cb = slot.lock().completion_callback.clone();
                if let Some(cb) = completion_cb {
                    cb(&task_id, false, &message);
                }
                warn!(task_id, error = message, "transfer failed");
                RunOutcome::Failed
            }
        }
    }

    /// Transfers one chunk with the task's retry budget; total attempts are
    /// `max_retries + 1` with exponential backoff between them.
    #[allow(clippy::too_many_arguments)]
    fn transfer_with_retries(
        &self,
        slot: &TaskSlot,
        i: usize,
        task_id: &str,
        db_task_id: i64,
        source: &Path,
        artifact: &Path,
        max_retries: u32,
    ) -> Result<(), TransferError> {
        let (index, offset, size, md5_hash) = {
            let s = slot.lock();
            let c = &s.chunks[i];
            (c.index, c.offset, c.size, c.md5_hash.clone())
        };

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let delay = Duration::from_secs(1u64 << (attempt - 1).min(31));
                debug!(task_id, chunk = index, attempt, "retrying chunk transfer");
                std::thread::sleep(delay);
            }

            {
                let mut s = slot.lock();
                s.chunks[i].status = ChunkStatus::Downloading;
                s.chunks[i].last_update = Instant::now();
            }
            self.record_chunk_status(db_task_id, index, ChunkStatus::Downloading);

            let result = copy_chunk(source, artifact, offset, size).and_then(|_| {
                verify_artifact(artifact, size, &md5_hash, self.verify_checksum)
            });

            match result {
                Ok(()) => {
                    {
                        let mut s = slot.lock();
                        s.chunks[i].status = ChunkStatus::Completed;
                        s.chunks[i].last_update = Instant::now();
                        s.transferred_bytes += size;
                        s.last_update = Instant::now();
                        s.speed.record(size);
                    }
                    if let Err(e) = self.store.update_chunk_status(
                        db_task_id,
                        index,
                        ChunkStatus::Completed,
                        Some(&md5_hash),
                    ) {
                        warn!(task_id, chunk = index, error = %e, "failed to persist chunk state");
                    }
                    self.bytes_transferred.fetch_add(size, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    warn!(task_id, chunk = index, attempt, error = %e, "chunk transfer attempt failed");
                    {
                        let mut s = slot.lock();
                        s.chunks[i].status = ChunkStatus::Failed;
                        s.chunks[i].retry_count += 1;
                        s.chunks[i].last_update = Instant::now();
                    }
                    self.record_chunk_status(db_task_id, index, ChunkStatus::Failed);
                    if let Err(store_err) = self.store.increment_chunk_retry(db_task_id, index) {
                        warn!(task_id, chunk = index, error = %store_err, "failed to persist retry count");
                    }
                    let _ = std::fs::remove_file(artifact);

                    if attempt >= max_retries {
                        return Err(TransferError::ExhaustedRetries {
                            chunk_index: index,
                            attempts: attempt + 1,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Concatenates the temp artifacts into the destination in chunk order,
    /// then verifies the result against the planned size and whole-file
    /// digest.
    fn merge_and_verify(
        &self,
        task_id: &str,
        dest: &Path,
        file_size: u64,
        file_checksum: &str,
        total: usize,
    ) -> Result<(), TransferError> {
        let mut out = File::create(dest).map_err(|source| TransferError::Open {
            path: dest.to_path_buf(),
            source,
        })?;
        for index in 0..total {
            let artifact = chunk_artifact_path(dest, index as u32);
            append_artifact(&mut out, dest, &artifact)?;
        }
        drop(out);
        debug!(task_id, dest = %dest.display(), "chunks merged");

        let meta = std::fs::metadata(dest).map_err(|source| TransferError::Open {
            path: dest.to_path_buf(),
            source,
        })?;
        if meta.len() != file_size {
            return Err(TransferError::SizeMismatch {
                path: dest.to_path_buf(),
                expected: file_size,
                actual: meta.len(),
            });
        }
        if self.verify_checksum {
            let actual = file_md5(dest)?;
            if actual != file_checksum {
                return Err(TransferError::ChecksumMismatch {
                    path: dest.to_path_buf(),
                    expected: file_checksum.to_string(),
                    actual,
                });
            }
        }
        debug!(task_id, "final verification passed");
        Ok(())
    }

    /// Store bookkeeping failures are logged, never fatal to the run.
    fn record_task_status(&self, db_task_id: i64, status: TaskStatus, message: &str) {
        if let Err(e) = self.store.update_task_status(db_task_id, status, message) {
            warn!(db_task_id, error = %e, "failed to persist task status");
        }
    }

    fn record_chunk_status(&self, db_task_id: i64, index: u32, status: ChunkStatus) {
        if let Err(e) = self.store.update_chunk_status(db_task_id, index, status, None) {
            warn!(db_task_id, chunk = index, error = %e, "failed to persist chunk status");
        }
    }
}

fn ensure_parent_dir(dest: &Path) -> Result<(), TransferError> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| TransferError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    Ok(())
}

fn append_artifact(out: &mut File, dest: &Path, artifact: &Path) -> Result<(), TransferError> {
    let mut input = File::open(artifact).map_err(|source| TransferError::Open {
        path: artifact.to_path_buf(),
        source,
    })?;
    let mut buf = [0u8; IO_BUF_SIZE];
    loop {
        let n = input.read(&mut buf).map_err(|source| TransferError::Read {
            path: artifact.to_path_buf(),
            source,
        })?;
        if n == 0 {
            return Ok(());
        }
        out.write_all(&buf[..n])
            .map_err(|source| TransferError::Write {
                path: dest.to_path_buf(),
                source,
            })?;
    }
}

/// Removes every temp artifact of the task; only terminal runs call this, a
/// paused run keeps its scene intact.
fn cleanup_artifacts(dest: &Path, total: usize) {
    for index in 0..total {
        let artifact = chunk_artifact_path(dest, index as u32);
        match std::fs::remove_file(&artifact) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %artifact.display(), error = %e, "failed to remove temp artifact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::bytes_md5;
    use crate::planner::plan_chunks;
    use crate::types::{ChunkState, TaskState};
    use ferryman_store::{StatusStore, StoreConfig};
    use std::io::Write as _;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: StatusStore,
        slot: Arc<TaskSlot>,
        source: std::path::PathBuf,
        dest: std::path::PathBuf,
        data: Vec<u8>,
    }

    fn fixture(data: Vec<u8>, chunk_size: u64, max_retries: u32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        let dest = dir.path().join("out/dest.bin");
        let mut f = File::create(&source).unwrap();
        f.write_all(&data).unwrap();
        drop(f);

        let store = StatusStore::open(&StoreConfig::at(dir.path().join("status.db"))).unwrap();
        let db_task_id = store
            .create_task(&source.to_string_lossy(), "source.bin", data.len() as u64, chunk_size)
            .unwrap();
        let plan = plan_chunks(&source, data.len() as u64, chunk_size).unwrap();
        for spec in &plan {
            store
                .update_chunk_status(
                    db_task_id,
                    spec.index,
                    ferryman_store::ChunkStatus::Pending,
                    Some(&spec.md5_hash),
                )
                .unwrap();
        }

        let state = TaskState {
            task_id: "t1".into(),
            db_task_id,
            source_path: source.clone(),
            dest_path: dest.clone(),
            file_size: data.len() as u64,
            file_checksum: bytes_md5(&data),
            status: TaskStatus::Pending,
            chunks: plan.into_iter().map(ChunkState::from).collect(),
            transferred_bytes: 0,
            max_retries,
            start_time: Instant::now(),
            last_update: Instant::now(),
            error_message: String::new(),
            speed: crate::progress::SpeedCalculator::default(),
            progress_callback: None,
            completion_callback: None,
        };

        Fixture {
            _dir: dir,
            store,
            slot: Arc::new(TaskSlot::new(state)),
            source,
            dest,
            data,
        }
    }

    fn run(fx: &Fixture) -> RunOutcome {
        let shutdown = AtomicBool::new(false);
        let bytes = AtomicU64::new(0);
        let runner = TaskRunner {
            store: &fx.store,
            shutdown: &shutdown,
            verify_checksum: true,
            bytes_transferred: &bytes,
        };
        runner.run(&fx.slot)
    }

    #[test]
    fn completes_a_multi_chunk_task() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let fx = fixture(data.clone(), 4_096, 3);

        let completions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completions);
        fx.slot.attach_callbacks(
            None,
            Some(Arc::new(move |_, success, _| {
                assert!(success);
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert_eq!(run(&fx), RunOutcome::Completed);
        assert_eq!(std::fs::read(&fx.dest).unwrap(), data);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(fx.slot.status(), TaskStatus::Completed);

        // No temp artifacts remain.
        for i in 0..3 {
            assert!(!chunk_artifact_path(&fx.dest, i).exists());
        }
        // Durable state agrees.
        let task = fx.store.get_task(fx.slot.db_task_id()).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(
            fx.store.completed_bytes(fx.slot.db_task_id()).unwrap(),
            10_000
        );
    }

    #[test]
    fn zero_byte_task_produces_an_empty_destination() {
        let fx = fixture(Vec::new(), 4_096, 0);
        assert_eq!(run(&fx), RunOutcome::Completed);
        assert_eq!(std::fs::read(&fx.dest).unwrap().len(), 0);
        assert_eq!(
            crate::checksum::file_md5(&fx.dest).unwrap(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn pause_at_chunk_boundary_retains_progress_and_fires_no_completion() {
        let data: Vec<u8> = vec![0x41; 10_000];
        let fx = fixture(data, 2_000, 0);

        let completions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completions);
        let pauser = Arc::clone(&fx.slot);
        fx.slot.attach_callbacks(
            Some(Arc::new(move |_, _, _, percent| {
                if percent >= 40.0 {
                    pauser.set_status(TaskStatus::Paused);
                }
            })),
            Some(Arc::new(move |_, _, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            })),
        );

        assert_eq!(run(&fx), RunOutcome::Paused);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
        assert!(!fx.dest.exists());

        // Completed chunks kept their artifacts.
        let s = fx.slot.lock();
        let done = s
            .chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Completed)
            .count();
        assert!(done >= 2);
        for c in s.chunks.iter().filter(|c| c.status == ChunkStatus::Completed) {
            assert!(chunk_artifact_path(&fx.dest, c.index).exists());
        }
    }

    #[test]
    fn resumed_run_skips_verified_chunks_and_retransfers_corrupt_ones() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let fx = fixture(data.clone(), 2_000, 1);

        // First run: pause after at least three chunks.
        let pauser = Arc::clone(&fx.slot);
        fx.slot.attach_callbacks(
            Some(Arc::new(move |_, transferred, _, _| {
                if transferred >= 6_000 {
                    pauser.set_status(TaskStatus::Paused);
                }
            })),
            None,
        );
        assert_eq!(run(&fx), RunOutcome::Paused);

        // Corrupt chunk 1's artifact by truncating one byte.
        let artifact = chunk_artifact_path(&fx.dest, 1);
        let bytes = std::fs::read(&artifact).unwrap();
        std::fs::write(&artifact, &bytes[..bytes.len() - 1]).unwrap();

        // Second run to completion.
        fx.slot.attach_callbacks(None, None);
        fx.slot.set_status(TaskStatus::Pending);
        assert_eq!(run(&fx), RunOutcome::Completed);
        assert_eq!(std::fs::read(&fx.dest).unwrap(), data);
    }

    #[test]
    fn exhausted_retries_fail_the_task_with_the_chunk_index() {
        let data = vec![0x41u8; 5_000];
        let fx = fixture(data, 2_000, 0);

        // Truncate the source after planning: every copy now short-reads.
        std::fs::write(&fx.source, b"short").unwrap();

        let messages: Arc<std::sync::Mutex<Vec<(bool, String)>>> = Arc::default();
        let sink = Arc::clone(&messages);
        fx.slot.attach_callbacks(
            None,
            Some(Arc::new(move |_, success, message| {
                sink.lock().unwrap().push((success, message.to_string()));
            })),
        );

        assert_eq!(run(&fx), RunOutcome::Failed);
        assert_eq!(fx.slot.status(), TaskStatus::Failed);

        let calls = messages.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].0);
        assert_eq!(calls[0].1, "chunk transfer failed: 0");

        // Failure cleaned the temp artifacts.
        assert!(!chunk_artifact_path(&fx.dest, 0).exists());
        let task = fx.store.get_task(fx.slot.db_task_id()).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message, "chunk transfer failed: 0");
    }

    #[test]
    fn shutdown_flag_interrupts_the_run() {
        let data = vec![0x41u8; 5_000];
        let fx = fixture(data, 1_000, 0);

        let shutdown = AtomicBool::new(true);
        let bytes = AtomicU64::new(0);
        let runner = TaskRunner {
            store: &fx.store,
            shutdown: &shutdown,
            verify_checksum: true,
            bytes_transferred: &bytes,
        };
        assert_eq!(runner.run(&fx.slot), RunOutcome::Failed);
        let s = fx.slot.lock();
        assert_eq!(s.status, TaskStatus::Failed);
        assert!(s.error_message.contains("interrupted"));
    }
}
