use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{ChunkRecord, ChunkStatus, TaskCounts, TaskRecord, TaskStatus};

/// Store tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,
    /// SQLite busy timeout handed to the connection.
    pub busy_timeout_ms: u32,
    /// Retry attempts for writes that hit cross-process busy/locked errors.
    pub max_retry_attempts: u32,
    /// Fixed delay between busy retries.
    pub retry_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/ferryman/transfer_status.db"),
            busy_timeout_ms: 30_000,
            max_retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl StoreConfig {
    /// Config pointing at `path` with default tunables.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// Concurrency-safe task + chunk metadata store.
///
/// All operations serialize through a single in-process mutex, making each
/// call atomic with respect to other in-process callers. The database runs in
/// WAL mode with `synchronous=NORMAL`: a committed operation survives a
/// process crash. Cross-process contention is absorbed first by the busy
/// timeout and then by a bounded retry loop; exhaustion surfaces as
/// [`StoreError::Busy`].
pub struct StatusStore {
    conn: Mutex<Connection>,
    max_retry_attempts: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for StatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStore").finish_non_exhaustive()
    }
}

impl StatusStore {
    /// Opens (creating if needed) the database at `config.path`.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(&config.path).map_err(|source| StoreError::Open {
            path: config.path.clone(),
            source,
        })?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", config.busy_timeout_ms)?;

        create_tables(&conn)?;

        tracing::debug!(path = %config.path.display(), "status store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            max_retry_attempts: config.max_retry_attempts,
            retry_delay: config.retry_delay,
        })
    }

    /// Inserts a task row and all of its chunk rows in one transaction.
    ///
    /// Chunk rows carry the nominal `chunk_size` and offsets `i * chunk_size`;
    /// digests are filled in afterwards by the planner via
    /// [`update_chunk_status`](Self::update_chunk_status). Fails with
    /// [`StoreError::AlreadyExists`] when a task for `file_path` is present.
    pub fn create_task(
        &self,
        file_path: &str,
        file_name: &str,
        file_size: u64,
        chunk_size: u64,
    ) -> Result<i64, StoreError> {
        let total_chunks = file_size.div_ceil(chunk_size);
        let now = now_timestamp();

        self.run(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO transfer_tasks
                 (file_path, file_name, file_size, chunk_size, total_chunks,
                  status, created_at, updated_at, last_heartbeat)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'PENDING', ?6, ?6, ?6)",
                params![
                    file_path,
                    file_name,
                    file_size as i64,
                    chunk_size as i64,
                    total_chunks as i64,
                    now,
                ],
            )?;
            let db_task_id = tx.last_insert_rowid();

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO transfer_chunks
                     (task_id, chunk_index, chunk_size, offset, status, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'PENDING', ?5, ?5)",
                )?;
                for index in 0..total_chunks {
                    stmt.execute(params![
                        db_task_id,
                        index as i64,
                        chunk_size as i64,
                        (index * chunk_size) as i64,
                        now,
                    ])?;
                }
            }

            tx.commit()?;
            Ok(db_task_id)
        })
        .map_err(|e| match e {
            StoreError::Sql(sql) if is_unique_violation(&sql) => {
                StoreError::AlreadyExists(file_path.to_string())
            }
            other => other,
        })
    }

    /// Updates the task status, bumping `updated_at` and `last_heartbeat`.
    pub fn update_task_status(
        &self,
        db_task_id: i64,
        status: TaskStatus,
        error_message: &str,
    ) -> Result<(), StoreError> {
        let now = now_timestamp();
        self.run(|conn| {
            conn.execute(
                "UPDATE transfer_tasks
                 SET status = ?1, updated_at = ?2, last_heartbeat = ?2, error_message = ?3
                 WHERE task_id = ?4",
                params![status.as_str(), now, error_message, db_task_id],
            )
            .map(|_| ())
        })
    }

    /// Bumps `last_heartbeat` only.
    pub fn update_task_heartbeat(&self, db_task_id: i64) -> Result<(), StoreError> {
        let now = now_timestamp();
        self.run(|conn| {
            conn.execute(
                "UPDATE transfer_tasks SET last_heartbeat = ?1 WHERE task_id = ?2",
                params![now, db_task_id],
            )
            .map(|_| ())
        })
    }

    /// Updates a chunk row. The digest is write-once: once `md5_hash` holds a
    /// value it is never overwritten, no matter what is passed here.
    pub fn update_chunk_status(
        &self,
        db_task_id: i64,
        chunk_index: u32,
        status: ChunkStatus,
        md5_hash: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = now_timestamp();
        self.run(|conn| {
            conn.execute(
                "UPDATE transfer_chunks
                 SET status = ?1,
                     updated_at = ?2,
                     md5_hash = CASE WHEN md5_hash = '' THEN COALESCE(?3, md5_hash)
                                     ELSE md5_hash END
                 WHERE task_id = ?4 AND chunk_index = ?5",
                params![status.as_str(), now, md5_hash, db_task_id, chunk_index as i64],
            )
            .map(|_| ())
        })
    }

    /// Increments a chunk's retry counter.
    pub fn increment_chunk_retry(
        &self,
        db_task_id: i64,
        chunk_index: u32,
    ) -> Result<(), StoreError> {
        let now = now_timestamp();
        self.run(|conn| {
            conn.execute(
                "UPDATE transfer_chunks
                 SET retry_count = retry_count + 1, updated_at = ?1
                 WHERE task_id = ?2 AND chunk_index = ?3",
                params![now, db_task_id, chunk_index as i64],
            )
            .map(|_| ())
        })
    }

    pub fn get_task(&self, db_task_id: i64) -> Result<Option<TaskRecord>, StoreError> {
        self.run(|conn| {
            conn.query_row(
                &format!("{TASK_SELECT} WHERE task_id = ?1"),
                params![db_task_id],
                row_to_task,
            )
            .optional()
        })
    }

    /// Looks a task up by its source path; backs crash-recovery reattachment.
    pub fn find_task_by_path(&self, file_path: &str) -> Result<Option<TaskRecord>, StoreError> {
        self.run(|conn| {
            conn.query_row(
                &format!("{TASK_SELECT} WHERE file_path = ?1"),
                params![file_path],
                row_to_task,
            )
            .optional()
        })
    }

    /// All chunks of a task in `chunk_index` order.
    pub fn get_task_chunks(&self, db_task_id: i64) -> Result<Vec<ChunkRecord>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{CHUNK_SELECT} WHERE task_id = ?1 ORDER BY chunk_index"
            ))?;
            let rows = stmt.query_map(params![db_task_id], row_to_chunk)?;
            rows.collect()
        })
    }

    /// Chunks of a task that are not yet COMPLETED, in `chunk_index` order.
    pub fn get_incomplete_chunks(&self, db_task_id: i64) -> Result<Vec<ChunkRecord>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{CHUNK_SELECT} WHERE task_id = ?1 AND status != 'COMPLETED' ORDER BY chunk_index"
            ))?;
            let rows = stmt.query_map(params![db_task_id], row_to_chunk)?;
            rows.collect()
        })
    }

    /// Tasks in PENDING, DOWNLOADING, or PAUSED.
    pub fn get_incomplete_tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{TASK_SELECT} WHERE status IN ('PENDING', 'DOWNLOADING', 'PAUSED')"
            ))?;
            let rows = stmt.query_map([], row_to_task)?;
            rows.collect()
        })
    }

    /// Tasks whose `last_heartbeat` is older than `now - timeout`.
    pub fn get_stale_tasks(&self, timeout: Duration) -> Result<Vec<TaskRecord>, StoreError> {
        let cutoff = cutoff_timestamp(timeout);
        self.run(|conn| {
            let mut stmt =
                conn.prepare(&format!("{TASK_SELECT} WHERE last_heartbeat < ?1"))?;
            let rows = stmt.query_map(params![cutoff], row_to_task)?;
            rows.collect()
        })
    }

    /// Sum of the actual sizes of a task's COMPLETED chunks.
    ///
    /// Lets the engine re-establish `transferred_bytes` from durable state
    /// after a reload; the final chunk's actual size is derived from the
    /// task's `file_size`.
    pub fn completed_bytes(&self, db_task_id: i64) -> Result<u64, StoreError> {
        self.run(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(MIN(c.chunk_size, t.file_size - c.offset)), 0)
                 FROM transfer_chunks c
                 JOIN transfer_tasks t ON t.task_id = c.task_id
                 WHERE c.task_id = ?1 AND c.status = 'COMPLETED'",
                params![db_task_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
    }

    /// Aggregate task counts by status class.
    pub fn task_counts(&self) -> Result<TaskCounts, StoreError> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM transfer_tasks GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut counts = TaskCounts::default();
            for row in rows {
                let (status, n) = row?;
                let n = n as u64;
                counts.total += n;
                match TaskStatus::parse(&status) {
                    Some(TaskStatus::Completed) => counts.completed += n,
                    Some(TaskStatus::Failed) => counts.failed += n,
                    _ => {}
                }
            }
            Ok(counts)
        })
    }

    /// Sum of the actual sizes of all COMPLETED chunks across every task.
    pub fn total_completed_bytes(&self) -> Result<u64, StoreError> {
        self.run(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(MIN(c.chunk_size, t.file_size - c.offset)), 0)
                 FROM transfer_chunks c
                 JOIN transfer_tasks t ON t.task_id = c.task_id
                 WHERE c.status = 'COMPLETED'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
        })
    }

    /// Deletes a task; its chunks cascade.
    pub fn delete_task(&self, db_task_id: i64) -> Result<(), StoreError> {
        self.run(|conn| {
            conn.execute(
                "DELETE FROM transfer_tasks WHERE task_id = ?1",
                params![db_task_id],
            )
            .map(|_| ())
        })
    }

    /// Deletes COMPLETED tasks not updated within the last `days` days.
    pub fn cleanup_completed(&self, days: u32) -> Result<usize, StoreError> {
        self.cleanup_with_status(TaskStatus::Completed, days)
    }

    /// Deletes FAILED tasks not updated within the last `days` days.
    pub fn cleanup_failed(&self, days: u32) -> Result<usize, StoreError> {
        self.cleanup_with_status(TaskStatus::Failed, days)
    }

    fn cleanup_with_status(&self, status: TaskStatus, days: u32) -> Result<usize, StoreError> {
        let cutoff = cutoff_timestamp(Duration::from_secs(u64::from(days) * 86_400));
        self.run(|conn| {
            conn.execute(
                "DELETE FROM transfer_tasks WHERE status = ?1 AND updated_at < ?2",
                params![status.as_str(), cutoff],
            )
        })
    }

    /// Runs `op` under the store mutex, retrying busy/locked failures with a
    /// fixed delay. Non-busy errors propagate immediately.
    fn run<T>(
        &self,
        mut op: impl FnMut(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let mut attempts = 0u32;
        loop {
            match op(&mut *conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) => {
                    attempts += 1;
                    if attempts > self.max_retry_attempts {
                        tracing::warn!(attempts, "status store busy, giving up");
                        return Err(StoreError::Busy { attempts });
                    }
                    tracing::debug!(attempts, "status store busy, retrying");
                    std::thread::sleep(self.retry_delay);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

const TASK_SELECT: &str = "SELECT task_id, file_path, file_name, file_size, chunk_size,
        total_chunks, status, created_at, updated_at, last_heartbeat, error_message
 FROM transfer_tasks";

const CHUNK_SELECT: &str = "SELECT chunk_id, task_id, chunk_index, chunk_size, offset,
        status, md5_hash, retry_count, created_at, updated_at
 FROM transfer_chunks";

fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transfer_tasks (
             task_id        INTEGER PRIMARY KEY AUTOINCREMENT,
             file_path      TEXT NOT NULL UNIQUE,
             file_name      TEXT NOT NULL,
             file_size      INTEGER NOT NULL,
             chunk_size     INTEGER NOT NULL,
             total_chunks   INTEGER NOT NULL,
             status         TEXT NOT NULL DEFAULT 'PENDING',
             created_at     TEXT NOT NULL,
             updated_at     TEXT NOT NULL,
             last_heartbeat TEXT NOT NULL,
             error_message  TEXT DEFAULT ''
         );
         CREATE TABLE IF NOT EXISTS transfer_chunks (
             chunk_id    INTEGER PRIMARY KEY AUTOINCREMENT,
             task_id     INTEGER NOT NULL,
             chunk_index INTEGER NOT NULL,
             chunk_size  INTEGER NOT NULL,
             offset      INTEGER NOT NULL,
             status      TEXT NOT NULL DEFAULT 'PENDING',
             md5_hash    TEXT DEFAULT '',
             retry_count INTEGER DEFAULT 0,
             created_at  TEXT NOT NULL,
             updated_at  TEXT NOT NULL,
             FOREIGN KEY (task_id) REFERENCES transfer_tasks(task_id) ON DELETE CASCADE,
             UNIQUE(task_id, chunk_index)
         );
         CREATE INDEX IF NOT EXISTS idx_tasks_status ON transfer_tasks(status);
         CREATE INDEX IF NOT EXISTS idx_tasks_heartbeat ON transfer_tasks(last_heartbeat);
         CREATE INDEX IF NOT EXISTS idx_chunks_task_status ON transfer_chunks(task_id, status);
         CREATE INDEX IF NOT EXISTS idx_chunks_status ON transfer_chunks(status);",
    )
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let status: String = row.get(6)?;
    Ok(TaskRecord {
        db_task_id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        file_size: row.get::<_, i64>(3)? as u64,
        chunk_size: row.get::<_, i64>(4)? as u64,
        total_chunks: row.get::<_, i64>(5)? as u32,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        last_heartbeat: row.get(9)?,
        error_message: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
    })
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRecord> {
    let status: String = row.get(5)?;
    Ok(ChunkRecord {
        chunk_id: row.get(0)?,
        db_task_id: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)? as u32,
        chunk_size: row.get::<_, i64>(3)? as u64,
        offset: row.get::<_, i64>(4)? as u64,
        status: ChunkStatus::parse(&status).unwrap_or(ChunkStatus::Pending),
        md5_hash: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        retry_count: row.get::<_, i64>(7)? as u32,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Sortable UTC timestamp; the only time encoding the store uses.
fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn cutoff_timestamp(age: Duration) -> String {
    let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
    (Utc::now() - age).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e.sqlite_error_code(), Some(ErrorCode::ConstraintViolation))
}
