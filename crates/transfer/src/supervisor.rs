use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ferryman_store::TaskStatus;
use tracing::{debug, info, warn};

use crate::manager::ManagerInner;

/// Zombie sweeps run on this cadence, independent of the heartbeat interval.
pub(crate) const ZOMBIE_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A DOWNLOADING chunk younger than this counts as task activity.
pub(crate) const CHUNK_ACTIVITY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Granularity at which sleeping waits notice a stop request.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Background liveness monitor.
///
/// Every heartbeat interval it stamps the engine heartbeat, refreshes the
/// heartbeat column of tasks that are actively downloading, and runs the
/// timeout and failed-retry hooks; every [`ZOMBIE_SWEEP_INTERVAL`] it reaps
/// zombie tasks.
pub(crate) struct Supervisor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn start(inner: Arc<ManagerInner>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        inner.stats.heartbeat_running.store(true, Ordering::Relaxed);
        let handle = std::thread::spawn(move || run(inner, thread_stop));
        info!("heartbeat supervisor started");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("heartbeat supervisor stopped");
    }
}

fn run(inner: Arc<ManagerInner>, stop: Arc<AtomicBool>) {
    let mut last_sweep = Instant::now();
    while !stop.load(Ordering::SeqCst) {
        tick(&inner, &mut last_sweep);

        let interval = inner.config.read().unwrap().heartbeat_interval;
        let deadline = Instant::now() + interval;
        while Instant::now() < deadline {
            if stop.load(Ordering::SeqCst) {
                inner.stats.heartbeat_running.store(false, Ordering::Relaxed);
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(remaining.min(STOP_POLL_INTERVAL));
        }
    }
    inner.stats.heartbeat_running.store(false, Ordering::Relaxed);
}

fn tick(inner: &ManagerInner, last_sweep: &mut Instant) {
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    inner.stats.last_heartbeat.store(epoch, Ordering::Relaxed);
    debug!(epoch, "heartbeat");

    refresh_task_heartbeats(inner);

    if last_sweep.elapsed() >= ZOMBIE_SWEEP_INTERVAL {
        let cleaned = inner.cleanup_zombies();
        if cleaned > 0 {
            info!(cleaned, "zombie sweep finished");
        }
        *last_sweep = Instant::now();
    }

    check_timeout_tasks(inner);
    check_failed_retries(inner);
}

/// Bumps the store heartbeat of every task currently downloading, so a
/// cross-process observer can tell them from abandoned rows.
fn refresh_task_heartbeats(inner: &ManagerInner) {
    let Ok(store) = inner.store() else {
        return;
    };
    // Collect ids under the map lock, then write without holding it.
    let active: Vec<i64> = {
        let tasks = inner.tasks.lock().unwrap();
        tasks
            .values()
            .filter(|slot| slot.status() == TaskStatus::Downloading)
            .map(|slot| slot.db_task_id())
            .collect()
    };
    for db_task_id in active {
        if let Err(e) = store.update_task_heartbeat(db_task_id) {
            warn!(db_task_id, error = %e, "failed to refresh task heartbeat");
        }
    }
}

/// Per-tick timeout hook. Timeout semantics beyond the zombie sweep are not
/// defined yet; until they are, this stays a no-op.
fn check_timeout_tasks(_inner: &ManagerInner) {}

/// Per-tick retry-escalation hook. Semantics are not defined yet; until they
/// are, this stays a no-op.
fn check_failed_retries(_inner: &ManagerInner) {}
