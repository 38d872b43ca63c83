use std::sync::atomic::Ordering;

use serde_json::json;

use crate::manager::ManagerInner;

/// Health report for operations tooling.
pub(crate) fn health_json(inner: &ManagerInner) -> String {
    let initialized = inner.initialized.load(Ordering::SeqCst);
    let active_tasks = inner.tasks.lock().unwrap().len();
    let queue_size = inner.queue.lock().unwrap().len();
    let worker_threads = if initialized {
        inner.config.read().unwrap().worker_threads
    } else {
        0
    };

    json!({
        "system_status": if initialized { "running" } else { "stopped" },
        "uptime_seconds": inner.started_at.elapsed().as_secs(),
        "last_heartbeat": inner.stats.last_heartbeat.load(Ordering::Relaxed),
        "active_transfers": inner.stats.active_transfers.load(Ordering::Relaxed),
        "worker_threads": worker_threads,
        "heartbeat_running": inner.stats.heartbeat_running.load(Ordering::Relaxed),
        "zombie_tasks_cleaned": inner.stats.zombie_tasks_cleaned.load(Ordering::Relaxed),
        "memory_usage": {
            "active_tasks": active_tasks,
            "queue_size": queue_size,
        },
    })
    .to_string()
}

/// Lifetime transfer statistics plus the effective configuration.
pub(crate) fn statistics_json(inner: &ManagerInner) -> String {
    let total = inner.stats.total_transfers.load(Ordering::Relaxed);
    let completed = inner.stats.completed_transfers.load(Ordering::Relaxed);
    let success_rate = if total > 0 {
        (completed as f64 / total as f64 * 10_000.0).round() / 100.0
    } else {
        0.0
    };
    let config = inner.config.read().unwrap();

    json!({
        "total_transfers": total,
        "completed_transfers": completed,
        "failed_transfers": inner.stats.failed_transfers.load(Ordering::Relaxed),
        "active_transfers": inner.stats.active_transfers.load(Ordering::Relaxed),
        "total_bytes_transferred": inner.stats.total_bytes_transferred.load(Ordering::Relaxed),
        "success_rate": success_rate,
        "configuration": {
            "chunk_size": config.chunk_size,
            "max_concurrent_transfers": config.max_concurrent_transfers,
            "max_retries": config.max_retries,
            "timeout_seconds": config.timeout_seconds,
        },
    })
    .to_string()
}
