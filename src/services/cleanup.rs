use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::time::{DelayQueue, delay_queue};
use utoipa::ToSchema;

use crate::config::MAX_CLEANUP_DELAY_SECS;

/// Outcome counters for deferred deletions. Failures land here and in the log,
/// never with the request that scheduled them.
#[derive(Debug, Default)]
pub struct CleanupStats {
    scheduled: AtomicU64,
    deleted: AtomicU64,
    already_gone: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CleanupSnapshot {
    pub pending: u64,
    pub deleted: u64,
    pub already_gone: u64,
    pub failed: u64,
}

impl CleanupStats {
    pub fn snapshot(&self) -> CleanupSnapshot {
        let scheduled = self.scheduled.load(Ordering::Relaxed);
        let deleted = self.deleted.load(Ordering::Relaxed);
        let already_gone = self.already_gone.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        CleanupSnapshot {
            pending: scheduled.saturating_sub(deleted + already_gone + failed),
            deleted,
            already_gone,
            failed,
        }
    }
}

struct CleanupJob {
    path: PathBuf,
    delay: Duration,
}

/// Handle used by request tasks to queue a file for deletion.
#[derive(Clone)]
pub struct CleanupScheduler {
    tx: mpsc::UnboundedSender<CleanupJob>,
    delay: Duration,
    stats: Arc<CleanupStats>,
}

impl CleanupScheduler {
    /// Creates the handle and the worker that owns the queue. The worker must be
    /// spawned for anything to be deleted.
    pub fn new(delay: Duration, shutdown: watch::Receiver<bool>) -> (Self, CleanupWorker) {
        let delay = capped(delay);
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(CleanupStats::default());
        let scheduler = Self {
            tx,
            delay,
            stats: stats.clone(),
        };
        let worker = CleanupWorker {
            rx,
            queue: DelayQueue::new(),
            keys: HashMap::new(),
            shutdown,
            stats,
        };
        (scheduler, worker)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Deletes `path` once the configured delay has elapsed.
    pub fn schedule(&self, path: PathBuf) {
        self.schedule_after(path, self.delay);
    }

    pub fn schedule_after(&self, path: PathBuf, delay: Duration) {
        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        let delay = capped(delay);
        if let Err(e) = self.tx.send(CleanupJob { path, delay }) {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                "Cleanup worker is not running; {} will not be deleted",
                e.0.path.display()
            );
        }
    }

    pub fn stats(&self) -> CleanupSnapshot {
        self.stats.snapshot()
    }
}

/// `DelayQueue` panics on deadlines beyond roughly two years.
fn capped(delay: Duration) -> Duration {
    let max = Duration::from_secs(MAX_CLEANUP_DELAY_SECS);
    if delay > max {
        tracing::warn!("Cleanup delay {:?} exceeds the maximum, using {:?}", delay, max);
        max
    } else {
        delay
    }
}

/// Owns the delay queue and performs the deletions.
pub struct CleanupWorker {
    rx: mpsc::UnboundedReceiver<CleanupJob>,
    queue: DelayQueue<PathBuf>,
    keys: HashMap<PathBuf, delay_queue::Key>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<CleanupStats>,
}

impl CleanupWorker {
    pub async fn run(mut self) {
        tracing::info!("🚀 Cleanup worker started");
        let mut accepting = true;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Cleanup worker shutting down");
                    break;
                }
                job = self.rx.recv(), if accepting => {
                    match job {
                        Some(job) => self.enqueue(job),
                        None => accepting = false,
                    }
                }
                Some(expired) = self.queue.next(), if !self.queue.is_empty() => {
                    let path = expired.into_inner();
                    self.keys.remove(&path);
                    self.delete(&path).await;
                }
                else => break,
            }
        }

        self.flush().await;
    }

    fn enqueue(&mut self, job: CleanupJob) {
        // Rescheduling the same path moves its deadline instead of queueing twice
        if let Some(key) = self.keys.get(&job.path) {
            self.queue.reset(key, job.delay);
            self.stats.scheduled.fetch_sub(1, Ordering::Relaxed);
            return;
        }
        tracing::debug!(
            "⏳ {} scheduled for deletion in {:?}",
            job.path.display(),
            job.delay
        );
        let key = self.queue.insert(job.path.clone(), job.delay);
        self.keys.insert(job.path, key);
    }

    /// Deletes everything still queued, used at shutdown.
    async fn flush(&mut self) {
        while let Ok(job) = self.rx.try_recv() {
            self.enqueue(job);
        }
        if self.keys.is_empty() {
            return;
        }

        tracing::info!("🧹 Deleting {} pending files before exit", self.keys.len());
        let pending: Vec<_> = self.keys.drain().collect();
        for (path, key) in pending {
            self.queue.remove(&key);
            self.delete(&path).await;
        }
    }

    async fn delete(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                self.stats.deleted.fetch_add(1, Ordering::Relaxed);
                tracing::info!("🗑️  Deleted expired file {}", path.display());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.stats.already_gone.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("{} was already removed", path.display());
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Failed to delete {}: {}", path.display(), e);
            }
        }
    }
}
