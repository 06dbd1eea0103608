use crate::core::geo::TileId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;

/// Runs the work behind queued tile jobs
pub trait TileJobHandler: Send + Sync {
    /// Builds a stacked tile that is not loaded yet
    fn create_tile(&self, id: TileId);
    /// Re-merges a stacked tile whose base tiles changed
    fn merge_tile(&self, id: TileId);
}

/// A unit of background work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileJob {
    Create(TileId),
    Merge(TileId),
}

/// Configuration for the tile job queue
#[derive(Debug, Clone)]
pub struct TileJobQueueConfig {
    /// Spawn the worker thread as soon as a job is queued
    pub auto_start: bool,
}

impl Default for TileJobQueueConfig {
    fn default() -> Self {
        Self { auto_start: true }
    }
}

#[derive(Debug, Default)]
struct PendingJobs {
    high_priority_tiles: VecDeque<TileId>,
    high_priority_merges: VecDeque<TileId>,
    merges: VecDeque<TileId>,
    tiles: VecDeque<TileId>,
    worker_running: bool,
}

impl PendingJobs {
    /// Queues `id` at the back, dropping a pending job for the same tile
    fn push_keyed(queue: &mut VecDeque<TileId>, id: TileId) {
        if let Some(position) = queue.iter().position(|queued| *queued == id) {
            queue.remove(position);
        }
        queue.push_back(id);
    }

    fn pop(&mut self) -> Option<TileJob> {
        if let Some(id) = self.high_priority_tiles.pop_front() {
            return Some(TileJob::Create(id));
        }
        if let Some(id) = self.high_priority_merges.pop_front() {
            return Some(TileJob::Merge(id));
        }
        if let Some(id) = self.merges.pop_front() {
            return Some(TileJob::Merge(id));
        }
        self.tiles.pop_front().map(TileJob::Create)
    }

    fn len(&self) -> usize {
        self.high_priority_tiles.len() + self.high_priority_merges.len() + self.merges.len() + self.tiles.len()
    }
}

struct Shared {
    pending: Mutex<PendingJobs>,
    handler: Weak<dyn TileJobHandler>,
    shutdown: AtomicBool,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, PendingJobs> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, job: TileJob) -> bool {
        let Some(handler) = self.handler.upgrade() else {
            return false;
        };
        match job {
            TileJob::Create(id) => handler.create_tile(id),
            TileJob::Merge(id) => handler.merge_tile(id),
        }
        true
    }
}

/// Priority queue of background tile jobs served by a single worker thread
///
/// High priority create jobs run first, then high priority merges, normal
/// merges and finally normal create jobs in submission order. Keyed jobs
/// for the same tile collapse into one, placed where the latest request
/// would have gone. The worker is started on demand and
/// exits as soon as nothing is left to do.
pub struct TileJobQueue {
    shared: Arc<Shared>,
    config: TileJobQueueConfig,
}

impl TileJobQueue {
    pub fn new(handler: Weak<dyn TileJobHandler>, config: TileJobQueueConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(PendingJobs::default()),
                handler,
                shutdown: AtomicBool::new(false),
            }),
            config,
        }
    }

    /// Queues the creation of a stacked tile
    pub fn add_tile_job(&self, id: TileId, high_priority: bool) {
        {
            let mut pending = self.shared.pending();
            if high_priority {
                PendingJobs::push_keyed(&mut pending.high_priority_tiles, id);
            } else {
                pending.tiles.push_back(id);
            }
        }
        self.ensure_worker();
    }

    /// Queues the re-merge of a stacked tile
    pub fn add_merge_job(&self, id: TileId, high_priority: bool) {
        {
            let mut pending = self.shared.pending();
            if high_priority {
                PendingJobs::push_keyed(&mut pending.high_priority_merges, id);
            } else {
                PendingJobs::push_keyed(&mut pending.merges, id);
            }
        }
        self.ensure_worker();
    }

    /// Drops pending normal priority create jobs
    pub fn clear(&self) {
        self.shared.pending().tiles.clear();
    }

    pub fn pending_jobs(&self) -> usize {
        self.shared.pending().len()
    }

    pub fn is_worker_running(&self) -> bool {
        self.shared.pending().worker_running
    }

    /// Runs every pending job on the calling thread, returns how many ran
    pub fn run_pending(&self) -> usize {
        let mut count = 0;
        loop {
            let job = self.shared.pending().pop();
            match job {
                Some(job) if self.shared.run(job) => count += 1,
                _ => return count,
            }
        }
    }

    fn ensure_worker(&self) {
        if !self.config.auto_start {
            return;
        }
        {
            let mut pending = self.shared.pending();
            if pending.worker_running {
                return;
            }
            pending.worker_running = true;
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("globelet-tile-jobs".to_string())
            .spawn(move || {
                log::debug!("tile job worker started");
                loop {
                    let job = {
                        let mut pending = shared.pending();
                        let job = if shared.shutdown.load(Ordering::Relaxed) {
                            None
                        } else {
                            pending.pop()
                        };
                        // decided under the lock so a concurrent push either sees us running or restarts us
                        if job.is_none() {
                            pending.worker_running = false;
                        }
                        job
                    };
                    match job {
                        Some(job) => {
                            if !shared.run(job) {
                                shared.pending().worker_running = false;
                                break;
                            }
                        }
                        None => break,
                    }
                }
                log::debug!("tile job worker idle, exiting");
            });

        if let Err(e) = spawned {
            log::error!("cannot spawn tile job worker: {}", e);
            self.shared.pending().worker_running = false;
        }
    }
}

impl Drop for TileJobQueue {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
    }
}
