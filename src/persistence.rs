//! Background persistence of captured frames.
//!
//! The capture thread hands [`SaveTask`]s to a [`PersistenceWorker`],
//! which encodes them one at a time on its own thread in the order they
//! were enqueued. The queue is bounded; what happens when it is full is
//! decided by the [`OverflowPolicy`]. Stopping the worker drains every
//! task that was accepted before or during the stop request.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::codec::FrameEncoder;
use crate::error::{CaptureError, CaptureResult, EncodeError};
use crate::frame::SaveTask;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// What `enqueue` does when the queue already holds `queue_capacity`
/// tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait until the worker frees a slot.
    Block,
    /// Discard the oldest queued task to make room.
    #[default]
    DropOldest,
    /// Discard the task being enqueued.
    DropNewest,
}

impl OverflowPolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::DropOldest => "drop-oldest",
            Self::DropNewest => "drop-newest",
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = CaptureError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "drop-oldest" | "drop_oldest" => Ok(Self::DropOldest),
            "drop-newest" | "drop_newest" => Ok(Self::DropNewest),
            other => Err(CaptureError::InvalidConfig(format!(
                "unknown overflow policy `{other}`, expected block, drop-oldest or drop-newest"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PersistenceConfig {
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            overflow: OverflowPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    /// Stop was requested; queued tasks are still being written.
    Draining,
    Stopped,
}

impl WorkerState {
    fn accepts_tasks(self) -> bool {
        matches!(self, Self::Running | Self::Draining)
    }
}

/// Result of a successful `enqueue`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The task was queued after evicting the task for this path.
    DroppedOldest(PathBuf),
    /// The queue was full and the new task for this path was discarded.
    DroppedNewest(PathBuf),
}

/// Outcome of one encode, handed to the `on_saved` observer.
#[derive(Clone, Debug)]
pub struct SaveReport {
    /// Position of the task in enqueue order, starting at 0.
    pub sequence: u64,
    pub path: PathBuf,
    pub result: Result<(), EncodeError>,
    pub elapsed: Duration,
}

pub type SaveObserver = Arc<dyn Fn(&SaveReport) + Send + Sync>;

/// Live counters, updated by both the producer and the worker thread.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub frames_enqueued: AtomicU64,
    pub frames_saved: AtomicU64,
    pub frames_failed: AtomicU64,
    /// Frames discarded by the overflow policy, or left behind by a worker
    /// that died.
    pub frames_dropped: AtomicU64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            frames_enqueued: self.frames_enqueued.load(Ordering::Relaxed),
            frames_saved: self.frames_saved.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub frames_enqueued: u64,
    pub frames_saved: u64,
    pub frames_failed: u64,
    pub frames_dropped: u64,
}

struct QueuedTask {
    sequence: u64,
    task: SaveTask,
}

struct QueueState {
    tasks: VecDeque<QueuedTask>,
    state: WorkerState,
    next_sequence: u64,
}

struct WorkerShared {
    queue: Mutex<QueueState>,
    work_ready: Condvar,
    space_ready: Condvar,
    stats: WorkerStats,
    config: PersistenceConfig,
}

impl WorkerShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-threaded FIFO frame writer.
pub struct PersistenceWorker {
    shared: Arc<WorkerShared>,
    encoder: Arc<dyn FrameEncoder>,
    observer: Option<SaveObserver>,
    join_handle: Option<JoinHandle<()>>,
}

impl PersistenceWorker {
    pub fn new<E>(encoder: E, config: PersistenceConfig) -> Self
    where
        E: FrameEncoder + 'static,
    {
        Self::with_shared_encoder(Arc::new(encoder), config)
    }

    pub fn with_shared_encoder(encoder: Arc<dyn FrameEncoder>, config: PersistenceConfig) -> Self {
        let config = PersistenceConfig {
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };
        Self {
            shared: Arc::new(WorkerShared {
                queue: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    state: WorkerState::Idle,
                    next_sequence: 0,
                }),
                work_ready: Condvar::new(),
                space_ready: Condvar::new(),
                stats: WorkerStats::default(),
                config,
            }),
            encoder,
            observer: None,
            join_handle: None,
        }
    }

    /// Register a callback invoked on the worker thread after every
    /// encode attempt. Must be set before [`start`](Self::start).
    pub fn on_saved<F>(mut self, observer: F) -> Self
    where
        F: Fn(&SaveReport) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn set_observer(&mut self, observer: Option<SaveObserver>) {
        self.observer = observer;
    }

    pub fn config(&self) -> PersistenceConfig {
        self.shared.config
    }

    /// Spawn the worker thread. Only valid once, from `Idle`.
    pub fn start(&mut self) -> CaptureResult<()> {
        {
            let mut queue = self.shared.lock();
            if queue.state != WorkerState::Idle {
                return Err(CaptureError::InvalidConfig(format!(
                    "persistence worker cannot start from {:?}",
                    queue.state
                )));
            }
            queue.state = WorkerState::Running;
        }

        let shared = self.shared.clone();
        let encoder = self.encoder.clone();
        let observer = self.observer.clone();
        let spawned = std::thread::Builder::new()
            .name("snow-timelapse-persist".to_string())
            .spawn(move || worker_loop(&shared, encoder.as_ref(), observer.as_ref()));

        match spawned {
            Ok(handle) => {
                self.join_handle = Some(handle);
                tracing::debug!(
                    queue_capacity = self.shared.config.queue_capacity,
                    overflow = self.shared.config.overflow.as_str(),
                    "persistence worker started"
                );
                Ok(())
            }
            Err(error) => {
                self.shared.lock().state = WorkerState::Idle;
                Err(CaptureError::Platform(anyhow::anyhow!(
                    "failed to spawn persistence worker thread: {error}"
                )))
            }
        }
    }

    /// Queue a task for encoding. Fails with [`CaptureError::WorkerDead`]
    /// unless the worker is running or draining.
    pub fn enqueue(&self, task: SaveTask) -> CaptureResult<EnqueueOutcome> {
        let shared = &self.shared;
        let mut queue = shared.lock();
        if !queue.state.accepts_tasks() {
            return Err(CaptureError::WorkerDead);
        }

        let mut outcome = EnqueueOutcome::Queued;
        if queue.tasks.len() >= shared.config.queue_capacity {
            match shared.config.overflow {
                OverflowPolicy::Block => {
                    while queue.tasks.len() >= shared.config.queue_capacity
                        && queue.state.accepts_tasks()
                    {
                        queue = shared
                            .space_ready
                            .wait(queue)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    if !queue.state.accepts_tasks() {
                        return Err(CaptureError::WorkerDead);
                    }
                }
                OverflowPolicy::DropOldest => {
                    if let Some(evicted) = queue.tasks.pop_front() {
                        let path = evicted.task.path().to_path_buf();
                        shared.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            path = %path.display(),
                            sequence = evicted.sequence,
                            "save queue full, dropped oldest frame"
                        );
                        outcome = EnqueueOutcome::DroppedOldest(path);
                    }
                }
                OverflowPolicy::DropNewest => {
                    let path = task.path().to_path_buf();
                    shared.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(path = %path.display(), "save queue full, dropped newest frame");
                    return Ok(EnqueueOutcome::DroppedNewest(path));
                }
            }
        }

        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        queue.tasks.push_back(QueuedTask { sequence, task });
        shared.stats.frames_enqueued.fetch_add(1, Ordering::Relaxed);
        shared.work_ready.notify_one();
        Ok(outcome)
    }

    /// Request termination and block until every accepted task has been
    /// written and the worker thread has exited. Idempotent.
    pub fn stop(&mut self) {
        {
            let mut queue = self.shared.lock();
            match queue.state {
                WorkerState::Idle => queue.state = WorkerState::Stopped,
                WorkerState::Running => {
                    queue.state = WorkerState::Draining;
                    tracing::debug!(pending = queue.tasks.len(), "draining persistence queue");
                }
                WorkerState::Draining | WorkerState::Stopped => {}
            }
            self.shared.work_ready.notify_all();
        }

        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::error!("persistence worker thread panicked");
        }
    }

    pub fn state(&self) -> WorkerState {
        self.shared.lock().state
    }

    pub fn queue_len(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PersistenceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceWorker")
            .field("config", &self.shared.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Marks the worker stopped however its thread exits, so producers never
/// wait on a dead consumer.
struct ExitGuard<'a>(&'a WorkerShared);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        let mut queue = self.0.lock();
        let abandoned = queue.tasks.len();
        if abandoned > 0 {
            queue.tasks.clear();
            self.0
                .stats
                .frames_dropped
                .fetch_add(abandoned as u64, Ordering::Relaxed);
            tracing::error!(abandoned, "persistence worker exited with queued frames");
        }
        queue.state = WorkerState::Stopped;
        self.0.space_ready.notify_all();
        self.0.work_ready.notify_all();
    }
}

fn worker_loop(
    shared: &WorkerShared,
    encoder: &dyn FrameEncoder,
    observer: Option<&SaveObserver>,
) {
    let _exit = ExitGuard(shared);
    loop {
        let next = {
            let mut queue = shared.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    shared.space_ready.notify_one();
                    break Some(task);
                }
                if queue.state == WorkerState::Draining {
                    break None;
                }
                queue = shared
                    .work_ready
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let Some(queued) = next else {
            tracing::debug!("persistence queue drained");
            return;
        };
        save_one(shared, encoder, observer, queued);
    }
}

fn save_one(
    shared: &WorkerShared,
    encoder: &dyn FrameEncoder,
    observer: Option<&SaveObserver>,
    queued: QueuedTask,
) {
    let started = Instant::now();
    let (frame, path) = queued.task.into_parts();
    let result = encoder.encode(&frame, &path);
    drop(frame);
    let elapsed = started.elapsed();

    match &result {
        Ok(()) => {
            shared.stats.frames_saved.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                path = %path.display(),
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "saved frame"
            );
        }
        Err(error) => {
            shared.stats.frames_failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                path = %path.display(),
                stage = error.stage.as_str(),
                code = ?error.code,
                %error,
                "failed to save frame"
            );
        }
    }

    if let Some(observer) = observer {
        observer(&SaveReport {
            sequence: queued.sequence,
            path,
            result,
            elapsed,
        });
    }
}
