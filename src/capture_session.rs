use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{FrameSource, RetryPolicy, capture_with_retry};
use crate::codec::{FrameEncoder, PngCodec};
use crate::env_config;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::SaveTask;
use crate::persistence::{
    EnqueueOutcome, OverflowPolicy, PersistenceConfig, PersistenceWorker, SaveObserver,
    SaveReport, WorkerStatsSnapshot,
};
use crate::region::CaptureRegion;
use crate::scheduler::{CancelToken, FrameScheduler, SchedulerExit};

pub const DEFAULT_FRAME_RATE: u32 = 30;

const ENV_OUTPUT_DIR: &str = "SNOW_TIMELAPSE_OUTPUT_DIR";
const ENV_QUEUE_DEPTH: &str = "SNOW_TIMELAPSE_QUEUE_DEPTH";
const ENV_CAPTURE_ATTEMPTS: &str = "SNOW_TIMELAPSE_CAPTURE_ATTEMPTS";
const ENV_RETRY_PAUSE_MS: &str = "SNOW_TIMELAPSE_RETRY_PAUSE_MS";
const ENV_OVERFLOW: &str = "SNOW_TIMELAPSE_OVERFLOW";
const ENV_MAX_FRAMES: &str = "SNOW_TIMELAPSE_MAX_FRAMES";

#[derive(Clone, Debug)]
pub struct CaptureSessionConfig {
    pub frame_rate: u32,
    /// Directory the PNG files are written to. Created on build.
    pub output_dir: PathBuf,
    pub retry: RetryPolicy,
    pub persistence: PersistenceConfig,
    /// Stop after this many ticks. `None` runs until canceled.
    pub max_frames: Option<u64>,
}

impl Default for CaptureSessionConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            output_dir: PathBuf::from("."),
            retry: RetryPolicy::default(),
            persistence: PersistenceConfig::default(),
            max_frames: None,
        }
    }
}

impl CaptureSessionConfig {
    /// Defaults with `SNOW_TIMELAPSE_*` environment overrides applied.
    pub fn from_env() -> CaptureResult<Self> {
        Self::default().with_overrides(env_config::env_var_non_empty)
    }

    /// Apply overrides looked up by variable name. Unset names keep the
    /// current value; malformed values are rejected.
    pub fn with_overrides<F>(mut self, lookup: F) -> CaptureResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let positive = |name: &str| -> CaptureResult<Option<u64>> {
            match lookup(name) {
                None => Ok(None),
                Some(raw) => env_config::parse_positive_u64(&raw).map(Some).ok_or_else(|| {
                    CaptureError::InvalidConfig(format!(
                        "{name} must be a positive integer, got `{raw}`"
                    ))
                }),
            }
        };

        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(depth) = positive(ENV_QUEUE_DEPTH)? {
            self.persistence.queue_capacity = usize::try_from(depth).unwrap_or(usize::MAX);
        }
        if let Some(attempts) = positive(ENV_CAPTURE_ATTEMPTS)? {
            self.retry.attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        }
        if let Some(raw) = lookup(ENV_RETRY_PAUSE_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|_| {
                CaptureError::InvalidConfig(format!(
                    "{ENV_RETRY_PAUSE_MS} must be a whole number of milliseconds, got `{raw}`"
                ))
            })?;
            self.retry.pause = Duration::from_millis(millis);
        }
        if let Some(raw) = lookup(ENV_OVERFLOW) {
            self.persistence.overflow = raw.parse::<OverflowPolicy>()?;
        }
        if let Some(max_frames) = positive(ENV_MAX_FRAMES)? {
            self.max_frames = Some(max_frames);
        }
        Ok(self)
    }
}

/// Totals for one [`CaptureSession::run`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub exit: SchedulerExit,
    pub ticks: u64,
    pub frames_captured: u64,
    /// Ticks where every capture attempt failed.
    pub ticks_skipped: u64,
    pub worker: WorkerStatsSnapshot,
}

pub struct CaptureSessionBuilder {
    config: CaptureSessionConfig,
    region: Option<CaptureRegion>,
    source: Option<Box<dyn FrameSource>>,
    encoder: Option<Arc<dyn FrameEncoder>>,
    scheduler: Option<FrameScheduler>,
    observer: Option<SaveObserver>,
}

impl CaptureSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: CaptureSessionConfig::default(),
            region: None,
            source: None,
            encoder: None,
            scheduler: None,
            observer: None,
        }
    }

    pub fn with_config(mut self, config: CaptureSessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Desktop rectangle captured on every tick. Required.
    pub fn region(mut self, region: CaptureRegion) -> Self {
        self.region = Some(region);
        self
    }

    pub fn frame_rate(mut self, frame_rate: u32) -> Self {
        self.config.frame_rate = frame_rate;
        self
    }

    pub fn output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = output_dir.into();
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.config.persistence.queue_capacity = queue_capacity;
        self
    }

    pub fn overflow_policy(mut self, overflow: OverflowPolicy) -> Self {
        self.config.persistence.overflow = overflow;
        self
    }

    pub fn max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.config.max_frames = max_frames;
        self
    }

    /// Use a specific frame source instead of the platform duplication
    /// backend.
    pub fn with_source<S: FrameSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_encoder<E: FrameEncoder + 'static>(mut self, encoder: E) -> Self {
        self.encoder = Some(Arc::new(encoder));
        self
    }

    /// Use a specific scheduler. Its frame rate replaces the configured
    /// one.
    pub fn with_scheduler(mut self, scheduler: FrameScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn on_saved<F>(mut self, observer: F) -> Self
    where
        F: Fn(&SaveReport) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> CaptureResult<CaptureSession> {
        let mut config = self.config;
        let region = self.region.ok_or_else(|| {
            CaptureError::InvalidConfig("a capture region is required".into())
        })?;

        let scheduler = match self.scheduler {
            Some(scheduler) => {
                config.frame_rate = scheduler.frame_rate();
                scheduler
            }
            None => FrameScheduler::new(config.frame_rate)?,
        };

        let source = match self.source {
            Some(source) => source,
            None => crate::platform::default_frame_source(&region)?,
        };

        std::fs::create_dir_all(&config.output_dir)
            .map_err(|error| {
                anyhow::Error::from(error).context(format!(
                    "failed to create output directory {}",
                    config.output_dir.display()
                ))
            })
            .map_err(CaptureError::Platform)?;

        // Build the conversion pool now so the first save doesn't pay for it.
        crate::convert::warmup();

        let encoder = self
            .encoder
            .unwrap_or_else(|| Arc::new(PngCodec::new()) as Arc<dyn FrameEncoder>);
        let mut worker = PersistenceWorker::with_shared_encoder(encoder, config.persistence);
        worker.set_observer(self.observer);

        Ok(CaptureSession {
            config,
            region,
            source,
            scheduler,
            worker,
        })
    }
}

impl Default for CaptureSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One capture run: a scheduler driving a frame source on the calling
/// thread, feeding a persistence worker.
pub struct CaptureSession {
    config: CaptureSessionConfig,
    region: CaptureRegion,
    source: Box<dyn FrameSource>,
    scheduler: FrameScheduler,
    worker: PersistenceWorker,
}

impl CaptureSession {
    pub fn builder() -> CaptureSessionBuilder {
        CaptureSessionBuilder::new()
    }

    pub fn config(&self) -> &CaptureSessionConfig {
        &self.config
    }

    pub fn region(&self) -> CaptureRegion {
        self.region
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Run the capture loop on the calling thread until `cancel` fires or
    /// `max_frames` ticks have elapsed, then drain the save queue.
    ///
    /// Ticks whose captures all fail are skipped. The run only fails when
    /// the frame source can no longer capture at all or the persistence
    /// worker is gone; queued frames are still drained in that case.
    pub fn run(&mut self, cancel: &CancelToken) -> CaptureResult<SessionSummary> {
        let Self {
            config,
            region,
            source,
            scheduler,
            worker,
        } = self;

        worker.start()?;
        tracing::info!(
            frame_rate = config.frame_rate,
            x = region.x,
            y = region.y,
            width = region.width,
            height = region.height,
            output_dir = %config.output_dir.display(),
            "capture started"
        );

        let mut ticks = 0u64;
        let mut frames_captured = 0u64;
        let mut ticks_skipped = 0u64;
        let mut fatal: Option<CaptureError> = None;

        let exit = scheduler.run(cancel, |id| {
            ticks += 1;
            match capture_with_retry(source.as_mut(), region, &config.retry) {
                Ok(frame) => {
                    let path = config.output_dir.join(id.file_name());
                    match worker.enqueue(SaveTask::new(frame, path)) {
                        Ok(EnqueueOutcome::DroppedNewest(_)) => {}
                        Ok(_) => frames_captured += 1,
                        Err(error) => {
                            fatal = Some(error);
                            return false;
                        }
                    }
                }
                Err(CaptureError::NotInitialized) => {
                    fatal = Some(CaptureError::NotInitialized);
                    return false;
                }
                Err(error) => {
                    ticks_skipped += 1;
                    tracing::debug!(tick = %id, %error, "capture failed, skipping tick");
                }
            }
            config.max_frames.is_none_or(|max| ticks < max)
        });

        worker.stop();
        let summary = SessionSummary {
            exit,
            ticks,
            frames_captured,
            ticks_skipped,
            worker: worker.stats(),
        };

        if let Some(error) = fatal {
            tracing::error!(%error, "capture aborted");
            return Err(error);
        }
        tracing::info!(
            ticks = summary.ticks,
            captured = summary.frames_captured,
            skipped = summary.ticks_skipped,
            saved = summary.worker.frames_saved,
            failed = summary.worker.frames_failed,
            dropped = summary.worker.frames_dropped,
            "capture finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RawFrame;
    use crate::test_support::{TestDir, noon_plus_millis, patterned_frame, simulated_scheduler};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    enum Script {
        Frame,
        NoFrame,
        Lost,
    }

    /// Plays back a script of capture results, then keeps producing
    /// frames.
    struct ScriptedSource {
        script: VecDeque<Script>,
        calls: Arc<Mutex<usize>>,
    }

    impl ScriptedSource {
        fn new(script: impl IntoIterator<Item = Script>) -> (Self, Arc<Mutex<usize>>) {
            let calls = Arc::new(Mutex::new(0));
            (
                Self {
                    script: script.into_iter().collect(),
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    impl FrameSource for ScriptedSource {
        fn capture(&mut self, region: &CaptureRegion) -> CaptureResult<RawFrame> {
            *self.calls.lock().unwrap() += 1;
            match self.script.pop_front().unwrap_or(Script::Frame) {
                Script::Frame => Ok(patterned_frame(region.width, region.height)),
                Script::NoFrame => Err(CaptureError::NoNewFrame),
                Script::Lost => Err(CaptureError::NotInitialized),
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            pause: Duration::ZERO,
        }
    }

    fn session(
        dir: &TestDir,
        frame_rate: u32,
        start_ms: u32,
        source: ScriptedSource,
        max_frames: u64,
    ) -> CaptureSession {
        let (scheduler, _) = simulated_scheduler(frame_rate, noon_plus_millis(start_ms), Duration::ZERO);
        CaptureSession::builder()
            .region(CaptureRegion::new(40, 30, 8, 6).unwrap())
            .output_dir(dir.path())
            .retry_policy(fast_retry())
            .max_frames(Some(max_frames))
            .with_scheduler(scheduler)
            .with_source(source)
            .build()
            .unwrap()
    }

    #[test]
    fn single_tick_writes_slot_named_png() {
        let dir = TestDir::new("session-one");
        let (source, _) = ScriptedSource::new([]);
        let mut session = session(&dir, 10, 250, source, 1);

        let summary = session.run(&CancelToken::new()).unwrap();
        assert_eq!(summary.exit, SchedulerExit::Stopped);
        assert_eq!((summary.ticks, summary.frames_captured), (1, 1));
        assert_eq!(summary.worker.frames_saved, 1);
        assert_eq!(dir.file_names(), vec!["20240101_120000_3.png".to_string()]);

        let decoded = image::open(dir.join("20240101_120000_3.png")).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn two_failures_then_success_produces_one_file() {
        let dir = TestDir::new("session-retry");
        let (source, calls) = ScriptedSource::new([Script::NoFrame, Script::NoFrame]);
        let mut session = session(&dir, 10, 250, source, 1);

        let summary = session.run(&CancelToken::new()).unwrap();
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!((summary.frames_captured, summary.ticks_skipped), (1, 0));
        assert_eq!(dir.file_names().len(), 1);
    }

    #[test]
    fn exhausted_retries_skip_the_tick_silently() {
        let dir = TestDir::new("session-skip");
        let (source, calls) =
            ScriptedSource::new([Script::NoFrame, Script::NoFrame, Script::NoFrame]);
        let mut session = session(&dir, 10, 250, source, 1);

        let summary = session.run(&CancelToken::new()).unwrap();
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!((summary.frames_captured, summary.ticks_skipped), (0, 1));
        assert!(dir.file_names().is_empty());
    }

    #[test]
    fn frame_limit_stops_after_unique_files() {
        let dir = TestDir::new("session-limit");
        let (source, _) = ScriptedSource::new([]);
        let mut session = session(&dir, 30, 950, source, 5);

        let summary = session.run(&CancelToken::new()).unwrap();
        assert_eq!(summary.ticks, 5);
        assert_eq!(
            dir.file_names(),
            vec![
                "20240101_120000_29.png".to_string(),
                "20240101_120001_00.png".to_string(),
                "20240101_120001_01.png".to_string(),
                "20240101_120001_02.png".to_string(),
                "20240101_120001_03.png".to_string(),
            ]
        );
    }

    #[test]
    fn canceled_session_still_stops_worker() {
        let dir = TestDir::new("session-cancel");
        let (source, calls) = ScriptedSource::new([]);
        let mut session = session(&dir, 10, 0, source, 100);
        let cancel = CancelToken::new();
        cancel.cancel();

        let summary = session.run(&cancel).unwrap();
        assert_eq!(summary.exit, SchedulerExit::Canceled);
        assert_eq!(summary.ticks, 0);
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(session.worker.state(), crate::persistence::WorkerState::Stopped);
    }

    #[test]
    fn lost_backend_aborts_after_draining() {
        let dir = TestDir::new("session-lost");
        let (source, _) = ScriptedSource::new([Script::Frame, Script::Lost]);
        let mut session = session(&dir, 10, 0, source, 100);

        assert!(matches!(
            session.run(&CancelToken::new()),
            Err(CaptureError::NotInitialized)
        ));
        assert_eq!(dir.file_names().len(), 1);
    }

    #[test]
    fn build_requires_region_and_valid_rate() {
        let (source, _) = ScriptedSource::new([]);
        assert!(matches!(
            CaptureSession::builder().with_source(source).build(),
            Err(CaptureError::InvalidConfig(_))
        ));

        let (source, _) = ScriptedSource::new([]);
        let result = CaptureSession::builder()
            .region(CaptureRegion::new(0, 0, 4, 4).unwrap())
            .frame_rate(0)
            .with_source(source)
            .build();
        assert!(matches!(result, Err(CaptureError::InvalidConfig(_))));
    }

    #[test]
    fn overrides_replace_defaults() {
        let vars: HashMap<&str, &str> = [
            (ENV_OUTPUT_DIR, "captures"),
            (ENV_QUEUE_DEPTH, "8"),
            (ENV_CAPTURE_ATTEMPTS, "5"),
            (ENV_RETRY_PAUSE_MS, "0"),
            (ENV_OVERFLOW, "block"),
            (ENV_MAX_FRAMES, "120"),
        ]
        .into_iter()
        .collect();

        let config = CaptureSessionConfig::default()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("captures"));
        assert_eq!(config.persistence.queue_capacity, 8);
        assert_eq!(config.persistence.overflow, OverflowPolicy::Block);
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.pause, Duration::ZERO);
        assert_eq!(config.max_frames, Some(120));
        assert_eq!(config.frame_rate, DEFAULT_FRAME_RATE);
    }

    #[test]
    fn malformed_override_is_rejected() {
        let result = CaptureSessionConfig::default().with_overrides(|name| {
            (name == ENV_QUEUE_DEPTH).then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(CaptureError::InvalidConfig(_))));
    }
}
