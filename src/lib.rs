pub mod backend;
pub mod capture_session;
pub mod codec;
pub mod convert;
pub(crate) mod env_config;
pub mod error;
pub mod frame;
pub mod persistence;
mod platform;
pub mod region;
pub mod scheduler;
#[cfg(test)]
mod test_support;
pub mod timestamp;
pub mod window;

pub use backend::{CompositorSource, FrameSource, RetryPolicy, capture_with_retry};
pub use capture_session::{
    CaptureSession, CaptureSessionBuilder, CaptureSessionConfig, DEFAULT_FRAME_RATE,
    SessionSummary,
};
pub use codec::{FrameEncoder, PngCodec, PngCompression};
pub use error::{CaptureError, CaptureErrorClass, CaptureResult, EncodeError, EncodeStage};
pub use frame::{RawFrame, SaveTask};
pub use persistence::{
    EnqueueOutcome, OverflowPolicy, PersistenceConfig, PersistenceWorker, SaveReport,
    WorkerState, WorkerStatsSnapshot,
};
pub use region::CaptureRegion;
pub use scheduler::{CancelToken, FrameScheduler, SchedulerExit};
pub use timestamp::TimestampId;
pub use window::{WindowId, WindowInfo, find_window_by_title};
