use std::fmt;

#[derive(Debug)]
pub enum CaptureError {
    /// The capture backend was never created, or was torn down after an
    /// unrecoverable access loss.
    NotInitialized,

    /// The compositor had no new frame when polled.
    NoNewFrame,

    /// Every pixel in the captured region was `(0, 0, 0, 0)`.
    EmptyFrame,

    AccessLost,

    InvalidRegion(String),

    UnsupportedFormat(String),

    BufferOverflow,

    InvalidConfig(String),

    WorkerDead,

    BackendUnavailable(String),

    Canceled,

    Platform(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureErrorClass {
    InvalidInput,
    Unsupported,
    Transient,
    Fatal,
}

impl CaptureError {
    pub fn class(&self) -> CaptureErrorClass {
        match self {
            Self::InvalidRegion(_) | Self::InvalidConfig(_) => CaptureErrorClass::InvalidInput,
            Self::UnsupportedFormat(_) | Self::BackendUnavailable(_) => {
                CaptureErrorClass::Unsupported
            }
            // OS failures while a source is live are soft; construction
            // failures never reach the retry loop.
            Self::NoNewFrame
            | Self::EmptyFrame
            | Self::AccessLost
            | Self::WorkerDead
            | Self::Canceled
            | Self::Platform(_) => CaptureErrorClass::Transient,
            Self::NotInitialized | Self::BufferOverflow => CaptureErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), CaptureErrorClass::Transient)
    }

    /// Whether the compositor handle should be re-created before the next
    /// acquire.
    pub fn requires_backend_reset(&self) -> bool {
        matches!(self, Self::AccessLost)
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "desktop duplication is not initialized"),
            Self::NoNewFrame => write!(f, "no new desktop frame is available yet"),
            Self::EmptyFrame => write!(f, "captured region contains only transparent black"),
            Self::AccessLost => write!(f, "desktop duplication access lost"),
            Self::InvalidRegion(message) => write!(f, "invalid capture region: {message}"),
            Self::UnsupportedFormat(fmt_name) => {
                write!(f, "unsupported desktop texture format: {fmt_name}")
            }
            Self::BufferOverflow => write!(f, "frame buffer size overflow"),
            Self::InvalidConfig(message) => write!(f, "invalid capture configuration: {message}"),
            Self::WorkerDead => write!(f, "persistence worker is not running"),
            Self::BackendUnavailable(message) => {
                write!(f, "no available backend implementation: {message}")
            }
            Self::Canceled => write!(f, "capture was canceled"),
            Self::Platform(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Stage of the PNG encode pipeline. The first stage that fails aborts
/// the remaining ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeStage {
    CreateStream,
    ValidateSource,
    ConvertPixels,
    WriteFrame,
    CommitStream,
}

impl EncodeStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateStream => "create-stream",
            Self::ValidateSource => "validate-source",
            Self::ConvertPixels => "convert-pixels",
            Self::WriteFrame => "write-frame",
            Self::CommitStream => "commit-stream",
        }
    }

    /// One-based position in the pipeline, handy for terse log lines.
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::CreateStream => 1,
            Self::ValidateSource => 2,
            Self::ConvertPixels => 3,
            Self::WriteFrame => 4,
            Self::CommitStream => 5,
        }
    }
}

/// Failure of a single encode call. Cheap to clone so it can be handed to
/// observers and counted without keeping the original `io::Error` alive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodeError {
    pub stage: EncodeStage,
    /// Native OS error code, when the failing stage surfaced one.
    pub code: Option<i32>,
    pub message: String,
}

impl EncodeError {
    pub fn new(stage: EncodeStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            code: None,
            message: message.into(),
        }
    }

    pub fn from_io(stage: EncodeStage, error: &std::io::Error) -> Self {
        Self {
            stage,
            code: error.raw_os_error(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "encode failed at [{}] {}",
            self.stage.ordinal(),
            self.stage.as_str()
        )?;
        if let Some(code) = self.code {
            write!(f, " (os error {code})")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for EncodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_capture_failures_are_retryable() {
        assert!(CaptureError::NoNewFrame.is_retryable());
        assert!(CaptureError::EmptyFrame.is_retryable());
        assert!(CaptureError::AccessLost.is_retryable());
        assert!(CaptureError::Platform(anyhow::anyhow!("Map failed")).is_retryable());
    }

    #[test]
    fn init_and_input_failures_are_not_retryable() {
        assert!(!CaptureError::NotInitialized.is_retryable());
        assert!(!CaptureError::InvalidRegion("outside".into()).is_retryable());
        assert_eq!(CaptureError::BufferOverflow.class(), CaptureErrorClass::Fatal);
    }

    #[test]
    fn only_access_lost_requests_backend_reset() {
        assert!(CaptureError::AccessLost.requires_backend_reset());
        assert!(!CaptureError::NoNewFrame.requires_backend_reset());
    }

    #[test]
    fn encode_error_display_names_stage_and_code() {
        let error = EncodeError {
            stage: EncodeStage::CreateStream,
            code: Some(5),
            message: "access denied".into(),
        };
        let text = error.to_string();
        assert!(text.contains("[1] create-stream"));
        assert!(text.contains("os error 5"));
        assert!(text.ends_with("access denied"));
    }
}
