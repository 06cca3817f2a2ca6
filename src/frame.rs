use std::path::{Path, PathBuf};

use crate::error::{CaptureError, CaptureResult};

/// Bytes per pixel of the only pixel format carried through the pipeline
/// (32-bit BGRA, 8 bits per channel).
pub const BYTES_PER_PIXEL: usize = 4;

/// A CPU-side copy of a captured region.
///
/// Pixels are tightly packed BGRA8 rows (`stride == width * 4`). The
/// buffer is always owned: it is copied out of mapped GPU memory so the
/// staging resource can be released before the frame is queued.
#[derive(Clone, PartialEq, Eq)]
pub struct RawFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RawFrame {
    /// Allocate a zero-filled frame of `width x height` pixels.
    pub fn zeroed(width: u32, height: u32) -> CaptureResult<Self> {
        let len = bgra_len(width, height)?;
        Ok(Self {
            data: vec![0; len],
            width,
            height,
        })
    }

    pub fn from_bgra8(width: u32, height: u32, data: Vec<u8>) -> CaptureResult<Self> {
        let expected = bgra_len(width, height)?;
        if data.len() != expected {
            return Err(CaptureError::InvalidConfig(format!(
                "BGRA frame data length mismatch: got {}, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }

        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn as_bgra_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_bgra_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bgra_bytes(self) -> Vec<u8> {
        self.data
    }

    /// A frame is degenerate when every pixel is fully transparent black.
    /// The compositor hands these out before the window has rendered.
    pub fn is_degenerate(&self) -> bool {
        crate::convert::is_all_zero(&self.data)
    }
}

pub(crate) fn bgra_len(width: u32, height: u32) -> CaptureResult<usize> {
    let w = usize::try_from(width).map_err(|_| CaptureError::BufferOverflow)?;
    let h = usize::try_from(height).map_err(|_| CaptureError::BufferOverflow)?;
    w.checked_mul(h)
        .and_then(|px| px.checked_mul(BYTES_PER_PIXEL))
        .ok_or(CaptureError::BufferOverflow)
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Unit of work for the persistence worker: one frame and the file it
/// should be written to. Never mutated once queued.
#[derive(Debug)]
pub struct SaveTask {
    frame: RawFrame,
    path: PathBuf,
}

impl SaveTask {
    pub fn new(frame: RawFrame, path: impl Into<PathBuf>) -> Self {
        Self {
            frame,
            path: path.into(),
        }
    }

    pub fn frame(&self) -> &RawFrame {
        &self.frame
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_parts(self) -> (RawFrame, PathBuf) {
        (self.frame, self.path)
    }
}
