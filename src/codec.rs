//! PNG persistence of captured frames.
//!
//! [`PngCodec`] runs a fixed sequence of [`EncodeStage`]s and stops at
//! the first one that fails. Output goes to a sibling `.partial` file
//! that is renamed over the destination only once every stage has
//! succeeded, so a failed encode never leaves a truncated image behind.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageError};

use crate::error::{EncodeError, EncodeStage};
use crate::frame::{BYTES_PER_PIXEL, RawFrame};

/// Writes one frame to one file.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &RawFrame, path: &Path) -> Result<(), EncodeError>;
}

impl<E: FrameEncoder + ?Sized> FrameEncoder for Arc<E> {
    fn encode(&self, frame: &RawFrame, path: &Path) -> Result<(), EncodeError> {
        (**self).encode(frame, path)
    }
}

impl<E: FrameEncoder + ?Sized> FrameEncoder for Box<E> {
    fn encode(&self, frame: &RawFrame, path: &Path) -> Result<(), EncodeError> {
        (**self).encode(frame, path)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PngCompression {
    /// Favor encode speed; the default for real-time capture.
    #[default]
    Fast,
    Balanced,
    Best,
}

impl PngCompression {
    fn compression_type(self) -> CompressionType {
        match self {
            Self::Fast => CompressionType::Fast,
            Self::Balanced => CompressionType::Default,
            Self::Best => CompressionType::Best,
        }
    }
}

/// 32-bit RGBA PNG encoder for BGRA8 frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct PngCodec {
    compression: PngCompression,
}

impl PngCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, compression: PngCompression) -> Self {
        self.compression = compression;
        self
    }
}

impl FrameEncoder for PngCodec {
    fn encode(&self, frame: &RawFrame, path: &Path) -> Result<(), EncodeError> {
        let partial = partial_path(path);
        let file = File::create(&partial)
            .map_err(|error| EncodeError::from_io(EncodeStage::CreateStream, &error))?;
        let writer = BufWriter::new(file);

        let result = self.write_stages(frame, writer).and_then(|()| {
            std::fs::rename(&partial, path)
                .map_err(|error| EncodeError::from_io(EncodeStage::CommitStream, &error))
        });
        if result.is_err() {
            let _ = std::fs::remove_file(&partial);
        }
        result
    }
}

impl PngCodec {
    fn write_stages(&self, frame: &RawFrame, mut writer: BufWriter<File>) -> Result<(), EncodeError> {
        validate_source(frame)?;

        let rgba = crate::convert::bgra_to_rgba(frame.as_bgra_bytes())
            .map_err(|error| EncodeError::new(EncodeStage::ConvertPixels, error.to_string()))?;

        PngEncoder::new_with_quality(
            &mut writer,
            self.compression.compression_type(),
            FilterType::Adaptive,
        )
        .write_image(
            &rgba,
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|error| match error {
            ImageError::IoError(io) => EncodeError::from_io(EncodeStage::WriteFrame, &io),
            other => EncodeError::new(EncodeStage::WriteFrame, other.to_string()),
        })?;

        writer
            .flush()
            .map_err(|error| EncodeError::from_io(EncodeStage::CommitStream, &error))?;
        let file = writer
            .into_inner()
            .map_err(|error| EncodeError::from_io(EncodeStage::CommitStream, error.error()))?;
        drop(file);
        Ok(())
    }
}

fn validate_source(frame: &RawFrame) -> Result<(), EncodeError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(EncodeError::new(
            EncodeStage::ValidateSource,
            format!("cannot encode an empty {width}x{height} frame"),
        ));
    }
    let expected = width as usize * height as usize * BYTES_PER_PIXEL;
    if frame.as_bgra_bytes().len() != expected {
        return Err(EncodeError::new(
            EncodeStage::ValidateSource,
            format!(
                "BGRA buffer holds {} bytes, expected {expected} for {width}x{height}",
                frame.as_bgra_bytes().len()
            ),
        ));
    }
    Ok(())
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestDir, patterned_frame};

    #[test]
    fn writes_rgba_png_with_frame_dimensions() {
        let dir = TestDir::new("codec-ok");
        let path = dir.join("20240101_120000_3.png");
        let frame = patterned_frame(5, 3);

        PngCodec::new().encode(&frame, &path).unwrap();

        let decoded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (5, 3));
        let pixel = decoded.get_pixel(2, 1).0;
        // Pixel index 7: b=7, g=14, r=21.
        assert_eq!(pixel, [21, 14, 7, 0xFF]);
        assert_eq!(dir.file_names(), vec!["20240101_120000_3.png".to_string()]);
    }

    #[test]
    fn overwrites_existing_file() {
        let dir = TestDir::new("codec-overwrite");
        let path = dir.join("frame.png");
        std::fs::write(&path, b"not a png").unwrap();

        PngCodec::new()
            .with_compression(PngCompression::Best)
            .encode(&patterned_frame(2, 2), &path)
            .unwrap();
        assert_eq!(image::open(&path).unwrap().width(), 2);
    }

    #[test]
    fn missing_directory_fails_at_stream_creation() {
        let dir = TestDir::new("codec-missing");
        let path = dir.join("no-such-dir").join("frame.png");

        let error = PngCodec::new()
            .encode(&patterned_frame(2, 2), &path)
            .unwrap_err();
        assert_eq!(error.stage, EncodeStage::CreateStream);
        assert!(error.code.is_some());
        assert!(!path.exists());
    }

    #[test]
    fn empty_frame_fails_validation_and_leaves_nothing() {
        let dir = TestDir::new("codec-empty");
        let path = dir.join("frame.png");
        let frame = RawFrame::zeroed(0, 4).unwrap();

        let error = PngCodec::new().encode(&frame, &path).unwrap_err();
        assert_eq!(error.stage, EncodeStage::ValidateSource);
        assert_eq!(error.code, None);
        assert!(dir.file_names().is_empty());
    }

    #[test]
    fn partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("out/a.png")),
            PathBuf::from("out/a.png.partial")
        );
    }
}
