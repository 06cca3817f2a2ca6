//! Pixel buffer helpers shared by the capture and encode paths.
//!
//! Large buffers are split into aligned chunks and processed on a small
//! dedicated rayon pool; small ones run inline.

mod parallel;
mod scalar;

use parallel::{install_conversion_pool, parallel_chunk_pixels, should_parallelize};
use rayon::prelude::*;

use crate::env_config::define_env_flag;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::BYTES_PER_PIXEL;

const BGRA_PARALLEL_MIN_PIXELS: usize = 524_288;
const BGRA_PARALLEL_MIN_CHUNK_PIXELS: usize = 131_072;

/// The zero scan touches each byte once and exits early, so it only pays
/// off on bigger buffers than the swizzle.
const ZERO_SCAN_PARALLEL_MIN_PIXELS: usize = 1_048_576;
const ZERO_SCAN_PARALLEL_MIN_CHUNK_PIXELS: usize = 262_144;

const CONVERSION_PARALLEL_MAX_WORKERS: usize = 8;

define_env_flag!(enabled_unless(
    parallel_convert_enabled,
    "SNOW_TIMELAPSE_DISABLE_PARALLEL_CONVERT"
));

/// Pre-initialize the conversion pool so the first frame doesn't pay the
/// cost. Safe to call multiple times.
pub fn warmup() {
    if parallel_convert_enabled() {
        parallel::warmup_pool(CONVERSION_PARALLEL_MAX_WORKERS);
    }
}

/// Swizzle a tightly packed BGRA8 buffer into a newly allocated RGBA8
/// buffer of the same length.
pub fn bgra_to_rgba(src: &[u8]) -> CaptureResult<Vec<u8>> {
    let mut dst = vec![0u8; src.len()];
    convert_bgra_to_rgba(src, &mut dst)?;
    Ok(dst)
}

/// Swizzle BGRA8 pixels from `src` into `dst`. Both buffers must have the
/// same length, a whole number of pixels.
pub fn convert_bgra_to_rgba(src: &[u8], dst: &mut [u8]) -> CaptureResult<()> {
    if src.len() != dst.len() || src.len() % BYTES_PER_PIXEL != 0 {
        return Err(CaptureError::InvalidConfig(format!(
            "BGRA to RGBA conversion needs equal whole-pixel buffers, got {} and {} bytes",
            src.len(),
            dst.len()
        )));
    }

    let pixel_count = src.len() / BYTES_PER_PIXEL;
    let chunk_pixels = parallel_convert_enabled()
        .then(|| {
            should_parallelize(
                pixel_count,
                BGRA_PARALLEL_MIN_PIXELS,
                BGRA_PARALLEL_MIN_CHUNK_PIXELS,
                CONVERSION_PARALLEL_MAX_WORKERS,
            )
        })
        .filter(|parallel| *parallel)
        .and_then(|_| {
            parallel_chunk_pixels(
                pixel_count,
                BGRA_PARALLEL_MIN_CHUNK_PIXELS,
                CONVERSION_PARALLEL_MAX_WORKERS,
            )
        });

    match chunk_pixels {
        Some(chunk_pixels) => {
            let chunk_bytes = chunk_pixels * BYTES_PER_PIXEL;
            install_conversion_pool(CONVERSION_PARALLEL_MAX_WORKERS, || {
                src.par_chunks(chunk_bytes)
                    .zip(dst.par_chunks_mut(chunk_bytes))
                    .for_each(|(src_chunk, dst_chunk)| {
                        scalar::convert_bgra_to_rgba_scalar(src_chunk, dst_chunk);
                    });
            });
        }
        None => scalar::convert_bgra_to_rgba_scalar(src, dst),
    }
    Ok(())
}

/// Whether every byte of `bytes` is zero.
pub fn is_all_zero(bytes: &[u8]) -> bool {
    let pixel_count = bytes.len() / BYTES_PER_PIXEL;
    if parallel_convert_enabled()
        && should_parallelize(
            pixel_count,
            ZERO_SCAN_PARALLEL_MIN_PIXELS,
            ZERO_SCAN_PARALLEL_MIN_CHUNK_PIXELS,
            CONVERSION_PARALLEL_MAX_WORKERS,
        )
        && let Some(chunk_pixels) = parallel_chunk_pixels(
            pixel_count,
            ZERO_SCAN_PARALLEL_MIN_CHUNK_PIXELS,
            CONVERSION_PARALLEL_MAX_WORKERS,
        )
    {
        let chunk_bytes = chunk_pixels * BYTES_PER_PIXEL;
        return install_conversion_pool(CONVERSION_PARALLEL_MAX_WORKERS, || {
            bytes.par_chunks(chunk_bytes).all(scalar::is_all_zero_scalar)
        });
    }
    scalar::is_all_zero_scalar(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(pixel_count: usize) -> Vec<u8> {
        let mut src = vec![0u8; pixel_count * 4];
        for (i, px) in src.chunks_exact_mut(4).enumerate() {
            px[0] = (i & 0xFF) as u8;
            px[1] = ((i >> 1) & 0xFF) as u8;
            px[2] = ((i >> 2) & 0xFF) as u8;
            px[3] = 0x2A;
        }
        src
    }

    fn assert_swizzled(src: &[u8], dst: &[u8]) {
        for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact(4)) {
            assert_eq!(d, [s[2], s[1], s[0], s[3]]);
        }
    }

    #[test]
    fn small_buffers_convert_inline() {
        let src = gradient(37);
        let dst = bgra_to_rgba(&src).unwrap();
        assert_swizzled(&src, &dst);
    }

    #[test]
    fn large_buffers_convert_through_the_pool() {
        // Big enough for the parallel path on multi-core hosts, with a
        // chunk-unaligned tail.
        let src = gradient(BGRA_PARALLEL_MIN_PIXELS * 2 + 77);
        let dst = bgra_to_rgba(&src).unwrap();
        assert_eq!(dst.len(), src.len());
        assert_swizzled(&src, &dst);
    }

    #[test]
    fn mismatched_buffers_are_rejected() {
        let src = gradient(4);
        let mut dst = vec![0u8; 12];
        assert!(matches!(
            convert_bgra_to_rgba(&src, &mut dst),
            Err(CaptureError::InvalidConfig(_))
        ));
        assert!(bgra_to_rgba(&[0u8; 7]).is_err());
    }

    #[test]
    fn zero_scan_finds_a_single_set_byte_anywhere() {
        let len = ZERO_SCAN_PARALLEL_MIN_PIXELS * 4 * 2;
        let mut bytes = vec![0u8; len];
        assert!(is_all_zero(&bytes));
        for index in [0, len / 3, len - 1] {
            bytes[index] = 0x80;
            assert!(!is_all_zero(&bytes));
            bytes[index] = 0;
        }
    }
}
