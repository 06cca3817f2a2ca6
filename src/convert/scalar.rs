#[inline(always)]
pub(crate) fn swap_bgra_to_rgba(pixel: u32) -> u32 {
    ((pixel & 0x0000_00FF) << 16)
        | (pixel & 0x0000_FF00)
        | ((pixel & 0x00FF_0000) >> 16)
        | (pixel & 0xFF00_0000)
}

/// Swizzle whole pixels from `src` into `dst`. Both slices must hold the
/// same number of complete pixels; trailing partial pixels are ignored.
pub(crate) fn convert_bgra_to_rgba_scalar(src: &[u8], dst: &mut [u8]) {
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let pixel = u32::from_le_bytes([src_px[0], src_px[1], src_px[2], src_px[3]]);
        dst_px.copy_from_slice(&swap_bgra_to_rgba(pixel).to_le_bytes());
    }
}

pub(crate) fn is_all_zero_scalar(bytes: &[u8]) -> bool {
    let mut words = bytes.chunks_exact(8);
    let mut acc = 0u64;
    for word in &mut words {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(word);
        acc |= u64::from_ne_bytes(raw);
    }
    acc == 0 && words.remainder().iter().all(|byte| *byte == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_moves_red_and_blue_only() {
        let bgra = u32::from_le_bytes([0x11, 0x22, 0x33, 0x44]);
        assert_eq!(
            swap_bgra_to_rgba(bgra).to_le_bytes(),
            [0x33, 0x22, 0x11, 0x44]
        );
    }

    #[test]
    fn zero_scan_checks_the_unaligned_tail() {
        let mut bytes = vec![0u8; 8 * 3 + 5];
        assert!(is_all_zero_scalar(&bytes));
        *bytes.last_mut().unwrap() = 1;
        assert!(!is_all_zero_scalar(&bytes));
        assert!(is_all_zero_scalar(&[]));
    }
}
