//! Downsampling and orientation policy.
//!
//! Decoders sample images in powers of two. These functions pick the largest
//! power of two that still keeps the decoded image larger than the requested
//! target on both axes, and fix up bookkeeping afterwards.

/// EXIF orientation code for "no transform".
pub const ORIENTATION_NORMAL: u8 = 1;

/// Largest shift considered; keeps `1 << shift` well inside `u32`.
const MAX_SHIFT: u32 = 30;

/// Outcome of [`choose_downsample_shift`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownsampleChoice {
    /// Power-of-two sample shift.
    pub shift: u32,
    /// Expected decoded width (`src_width >> shift`).
    pub width: u32,
    /// Expected decoded height (`src_height >> shift`).
    pub height: u32,
}

/// Picks the decode sample shift for a source of `src_width` x `src_height`.
///
/// The shift grows while halving once more would still leave both axes
/// strictly larger than the target. A zero target on one axis never stops the
/// loop by itself, so callers normally pass both dimensions or neither.
#[must_use]
pub fn choose_downsample_shift(
    src_width: u32,
    src_height: u32,
    target_width: u32,
    target_height: u32,
) -> DownsampleChoice {
    let mut shift = 0;
    while shift < MAX_SHIFT
        && target_width < src_width >> (shift + 1)
        && target_height < src_height >> (shift + 1)
    {
        shift += 1;
    }
    DownsampleChoice {
        shift,
        width: src_width >> shift,
        height: src_height >> shift,
    }
}

/// Corrects the shift after decoding.
///
/// Some decoders silently ignore the sample request for certain encodings
/// (interlaced images). If the decoded width still equals the original width
/// the pixels are full resolution and the effective shift is zero.
#[must_use]
pub const fn correct_shift(requested_shift: u32, original_width: u32, actual_width: u32) -> u32 {
    if requested_shift > 0 && actual_width == original_width {
        0
    } else {
        requested_shift
    }
}

/// Returns true for orientation codes that rotate by 90 or 270 degrees.
#[must_use]
pub const fn is_quarter_turn(orientation: u8) -> bool {
    matches!(orientation, 5..=8)
}

/// Applies an EXIF orientation code to a pair of dimensions.
#[must_use]
pub const fn apply_orientation(width: u32, height: u32, orientation: u8) -> (u32, u32) {
    if is_quarter_turn(orientation) {
        (height, width)
    } else {
        (width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(1000, 1000, 100, 100, 3, 125, 125 ; "square_to_tenth")]
    #[test_case(1000, 1000, 125, 125, 2, 250, 250 ; "exact_half_power_stops_early")]
    #[test_case(800, 600, 800, 600, 0, 800, 600 ; "same_size")]
    #[test_case(800, 600, 1600, 1200, 0, 800, 600 ; "upscale_request")]
    #[test_case(4000, 3000, 100, 2000, 0, 4000, 3000 ; "one_axis_blocks")]
    #[test_case(4000, 3000, 300, 200, 3, 500, 375 ; "landscape")]
    #[test_case(1024, 1024, 0, 0, 10, 1, 1 ; "zero_target_keeps_halving")]
    fn test_choose_downsample_shift(
        src_w: u32,
        src_h: u32,
        target_w: u32,
        target_h: u32,
        shift: u32,
        width: u32,
        height: u32,
    ) {
        let choice = choose_downsample_shift(src_w, src_h, target_w, target_h);
        assert_eq!(
            choice,
            DownsampleChoice {
                shift,
                width,
                height
            }
        );
    }

    #[test]
    fn test_chosen_shift_is_largest_valid() {
        for (w, h, tw, th) in [(1000, 700, 90, 60), (3000, 2000, 640, 480), (517, 911, 33, 47)] {
            let choice = choose_downsample_shift(w, h, tw, th);
            assert!(choice.width >= tw && choice.height >= th);
            let next = choice.shift + 1;
            assert!(w >> next <= tw || h >> next <= th);
        }
    }

    #[test]
    fn test_correct_shift_detects_ignored_sampling() {
        assert_eq!(correct_shift(2, 640, 640), 0);
        assert_eq!(correct_shift(2, 640, 160), 2);
        assert_eq!(correct_shift(0, 640, 640), 0);
    }

    #[test_case(6, (200, 100) ; "rotate_90")]
    #[test_case(5, (200, 100) ; "transpose")]
    #[test_case(8, (200, 100) ; "rotate_270")]
    #[test_case(1, (100, 200) ; "normal")]
    #[test_case(3, (100, 200) ; "rotate_180")]
    #[test_case(0, (100, 200) ; "unknown")]
    fn test_apply_orientation(code: u8, expected: (u32, u32)) {
        assert_eq!(apply_orientation(100, 200, code), expected);
    }
}
