//! Preview size selection.

use crate::types::Size;

/// Largest preview requested from the hardware.
pub const MAX_PREVIEW_SIZE: Size = Size::new(1280, 720);
/// Returned when the hardware offers no sizes at all.
pub const DEFAULT_PREVIEW_SIZE: Size = Size::new(640, 480);
/// Maximum absolute difference between candidate and display aspect ratios.
pub const ASPECT_RATIO_TOLERANCE: f32 = 0.1;

/// Pick an output size for a `display` surface from hardware `candidates`.
///
/// Candidates within [`ASPECT_RATIO_TOLERANCE`] of the display ratio that fit
/// inside `bound` compete on area and the smallest wins. When none qualify the
/// median-area candidate is used, and an empty list yields
/// [`DEFAULT_PREVIEW_SIZE`].
pub fn choose_optimal_size(candidates: &[Size], display: Size, bound: Size) -> Size {
    let target_ratio = display.aspect_ratio();

    let best_fit = candidates
        .iter()
        .copied()
        .filter(|option| {
            option.width <= bound.width
                && option.height <= bound.height
                && (option.aspect_ratio() - target_ratio).abs() < ASPECT_RATIO_TOLERANCE
        })
        .min_by_key(|option| option.area());

    if let Some(size) = best_fit {
        return size;
    }

    if candidates.is_empty() {
        tracing::warn!("no preview sizes offered, using {DEFAULT_PREVIEW_SIZE}");
        return DEFAULT_PREVIEW_SIZE;
    }

    let mut by_area = candidates.to_vec();
    by_area.sort_by_key(|option| option.area());
    by_area[by_area.len() / 2]
}
