//! Which image a result row shows, and how a click cycles it

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ImageView {
    Diff,
    A,
    B,
}

pub fn initial_view(diff_mode_enabled: bool) -> ImageView {
    if diff_mode_enabled {
        ImageView::Diff
    } else {
        ImageView::A
    }
}

/// Diff mode cycles Diff, A, B; otherwise the row flips between A and B
pub fn next_view(current: ImageView, diff_mode_enabled: bool) -> ImageView {
    match (current, diff_mode_enabled) {
        (ImageView::Diff, true) => ImageView::A,
        (ImageView::A, true) => ImageView::B,
        (ImageView::B, true) => ImageView::Diff,
        (ImageView::A, false) => ImageView::B,
        (ImageView::Diff | ImageView::B, false) => ImageView::A,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_mode_cycles_three_views() {
        let mut view = initial_view(true);
        let mut seen = vec![view];
        for _ in 0..3 {
            view = next_view(view, true);
            seen.push(view);
        }
        assert_eq!(seen, vec![ImageView::Diff, ImageView::A, ImageView::B, ImageView::Diff]);
    }

    #[test]
    fn test_without_diff_mode_toggles_a_and_b() {
        assert_eq!(initial_view(false), ImageView::A);
        assert_eq!(next_view(ImageView::A, false), ImageView::B);
        assert_eq!(next_view(ImageView::B, false), ImageView::A);
        assert_eq!(next_view(ImageView::Diff, false), ImageView::A);
    }
}
