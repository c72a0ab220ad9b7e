//! Signature widget placement on a page.
//!
//! Coordinates are PDF user space (origin bottom-left, points).

use crate::domain::types::PdfSignOptions;

const MIN_MARGIN: f32 = 8.0;
const DEFAULT_MARGIN: f32 = 24.0;
const DEFAULT_WIDTH: f32 = 300.0;
const DEFAULT_HEIGHT: f32 = 128.0;
const MIN_WIDTH: f32 = 180.0;
const MIN_HEIGHT: f32 = 80.0;
const MAX_WIDTH_FLOOR: f32 = 120.0;
const MAX_HEIGHT_FLOOR: f32 = 60.0;

/// Resolved widget rectangle on a 1-based page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignaturePlacement {
    pub page_number: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl SignaturePlacement {
    /// `[llx lly urx ury]` for the widget `/Rect`.
    #[must_use]
    pub fn rect(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }
}

/// Page requested by the options, defaulting to the last page and clamped
/// into `[1, page_count]`.
#[must_use]
pub fn resolve_page_number(requested: Option<i64>, page_count: u32) -> u32 {
    let last = i64::from(page_count.max(1));
    requested.unwrap_or(last).clamp(1, last) as u32
}

/// Compute the widget rectangle for a page of the given size.
///
/// Bounds that collapse on very small pages resolve toward the upper bound
/// instead of failing.
#[must_use]
pub fn resolve_placement(
    options: &PdfSignOptions,
    page_number: u32,
    page_width: f32,
    page_height: f32,
) -> SignaturePlacement {
    let margin = options.margin.unwrap_or(DEFAULT_MARGIN).max(MIN_MARGIN);
    let max_width = MAX_WIDTH_FLOOR.max(page_width - margin * 2.0);
    let max_height = MAX_HEIGHT_FLOOR.max(page_height - margin * 2.0);

    let width = clamp(options.width.unwrap_or(DEFAULT_WIDTH), MIN_WIDTH, max_width);
    let height = clamp(options.height.unwrap_or(DEFAULT_HEIGHT), MIN_HEIGHT, max_height);

    let x = options.x.unwrap_or(page_width - width - margin);
    let y = options.y.unwrap_or(margin);

    let max_x = margin.max(page_width - width - margin);
    let max_y = margin.max(page_height - height - margin);

    SignaturePlacement {
        page_number,
        x: clamp(x, margin, max_x),
        y: clamp(y, margin, max_y),
        width,
        height,
    }
}

fn clamp(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const A4: (f32, f32) = (595.0, 842.0);

    #[test]
    fn page_defaults_to_last_and_clamps() {
        assert_eq!(resolve_page_number(None, 4), 4);
        assert_eq!(resolve_page_number(Some(0), 4), 1);
        assert_eq!(resolve_page_number(Some(-3), 4), 1);
        assert_eq!(resolve_page_number(Some(9), 4), 4);
        assert_eq!(resolve_page_number(Some(2), 4), 2);
    }

    #[test]
    fn defaults_place_widget_bottom_right() {
        let p = resolve_placement(&PdfSignOptions::default(), 1, A4.0, A4.1);
        assert_eq!(p.width, 300.0);
        assert_eq!(p.height, 128.0);
        assert_eq!(p.x, A4.0 - 300.0 - 24.0);
        assert_eq!(p.y, 24.0);
        assert_eq!(p.rect(), [271.0, 24.0, 571.0, 152.0]);
    }

    #[test]
    fn size_and_position_are_clamped() {
        let options = PdfSignOptions {
            width: Some(50.0),
            height: Some(5000.0),
            x: Some(-100.0),
            y: Some(10_000.0),
            margin: Some(2.0),
            ..Default::default()
        };
        let p = resolve_placement(&options, 1, A4.0, A4.1);
        assert_eq!(p.width, 180.0);
        assert_eq!(p.height, A4.1 - 16.0);
        assert_eq!(p.x, 8.0);
        assert_eq!(p.y, 8.0);
    }

    #[test]
    fn tiny_page_does_not_panic() {
        let p = resolve_placement(&PdfSignOptions::default(), 1, 100.0, 60.0);
        assert_eq!(p.width, 120.0);
        assert_eq!(p.height, 60.0);
        assert_eq!(p.x, 24.0);
        assert_eq!(p.y, 24.0);
    }
}
