//! Page placement and O(1) bounds-to-pages math.
//!
//! Pages are placed once at initialization from the backend's native
//! per-page dimensions; positions never change except on display-mode
//! change. Placement uses a uniform cell grid (cell = largest page size
//! plus gap) so the set of pages intersecting a rectangle is computed
//! directly from row/column ranges, never by iterating all pages.

use serde::{Deserialize, Serialize};
use vellum_camera::Rect;

/// A page's placed rectangle in content coordinates.
///
/// `page` is 1-indexed, matching the external page-number convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PageLayout {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// How pages flow on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutMode {
    /// One column, top to bottom.
    Vertical,
    /// One row, left to right.
    Horizontal,
    /// Row-major grid with a fixed number of pages per row.
    Grid { pages_per_row: u32 },
}

/// An inclusive 1-indexed page span.
pub type PageRange = std::ops::RangeInclusive<u32>;

/// Precomputed placement grid for O(1) visibility queries.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutGrid {
    pub mode: LayoutMode,
    pub page_count: u32,
    pub pages_per_row: u32,
    /// Cell pitch including the gap.
    pub cell_width: f64,
    pub cell_height: f64,
    pub gap: f64,
}

impl LayoutGrid {
    /// Pages whose cells intersect `rect`, computed from row/column ranges
    /// alone.
    ///
    /// Returns `None` when the rect misses the grid entirely. The result
    /// may include pages whose actual (smaller-than-cell) rect misses the
    /// query; callers intersect per-page when exactness matters.
    pub fn pages_in_rect(&self, rect: Rect) -> Option<PageRange> {
        if rect.is_empty() || self.page_count == 0 || self.cell_width <= 0.0 || self.cell_height <= 0.0
        {
            return None;
        }

        let last_col = (self.pages_per_row - 1) as i64;
        let rows = self.page_count.div_ceil(self.pages_per_row);
        let last_row = (rows - 1) as i64;

        let col_lo = (rect.x / self.cell_width).floor() as i64;
        let col_hi = ((rect.right() - f64::EPSILON) / self.cell_width).floor() as i64;
        let row_lo = (rect.y / self.cell_height).floor() as i64;
        let row_hi = ((rect.bottom() - f64::EPSILON) / self.cell_height).floor() as i64;

        if col_hi < 0 || row_hi < 0 || col_lo > last_col || row_lo > last_row {
            return None;
        }

        let col_lo = col_lo.clamp(0, last_col) as u32;
        let col_hi = col_hi.clamp(0, last_col) as u32;
        let row_lo = row_lo.clamp(0, last_row) as u32;
        let row_hi = row_hi.clamp(0, last_row) as u32;

        // Row-major numbering: the span covers whole rows between the
        // first and last intersected row; single-column and single-row
        // modes degenerate to an exact span.
        let first = row_lo * self.pages_per_row + col_lo + 1;
        let last = (row_hi * self.pages_per_row + col_hi + 1).min(self.page_count);
        if first > last {
            return None;
        }
        Some(first..=last)
    }

    /// The page nearest to a content-space point, by cell.
    pub fn page_at_point(&self, x: f64, y: f64) -> u32 {
        if self.page_count == 0 {
            return 1;
        }
        let rows = self.page_count.div_ceil(self.pages_per_row);
        let col = ((x / self.cell_width).floor().max(0.0) as u32).min(self.pages_per_row - 1);
        let row = ((y / self.cell_height).floor().max(0.0) as u32).min(rows - 1);
        (row * self.pages_per_row + col + 1).min(self.page_count)
    }
}

/// Place pages for a layout mode.
///
/// `page_sizes` are the native `(width, height)` pairs from the backend,
/// in page order. All cells share the pitch of the largest page so the
/// reverse mapping stays O(1); pages are centered horizontally within
/// their cell in vertical mode (the familiar document-viewer look).
pub fn place_pages(
    page_sizes: &[(f64, f64)],
    mode: LayoutMode,
    gap: f64,
) -> (Vec<PageLayout>, LayoutGrid) {
    let max_w = page_sizes.iter().map(|s| s.0).fold(0.0, f64::max);
    let max_h = page_sizes.iter().map(|s| s.1).fold(0.0, f64::max);
    let cell_width = max_w + gap;
    let cell_height = max_h + gap;

    let pages_per_row = match mode {
        LayoutMode::Vertical => 1,
        LayoutMode::Horizontal => page_sizes.len().max(1) as u32,
        LayoutMode::Grid { pages_per_row } => pages_per_row.max(1),
    };

    let layouts = page_sizes
        .iter()
        .enumerate()
        .map(|(i, &(w, h))| {
            let row = i as u32 / pages_per_row;
            let col = i as u32 % pages_per_row;
            PageLayout {
                page: i as u32 + 1,
                x: col as f64 * cell_width + (cell_width - gap - w) / 2.0,
                y: row as f64 * cell_height,
                width: w,
                height: h,
            }
        })
        .collect();

    let grid = LayoutGrid {
        mode,
        page_count: page_sizes.len() as u32,
        pages_per_row,
        cell_width,
        cell_height,
        gap,
    };
    (layouts, grid)
}
