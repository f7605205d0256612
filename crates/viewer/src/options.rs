//! Viewer options, display modes, and feature flags.

use serde::{Deserialize, Serialize};
use vellum_tiles::LayoutMode;

/// Display modes a host can select.
///
/// Each defines the layout mode, the constraint policy, and the initial
/// fit. Selecting a mode destroys existing page elements, bumps the epoch,
/// and reissues visibility from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    Paginated,
    HorizontalScroll,
    VerticalScroll,
    AutoGrid,
    Canvas,
}

impl DisplayMode {
    /// The page-flow layout this mode uses.
    pub fn layout_mode(&self, page_count: u32) -> LayoutMode {
        match self {
            DisplayMode::Paginated | DisplayMode::VerticalScroll => LayoutMode::Vertical,
            DisplayMode::HorizontalScroll => LayoutMode::Horizontal,
            DisplayMode::AutoGrid => LayoutMode::Grid {
                pages_per_row: (page_count as f64).sqrt().ceil().max(1.0) as u32,
            },
            DisplayMode::Canvas => LayoutMode::Grid {
                pages_per_row: ((page_count as f64) / 2.0).sqrt().ceil().max(1.0) as u32 * 2,
            },
        }
    }

    /// Whether panning is constrained to the content bounds (the free
    /// canvas mode lets the user roam).
    pub fn constrains_pan(&self) -> bool {
        !matches!(self, DisplayMode::Canvas)
    }

    /// Whether the initial camera fits a full page (vs page width).
    pub fn initial_fit_page(&self) -> bool {
        matches!(self, DisplayMode::Paginated | DisplayMode::AutoGrid | DisplayMode::Canvas)
    }
}

/// Construction-time options and feature flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerOptions {
    pub display_mode: DisplayMode,
    /// Speculative intermediate renders during the settling phase. With a
    /// very fast backend the churn can outweigh the benefit; flip it off.
    pub use_multi_res_zoom: bool,
    /// Render tiles at the exact (zoom × dpr) scale while keeping tile
    /// identity at the quantized grid scale.
    pub use_exact_scale_rendering: bool,
    /// Shrink tile size at extreme zoom to keep the pixel budget capped.
    pub use_adaptive_tile_size: bool,
    /// Screen-pixel camera convention with pre-scaled content.
    pub use_unified_coordinate_space: bool,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Device pixel ratio of the hosting display.
    pub device_pixel_ratio: f64,
    /// Gap between pages in content units.
    pub page_gap: f64,
    /// Tile cache budget in megabytes.
    pub cache_budget_mb: usize,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::VerticalScroll,
            use_multi_res_zoom: true,
            use_exact_scale_rendering: false,
            use_adaptive_tile_size: true,
            use_unified_coordinate_space: false,
            min_zoom: 0.1,
            max_zoom: 32.0,
            device_pixel_ratio: 1.0,
            page_gap: 20.0,
            cache_budget_mb: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_serde_round_trip() {
        let options = ViewerOptions {
            display_mode: DisplayMode::AutoGrid,
            use_unified_coordinate_space: true,
            max_zoom: 64.0,
            ..Default::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("\"auto-grid\""));
        let back: ViewerOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(options, back);
    }

    #[test]
    fn test_options_default_fill_in() {
        let back: ViewerOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(back, ViewerOptions::default());
    }

    #[test]
    fn test_display_mode_layouts() {
        assert_eq!(
            DisplayMode::VerticalScroll.layout_mode(10),
            LayoutMode::Vertical
        );
        assert_eq!(
            DisplayMode::HorizontalScroll.layout_mode(10),
            LayoutMode::Horizontal
        );
        assert!(matches!(
            DisplayMode::AutoGrid.layout_mode(10),
            LayoutMode::Grid { pages_per_row: 4 }
        ));
    }

    #[test]
    fn test_canvas_mode_unconstrained() {
        assert!(!DisplayMode::Canvas.constrains_pan());
        assert!(DisplayMode::VerticalScroll.constrains_pan());
    }
}
