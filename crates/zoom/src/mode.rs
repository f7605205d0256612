//! Render-mode decision with hysteresis.

/// How a page is rendered at the current zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// One bitmap per page.
    FullPage,
    /// Speculative intermediate quality during settling.
    Adaptive,
    /// Tile grid per page.
    Tiled,
}

/// Decide the render mode for `zoom` given the currently committed mode.
///
/// A 10% multiplicative band around the threshold prevents flapping when
/// the zoom hovers near it: from full-page the decision crosses to tiled
/// only above `threshold * (1 + band)`, and from tiled back to full-page
/// only below `threshold * (1 - band)`. Exactly at the threshold the
/// committed mode wins. Beyond `max_tiled_zoom` full-page is forced:
/// viewport-only tile grids can be degenerate at extreme zoom and a
/// capped-scale full page is more reliable.
pub fn decide_render_mode(
    zoom: f64,
    current: RenderMode,
    threshold: f64,
    band: f64,
    max_tiled_zoom: f64,
) -> RenderMode {
    if zoom > max_tiled_zoom {
        return RenderMode::FullPage;
    }
    match current {
        RenderMode::Tiled => {
            if zoom < threshold * (1.0 - band) {
                RenderMode::FullPage
            } else {
                RenderMode::Tiled
            }
        }
        // Adaptive is transient; it resolves like full-page.
        RenderMode::FullPage | RenderMode::Adaptive => {
            if zoom > threshold * (1.0 + band) {
                RenderMode::Tiled
            } else {
                RenderMode::FullPage
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f64 = 4.0;
    const BAND: f64 = 0.1;
    const MAX_TILED: f64 = 64.0;

    fn decide(zoom: f64, current: RenderMode) -> RenderMode {
        decide_render_mode(zoom, current, THRESHOLD, BAND, MAX_TILED)
    }

    #[test]
    fn test_crossing_up_requires_upper_band() {
        assert_eq!(decide(4.2, RenderMode::FullPage), RenderMode::FullPage);
        assert_eq!(decide(4.41, RenderMode::FullPage), RenderMode::Tiled);
    }

    #[test]
    fn test_crossing_down_requires_lower_band() {
        assert_eq!(decide(3.8, RenderMode::Tiled), RenderMode::Tiled);
        assert_eq!(decide(3.59, RenderMode::Tiled), RenderMode::FullPage);
    }

    #[test]
    fn test_at_threshold_keeps_committed_mode() {
        assert_eq!(decide(THRESHOLD, RenderMode::Tiled), RenderMode::Tiled);
        assert_eq!(decide(THRESHOLD, RenderMode::FullPage), RenderMode::FullPage);
    }

    #[test]
    fn test_extreme_zoom_forces_full_page() {
        assert_eq!(decide(65.0, RenderMode::Tiled), RenderMode::FullPage);
        assert_eq!(decide(65.0, RenderMode::FullPage), RenderMode::FullPage);
    }

    #[test]
    fn test_no_flap_inside_band() {
        // Oscillating within the band never changes mode.
        let mut mode = RenderMode::Tiled;
        for zoom in [4.0, 3.7, 4.3, 3.65, 4.39] {
            mode = decide(zoom, mode);
            assert_eq!(mode, RenderMode::Tiled, "flapped at {zoom}");
        }
    }
}
