//! Scale-tier quantization and tile sizing policy.
//!
//! Rendering at arbitrary scales would make every zoom level a cache miss.
//! Instead, requested scales are quantized to a fixed tier set and the
//! residual is absorbed by stretching the bitmap in CSS. A stretch of 1.0
//! is pixel-exact; larger values trade sharpness for cache reuse.

use serde::{Deserialize, Serialize};

/// The fixed set of render scales, in ascending order.
pub const SCALE_TIERS: [u32; 9] = [2, 3, 4, 6, 8, 12, 16, 24, 32];

/// Upper bound on a rendered tile edge in bitmap pixels.
pub const MAX_TILE_PIXELS: u32 = 4096;

/// Tile edge in content units when adaptive sizing is off.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// A quantized scale choice.
///
/// `css_stretch` is the factor by which the rendered bitmap must be
/// stretched to reach the ideal pixel density (`ideal / tier`); values
/// above 1.0 mean the display is softer than exact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleSelection {
    pub tier: u32,
    pub css_stretch: f64,
}

/// Tile edge length in content units for a given zoom.
///
/// Wider tiles at low zoom keep request counts down; narrower tiles at
/// extreme zoom keep `tile_size * tier` under [`MAX_TILE_PIXELS`]. With
/// `adaptive` off the size is fixed at [`DEFAULT_TILE_SIZE`].
pub fn tile_size_for_zoom(zoom: f64, adaptive: bool) -> u32 {
    if !adaptive {
        return DEFAULT_TILE_SIZE;
    }
    if zoom < 4.0 {
        512
    } else if zoom < 16.0 {
        256
    } else {
        128
    }
}

/// Quantize `zoom * dpr` to the smallest tier that covers it.
///
/// The tier is additionally capped so a full tile stays within
/// [`MAX_TILE_PIXELS`] at the given `tile_size`. The returned
/// `css_stretch` records the residual; it is below 1.0 when the tier
/// over-covers the ideal scale (sharper than needed) and above 1.0 when
/// the cap forced a coarser tier.
pub fn target_scale_tier(zoom: f64, dpr: f64, tile_size: u32) -> ScaleSelection {
    let ideal = (zoom * dpr).max(f64::MIN_POSITIVE);
    let tier_cap = (MAX_TILE_PIXELS / tile_size.max(1)).max(SCALE_TIERS[0]);

    let mut tier = *SCALE_TIERS.last().unwrap();
    for &t in &SCALE_TIERS {
        if (t as f64) >= ideal {
            tier = t;
            break;
        }
    }
    tier = tier.min(tier_cap);

    ScaleSelection {
        tier,
        css_stretch: ideal / tier as f64,
    }
}

/// Fallback acceptance bound: the largest css-stretch worth displaying at
/// a given zoom. A blurry visible tile strictly beats a blank gap, and at
/// higher zooms the nearest cached tier can be much further away.
pub fn max_stretch_for_zoom(zoom: f64) -> f64 {
    if zoom >= 32.0 {
        32.0
    } else if zoom >= 16.0 {
        16.0
    } else {
        8.0
    }
}

/// Per-page tile budget by zoom.
///
/// High zooms enumerate huge grids; the budget bounds queue growth. Grids
/// over budget are truncated by distance from the viewport center.
pub fn per_page_tile_cap(zoom: f64) -> usize {
    if zoom >= 32.0 {
        50
    } else if zoom >= 16.0 {
        100
    } else if zoom >= 8.0 {
        150
    } else {
        200
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_are_sorted_ascending() {
        for pair in SCALE_TIERS.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_target_tier_smallest_covering() {
        let s = target_scale_tier(1.3, 2.0, 256); // ideal 2.6
        assert_eq!(s.tier, 3);
        assert!((s.css_stretch - 2.6 / 3.0).abs() < 1e-12);

        let s = target_scale_tier(4.0, 1.0, 256);
        assert_eq!(s.tier, 4);
        assert_eq!(s.css_stretch, 1.0);
    }

    #[test]
    fn test_target_tier_capped_by_tile_pixels() {
        // 256 content units/tile caps the tier at 4096/256 = 16.
        let s = target_scale_tier(24.0, 1.0, 256);
        assert_eq!(s.tier, 16);
        assert!(s.css_stretch > 1.0);

        // Narrower tiles allow the full tier set.
        let s = target_scale_tier(24.0, 1.0, 128);
        assert_eq!(s.tier, 24);
        assert_eq!(s.css_stretch, 1.0);
    }

    #[test]
    fn test_target_tier_beyond_max_clamps_to_largest() {
        let s = target_scale_tier(64.0, 2.0, 128); // ideal 128
        assert_eq!(s.tier, 32);
        assert_eq!(s.css_stretch, 4.0);
    }

    #[test]
    fn test_tile_size_adaptive_narrows_with_zoom() {
        assert_eq!(tile_size_for_zoom(1.0, true), 512);
        assert_eq!(tile_size_for_zoom(8.0, true), 256);
        assert_eq!(tile_size_for_zoom(24.0, true), 128);
        assert_eq!(tile_size_for_zoom(24.0, false), DEFAULT_TILE_SIZE);
    }

    #[test]
    fn test_tile_pixel_budget_holds_for_all_zooms() {
        for zoom in [0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 24.0, 32.0, 64.0] {
            for dpr in [1.0, 2.0] {
                let ts = tile_size_for_zoom(zoom, true);
                let sel = target_scale_tier(zoom, dpr, ts);
                assert!(
                    ts * sel.tier <= MAX_TILE_PIXELS,
                    "zoom {zoom} dpr {dpr}: {} * {} exceeds budget",
                    ts,
                    sel.tier
                );
            }
        }
    }

    #[test]
    fn test_max_stretch_bands() {
        assert_eq!(max_stretch_for_zoom(4.0), 8.0);
        assert_eq!(max_stretch_for_zoom(16.0), 16.0);
        assert_eq!(max_stretch_for_zoom(32.0), 32.0);
    }

    #[test]
    fn test_per_page_cap_bands() {
        assert_eq!(per_page_tile_cap(33.0), 50);
        assert_eq!(per_page_tile_cap(20.0), 100);
        assert_eq!(per_page_tile_cap(10.0), 150);
        assert_eq!(per_page_tile_cap(2.0), 200);
    }
}
