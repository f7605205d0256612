//! Tile-coordinate engine, scale-tier policy, and page layout.
//!
//! Given a page layout, a zoom, and a quantized scale tier, this crate
//! enumerates the tiles that intersect a rectangle and maps tile indices
//! back to content-space regions. It also owns the scale-tier policy
//! (quantizing a requested scale to a fixed set of tiers) and the page
//! placement math for the supported layout modes.
//!
//! The one rule everything downstream depends on: tile coordinates are
//! always enumerated at the quantized grid scale, never at an arbitrary
//! exact scale. Rendering may use a denser exact scale, but `(tile_x,
//! tile_y)` identity must be grid-aligned so cache keys match across
//! frames. Mixing the two produces systematic tile-position corruption on
//! pan.

mod coords;
mod layout;
mod scale;

pub use coords::{page_tile_grid, visible_tiles, TileCoordinate, TileKey};
pub use layout::{place_pages, LayoutGrid, LayoutMode, PageLayout, PageRange};
pub use scale::{
    max_stretch_for_zoom, per_page_tile_cap, target_scale_tier, tile_size_for_zoom,
    ScaleSelection, DEFAULT_TILE_SIZE, MAX_TILE_PIXELS, SCALE_TIERS,
};
