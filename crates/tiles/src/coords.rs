//! Tile coordinates and grid enumeration.

use tracing::warn;
use vellum_camera::{Point, Rect};

use crate::layout::PageLayout;
use crate::scale::per_page_tile_cap;

/// Cache/dedup identity of a tile: `(page, tile_x, tile_y, scale)`.
///
/// The tile size is deliberately not part of the identity; it is derived
/// from zoom at enumeration time and travels alongside in
/// [`TileCoordinate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub page: u32,
    pub tile_x: u32,
    pub tile_y: u32,
    pub scale: u32,
}

/// A tile with its derived geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileCoordinate {
    pub page: u32,
    pub tile_x: u32,
    pub tile_y: u32,
    /// Quantized grid scale (render tier).
    pub scale: u32,
    /// Tile edge in content units at this zoom.
    pub tile_size: u32,
}

impl TileCoordinate {
    pub fn key(&self) -> TileKey {
        TileKey {
            page: self.page,
            tile_x: self.tile_x,
            tile_y: self.tile_y,
            scale: self.scale,
        }
    }

    /// The tile's footprint in page-local content coordinates, clipped to
    /// the page. Edge tiles are partial.
    pub fn page_rect(&self, page_width: f64, page_height: f64) -> Rect {
        let ts = self.tile_size as f64;
        let x = self.tile_x as f64 * ts;
        let y = self.tile_y as f64 * ts;
        Rect::new(x, y, ts.min(page_width - x), ts.min(page_height - y))
    }

    /// The tile's footprint in canvas content coordinates.
    pub fn content_rect(&self, layout: &PageLayout) -> Rect {
        let local = self.page_rect(layout.width, layout.height);
        Rect::new(layout.x + local.x, layout.y + local.y, local.width, local.height)
    }

    /// Bitmap dimensions this tile renders at, in pixels.
    pub fn pixel_size(&self, page_width: f64, page_height: f64) -> (u32, u32) {
        let r = self.page_rect(page_width, page_height);
        (
            (r.width * self.scale as f64).round().max(1.0) as u32,
            (r.height * self.scale as f64).round().max(1.0) as u32,
        )
    }
}

/// Enumerate the full tile grid of one page at a grid scale.
///
/// Returns an empty vec (with a warning) for degenerate layouts; callers
/// fall back to a full-page render in that case.
pub fn page_tile_grid(layout: &PageLayout, grid_scale: u32, tile_size: u32) -> Vec<TileCoordinate> {
    if layout.width <= 0.0 || layout.height <= 0.0 || tile_size == 0 {
        warn!(page = layout.page, "degenerate page layout, no tile grid");
        return Vec::new();
    }
    let ts = tile_size as f64;
    let cols = (layout.width / ts).ceil() as u32;
    let rows = (layout.height / ts).ceil() as u32;

    let mut tiles = Vec::with_capacity((cols * rows) as usize);
    for ty in 0..rows {
        for tx in 0..cols {
            tiles.push(TileCoordinate {
                page: layout.page,
                tile_x: tx,
                tile_y: ty,
                scale: grid_scale,
                tile_size,
            });
        }
    }
    tiles
}

/// Enumerate tiles of the given pages that intersect `viewport` (a rect in
/// content coordinates, typically already expanded by a per-zoom buffer).
///
/// Tiles are enumerated at the quantized `grid_scale`; each page's grid is
/// truncated to the per-zoom budget by distance from the viewport center
/// when oversized.
pub fn visible_tiles(
    viewport: Rect,
    layouts: &[PageLayout],
    zoom: f64,
    grid_scale: u32,
    tile_size: u32,
) -> Vec<TileCoordinate> {
    if viewport.is_empty() || tile_size == 0 {
        return Vec::new();
    }
    let ts = tile_size as f64;
    let cap = per_page_tile_cap(zoom);
    let center = viewport.center();

    let mut out = Vec::new();
    for layout in layouts {
        let Some(overlap) = layout.rect().intersection(&viewport) else {
            continue;
        };

        // Page-local tile index span covering the overlap.
        let lx = overlap.x - layout.x;
        let ly = overlap.y - layout.y;
        let tx_lo = (lx / ts).floor().max(0.0) as u32;
        let ty_lo = (ly / ts).floor().max(0.0) as u32;
        let tx_hi = (((lx + overlap.width) / ts).ceil() as u32)
            .min((layout.width / ts).ceil() as u32)
            .max(tx_lo + 1);
        let ty_hi = (((ly + overlap.height) / ts).ceil() as u32)
            .min((layout.height / ts).ceil() as u32)
            .max(ty_lo + 1);

        let mut page_tiles = Vec::with_capacity(((tx_hi - tx_lo) * (ty_hi - ty_lo)) as usize);
        for ty in ty_lo..ty_hi {
            for tx in tx_lo..tx_hi {
                page_tiles.push(TileCoordinate {
                    page: layout.page,
                    tile_x: tx,
                    tile_y: ty,
                    scale: grid_scale,
                    tile_size,
                });
            }
        }

        if page_tiles.len() > cap {
            page_tiles.sort_by(|a, b| {
                let da = tile_center_distance(a, layout, center);
                let db = tile_center_distance(b, layout, center);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            });
            page_tiles.truncate(cap);
        }
        out.extend(page_tiles);
    }
    out
}

fn tile_center_distance(tile: &TileCoordinate, layout: &PageLayout, center: Point) -> f64 {
    tile.content_rect(layout).center().distance_to(center)
}
