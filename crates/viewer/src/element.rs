//! Per-page element: canvases, tile composition, and mode transitions.
//!
//! Each page owns a main surface (displayed), an optional snapshot surface
//! (last-known-good content held across transitions), and an optional
//! overlay surface (incoming render, atomically swapped in). The one rule
//! that must survive every code path here: the page never goes blank. Any
//! path that hides the main canvas must either show it again or commit new
//! content first, on every exit, including failure.

use tracing::{debug, trace};
use vellum_camera::Rect;
use vellum_provider::{Bitmap, SharedBitmap, TextLayer};
use vellum_tiles::TileCoordinate;

use crate::surface::{ElementStyle, Surface};

/// Fraction of expected viewport tiles that must have arrived before an
/// additive composite draws anything. Sparse draws look worse than delayed
/// draws.
pub const MIN_TILE_COVERAGE: f64 = 0.25;

/// Immutable transform state captured when a tile batch is requested.
///
/// Composition positions pixels from this, not from the live element,
/// so tiles land where they were aimed even if the element resized while
/// the render was in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSnapshot {
    pub container_width: f64,
    pub container_height: f64,
    /// Content units to element pixels.
    pub pdf_to_element_scale: f64,
    /// In viewport-only mode, the page-local region tiles were enumerated
    /// for; the composite covers only this.
    pub expected_tile_bounds: Option<Rect>,
    pub epoch: u64,
}

/// A tile ready for composition.
#[derive(Debug, Clone)]
pub struct TileImage {
    pub coordinate: TileCoordinate,
    pub bitmap: SharedBitmap,
    /// Stretch applied when this is a fallback at another scale.
    pub css_stretch: f64,
}

/// One page's DOM-side state.
#[derive(Debug)]
pub struct PageElement {
    pub page: u32,
    main: Surface,
    snapshot: Option<Surface>,
    overlay: Option<Surface>,
    style: ElementStyle,
    is_rendered: bool,
    rendered_epoch: u64,
    text_layer: Option<TextLayer>,
    /// Expected tile count of the current composite, for coverage checks.
    expected_tiles: usize,
    composited_tiles: usize,
}

impl PageElement {
    pub fn new(page: u32) -> Self {
        Self {
            page,
            main: Surface::default(),
            snapshot: None,
            overlay: None,
            style: ElementStyle::default(),
            is_rendered: false,
            rendered_epoch: 0,
            text_layer: None,
            expected_tiles: 0,
            composited_tiles: 0,
        }
    }

    pub fn style(&self) -> &ElementStyle {
        &self.style
    }

    pub fn main_surface(&self) -> &Surface {
        &self.main
    }

    pub fn rendered_epoch(&self) -> u64 {
        self.rendered_epoch
    }

    pub fn text_layer(&self) -> Option<&TextLayer> {
        self.text_layer.as_ref()
    }

    pub fn set_text_layer(&mut self, layer: TextLayer) {
        self.text_layer = Some(layer);
    }

    /// Wrapper and backing-canvas logical size.
    pub fn set_dimensions(&mut self, width: f64, height: f64) {
        self.style.css_width = width;
        self.style.css_height = height;
        self.main.resize(width.max(0.0) as u32, height.max(0.0) as u32);
        self.is_rendered = false;
    }

    /// Final dimensions; in unified coordinate space the zoom is baked
    /// into the element's layout size.
    pub fn set_final_dimensions(&mut self, width: f64, height: f64, zoom: f64, unified: bool) {
        if unified {
            self.set_dimensions(width * zoom, height * zoom);
        } else {
            self.set_dimensions(width, height);
        }
    }

    /// True iff the element claims content and its canvas has non-zero
    /// dimensions.
    pub fn has_rendered_content(&self) -> bool {
        self.is_rendered && !self.main.is_zero_sized()
    }

    /// Sampled pixel check backing the blank-page sweep.
    pub fn has_visible_pixels(&self) -> bool {
        self.main.has_visible_pixels()
    }

    /// Epoch admission: a bitmap more than one epoch behind is stale,
    /// unless accepting it is the difference between something and a blank
    /// page.
    fn accepts_epoch(&self, bitmap_epoch: u64, current_epoch: u64) -> bool {
        if current_epoch <= bitmap_epoch + 1 {
            return true;
        }
        !self.has_rendered_content()
    }

    /// Draw a decoded full-page bitmap to the main canvas.
    pub fn render_full_page(&mut self, bitmap: &Bitmap, epoch: u64) {
        if self.main.is_zero_sized() {
            self.main.resize(bitmap.width, bitmap.height);
        }
        self.main.draw_bitmap(
            bitmap,
            0.0,
            0.0,
            self.main.width() as f64,
            self.main.height() as f64,
        );
        self.is_rendered = true;
        self.rendered_epoch = epoch;
        self.show_canvas();
    }

    /// Compose a batch of tiles onto the main canvas using the transform
    /// snapshot captured at request time.
    ///
    /// Falls back to current dimensions (with the coverage check) when the
    /// element's epoch has moved past the snapshot. Returns `false` when
    /// the batch was dropped; dropped bitmaps are released by drop.
    pub fn render_tiles(
        &mut self,
        tiles: &[TileImage],
        text: Option<TextLayer>,
        snapshot: &TransformSnapshot,
        current_epoch: u64,
        expected_count: usize,
    ) -> bool {
        if tiles.is_empty() {
            return false;
        }
        if !self.accepts_epoch(snapshot.epoch, current_epoch) {
            trace!(page = self.page, "dropping stale tile batch");
            return false;
        }
        let expected = expected_count.max(tiles.len());
        if (tiles.len() as f64) < (expected as f64) * MIN_TILE_COVERAGE {
            debug!(
                page = self.page,
                got = tiles.len(),
                expected,
                "tile coverage below threshold, skipping draw"
            );
            return false;
        }

        let scale = snapshot.pdf_to_element_scale;
        if self.main.is_zero_sized() {
            self.main.resize(
                snapshot.container_width.max(1.0) as u32,
                snapshot.container_height.max(1.0) as u32,
            );
        }
        for tile in tiles {
            let ts = tile.coordinate.tile_size as f64;
            let x = tile.coordinate.tile_x as f64 * ts * scale;
            let y = tile.coordinate.tile_y as f64 * ts * scale;
            let w = tile.bitmap.width as f64 / tile.coordinate.scale as f64 * scale;
            let h = tile.bitmap.height as f64 / tile.coordinate.scale as f64 * scale;
            self.main.draw_bitmap(&tile.bitmap, x, y, w, h);
        }
        if let Some(layer) = text {
            self.text_layer = Some(layer);
        }
        self.is_rendered = true;
        self.rendered_epoch = snapshot.epoch.max(self.rendered_epoch);
        self.expected_tiles = expected;
        self.composited_tiles = tiles.len();
        self.show_canvas();
        true
    }

    /// Additive composite of late-arriving tiles onto an already-rendered
    /// canvas. Returns `false` (releasing the bitmaps) when the epoch is
    /// incompatible.
    pub fn add_tiles_to_existing_canvas(
        &mut self,
        tiles: &[TileImage],
        snapshot: &TransformSnapshot,
        current_epoch: u64,
    ) -> bool {
        if !self.is_rendered || self.main.is_zero_sized() {
            return false;
        }
        if !self.accepts_epoch(snapshot.epoch, current_epoch) {
            return false;
        }
        let scale = snapshot.pdf_to_element_scale;
        for tile in tiles {
            let ts = tile.coordinate.tile_size as f64;
            let x = tile.coordinate.tile_x as f64 * ts * scale;
            let y = tile.coordinate.tile_y as f64 * ts * scale;
            let w = tile.bitmap.width as f64 / tile.coordinate.scale as f64 * scale;
            let h = tile.bitmap.height as f64 / tile.coordinate.scale as f64 * scale;
            self.main.draw_bitmap(&tile.bitmap, x, y, w, h);
        }
        self.composited_tiles += tiles.len();
        true
    }

    /// Reset canvas CSS to container size and hide the pixels while a
    /// fresh full-page decode is in flight, so stretched intermediate
    /// content does not flash.
    ///
    /// Every caller must pair this with [`PageElement::show_canvas`] (or a
    /// committing render) on all exit paths, including failure.
    pub fn prepare_for_full_page_render(&mut self) {
        self.style.transform = String::new();
        self.main.resize(
            self.style.css_width.max(1.0) as u32,
            self.style.css_height.max(1.0) as u32,
        );
        self.style.opacity = 0.0;
        self.is_rendered = false;
    }

    /// Overlay variant: the main canvas keeps showing old content while
    /// the overlay receives the incoming render. Preferred where possible
    /// because it cannot blank the page.
    pub fn prepare_for_full_page_render_with_overlay(&mut self) {
        self.overlay = Some(Surface::new(
            self.style.css_width.max(1.0) as u32,
            self.style.css_height.max(1.0) as u32,
        ));
    }

    /// Draw into the overlay (if allocated) and atomically swap it in.
    pub fn commit_overlay(&mut self, bitmap: &Bitmap, epoch: u64) -> bool {
        let Some(overlay) = self.overlay.as_mut() else {
            return false;
        };
        overlay.draw_bitmap(
            bitmap,
            0.0,
            0.0,
            overlay.width() as f64,
            overlay.height() as f64,
        );
        let overlay = self.overlay.take().expect("overlay present");
        self.main.copy_from(&overlay);
        self.is_rendered = true;
        self.rendered_epoch = epoch;
        self.show_canvas();
        true
    }

    /// Abandon a prepared overlay without touching the main canvas.
    pub fn discard_overlay(&mut self) {
        self.overlay = None;
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// Ready the main canvas for a sparse tile draw, retaining prior
    /// pixels as a base layer underneath the incoming tiles.
    pub fn prepare_for_tiled_render(&mut self) {
        if self.main.is_zero_sized() {
            self.main.resize(
                self.style.css_width.max(1.0) as u32,
                self.style.css_height.max(1.0) as u32,
            );
        }
        self.show_canvas();
    }

    /// Keep the current pixels available as a snapshot during a mode
    /// transition.
    pub fn capture_snapshot_surface(&mut self) {
        let mut snapshot = Surface::default();
        snapshot.copy_from(&self.main);
        self.snapshot = Some(snapshot);
    }

    pub fn snapshot_surface(&self) -> Option<&Surface> {
        self.snapshot.as_ref()
    }

    pub fn discard_snapshot_surface(&mut self) {
        self.snapshot = None;
    }

    /// Clear stale translate offsets after a zoom change; pixels are kept.
    pub fn reset_css_for_zoom_change(&mut self) {
        self.style.transform = String::new();
    }

    /// Make the canvas visible. Idempotent; the never-blank invariant
    /// requires this (or a committing render) on every exit path of a
    /// prepare call.
    pub fn show_canvas(&mut self) {
        self.style.opacity = 1.0;
        self.style.visible = true;
    }

    /// Tiles composited vs expected for the current batch.
    pub fn tile_coverage(&self) -> (usize, usize) {
        (self.composited_tiles, self.expected_tiles)
    }

    pub fn clear_rendered(&mut self) {
        self.is_rendered = false;
        self.main.clear();
    }

    /// Drop all surfaces; the element is about to be destroyed.
    pub fn destroy(&mut self) {
        self.main = Surface::default();
        self.snapshot = None;
        self.overlay = None;
        self.is_rendered = false;
        self.text_layer = None;
    }
}
