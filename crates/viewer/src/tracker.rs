//! Viewport tracker: visible-page computation and page element lifecycle.
//!
//! Three concentric buffers around the viewport decide what exists:
//! pages in the *render* buffer get queued for rendering, pages in the
//! *element* buffer get a live element, and pages outside the *keep*
//! buffer are destroyed. Buffers shrink with zoom so extreme zooms hold at
//! most a few tile widths of margin. A zoom-scaled element cap bounds GPU
//! texture memory; when exceeded, the furthest elements outside the
//! visible set go first.

use std::collections::{HashMap, HashSet};

use tracing::debug;
use vellum_camera::Rect;
use vellum_tiles::{tile_size_for_zoom, LayoutGrid, PageLayout};

use crate::element::PageElement;

/// Buffer base constants, divided by zoom.
const RENDER_BUFFER_BASE: f64 = 800.0;
const ELEMENT_BUFFER_BASE: f64 = 1600.0;
const KEEP_BUFFER_BASE: f64 = 2400.0;

/// The tracker's per-update outcome.
#[derive(Debug, Default, Clone)]
pub struct VisibleUpdate {
    /// Pages intersecting the raw viewport, ascending.
    pub visible: Vec<u32>,
    /// Pages inside the render buffer that should be (re)queued.
    pub to_render: Vec<u32>,
    /// Pages whose elements were created this update.
    pub created: Vec<u32>,
    /// Pages whose elements were destroyed this update.
    pub destroyed: Vec<u32>,
    /// Previously-cold pages that re-entered visibility and must be
    /// force-rerendered.
    pub rewarmed: Vec<u32>,
}

/// Tracks page elements against the moving viewport.
pub struct ViewportTracker {
    elements: HashMap<u32, PageElement>,
    /// Pages that left the keep buffer while rendered; their GPU textures
    /// may be gone, so a return forces a rerender.
    cold: HashSet<u32>,
}

impl ViewportTracker {
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
            cold: HashSet::new(),
        }
    }

    pub fn element(&self, page: u32) -> Option<&PageElement> {
        self.elements.get(&page)
    }

    pub fn element_mut(&mut self, page: u32) -> Option<&mut PageElement> {
        self.elements.get_mut(&page)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn pages_with_elements(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.elements.keys().copied().collect();
        pages.sort_unstable();
        pages
    }

    pub fn is_cold(&self, page: u32) -> bool {
        self.cold.contains(&page)
    }

    /// Maximum live page elements at a zoom; bounds GPU texture memory.
    pub fn element_cap(zoom: f64) -> usize {
        if zoom > 16.0 {
            3
        } else if zoom > 8.0 {
            6
        } else {
            12
        }
    }

    /// Buffer extent in content units: `max(floor, base / zoom)`, floored
    /// to whole tile multiples (one, two, and three tiles respectively).
    fn buffer_extents(zoom: f64, adaptive_tiles: bool) -> (f64, f64, f64) {
        let tile = tile_size_for_zoom(zoom, adaptive_tiles) as f64;
        let render = (RENDER_BUFFER_BASE / zoom).max(tile);
        let element = (ELEMENT_BUFFER_BASE / zoom).max(tile * 2.0);
        let keep = (KEEP_BUFFER_BASE / zoom).max(tile * 3.0);
        (render, element, keep)
    }

    /// Recompute the visible set and reconcile elements against it.
    ///
    /// `visible_rect` is the viewport in content coordinates. The caller
    /// guards this with `can_render()`; a zero-area rect (mid-layout
    /// transition) is skipped and returns an empty update.
    pub fn update_visible_pages(
        &mut self,
        visible_rect: Rect,
        layouts: &[PageLayout],
        grid: &LayoutGrid,
        zoom: f64,
        adaptive_tiles: bool,
    ) -> VisibleUpdate {
        let mut update = VisibleUpdate::default();
        if visible_rect.is_empty() || zoom <= 0.0 {
            return update;
        }

        let (render_extent, element_extent, keep_extent) =
            Self::buffer_extents(zoom, adaptive_tiles);

        let visible = pages_in(grid, layouts, visible_rect);
        let render_pages = pages_in(grid, layouts, visible_rect.expanded(render_extent));
        let element_pages = pages_in(grid, layouts, visible_rect.expanded(element_extent));
        let keep_pages = pages_in(grid, layouts, visible_rect.expanded(keep_extent));

        // Create elements entering the element buffer.
        for &page in &element_pages {
            if !self.elements.contains_key(&page) {
                self.elements.insert(page, PageElement::new(page));
                update.created.push(page);
            }
        }

        // Destroy elements leaving the keep buffer; they go cold.
        let keep_set: HashSet<u32> = keep_pages.iter().copied().collect();
        let doomed: Vec<u32> = self
            .elements
            .keys()
            .copied()
            .filter(|p| !keep_set.contains(p))
            .collect();
        for page in doomed {
            if let Some(mut element) = self.elements.remove(&page) {
                if element.has_rendered_content() {
                    self.cold.insert(page);
                }
                element.destroy();
                update.destroyed.push(page);
            }
        }

        // Enforce the element cap: furthest from the viewport center,
        // outside the visible set, go first.
        let cap = Self::element_cap(zoom);
        if self.elements.len() > cap {
            let center = visible_rect.center();
            let visible_set: HashSet<u32> = visible.iter().copied().collect();
            let mut expendable: Vec<(u32, f64)> = self
                .elements
                .keys()
                .copied()
                .filter(|p| !visible_set.contains(p))
                .map(|p| {
                    let d = layouts
                        .get(p.saturating_sub(1) as usize)
                        .map(|l| l.rect().center().distance_to(center))
                        .unwrap_or(f64::MAX);
                    (p, d)
                })
                .collect();
            expendable.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            for (page, _) in expendable {
                if self.elements.len() <= cap {
                    break;
                }
                if let Some(mut element) = self.elements.remove(&page) {
                    if element.has_rendered_content() {
                        self.cold.insert(page);
                    }
                    element.destroy();
                    update.destroyed.push(page);
                }
            }
            if self.elements.len() > cap {
                debug!(
                    live = self.elements.len(),
                    cap, "element cap exceeded by visible pages alone"
                );
            }
        }

        // Cold pages re-entering the render buffer are force-rerendered
        // regardless of their rendered flag.
        for &page in &render_pages {
            if self.cold.remove(&page) {
                if let Some(element) = self.elements.get_mut(&page) {
                    element.clear_rendered();
                }
                update.rewarmed.push(page);
            }
        }

        update.to_render = render_pages;
        update.visible = visible;
        update
    }

    /// Blank-page sweep: visible elements claiming rendered content whose
    /// canvas has no visible pixels. Run after gesture end; the GPU can
    /// drop textures without telling anyone.
    pub fn blank_pages(&self, visible: &[u32]) -> Vec<u32> {
        visible
            .iter()
            .copied()
            .filter(|page| {
                self.elements
                    .get(page)
                    .is_some_and(|e| e.has_rendered_content() && !e.has_visible_pixels())
            })
            .collect()
    }

    /// Destroy every element (display-mode change). Elements are never
    /// reused across modes.
    pub fn destroy_all(&mut self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.elements.keys().copied().collect();
        pages.sort_unstable();
        for element in self.elements.values_mut() {
            element.destroy();
        }
        self.elements.clear();
        self.cold.clear();
        pages
    }
}

impl Default for ViewportTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Pages whose actual rects intersect `rect`, via the O(1) grid range
/// followed by per-page intersection against the span members only.
fn pages_in(grid: &LayoutGrid, layouts: &[PageLayout], rect: Rect) -> Vec<u32> {
    let Some(range) = grid.pages_in_rect(rect) else {
        return Vec::new();
    };
    range
        .filter(|&page| {
            layouts
                .get(page.saturating_sub(1) as usize)
                .is_some_and(|l| l.rect().intersects(&rect))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_provider::Bitmap;
    use vellum_tiles::{place_pages, LayoutMode};

    fn doc(n: usize) -> (Vec<PageLayout>, LayoutGrid) {
        place_pages(&vec![(612.0, 792.0); n], LayoutMode::Vertical, 20.0)
    }

    fn viewport_at(y: f64) -> Rect {
        Rect::new(0.0, y, 612.0, 600.0)
    }

    #[test]
    fn test_visible_and_buffers() {
        let (layouts, grid) = doc(50);
        let mut tracker = ViewportTracker::new();
        let update = tracker.update_visible_pages(viewport_at(0.0), &layouts, &grid, 1.0, false);

        assert_eq!(update.visible, vec![1]);
        assert!(update.to_render.contains(&1));
        assert!(update.to_render.contains(&2)); // render buffer reaches down
        assert!(!update.created.is_empty());
        // Elements exist for the element buffer, not the whole document.
        assert!(tracker.element_count() < 10);
        assert!(tracker.element(1).is_some());
    }

    #[test]
    fn test_two_updates_are_idempotent() {
        let (layouts, grid) = doc(50);
        let mut tracker = ViewportTracker::new();
        let first = tracker.update_visible_pages(viewport_at(0.0), &layouts, &grid, 1.0, false);
        let second = tracker.update_visible_pages(viewport_at(0.0), &layouts, &grid, 1.0, false);

        assert_eq!(first.visible, second.visible);
        assert_eq!(first.to_render, second.to_render);
        assert!(second.created.is_empty());
        assert!(second.destroyed.is_empty());
        assert!(second.rewarmed.is_empty());
    }

    #[test]
    fn test_zero_viewport_skipped() {
        let (layouts, grid) = doc(5);
        let mut tracker = ViewportTracker::new();
        let update = tracker.update_visible_pages(Rect::ZERO, &layouts, &grid, 1.0, false);
        assert!(update.visible.is_empty());
        assert_eq!(tracker.element_count(), 0);
    }

    #[test]
    fn test_elements_destroyed_outside_keep_buffer() {
        let (layouts, grid) = doc(50);
        let mut tracker = ViewportTracker::new();
        tracker.update_visible_pages(viewport_at(0.0), &layouts, &grid, 1.0, false);
        assert!(tracker.element(1).is_some());

        // Jump 30 pages away; page 1 leaves the keep buffer.
        let update = tracker.update_visible_pages(
            viewport_at(30.0 * 812.0),
            &layouts,
            &grid,
            1.0,
            false,
        );
        assert!(update.destroyed.contains(&1));
        assert!(tracker.element(1).is_none());
    }

    #[test]
    fn test_cold_page_forced_to_rerender() {
        let (layouts, grid) = doc(50);
        let mut tracker = ViewportTracker::new();
        tracker.update_visible_pages(viewport_at(0.0), &layouts, &grid, 1.0, false);

        // Render page 1, scroll far away, then come back.
        tracker
            .element_mut(1)
            .unwrap()
            .render_full_page(&Bitmap::filled(10, 10, [1; 4]), 0);
        tracker.update_visible_pages(viewport_at(30.0 * 812.0), &layouts, &grid, 1.0, false);
        assert!(tracker.is_cold(1));

        let update = tracker.update_visible_pages(viewport_at(0.0), &layouts, &grid, 1.0, false);
        assert!(update.rewarmed.contains(&1));
        assert!(!tracker.is_cold(1));
        // The recreated element must not claim content.
        assert!(!tracker.element(1).unwrap().has_rendered_content());
    }

    #[test]
    fn test_element_cap_shrinks_with_zoom() {
        assert_eq!(ViewportTracker::element_cap(4.0), 12);
        assert_eq!(ViewportTracker::element_cap(12.0), 6);
        assert_eq!(ViewportTracker::element_cap(20.0), 3);
    }

    #[test]
    fn test_element_cap_enforced_at_high_zoom() {
        let (layouts, grid) = doc(50);
        let mut tracker = ViewportTracker::new();
        // Warm up many elements at low zoom.
        tracker.update_visible_pages(viewport_at(5.0 * 812.0), &layouts, &grid, 1.0, false);
        assert!(tracker.element_count() > 3);

        // At zoom 20 the cap is 3.
        tracker.update_visible_pages(viewport_at(5.0 * 812.0), &layouts, &grid, 20.0, false);
        assert!(tracker.element_count() <= 3, "{}", tracker.element_count());
    }

    #[test]
    fn test_blank_sweep_detects_lost_pixels() {
        let (layouts, grid) = doc(5);
        let mut tracker = ViewportTracker::new();
        tracker.update_visible_pages(viewport_at(0.0), &layouts, &grid, 1.0, false);

        // Element 1 renders, then loses its pixels without clearing the
        // rendered flag (simulated GPU texture loss).
        let e = tracker.element_mut(1).unwrap();
        e.render_full_page(&Bitmap::filled(10, 10, [0, 0, 0, 0]), 0);
        assert!(e.has_rendered_content());
        assert_eq!(tracker.blank_pages(&[1]), vec![1]);
    }

    #[test]
    fn test_destroy_all_clears_everything() {
        let (layouts, grid) = doc(10);
        let mut tracker = ViewportTracker::new();
        tracker.update_visible_pages(viewport_at(0.0), &layouts, &grid, 1.0, false);
        assert!(tracker.element_count() > 0);
        let destroyed = tracker.destroy_all();
        assert!(!destroyed.is_empty());
        assert_eq!(tracker.element_count(), 0);
    }
}
