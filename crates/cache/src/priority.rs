//! Focal-point-aware eviction priority.
//!
//! The priority function does not close over controller state; the
//! controller hands the cache a fresh [`PriorityContext`] whenever the
//! interaction changes, and zones are recomputed from it at eviction time.

use vellum_camera::Point;
use vellum_tiles::{PageLayout, TileCoordinate};

/// Radial eviction bands, most protected first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityZone {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

/// What the user is doing, as far as eviction cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    Idle,
    Pan,
    ZoomIn,
    ZoomOut,
}

/// Snapshot of the interaction state used to zone cache entries.
#[derive(Debug, Clone)]
pub struct PriorityContext {
    pub kind: InteractionKind,
    /// Focal point in canvas content coordinates (zoom) or viewport center
    /// (pan).
    pub focal: Point,
    /// First and last visible page, inclusive.
    pub visible_pages: (u32, u32),
    /// Page layouts for geometry lookups, in page order.
    pub layouts: Vec<PageLayout>,
    /// Radius in content units of the innermost focal band.
    pub focal_radius: f64,
}

impl PriorityContext {
    /// An idle context centered on a page span.
    pub fn idle(visible_pages: (u32, u32), layouts: Vec<PageLayout>) -> Self {
        Self {
            kind: InteractionKind::Idle,
            focal: Point::ZERO,
            visible_pages,
            layouts,
            focal_radius: 512.0,
        }
    }

    fn page_distance(&self, page: u32) -> u32 {
        let (lo, hi) = self.visible_pages;
        if page >= lo && page <= hi {
            0
        } else if page < lo {
            lo - page
        } else {
            page - hi
        }
    }

    fn layout_for(&self, page: u32) -> Option<&PageLayout> {
        self.layouts
            .get(page.saturating_sub(1) as usize)
            .filter(|l| l.page == page)
            .or_else(|| self.layouts.iter().find(|l| l.page == page))
    }

    /// Zone assignment for one tile.
    pub fn zone(&self, tile: &TileCoordinate) -> PriorityZone {
        let dist = self.page_distance(tile.page);
        match self.kind {
            InteractionKind::Idle => match dist {
                0 => PriorityZone::Critical,
                1..=2 => PriorityZone::High,
                3..=5 => PriorityZone::Medium,
                _ => PriorityZone::Low,
            },
            InteractionKind::Pan => match dist {
                0 => PriorityZone::Critical,
                1..=2 => PriorityZone::High,
                _ => PriorityZone::Low,
            },
            InteractionKind::ZoomIn => {
                // Distant pages are evicted aggressively; near the focal
                // point tiles are banded by radial distance.
                if dist > 0 {
                    return PriorityZone::Low;
                }
                let Some(layout) = self.layout_for(tile.page) else {
                    return PriorityZone::Medium;
                };
                let d = tile.content_rect(layout).center().distance_to(self.focal);
                if d <= self.focal_radius {
                    PriorityZone::Critical
                } else if d <= self.focal_radius * 2.0 {
                    PriorityZone::High
                } else {
                    PriorityZone::Medium
                }
            }
            InteractionKind::ZoomOut => {
                // Protect a wider page band: the user is likely to zoom
                // back into something nearby.
                match dist {
                    0 => PriorityZone::Critical,
                    1..=3 => PriorityZone::High,
                    _ => PriorityZone::Medium,
                }
            }
        }
    }
}
