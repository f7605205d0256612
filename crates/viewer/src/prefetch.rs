//! Focal/pan prefetcher.
//!
//! Chooses off-viewport tiles to warm based on pan velocity and the focal
//! point. The predictor is deliberately simple: extrapolate the viewport
//! along the current velocity and request whatever new tiles that sweeps
//! in, at low priority.

use std::time::Instant;

use vellum_camera::{Point, Rect};
use vellum_tiles::{visible_tiles, PageLayout, TileCoordinate};

/// How far ahead the linear predictor looks.
const LOOKAHEAD_SECS: f64 = 0.3;

/// Velocity below which prefetch stays quiet (content units/sec).
const MIN_SPEED: f64 = 40.0;

/// Tracks pan velocity from successive camera positions.
#[derive(Debug, Default)]
pub struct VelocityTracker {
    last: Option<(Point, Instant)>,
    velocity: Point,
}

impl VelocityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the viewport origin (content coordinates) at `now`.
    pub fn sample(&mut self, origin: Point, now: Instant) {
        if let Some((prev, at)) = self.last {
            let dt = now.duration_since(at).as_secs_f64();
            if dt > 0.0 {
                // Light smoothing so a single jittery frame does not spin
                // the prediction around.
                let vx = (origin.x - prev.x) / dt;
                let vy = (origin.y - prev.y) / dt;
                self.velocity = Point::new(
                    self.velocity.x * 0.5 + vx * 0.5,
                    self.velocity.y * 0.5 + vy * 0.5,
                );
            }
        }
        self.last = Some((origin, now));
    }

    pub fn velocity(&self) -> Point {
        self.velocity
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.velocity = Point::ZERO;
    }
}

/// Tiles worth warming: those the predicted viewport covers that the
/// current viewport does not.
pub fn prefetch_tiles(
    visible_rect: Rect,
    velocity: Point,
    layouts: &[PageLayout],
    zoom: f64,
    grid_scale: u32,
    tile_size: u32,
) -> Vec<TileCoordinate> {
    let speed = (velocity.x * velocity.x + velocity.y * velocity.y).sqrt();
    if speed < MIN_SPEED || visible_rect.is_empty() {
        return Vec::new();
    }

    let predicted = Rect::new(
        visible_rect.x + velocity.x * LOOKAHEAD_SECS,
        visible_rect.y + velocity.y * LOOKAHEAD_SECS,
        visible_rect.width,
        visible_rect.height,
    );

    let current = visible_tiles(visible_rect, layouts, zoom, grid_scale, tile_size);
    visible_tiles(predicted, layouts, zoom, grid_scale, tile_size)
        .into_iter()
        .filter(|t| !current.iter().any(|c| c.key() == t.key()))
        .collect()
}
