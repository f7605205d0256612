//! Camera and coordinate model for the infinite canvas.
//!
//! All functions here are pure: they take immutable camera snapshots and
//! return new cameras or rectangles. The camera is the single source of
//! truth for pan and zoom; every visibility computation and transform
//! emission derives from it.
//!
//! Two coordinate-space conventions are supported, selected at
//! construction of the surrounding viewer:
//!
//! - [`CoordinateSpace::Legacy`]: `x, y` are in content coordinates
//!   (scale-invariant) and the emitted transform combines a scale with a
//!   translate.
//! - [`CoordinateSpace::Unified`]: `x, y` are in screen pixels, content is
//!   pre-scaled in its layout dimensions, and the emitted transform is
//!   translate-only.
//!
//! Both are externally equivalent for visibility queries via
//! [`visible_bounds`]; downstream code that mixes the two must go through
//! that helper rather than reading camera fields directly.

mod geometry;
mod transform;

pub use geometry::{Point, Rect};
pub use transform::{camera_transform, parse_transform, transform_matches_camera};

use serde::{Deserialize, Serialize};

/// Default minimum zoom.
pub const MIN_ZOOM: f64 = 0.1;

/// Default maximum zoom.
pub const MAX_ZOOM: f64 = 32.0;

/// Rubber-band resistance applied to out-of-range pan during an active
/// gesture. Movement past a constraint edge is scaled by this factor.
pub const RUBBER_BAND_RESISTANCE: f64 = 0.3;

/// Which convention the camera's `x, y` follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSpace {
    /// `x, y` in content coordinates; transform is scale + translate.
    Legacy,
    /// `x, y` in screen pixels over pre-scaled content; translate-only.
    Unified,
}

/// Pan/zoom camera.
///
/// `z` is the zoom factor (1.0 = 100%). The interpretation of `x, y`
/// depends on the [`CoordinateSpace`] in use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Camera {
    /// Create a camera at the given position and zoom.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Identity camera: origin, 100% zoom.
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 1.0)
    }

    /// A camera is valid when all components are finite and the zoom is
    /// strictly positive. Invalid cameras are never produced by the
    /// functions in this crate; the guard exists because input events can
    /// carry garbage (zero-area pinches, NaN wheel deltas).
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.z > 0.0
    }

    /// Componentwise comparison within `tol`.
    pub fn approx_eq(&self, other: &Camera, tol: f64) -> bool {
        (self.x - other.x).abs() <= tol
            && (self.y - other.y).abs() <= tol
            && (self.z - other.z).abs() <= tol
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::identity()
    }
}

/// Zoom range the camera is clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomConstraints {
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for ZoomConstraints {
    fn default() -> Self {
        Self {
            min_zoom: MIN_ZOOM,
            max_zoom: MAX_ZOOM,
        }
    }
}

impl ZoomConstraints {
    pub fn new(min_zoom: f64, max_zoom: f64) -> Self {
        Self { min_zoom, max_zoom }
    }

    /// Clamp a zoom value into range.
    pub fn clamp(&self, z: f64) -> f64 {
        z.clamp(self.min_zoom, self.max_zoom)
    }
}

/// Pan the camera by a screen-pixel delta.
///
/// In legacy space the delta is divided by the zoom so that panning speed
/// is constant in screen terms regardless of zoom; in unified space the
/// camera already lives in screen pixels.
///
/// An invalid camera (non-finite or non-positive zoom) is returned
/// unchanged: the causing event is dropped rather than propagated.
pub fn pan_camera(c: Camera, dx: f64, dy: f64, space: CoordinateSpace) -> Camera {
    if !c.is_valid() || !dx.is_finite() || !dy.is_finite() {
        return c;
    }
    match space {
        CoordinateSpace::Legacy => Camera::new(c.x + dx / c.z, c.y + dy / c.z, c.z),
        CoordinateSpace::Unified => Camera::new(c.x + dx, c.y + dy, c.z),
    }
}

/// Zoom the camera about a focal point given in screen pixels.
///
/// The new zoom is `z * (1 - delta)` clamped into `constraints`, and the
/// position is adjusted so the content point currently under
/// `focal_screen` stays under `focal_screen`. This is the only zoom
/// equation; no centering is applied during gestures.
pub fn zoom_camera_to_point(
    c: Camera,
    focal_screen: Point,
    delta: f64,
    constraints: ZoomConstraints,
    space: CoordinateSpace,
) -> Camera {
    if !c.is_valid() || !delta.is_finite() || !focal_screen.is_finite() {
        return c;
    }
    let new_z = constraints.clamp(c.z * (1.0 - delta));
    if !new_z.is_finite() || new_z <= 0.0 {
        return c;
    }
    match space {
        CoordinateSpace::Legacy => {
            // Content under the focal point: p = s/z - (x, y).
            // Solve for the new position keeping p fixed.
            let nx = c.x + focal_screen.x / new_z - focal_screen.x / c.z;
            let ny = c.y + focal_screen.y / new_z - focal_screen.y / c.z;
            Camera::new(nx, ny, new_z)
        }
        CoordinateSpace::Unified => {
            // Content under the focal point: p = (s - (x, y)) / z.
            let px = (focal_screen.x - c.x) / c.z;
            let py = (focal_screen.y - c.y) / c.z;
            Camera::new(focal_screen.x - px * new_z, focal_screen.y - py * new_z, new_z)
        }
    }
}

/// Convert a screen-pixel point to content coordinates.
pub fn screen_to_content(c: Camera, p: Point, space: CoordinateSpace) -> Point {
    match space {
        CoordinateSpace::Legacy => Point::new(p.x / c.z - c.x, p.y / c.z - c.y),
        CoordinateSpace::Unified => Point::new((p.x - c.x) / c.z, (p.y - c.y) / c.z),
    }
}

/// Convert a content-coordinate point to screen pixels.
pub fn content_to_screen(c: Camera, p: Point, space: CoordinateSpace) -> Point {
    match space {
        CoordinateSpace::Legacy => Point::new((p.x + c.x) * c.z, (p.y + c.y) * c.z),
        CoordinateSpace::Unified => Point::new(p.x * c.z + c.x, p.y * c.z + c.y),
    }
}

/// The region of content visible through a viewport of `w × h` screen
/// pixels.
///
/// In legacy space the result is in content coordinates; in unified space
/// it is in screen coordinates over the pre-scaled content. Mixed-space
/// consumers must use this helper instead of reading camera fields.
pub fn visible_bounds(c: Camera, w: f64, h: f64, space: CoordinateSpace) -> Rect {
    if !c.is_valid() || w <= 0.0 || h <= 0.0 {
        return Rect::ZERO;
    }
    match space {
        CoordinateSpace::Legacy => Rect::new(-c.x, -c.y, w / c.z, h / c.z),
        CoordinateSpace::Unified => Rect::new(c.x, c.y, w, h),
    }
}

/// The visible content region expressed in content coordinates regardless
/// of coordinate space. Tile enumeration works in content coordinates, so
/// it goes through this rather than [`visible_bounds`].
pub fn visible_content_rect(c: Camera, w: f64, h: f64, space: CoordinateSpace) -> Rect {
    if !c.is_valid() || w <= 0.0 || h <= 0.0 {
        return Rect::ZERO;
    }
    match space {
        CoordinateSpace::Legacy => Rect::new(-c.x, -c.y, w / c.z, h / c.z),
        CoordinateSpace::Unified => Rect::new(-c.x / c.z, -c.y / c.z, w / c.z, h / c.z),
    }
}

/// Constrain the camera position against content bounds.
///
/// A single clamp formula covers both cases: when the content exceeds the
/// viewport the valid camera range keeps the content edges pinned to the
/// viewport edges, and when the content fits the range simply inverts.
/// With `soft` the clamp is a rubber band at [`RUBBER_BAND_RESISTANCE`]
/// (applied during active gestures); otherwise it is strict (gesture end).
pub fn constrain(
    c: Camera,
    content: Rect,
    viewport_w: f64,
    viewport_h: f64,
    soft: bool,
    space: CoordinateSpace,
) -> Camera {
    if !c.is_valid() || viewport_w <= 0.0 || viewport_h <= 0.0 {
        return c;
    }

    let (ax, bx, ay, by) = match space {
        CoordinateSpace::Legacy => (
            viewport_w / c.z - (content.x + content.width),
            -content.x,
            viewport_h / c.z - (content.y + content.height),
            -content.y,
        ),
        CoordinateSpace::Unified => (
            viewport_w - (content.x + content.width) * c.z,
            -content.x * c.z,
            viewport_h - (content.y + content.height) * c.z,
            -content.y * c.z,
        ),
    };

    let x = clamp_axis(c.x, ax.min(bx), ax.max(bx), soft);
    let y = clamp_axis(c.y, ay.min(by), ay.max(by), soft);
    Camera::new(x, y, c.z)
}

fn clamp_axis(v: f64, lo: f64, hi: f64, soft: bool) -> f64 {
    if soft {
        if v < lo {
            lo + (v - lo) * RUBBER_BAND_RESISTANCE
        } else if v > hi {
            hi + (v - hi) * RUBBER_BAND_RESISTANCE
        } else {
            v
        }
    } else {
        v.clamp(lo, hi)
    }
}

/// Zoom that fits a page's width into the viewport, clamped into range.
pub fn fit_width_zoom(
    page_width: f64,
    viewport_w: f64,
    gap: f64,
    constraints: ZoomConstraints,
) -> f64 {
    if page_width <= 0.0 || viewport_w <= 0.0 {
        return 1.0;
    }
    let usable = (viewport_w - gap * 2.0).max(1.0);
    constraints.clamp(usable / page_width)
}

/// Zoom that fits an entire page into the viewport, clamped into range.
pub fn fit_page_zoom(
    page_width: f64,
    page_height: f64,
    viewport_w: f64,
    viewport_h: f64,
    gap: f64,
    constraints: ZoomConstraints,
) -> f64 {
    if page_width <= 0.0 || page_height <= 0.0 || viewport_w <= 0.0 || viewport_h <= 0.0 {
        return 1.0;
    }
    let usable_w = (viewport_w - gap * 2.0).max(1.0);
    let usable_h = (viewport_h - gap * 2.0).max(1.0);
    constraints.clamp((usable_w / page_width).min(usable_h / page_height))
}

/// A camera centered on `content` at the given zoom.
pub fn center_on(
    content: Rect,
    zoom: f64,
    viewport_w: f64,
    viewport_h: f64,
    space: CoordinateSpace,
) -> Camera {
    let cx = content.x + content.width / 2.0;
    let cy = content.y + content.height / 2.0;
    match space {
        CoordinateSpace::Legacy => {
            Camera::new(viewport_w / (2.0 * zoom) - cx, viewport_h / (2.0 * zoom) - cy, zoom)
        }
        CoordinateSpace::Unified => {
            Camera::new(viewport_w / 2.0 - cx * zoom, viewport_h / 2.0 - cy * zoom, zoom)
        }
    }
}
