//! CSS transform emission and the camera coherence check.
//!
//! The applied transform is the externally observable form of the camera.
//! After every camera mutation the caller can verify that the transform it
//! is about to apply, parsed back, equals the intended camera to an
//! adaptive tolerance. A mismatch means a formatting or convention bug and
//! is logged, never fatal.

use tracing::warn;

use crate::{Camera, CoordinateSpace};

/// Emit the CSS transform string for the camera in the given space.
///
/// Legacy: `scale(z) translate(Xpx, Ypx)`; translate applies first, then
/// scale, matching the content-to-screen mapping `(p + xy) * z`.
/// Unified: `translate3d(Xpx, Ypx, 0px)`; content is pre-scaled, the 3d
/// form keeps the layer GPU-composited.
pub fn camera_transform(c: Camera, space: CoordinateSpace) -> String {
    match space {
        CoordinateSpace::Legacy => {
            format!("scale({}) translate({}px, {}px)", c.z, c.x, c.y)
        }
        CoordinateSpace::Unified => {
            format!("translate3d({}px, {}px, 0px)", c.x, c.y)
        }
    }
}

/// Parse a transform previously emitted by [`camera_transform`].
///
/// For unified transforms the zoom is not present in the string, so the
/// caller supplies the zoom the content was laid out at. Returns `None`
/// for strings this crate did not produce.
pub fn parse_transform(s: &str, space: CoordinateSpace, layout_zoom: f64) -> Option<Camera> {
    match space {
        CoordinateSpace::Legacy => {
            let rest = s.strip_prefix("scale(")?;
            let (z_str, rest) = rest.split_once(')')?;
            let rest = rest.trim_start().strip_prefix("translate(")?;
            let (x_str, rest) = rest.split_once("px,")?;
            let y_str = rest.trim().strip_suffix("px)")?;
            Some(Camera::new(
                x_str.trim().parse().ok()?,
                y_str.trim().parse().ok()?,
                z_str.trim().parse().ok()?,
            ))
        }
        CoordinateSpace::Unified => {
            let rest = s.strip_prefix("translate3d(")?;
            let (x_str, rest) = rest.split_once("px,")?;
            let (y_str, _) = rest.split_once("px,")?;
            Some(Camera::new(
                x_str.trim().parse().ok()?,
                y_str.trim().parse().ok()?,
                layout_zoom,
            ))
        }
    }
}

/// Adaptive tolerance for comparing a camera component against its
/// parsed-back value: absolute 0.01 near zero, relative 1e-5 for large
/// values.
fn tolerance(v: f64) -> f64 {
    f64::max(0.01, v.abs() * 1e-5)
}

/// Coherence check: does `transform`, parsed back, equal `intended`?
///
/// Logs a warning and returns `false` on mismatch. Unparseable strings
/// also fail the check.
pub fn transform_matches_camera(
    transform: &str,
    intended: Camera,
    space: CoordinateSpace,
) -> bool {
    let Some(parsed) = parse_transform(transform, space, intended.z) else {
        warn!(transform, "transform string is not parseable");
        return false;
    };
    let ok = (parsed.x - intended.x).abs() <= tolerance(intended.x)
        && (parsed.y - intended.y).abs() <= tolerance(intended.y)
        && (parsed.z - intended.z).abs() <= tolerance(intended.z);
    if !ok {
        warn!(
            transform,
            ?parsed,
            ?intended,
            "applied transform diverged from camera"
        );
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_transform_round_trip() {
        let c = Camera::new(-123.456, 78.9, 4.25);
        let s = camera_transform(c, CoordinateSpace::Legacy);
        let parsed = parse_transform(&s, CoordinateSpace::Legacy, 1.0).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn test_unified_transform_round_trip() {
        let c = Camera::new(10.5, -0.25, 8.0);
        let s = camera_transform(c, CoordinateSpace::Unified);
        assert!(s.starts_with("translate3d("));
        let parsed = parse_transform(&s, CoordinateSpace::Unified, 8.0).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn test_coherence_check_passes_for_emitted() {
        for space in [CoordinateSpace::Legacy, CoordinateSpace::Unified] {
            let c = Camera::new(1e6, -1e6, 16.0);
            let s = camera_transform(c, space);
            assert!(transform_matches_camera(&s, c, space), "{space:?}");
        }
    }

    #[test]
    fn test_coherence_check_fails_on_divergence() {
        let c = Camera::new(100.0, 100.0, 2.0);
        let s = camera_transform(Camera::new(100.5, 100.0, 2.0), CoordinateSpace::Legacy);
        assert!(!transform_matches_camera(&s, c, CoordinateSpace::Legacy));
    }

    #[test]
    fn test_coherence_tolerance_is_adaptive() {
        // At large magnitudes a proportional error within 1e-5 passes.
        let c = Camera::new(1_000_000.0, 0.0, 1.0);
        let s = camera_transform(Camera::new(1_000_005.0, 0.0, 1.0), CoordinateSpace::Legacy);
        assert!(transform_matches_camera(&s, c, CoordinateSpace::Legacy));
        // Near zero the 0.01 absolute floor applies.
        let c = Camera::new(0.0, 0.0, 1.0);
        let s = camera_transform(Camera::new(0.005, 0.0, 1.0), CoordinateSpace::Legacy);
        assert!(transform_matches_camera(&s, c, CoordinateSpace::Legacy));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_transform("matrix(1,0,0,1,0,0)", CoordinateSpace::Legacy, 1.0).is_none());
        assert!(parse_transform("", CoordinateSpace::Unified, 1.0).is_none());
        assert!(!transform_matches_camera("nonsense", Camera::identity(), CoordinateSpace::Legacy));
    }
}
