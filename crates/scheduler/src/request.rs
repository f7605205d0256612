//! Render request types and coordinator configuration.

use thiserror::Error;
use vellum_provider::ProviderError;
use vellum_tiles::{TileCoordinate, TileKey};

/// Ticket identifying a submitted request.
pub type RequestId = u64;

/// Queue bands, most urgent first. During an active gesture only
/// `Critical` and `High` are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderPriority {
    Critical = 0,
    High = 1,
    Medium = 2,
    Low = 3,
}

/// What is being rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderRequestKind {
    /// One tile at its grid scale (and optionally a denser exact scale).
    Tile(TileCoordinate),
    /// A whole page at the given scale.
    FullPage { page: u32, scale: f64 },
}

impl RenderRequestKind {
    pub fn page(&self) -> u32 {
        match self {
            RenderRequestKind::Tile(t) => t.page,
            RenderRequestKind::FullPage { page, .. } => *page,
        }
    }
}

/// A queued render request.
///
/// `scale_epoch` is the epoch observed at submission; consumers compare it
/// against the current epoch at display time. `render_params_id` ties a
/// batch of requests to one transform snapshot. `exact_scale`, when set,
/// renders at a denser scale than the grid tier while keeping grid-aligned
/// tile identity.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub kind: RenderRequestKind,
    pub priority: RenderPriority,
    pub document_id: String,
    pub session_id: u64,
    pub scale_epoch: u64,
    pub render_params_id: u64,
    pub exact_scale: Option<f64>,
}

impl RenderRequest {
    /// Dedup identity: document plus tile key, or document plus page and
    /// quantized scale for full pages.
    pub fn identity(&self) -> RequestIdentity {
        match self.kind {
            RenderRequestKind::Tile(t) => RequestIdentity::Tile(self.document_id.clone(), t.key()),
            RenderRequestKind::FullPage { page, scale } => {
                RequestIdentity::Page(self.document_id.clone(), page, (scale * 100.0) as u32)
            }
        }
    }

    pub fn page(&self) -> u32 {
        self.kind.page()
    }
}

/// In-flight dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestIdentity {
    Tile(String, TileKey),
    Page(String, u32, u32),
}

/// Why a render did not produce a bitmap.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Normal flow control; never logged as an error.
    #[error("render aborted")]
    Aborted,

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Queue caps and admission policy.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Renders running at once. The queue withholds jobs beyond this even
    /// when more worker threads are idle.
    pub max_concurrent: usize,
    /// Queued (not yet running) requests per page.
    pub max_queued_per_page: usize,
    /// Queued requests across all pages.
    pub max_queued_global: usize,
    /// Zoom ratio at or above which all pending work is aborted.
    pub clear_on_zoom_ratio: f64,
    /// Fraction of the viewport the cumulative pan must cross, at high
    /// zoom, to abort all pending work.
    pub clear_on_pan_viewport_fraction: f64,
    /// Zoom at or above which the pan-distance clearing rule applies.
    pub pan_clear_min_zoom: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_queued_per_page: 64,
            max_queued_global: 256,
            clear_on_zoom_ratio: 2.0,
            clear_on_pan_viewport_fraction: 0.5,
            pan_clear_min_zoom: 8.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_request(page: u32, x: u32, scale: u32) -> RenderRequest {
        RenderRequest {
            kind: RenderRequestKind::Tile(TileCoordinate {
                page,
                tile_x: x,
                tile_y: 0,
                scale,
                tile_size: 256,
            }),
            priority: RenderPriority::High,
            document_id: "doc".into(),
            session_id: 1,
            scale_epoch: 0,
            render_params_id: 0,
            exact_scale: None,
        }
    }

    #[test]
    fn test_priority_order() {
        assert!(RenderPriority::Critical < RenderPriority::High);
        assert!(RenderPriority::High < RenderPriority::Medium);
        assert!(RenderPriority::Medium < RenderPriority::Low);
    }

    #[test]
    fn test_identity_ignores_priority_and_session() {
        let a = tile_request(1, 0, 4);
        let mut b = tile_request(1, 0, 4);
        b.priority = RenderPriority::Low;
        b.session_id = 9;
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), tile_request(1, 1, 4).identity());
        assert_ne!(a.identity(), tile_request(1, 0, 8).identity());
    }

    #[test]
    fn test_full_page_identity_quantizes_scale() {
        let a = RenderRequest {
            kind: RenderRequestKind::FullPage { page: 1, scale: 2.0 },
            ..tile_request(1, 0, 4)
        };
        let b = RenderRequest {
            kind: RenderRequestKind::FullPage { page: 1, scale: 2.0 },
            ..tile_request(1, 0, 4)
        };
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_aborted_is_flow_control() {
        // The error message should not look alarming in logs.
        assert_eq!(RenderError::Aborted.to_string(), "render aborted");
    }
}
