//! Backend contract for page data providers.
//!
//! The viewer core consumes page rasterization through the
//! [`PageProvider`] trait and never implements it; the PDF engine lives on
//! the other side of this boundary. Providers hand back encoded [`Blob`]s
//! which the scheduler's workers decode into RGBA [`Bitmap`]s.
//!
//! The [`SyntheticProvider`] is a deterministic in-memory provider used by
//! the scheduler and viewer test suites. An adapter over `pdfium-render`
//! is available behind the non-default `pdfium` feature.

mod bitmap;
mod synthetic;

#[cfg(feature = "pdfium")]
mod pdfium;

pub use bitmap::{decode_blob, Bitmap, Blob, BlobFormat, SharedBitmap};
pub use synthetic::SyntheticProvider;

#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumProvider;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider-side failures.
///
/// `Aborted` is flow control, not an error condition; callers treat it as
/// a normal cancellation and never log it at error level.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("page {0} out of range")]
    PageOutOfRange(u32),

    #[error("render failed: {0}")]
    Render(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("request aborted")]
    Aborted,
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Options for a full-page rasterization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageImageOptions {
    /// Pixels per content unit. Providers may silently cap this; callers
    /// must not rely on an exact output pixel count.
    pub scale: f64,
    pub dpi: f64,
}

impl Default for PageImageOptions {
    fn default() -> Self {
        Self { scale: 1.0, dpi: 96.0 }
    }
}

/// A tile rasterization request at the backend level.
///
/// The region is in page-local content units; `pixel_width`/`pixel_height`
/// are the expected output dimensions at `scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRenderSpec {
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

/// Result of a dual-resolution page request: a fast initial image plus a
/// flag telling the caller whether an upgrade render is still worth
/// scheduling.
#[derive(Debug, Clone)]
pub struct DualResImage {
    pub initial: Blob,
    pub initial_scale: f64,
    pub is_full_quality: bool,
}

/// One positioned run of extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// The text layer of a page. Optional everywhere; extraction failure is
/// tolerated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextLayer {
    pub items: Vec<TextItem>,
}

/// The page data provider consumed by the viewer core.
///
/// Implementations must be callable from worker threads.
pub trait PageProvider: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self) -> u32;

    /// Native size of a page in content units (1-indexed).
    fn page_size(&self, page: u32) -> ProviderResult<(f64, f64)>;

    /// Rasterize a full page.
    fn page_image(&self, page: u32, opts: &PageImageOptions) -> ProviderResult<Blob>;

    /// Dual-resolution page request: providers with a thumbnail cache can
    /// return it immediately with `is_full_quality = false`, letting the
    /// caller paint now and schedule an upgrade. The default implements it
    /// as a plain full-quality render.
    fn page_image_dual_res(
        &self,
        page: u32,
        opts: &PageImageOptions,
    ) -> ProviderResult<DualResImage> {
        Ok(DualResImage {
            initial: self.page_image(page, opts)?,
            initial_scale: opts.scale,
            is_full_quality: true,
        })
    }

    /// Extract the text layer of a page.
    fn page_text_layer(&self, _page: u32) -> ProviderResult<TextLayer> {
        Err(ProviderError::Unsupported("text layer"))
    }

    /// Rasterize a single tile region.
    fn render_tile(&self, spec: &TileRenderSpec) -> ProviderResult<Blob>;

    /// Whether [`PageProvider::render_tile`] is implemented. Providers
    /// without tile support force the core into full-page rendering.
    fn is_tile_rendering_available(&self) -> bool {
        true
    }

    /// Cooperative throttling around interaction: stop producing
    /// thumbnails while a gesture is in flight.
    fn suspend_thumbnail_generation(&self) {}

    /// Counterpart of [`PageProvider::suspend_thumbnail_generation`].
    fn resume_thumbnail_generation(&self) {}

    /// Opaque document identity for cache and queue isolation, if known.
    fn document_id(&self) -> Option<String> {
        None
    }
}
