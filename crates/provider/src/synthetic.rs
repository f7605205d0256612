//! Deterministic in-memory provider for tests and benchmarks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::{
    Blob, PageImageOptions, PageProvider, ProviderError, ProviderResult, TextItem, TextLayer,
    TileRenderSpec,
};

/// A provider that synthesizes page and tile images without any document.
///
/// Every page has the same configured size; pixels encode the page number
/// so tests can verify that the right content landed in the right place.
/// Renders are instantaneous unless a `render_delay` is configured.
pub struct SyntheticProvider {
    page_count: u32,
    page_width: f64,
    page_height: f64,
    render_delay: Option<Duration>,
    fail_pages: Vec<u32>,
    renders: AtomicU64,
    tile_renders: AtomicU64,
    thumbnails_suspended: AtomicBool,
    document_id: String,
}

impl SyntheticProvider {
    pub fn new(page_count: u32, page_width: f64, page_height: f64) -> Self {
        Self {
            page_count,
            page_width,
            page_height,
            render_delay: None,
            fail_pages: Vec::new(),
            renders: AtomicU64::new(0),
            tile_renders: AtomicU64::new(0),
            thumbnails_suspended: AtomicBool::new(false),
            document_id: "synthetic".to_string(),
        }
    }

    /// Simulate a slow backend.
    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = Some(delay);
        self
    }

    /// Make specific pages fail to render.
    pub fn with_failing_pages(mut self, pages: Vec<u32>) -> Self {
        self.fail_pages = pages;
        self
    }

    pub fn with_document_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = id.into();
        self
    }

    /// Total full-page renders served.
    pub fn render_count(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }

    /// Total tile renders served.
    pub fn tile_render_count(&self) -> u64 {
        self.tile_renders.load(Ordering::Relaxed)
    }

    pub fn thumbnails_suspended(&self) -> bool {
        self.thumbnails_suspended.load(Ordering::Relaxed)
    }

    fn check_page(&self, page: u32) -> ProviderResult<()> {
        if page == 0 || page > self.page_count {
            return Err(ProviderError::PageOutOfRange(page));
        }
        if self.fail_pages.contains(&page) {
            return Err(ProviderError::Render(format!("synthetic failure on page {page}")));
        }
        Ok(())
    }

    fn maybe_sleep(&self) {
        if let Some(delay) = self.render_delay {
            std::thread::sleep(delay);
        }
    }

    fn solid_blob(&self, page: u32, width: u32, height: u32) -> Blob {
        // Encode the page number in the red channel for test assertions.
        let r = (page % 251) as u8 + 1;
        let mut bytes = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            bytes.extend_from_slice(&[r, 128, 64, 255]);
        }
        Blob::rgba(bytes, width, height)
    }
}

impl PageProvider for SyntheticProvider {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self, page: u32) -> ProviderResult<(f64, f64)> {
        self.check_page(page)?;
        Ok((self.page_width, self.page_height))
    }

    fn page_image(&self, page: u32, opts: &PageImageOptions) -> ProviderResult<Blob> {
        self.check_page(page)?;
        self.maybe_sleep();
        self.renders.fetch_add(1, Ordering::Relaxed);
        // Cap like a real backend would; callers must not assume exact
        // output dimensions.
        let scale = opts.scale.clamp(0.1, 8.0);
        let w = ((self.page_width * scale).round() as u32).max(1);
        let h = ((self.page_height * scale).round() as u32).max(1);
        Ok(self.solid_blob(page, w, h))
    }

    fn page_text_layer(&self, page: u32) -> ProviderResult<TextLayer> {
        self.check_page(page)?;
        Ok(TextLayer {
            items: vec![TextItem {
                text: format!("page {page}"),
                x: 10.0,
                y: 10.0,
                width: 100.0,
                height: 14.0,
            }],
        })
    }

    fn render_tile(&self, spec: &TileRenderSpec) -> ProviderResult<Blob> {
        self.check_page(spec.page)?;
        self.maybe_sleep();
        self.tile_renders.fetch_add(1, Ordering::Relaxed);
        Ok(self.solid_blob(spec.page, spec.pixel_width.max(1), spec.pixel_height.max(1)))
    }

    fn suspend_thumbnail_generation(&self) {
        self.thumbnails_suspended.store(true, Ordering::Relaxed);
    }

    fn resume_thumbnail_generation(&self) {
        self.thumbnails_suspended.store(false, Ordering::Relaxed);
    }

    fn document_id(&self) -> Option<String> {
        Some(self.document_id.clone())
    }
}
