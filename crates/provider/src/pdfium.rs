//! PDFium-backed page provider.
//!
//! Thin adapter from the viewer's [`PageProvider`] contract onto
//! `pdfium-render`. Tile rendering rasterizes the page region at the
//! requested scale and crops; PDFium page access is serialized behind a
//! mutex because concurrent access to one document is not reliably safe.

use std::path::Path;
use std::sync::Mutex;

use pdfium_render::prelude::*;

use crate::{
    Blob, PageImageOptions, PageProvider, ProviderError, ProviderResult, TileRenderSpec,
};

/// Largest page-edge PDFium is asked to rasterize in one call.
const MAX_RENDER_EDGE_PX: f64 = 8192.0;

pub struct PdfiumProvider {
    document: Mutex<PdfDocument<'static>>,
    page_count: u32,
    document_id: String,
}

impl PdfiumProvider {
    /// Load a document from disk using the system PDFium library.
    pub fn open(path: impl AsRef<Path>) -> ProviderResult<Self> {
        let pdfium = Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| ProviderError::Render(format!("pdfium bind failed: {e}")))?;
        let pdfium: &'static Pdfium = Box::leak(Box::new(pdfium));
        let document = pdfium
            .load_pdf_from_file(path.as_ref(), None)
            .map_err(|e| ProviderError::Render(format!("load failed: {e}")))?;
        let page_count = document.pages().len() as u32;
        Ok(Self {
            document: Mutex::new(document),
            page_count,
            document_id: path.as_ref().to_string_lossy().into_owned(),
        })
    }

    fn render_region(
        &self,
        page: u32,
        scale: f64,
        crop: Option<(f64, f64, u32, u32)>,
    ) -> ProviderResult<Blob> {
        if page == 0 || page > self.page_count {
            return Err(ProviderError::PageOutOfRange(page));
        }
        let document = self.document.lock().unwrap();
        let pdf_page = document
            .pages()
            .get((page - 1) as u16)
            .map_err(|e| ProviderError::Render(e.to_string()))?;

        let page_w = pdf_page.width().value as f64;
        let page_h = pdf_page.height().value as f64;
        let scale = scale.min(MAX_RENDER_EDGE_PX / page_w.max(page_h).max(1.0));
        let target_w = (page_w * scale).round().max(1.0) as i32;
        let target_h = (page_h * scale).round().max(1.0) as i32;

        let config = PdfRenderConfig::new()
            .set_target_width(target_w)
            .set_target_height(target_h);
        let bitmap = pdf_page
            .render_with_config(&config)
            .map_err(|e| ProviderError::Render(e.to_string()))?;
        let full = bitmap.as_rgba_bytes();
        let full_w = target_w as u32;
        let full_h = target_h as u32;

        match crop {
            None => Ok(Blob::rgba(full.to_vec(), full_w, full_h)),
            Some((x, y, out_w, out_h)) => {
                let px = (x * scale).round().max(0.0) as u32;
                let py = (y * scale).round().max(0.0) as u32;
                let out_w = out_w.min(full_w.saturating_sub(px)).max(1);
                let out_h = out_h.min(full_h.saturating_sub(py)).max(1);
                let mut bytes = Vec::with_capacity((out_w * out_h * 4) as usize);
                for row in 0..out_h {
                    let src = ((py + row) * full_w + px) as usize * 4;
                    let end = src + out_w as usize * 4;
                    if end <= full.len() {
                        bytes.extend_from_slice(&full[src..end]);
                    } else {
                        bytes.extend(std::iter::repeat(255u8).take(out_w as usize * 4));
                    }
                }
                Ok(Blob::rgba(bytes, out_w, out_h))
            }
        }
    }
}

impl PageProvider for PdfiumProvider {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    fn page_size(&self, page: u32) -> ProviderResult<(f64, f64)> {
        if page == 0 || page > self.page_count {
            return Err(ProviderError::PageOutOfRange(page));
        }
        let document = self.document.lock().unwrap();
        let pdf_page = document
            .pages()
            .get((page - 1) as u16)
            .map_err(|e| ProviderError::Render(e.to_string()))?;
        Ok((pdf_page.width().value as f64, pdf_page.height().value as f64))
    }

    fn page_image(&self, page: u32, opts: &PageImageOptions) -> ProviderResult<Blob> {
        self.render_region(page, opts.scale, None)
    }

    fn render_tile(&self, spec: &TileRenderSpec) -> ProviderResult<Blob> {
        self.render_region(
            spec.page,
            spec.scale,
            Some((spec.x, spec.y, spec.pixel_width, spec.pixel_height)),
        )
    }

    fn document_id(&self) -> Option<String> {
        Some(self.document_id.clone())
    }
}
