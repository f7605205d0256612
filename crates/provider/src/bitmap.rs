//! Blob and bitmap types shared across the render pipeline.
//!
//! Providers return encoded blobs; worker threads decode them into RGBA
//! bitmaps which are then shared by reference into the tile cache and the
//! page elements. A bitmap a caller receives and does not draw is released
//! by dropping its handle.

use std::sync::Arc;

use crate::{ProviderError, ProviderResult};

/// Encoding of a blob's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobFormat {
    /// PNG-encoded image data.
    Png,
    /// Raw tightly-packed RGBA, dimensions carried alongside.
    Rgba { width: u32, height: u32 },
}

/// Encoded image bytes as returned by a provider.
#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub format: BlobFormat,
}

impl Blob {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self { bytes, format: BlobFormat::Png }
    }

    pub fn rgba(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            bytes,
            format: BlobFormat::Rgba { width, height },
        }
    }

    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

/// A decoded RGBA bitmap (4 bytes per pixel).
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Shared handle to a decoded bitmap. Cloning is cheap; the pixel memory
/// is freed when the last handle drops.
pub type SharedBitmap = Arc<Bitmap>;

impl Bitmap {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(pixels.len(), (width * height * 4) as usize);
        Self { pixels, width, height }
    }

    /// A solid-color bitmap.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&rgba);
        }
        Self { pixels, width, height }
    }

    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    /// True when any pixel has a non-zero channel. Used by the blank-page
    /// sweep to detect elements that claim rendered content but lost it.
    pub fn has_content(&self) -> bool {
        self.pixels.iter().any(|&b| b != 0)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }
}

/// Decode a blob into an RGBA bitmap.
///
/// This is the worker-side half of the pipeline: providers rasterize to
/// encoded bytes, workers decode off the main context.
pub fn decode_blob(blob: &Blob) -> ProviderResult<Bitmap> {
    match blob.format {
        BlobFormat::Rgba { width, height } => {
            let expected = (width as usize) * (height as usize) * 4;
            if blob.bytes.len() != expected {
                return Err(ProviderError::Decode(format!(
                    "rgba blob is {} bytes, expected {expected}",
                    blob.bytes.len()
                )));
            }
            Ok(Bitmap::new(blob.bytes.clone(), width, height))
        }
        BlobFormat::Png => {
            let decoded = image::load_from_memory_with_format(&blob.bytes, image::ImageFormat::Png)
                .map_err(|e| ProviderError::Decode(e.to_string()))?;
            let rgba = decoded.to_rgba8();
            let (width, height) = (rgba.width(), rgba.height());
            Ok(Bitmap::new(rgba.into_raw(), width, height))
        }
    }
}
