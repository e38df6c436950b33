//! Still-frame PNG export.
//!
//! The universal terminal fallback: when every animated strategy fails,
//! a single PNG of the current surface contents is always producible
//! from any readable surface.

use crate::result::{GrabarError, GrabarResult};
use crate::surface::PixelSurface;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// PNG compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompressionLevel {
    /// No compression (fastest, largest files)
    None,
    /// Fast compression (good balance)
    Fast,
    /// Default compression
    #[default]
    Default,
    /// Best compression (slowest, smallest files)
    Best,
}

impl CompressionLevel {
    /// Convert to png crate compression level
    fn to_png_compression(self) -> png::Compression {
        match self {
            Self::None | Self::Fast => png::Compression::Fast,
            Self::Default => png::Compression::Balanced,
            Self::Best => png::Compression::High,
        }
    }
}

/// Single-frame PNG exporter
///
/// ## Example
///
/// ```ignore
/// let exporter = StillExporter::new().with_compression(CompressionLevel::Best);
/// let png_data = exporter.encode(&surface)?;
/// exporter.save(&surface, Path::new("frame.png"))?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct StillExporter {
    compression: CompressionLevel,
}

impl StillExporter {
    /// Create an exporter with default compression
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compression level
    #[must_use]
    pub fn with_compression(mut self, compression: CompressionLevel) -> Self {
        self.compression = compression;
        self
    }

    /// Get the current compression level
    #[must_use]
    pub fn compression(&self) -> CompressionLevel {
        self.compression
    }

    /// Encode the surface's current contents to PNG bytes
    ///
    /// Prefers the direct pixel-read path, falling back to the surface's
    /// own serialization and then to a single stream frame, so any surface
    /// with at least one extraction method yields a still.
    ///
    /// # Errors
    ///
    /// Returns an error if every extraction path is unavailable, if the
    /// surface is tainted, or if encoding fails
    pub fn encode(&self, surface: &PixelSurface) -> GrabarResult<Vec<u8>> {
        match surface.read_pixels() {
            Ok(rgba) => self.encode_rgba(&rgba, surface.width(), surface.height()),
            Err(error @ GrabarError::SecurityViolation { .. }) => Err(error),
            Err(_) => match surface.serialize_png() {
                Ok(png) => Ok(png),
                Err(error @ GrabarError::SecurityViolation { .. }) => Err(error),
                Err(_) => {
                    let rgba = surface.stream_frame()?;
                    self.encode_rgba(&rgba, surface.width(), surface.height())
                }
            },
        }
    }

    /// Save the surface's current contents as a PNG file
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the file write fails
    pub fn save(&self, surface: &PixelSurface, path: &Path) -> GrabarResult<()> {
        let data = self.encode(surface)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    fn encode_rgba(&self, rgba: &[u8], width: u32, height: u32) -> GrabarResult<Vec<u8>> {
        let mut output = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut output, width, height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            encoder.set_compression(self.compression.to_png_compression());

            let mut writer = encoder
                .write_header()
                .map_err(|e| GrabarError::ImageProcessing {
                    message: format!("Failed to write PNG header: {e}"),
                })?;

            writer
                .write_image_data(rgba)
                .map_err(|e| GrabarError::ImageProcessing {
                    message: format!("Failed to write PNG data: {e}"),
                })?;
        }
        Ok(output)
    }
}
