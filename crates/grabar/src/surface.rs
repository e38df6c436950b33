//! Drawable surfaces and the surface reference sum type.
//!
//! A [`PixelSurface`] is an owned RGBA buffer plus the capability flags the
//! validator and strategy selector consume. Callers rarely hand the pipeline
//! a surface directly; they hand it a [`SurfaceRef`], a closed set of tagged
//! wrapper variants that the resolver unwraps one hop at a time.

use crate::result::{GrabarError, GrabarResult};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Alpha values below this map to the transparent palette slot
pub const ALPHA_THRESHOLD: u8 = 128;

/// Surface kind, used as part of the resource pool key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SurfaceKind {
    /// Full RGBA surface
    #[default]
    Rgba,
    /// Opaque surface (alpha ignored)
    Opaque,
}

/// An abstract drawable pixel buffer that can be rendered into and read back
#[derive(Debug, Clone)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    data: Vec<u8>,
    /// Whether direct pixel read-back is exposed
    pub supports_pixel_read: bool,
    /// Whether data-serialize extraction is exposed
    pub supports_serialize: bool,
    /// Whether stream capture is exposed
    pub supports_stream_capture: bool,
    /// Security taint: cross-origin content without read permission
    pub tainted: bool,
}

impl PixelSurface {
    /// Create a blank (fully transparent) surface
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize) * 4],
            supports_pixel_read: true,
            supports_serialize: true,
            supports_stream_capture: true,
            tainted: false,
        }
    }

    /// Create a surface from raw RGBA data
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> GrabarResult<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if data.len() != expected {
            return Err(GrabarError::ImageProcessing {
                message: format!(
                    "RGBA buffer is {} bytes, expected {expected} for {width}x{height}",
                    data.len()
                ),
            });
        }
        Ok(Self {
            width,
            height,
            data,
            supports_pixel_read: true,
            supports_serialize: true,
            supports_stream_capture: true,
            tainted: false,
        })
    }

    /// Create a surface filled with a single RGBA color
    #[must_use]
    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let mut surface = Self::new(width, height);
        surface.fill(color);
        surface
    }

    /// Mark the surface as tainted by cross-origin content
    #[must_use]
    pub fn with_tainted(mut self, tainted: bool) -> Self {
        self.tainted = tainted;
        self
    }

    /// Override which extraction methods the surface exposes
    #[must_use]
    pub fn with_extraction_methods(
        mut self,
        pixel_read: bool,
        serialize: bool,
        stream_capture: bool,
    ) -> Self {
        self.supports_pixel_read = pixel_read;
        self.supports_serialize = serialize;
        self.supports_stream_capture = stream_capture;
        self
    }

    /// Surface width in pixels
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Surface height in pixels
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Backing buffer size in bytes
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// A surface is valid when both dimensions are non-zero
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Fill the whole surface with one color
    pub fn fill(&mut self, color: [u8; 4]) {
        for pixel in self.data.chunks_exact_mut(4) {
            pixel.copy_from_slice(&color);
        }
    }

    /// Reset the surface to blank state for pool reuse
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.tainted = false;
    }

    /// Shrink the backing buffer to the minimum before disposal
    pub fn dispose(&mut self) {
        self.width = 0;
        self.height = 0;
        self.data = Vec::new();
    }

    /// Borrow the raw RGBA buffer without a capability check
    ///
    /// Internal render paths use this; extraction for export must go
    /// through [`Self::read_pixels`] so taint is enforced.
    #[must_use]
    pub fn raw_rgba(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the raw RGBA buffer for rendering
    pub fn raw_rgba_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Read back the pixel contents (pixel-read extraction method)
    pub fn read_pixels(&self) -> GrabarResult<Vec<u8>> {
        if self.tainted {
            return Err(GrabarError::SecurityViolation {
                message: "cannot read pixels from a tainted surface".to_string(),
            });
        }
        if !self.supports_pixel_read {
            return Err(GrabarError::CaptureFailed {
                message: "surface does not support pixel read-back".to_string(),
            });
        }
        Ok(self.data.clone())
    }

    /// Pull the current contents as one stream frame (stream-capture
    /// extraction method)
    pub fn stream_frame(&self) -> GrabarResult<Vec<u8>> {
        if self.tainted {
            return Err(GrabarError::SecurityViolation {
                message: "cannot capture a stream from a tainted surface".to_string(),
            });
        }
        if !self.supports_stream_capture {
            return Err(GrabarError::CaptureFailed {
                message: "surface does not support stream capture".to_string(),
            });
        }
        Ok(self.data.clone())
    }

    /// Serialize the surface to PNG bytes (data-serialize extraction method)
    pub fn serialize_png(&self) -> GrabarResult<Vec<u8>> {
        if self.tainted {
            return Err(GrabarError::SecurityViolation {
                message: "cannot serialize a tainted surface".to_string(),
            });
        }
        if !self.supports_serialize {
            return Err(GrabarError::CaptureFailed {
                message: "surface does not support serialization".to_string(),
            });
        }
        let img = image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| GrabarError::ImageProcessing {
                message: "surface buffer does not match its dimensions".to_string(),
            })?;
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| GrabarError::ImageProcessing {
                message: format!("PNG serialization failed: {e}"),
            })?;
        Ok(out.into_inner())
    }
}

/// A render-engine object exposing an embedded output surface
#[derive(Debug, Clone)]
pub struct EngineHandle {
    /// The engine's output surface
    pub output_surface: PixelSurface,
}

impl EngineHandle {
    /// Wrap a surface as an engine handle
    #[must_use]
    pub fn new(output_surface: PixelSurface) -> Self {
        Self { output_surface }
    }
}

/// A component-like object exposing a capability probe plus a surface field
#[derive(Debug, Clone)]
pub struct ComponentHandle {
    surface: Option<Box<SurfaceRef>>,
}

impl ComponentHandle {
    /// Create a component handle around an inner surface reference
    #[must_use]
    pub fn new(surface: SurfaceRef) -> Self {
        Self {
            surface: Some(Box::new(surface)),
        }
    }

    /// Create a component handle that carries no surface
    #[must_use]
    pub fn empty() -> Self {
        Self { surface: None }
    }

    /// Capability probe: does this component currently carry a surface?
    #[must_use]
    pub fn is_valid_surface(&self) -> bool {
        self.surface.is_some()
    }

    /// Take the inner surface reference, if any
    #[must_use]
    pub fn into_surface(self) -> Option<SurfaceRef> {
        self.surface.map(|boxed| *boxed)
    }
}

/// A surface reference: every input shape the pipeline accepts
///
/// This is a closed sum type rather than open-ended property sniffing; the
/// resolver is a total function over these variants.
#[derive(Debug, Clone)]
pub enum SurfaceRef {
    /// A concrete drawable surface
    Concrete(PixelSurface),
    /// A wrapper exposing a `.current` field
    CurrentRef(Box<SurfaceRef>),
    /// A wrapper exposing a `.surface` field
    SurfaceField(Box<SurfaceRef>),
    /// A wrapper exposing an `.element` field
    ElementField(Box<SurfaceRef>),
    /// A render-engine object exposing `.output_surface`
    Engine(EngineHandle),
    /// A component exposing `is_valid_surface()` plus a surface field
    Component(ComponentHandle),
    /// A recognized-but-unsupported input, named for diagnostics
    Unsupported(&'static str),
}

impl SurfaceRef {
    /// Convenience constructor for a `.current` wrapper
    #[must_use]
    pub fn current(inner: SurfaceRef) -> Self {
        Self::CurrentRef(Box::new(inner))
    }

    /// Diagnostic name of this reference kind
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Concrete(_) => "concrete-surface",
            Self::CurrentRef(_) => "current",
            Self::SurfaceField(_) => "surface",
            Self::ElementField(_) => "element",
            Self::Engine(_) => "engine.output_surface",
            Self::Component(_) => "component.surface",
            Self::Unsupported(name) => name,
        }
    }
}

impl From<PixelSurface> for SurfaceRef {
    fn from(surface: PixelSurface) -> Self {
        Self::Concrete(surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod pixel_surface_tests {
        use super::*;

        #[test]
        fn test_new_surface_is_blank() {
            let surface = PixelSurface::new(4, 4);
            assert_eq!(surface.width(), 4);
            assert_eq!(surface.height(), 4);
            assert_eq!(surface.size_bytes(), 64);
            assert!(surface.raw_rgba().iter().all(|&b| b == 0));
        }

        #[test]
        fn test_is_valid_requires_nonzero_dimensions() {
            assert!(PixelSurface::new(1, 1).is_valid());
            assert!(!PixelSurface::new(0, 10).is_valid());
            assert!(!PixelSurface::new(10, 0).is_valid());
        }

        #[test]
        fn test_from_rgba_rejects_wrong_length() {
            let result = PixelSurface::from_rgba(2, 2, vec![0; 15]);
            assert!(result.is_err());
        }

        #[test]
        fn test_solid_fill() {
            let surface = PixelSurface::solid(2, 2, [255, 0, 0, 255]);
            for pixel in surface.raw_rgba().chunks_exact(4) {
                assert_eq!(pixel, [255, 0, 0, 255]);
            }
        }

        #[test]
        fn test_read_pixels_tainted_is_security_error() {
            let surface = PixelSurface::solid(2, 2, [1, 2, 3, 4]).with_tainted(true);
            let err = surface.read_pixels().unwrap_err();
            assert!(err.is_security());
        }

        #[test]
        fn test_read_pixels_without_capability_fails() {
            let surface = PixelSurface::new(2, 2).with_extraction_methods(false, true, true);
            assert!(surface.read_pixels().is_err());
        }

        #[test]
        fn test_stream_frame_tainted_is_security_error() {
            let surface = PixelSurface::solid(2, 2, [1, 2, 3, 4])
                .with_extraction_methods(false, false, true)
                .with_tainted(true);
            assert!(surface.stream_frame().unwrap_err().is_security());
        }

        #[test]
        fn test_stream_frame_without_capability_fails() {
            let surface = PixelSurface::new(2, 2).with_extraction_methods(true, true, false);
            assert!(surface.stream_frame().is_err());
        }

        #[test]
        fn test_stream_frame_returns_contents() {
            let surface = PixelSurface::solid(2, 2, [9, 8, 7, 255])
                .with_extraction_methods(false, false, true);
            let frame = surface.stream_frame().unwrap();
            assert_eq!(frame.len(), 16);
            assert_eq!(&frame[..4], &[9, 8, 7, 255]);
        }

        #[test]
        fn test_serialize_png_produces_png_signature() {
            let surface = PixelSurface::solid(3, 3, [0, 255, 0, 255]);
            let png = surface.serialize_png().unwrap();
            assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        }

        #[test]
        fn test_clear_resets_taint_and_content() {
            let mut surface = PixelSurface::solid(2, 2, [9, 9, 9, 9]).with_tainted(true);
            surface.clear();
            assert!(!surface.tainted);
            assert!(surface.raw_rgba().iter().all(|&b| b == 0));
        }

        #[test]
        fn test_dispose_shrinks_buffer() {
            let mut surface = PixelSurface::new(8, 8);
            surface.dispose();
            assert_eq!(surface.size_bytes(), 0);
            assert!(!surface.is_valid());
        }
    }

    mod surface_ref_tests {
        use super::*;

        #[test]
        fn test_kind_names() {
            let concrete = SurfaceRef::from(PixelSurface::new(1, 1));
            assert_eq!(concrete.kind_name(), "concrete-surface");
            assert_eq!(SurfaceRef::current(concrete).kind_name(), "current");
            assert_eq!(SurfaceRef::Unsupported("audio-node").kind_name(), "audio-node");
        }

        #[test]
        fn test_component_probe() {
            let full = ComponentHandle::new(SurfaceRef::from(PixelSurface::new(1, 1)));
            assert!(full.is_valid_surface());
            assert!(!ComponentHandle::empty().is_valid_surface());
        }
    }
}
