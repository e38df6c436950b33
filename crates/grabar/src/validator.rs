//! Surface validation and capability detection.
//!
//! Validation never panics and never returns `Err`: the caller always gets a
//! [`Validation`] describing whether the surface is exportable, which
//! extraction methods it supports, and why it was rejected. A failed taint
//! probe is classified as a security violation, distinct from a missing
//! capability, because it is never retryable.

use crate::result::GrabarError;
use crate::surface::PixelSurface;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Extraction methods a surface exposes, consumed by the strategy selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceCapabilities {
    /// Direct pixel read-back
    pub pixel_read: bool,
    /// Data-serialize extraction (encode to an image blob)
    pub serialize: bool,
    /// Stream capture (frames pulled from a live stream)
    pub stream_capture: bool,
}

impl SurfaceCapabilities {
    /// Whether at least one extraction method is available
    #[must_use]
    pub fn any(&self) -> bool {
        self.pixel_read || self.serialize || self.stream_capture
    }
}

/// Outcome of validating a surface
#[derive(Debug)]
pub struct Validation {
    /// Whether the surface is exportable
    pub is_valid: bool,
    /// Detected extraction methods (empty set when invalid)
    pub capabilities: SurfaceCapabilities,
    /// Why validation failed, when it did
    pub error: Option<GrabarError>,
}

impl Validation {
    fn rejected(error: GrabarError) -> Self {
        Self {
            is_valid: false,
            capabilities: SurfaceCapabilities::default(),
            error: Some(error),
        }
    }
}

/// Validates surfaces and produces their capability set
#[derive(Debug, Default)]
pub struct SurfaceValidator;

impl SurfaceValidator {
    /// Create a validator
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate a surface, in order: non-null, dimensions, extraction
    /// methods, then one probe invocation of a supported extraction
    /// method for taint detection.
    #[must_use]
    pub fn validate(&self, surface: Option<&PixelSurface>) -> Validation {
        let Some(surface) = surface else {
            return Validation::rejected(GrabarError::ValidationFailed {
                message: "no surface provided".to_string(),
            });
        };

        if !surface.is_valid() {
            return Validation::rejected(GrabarError::ValidationFailed {
                message: format!(
                    "surface has invalid dimensions {}x{}",
                    surface.width(),
                    surface.height()
                ),
            });
        }

        let capabilities = SurfaceCapabilities {
            pixel_read: surface.supports_pixel_read,
            serialize: surface.supports_serialize,
            stream_capture: surface.supports_stream_capture,
        };

        if !capabilities.any() {
            return Validation::rejected(GrabarError::ValidationFailed {
                message: "surface exposes no extraction method".to_string(),
            });
        }

        // Low-cost extraction probe. Failure here on a tainted surface is a
        // security error, not a capability absence.
        if let Err(probe_error) = Self::probe_extraction(surface) {
            return Validation::rejected(probe_error);
        }

        debug!(
            width = surface.width(),
            height = surface.height(),
            ?capabilities,
            "surface validated"
        );
        Validation {
            is_valid: true,
            capabilities,
            error: None,
        }
    }

    /// Exercise the cheapest supported extraction method once. A tainted
    /// surface surfaces here as a [`GrabarError::SecurityViolation`]; any
    /// other failure is classified as a validation error.
    fn probe_extraction(surface: &PixelSurface) -> Result<(), GrabarError> {
        let probed = if surface.supports_serialize {
            surface.serialize_png().map(|_| ())
        } else if surface.supports_pixel_read {
            surface.read_pixels().map(|_| ())
        } else {
            surface.stream_frame().map(|_| ())
        };

        match probed {
            Ok(()) => Ok(()),
            Err(error @ GrabarError::SecurityViolation { .. }) => Err(error),
            Err(error) => Err(GrabarError::ValidationFailed {
                message: format!("extraction probe failed: {error}"),
            }),
        }
    }
}
