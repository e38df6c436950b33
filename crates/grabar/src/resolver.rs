//! Surface resolution: normalize any accepted input into a concrete surface.
//!
//! The resolver unwraps exactly one layer per step, recording each hop for
//! diagnostics, until it reaches a concrete surface or hits the hop limit.
//! Self-referential containers therefore terminate in bounded steps.

use crate::result::GrabarError;
use crate::surface::{PixelSurface, SurfaceRef};
use tracing::debug;

/// Maximum unwrap depth before resolution gives up
pub const MAX_RESOLUTION_HOPS: usize = 10;

/// Outcome of resolving a surface reference
#[derive(Debug)]
pub struct Resolution {
    /// The concrete surface, when resolution succeeded
    pub surface: Option<PixelSurface>,
    /// One entry per unwrap step, in order
    pub resolution_path: Vec<&'static str>,
    /// Terminal error, when resolution failed
    pub error: Option<GrabarError>,
}

impl Resolution {
    /// Whether a concrete surface was found
    #[must_use]
    pub fn success(&self) -> bool {
        self.surface.is_some()
    }

    fn resolved(surface: PixelSurface, path: Vec<&'static str>) -> Self {
        Self {
            surface: Some(surface),
            resolution_path: path,
            error: None,
        }
    }

    fn failed(message: String, path: Vec<&'static str>) -> Self {
        Self {
            surface: None,
            resolution_path: path,
            error: Some(GrabarError::ResolutionFailed { message }),
        }
    }
}

/// Resolves arbitrary surface references to concrete drawable surfaces
#[derive(Debug, Default)]
pub struct SurfaceResolver;

impl SurfaceResolver {
    /// Create a resolver
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Resolve a surface reference, unwrapping one layer per hop
    ///
    /// A concrete surface resolves immediately with an empty path. Nesting
    /// deeper than [`MAX_RESOLUTION_HOPS`] fails without looping forever.
    #[must_use]
    pub fn resolve(&self, input: SurfaceRef) -> Resolution {
        let mut path = Vec::new();
        let mut node = input;

        loop {
            if path.len() >= MAX_RESOLUTION_HOPS {
                return Resolution::failed(
                    format!("hop limit of {MAX_RESOLUTION_HOPS} reached before a concrete surface"),
                    path,
                );
            }

            match node {
                SurfaceRef::Concrete(surface) => {
                    debug!(hops = path.len(), "surface reference resolved");
                    return Resolution::resolved(surface, path);
                }
                SurfaceRef::CurrentRef(inner) => {
                    path.push("current");
                    node = *inner;
                }
                SurfaceRef::SurfaceField(inner) => {
                    path.push("surface");
                    node = *inner;
                }
                SurfaceRef::ElementField(inner) => {
                    path.push("element");
                    node = *inner;
                }
                SurfaceRef::Engine(engine) => {
                    path.push("engine.output_surface");
                    node = SurfaceRef::Concrete(engine.output_surface);
                }
                SurfaceRef::Component(component) => {
                    path.push("component.surface");
                    if !component.is_valid_surface() {
                        return Resolution::failed(
                            "component reports no valid surface".to_string(),
                            path,
                        );
                    }
                    match component.into_surface() {
                        Some(inner) => node = inner,
                        None => {
                            return Resolution::failed(
                                "component surface field is empty".to_string(),
                                path,
                            );
                        }
                    }
                }
                SurfaceRef::Unsupported(name) => {
                    return Resolution::failed(
                        format!("unsupported surface reference kind: {name}"),
                        path,
                    );
                }
            }
        }
    }
}
