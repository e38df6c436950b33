//! Grabar: Canvas Capture and Export Pipeline
//!
//! Grabar (Spanish: "to record") turns the contents of a pixel surface
//! into a downloadable artifact: animated GIF, approximate MP4 video, or
//! still-frame PNG. Every layer degrades rather than fails outright.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    GRABAR Pipeline                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌───────────┐   ┌──────────┐   ┌──────────┐  │
//! │  │ Surface  │   │ Surface   │   │ Strategy │   │ Media    │  │
//! │  │ Resolver │──►│ Validator │──►│ Selector │──►│ Encoders │  │
//! │  └──────────┘   └───────────┘   └──────────┘   └──────────┘  │
//! │        resolve        validate       select       attempt,   │
//! │        references     + detect       ordered      fall back, │
//! │        to pixels      capabilities   strategies   degrade    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`ExportManager`] wires the stages together; each stage is also usable
//! on its own.

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

mod capture;
mod export;
pub mod media;
mod pool;
mod resolver;
mod result;
mod strategy;
mod surface;
mod validator;

pub use capture::{
    AbortHandle, CaptureConfig, CaptureSession, CaptureState, CapturedFrame, FrameSource,
    SurfaceFrameSource,
};
pub use export::{EncodingJob, ExportManager, ExportOptions, ExportOutcome, JobStatus};
pub use media::{
    CompressionLevel, ContainerFormat, DisposalMethod, FixedPaletteGifEncoder, GifDocument,
    GifEncodeOptions, OptimizedGifEncoder, OptimizedGifOptions, StillExporter, VideoCodec,
    VideoConfig, VideoEncoder,
};
pub use pool::{PooledSurface, ResourceManager};
pub use resolver::{Resolution, SurfaceResolver, MAX_RESOLUTION_HOPS};
pub use result::{GrabarError, GrabarResult};
pub use strategy::{ExportFormat, Strategy, StrategySelector};
pub use surface::{
    ComponentHandle, EngineHandle, PixelSurface, SurfaceKind, SurfaceRef, ALPHA_THRESHOLD,
};
pub use validator::{SurfaceCapabilities, SurfaceValidator, Validation};
