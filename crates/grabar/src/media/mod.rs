//! Media encoders for export artifacts.
//!
//! Three artifact families share the captured-frame model:
//!
//! - Animated GIF, via an adaptive-palette encoder
//!   ([`OptimizedGifEncoder`]) or a fixed-palette fallback writer
//!   ([`FixedPaletteGifEncoder`]) that works with no external
//!   quantization support at all
//! - Approximate MP4 video ([`VideoEncoder`]), MJPEG samples in a
//!   minimal box structure
//! - Still-frame PNG ([`StillExporter`]), the terminal fallback

pub mod gif_encoder;
pub mod gif_optimized;
pub mod png_still;
pub mod video_encoder;

pub use gif_encoder::{
    cube_index, DisposalMethod, FixedPaletteGifEncoder, GifDocument, GifEncodeOptions,
};
pub use gif_optimized::{OptimizedGifEncoder, OptimizedGifOptions};
pub use png_still::{CompressionLevel, StillExporter};
pub use video_encoder::{ContainerFormat, VideoCodec, VideoConfig, VideoEncoder};
