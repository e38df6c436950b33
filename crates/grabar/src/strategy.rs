//! Strategy selection: order candidate encoders best-first per format.
//!
//! Selection is a pure function of the target format and the validated
//! capability set, so identical inputs always yield identical ordered
//! lists. Every format's list terminates in its universal fallback entry.

use crate::validator::SurfaceCapabilities;
use serde::{Deserialize, Serialize};

/// Export formats the pipeline can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    /// Single still image
    Png,
    /// Animated GIF
    Gif,
    /// MP4 video
    Video,
}

impl ExportFormat {
    /// File extension for artifacts of this format
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Video => "mp4",
        }
    }

    /// Whether this format encodes a frame sequence
    #[must_use]
    pub fn is_animated(&self) -> bool {
        matches!(self, Self::Gif | Self::Video)
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// One concrete capture-and-encode method with a capability prerequisite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Native streaming recorder (needs stream capture)
    MediaRecorder,
    /// Frame-accurate encoder over read-back pixels (needs pixel read)
    WebCodecs,
    /// Frame-by-frame capture and container write; universal for video
    FrameCapture,
    /// Adaptive-palette GIF encoder (needs pixel read)
    GifOptimized,
    /// Fixed-palette GIF writer; universal for GIF
    GifFixedPalette,
    /// Single still frame as PNG; universal fallback across formats
    PngStill,
}

impl Strategy {
    /// Stable diagnostic name
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::MediaRecorder => "media-recorder",
            Self::WebCodecs => "web-codecs",
            Self::FrameCapture => "frame-capture",
            Self::GifOptimized => "gif-optimized",
            Self::GifFixedPalette => "gif-fixed-palette",
            Self::PngStill => "png-still",
        }
    }
}

/// Orders candidate strategies for a format, best to most-compatible
#[derive(Debug, Default)]
pub struct StrategySelector;

impl StrategySelector {
    /// Select the ordered strategy list for `format` given `capabilities`
    ///
    /// Pure and deterministic; no side effects.
    #[must_use]
    pub fn select(format: ExportFormat, capabilities: &SurfaceCapabilities) -> Vec<Strategy> {
        match format {
            ExportFormat::Video => {
                let mut strategies = Vec::with_capacity(3);
                if capabilities.stream_capture {
                    strategies.push(Strategy::MediaRecorder);
                }
                if capabilities.pixel_read {
                    strategies.push(Strategy::WebCodecs);
                }
                strategies.push(Strategy::FrameCapture);
                strategies
            }
            ExportFormat::Gif => {
                let mut strategies = Vec::with_capacity(2);
                if capabilities.pixel_read {
                    strategies.push(Strategy::GifOptimized);
                }
                strategies.push(Strategy::GifFixedPalette);
                strategies
            }
            ExportFormat::Png => vec![Strategy::PngStill],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_caps() -> SurfaceCapabilities {
        SurfaceCapabilities {
            pixel_read: true,
            serialize: true,
            stream_capture: true,
        }
    }

    #[test]
    fn test_video_full_capability_ordering() {
        let strategies = StrategySelector::select(ExportFormat::Video, &full_caps());
        assert_eq!(
            strategies,
            vec![
                Strategy::MediaRecorder,
                Strategy::WebCodecs,
                Strategy::FrameCapture
            ]
        );
    }

    #[test]
    fn test_video_without_stream_capture() {
        let caps = SurfaceCapabilities {
            stream_capture: false,
            ..full_caps()
        };
        let strategies = StrategySelector::select(ExportFormat::Video, &caps);
        assert_eq!(strategies, vec![Strategy::WebCodecs, Strategy::FrameCapture]);
    }

    #[test]
    fn test_video_always_ends_with_frame_capture() {
        let caps = SurfaceCapabilities::default();
        let strategies = StrategySelector::select(ExportFormat::Video, &caps);
        assert_eq!(strategies, vec![Strategy::FrameCapture]);
    }

    #[test]
    fn test_gif_prefers_optimized_encoder() {
        let strategies = StrategySelector::select(ExportFormat::Gif, &full_caps());
        assert_eq!(
            strategies,
            vec![Strategy::GifOptimized, Strategy::GifFixedPalette]
        );
    }

    #[test]
    fn test_gif_without_pixel_read_falls_to_fixed_palette() {
        let caps = SurfaceCapabilities {
            pixel_read: false,
            ..full_caps()
        };
        let strategies = StrategySelector::select(ExportFormat::Gif, &caps);
        assert_eq!(strategies, vec![Strategy::GifFixedPalette]);
    }

    #[test]
    fn test_png_is_single_universal_entry() {
        let strategies = StrategySelector::select(ExportFormat::Png, &SurfaceCapabilities::default());
        assert_eq!(strategies, vec![Strategy::PngStill]);
    }

    #[test]
    fn test_strategy_names_are_stable() {
        assert_eq!(Strategy::MediaRecorder.name(), "media-recorder");
        assert_eq!(Strategy::GifFixedPalette.name(), "gif-fixed-palette");
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn any_format() -> impl proptest::strategy::Strategy<Value = ExportFormat> {
            prop_oneof![
                Just(ExportFormat::Png),
                Just(ExportFormat::Gif),
                Just(ExportFormat::Video)
            ]
        }

        proptest! {
            #[test]
            fn prop_selection_is_deterministic(
                format in any_format(),
                pixel_read in proptest::bool::ANY,
                serialize in proptest::bool::ANY,
                stream_capture in proptest::bool::ANY,
            ) {
                let caps = SurfaceCapabilities { pixel_read, serialize, stream_capture };
                let first = StrategySelector::select(format, &caps);
                let second = StrategySelector::select(format, &caps);
                prop_assert_eq!(first, second);
            }

            #[test]
            fn prop_selection_is_never_empty(
                format in any_format(),
                pixel_read in proptest::bool::ANY,
                serialize in proptest::bool::ANY,
                stream_capture in proptest::bool::ANY,
            ) {
                let caps = SurfaceCapabilities { pixel_read, serialize, stream_capture };
                prop_assert!(!StrategySelector::select(format, &caps).is_empty());
            }
        }
    }
}
