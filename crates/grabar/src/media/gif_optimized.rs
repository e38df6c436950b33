//! Adaptive-palette GIF encoder.
//!
//! The preferred GIF strategy when pixel read-back is available: per-frame
//! adaptive quantization with quality-controlled speed, standard LZW
//! output. Falls back to [`super::gif_encoder::FixedPaletteGifEncoder`]
//! when this encoder fails or pixel read is unavailable.

use crate::capture::CapturedFrame;
use crate::result::{GrabarError, GrabarResult};
use gif::{Encoder, Frame, Repeat};
use serde::{Deserialize, Serialize};

/// Options for the adaptive encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedGifOptions {
    /// Quality level (1-100, affects palette quantization speed)
    pub quality: u8,
    /// Loop count (0 = infinite)
    pub loop_count: u16,
}

impl Default for OptimizedGifOptions {
    fn default() -> Self {
        Self {
            quality: 80,
            loop_count: 0,
        }
    }
}

impl OptimizedGifOptions {
    /// Set quality (clamped to 1-100)
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Set loop count (0 = infinite)
    #[must_use]
    pub fn with_loop_count(mut self, count: u16) -> Self {
        self.loop_count = count;
        self
    }

    /// Map quality (1-100) to quantizer speed (1-30, lower is better)
    #[must_use]
    pub fn quantizer_speed(&self) -> i32 {
        let normalized = i32::from(100 - self.quality);
        (normalized * 29 / 100 + 1).clamp(1, 30)
    }
}

/// Adaptive-palette GIF encoder
#[derive(Debug, Default)]
pub struct OptimizedGifEncoder {
    options: OptimizedGifOptions,
}

impl OptimizedGifEncoder {
    /// Create an encoder with default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder with explicit options
    #[must_use]
    pub fn with_options(options: OptimizedGifOptions) -> Self {
        Self { options }
    }

    /// Encode captured frames into GIF89a bytes
    ///
    /// Zero frames and frame dimension mismatches are hard errors, matching
    /// the fixed-palette writer's contract.
    pub fn encode(&self, frames: &[CapturedFrame], delay_ms: u64) -> GrabarResult<Vec<u8>> {
        let Some(first) = frames.first() else {
            return Err(GrabarError::EncodeFailed {
                message: "cannot encode a GIF from zero frames".to_string(),
            });
        };
        let width = first.width as u16;
        let height = first.height as u16;
        let delay_cs = ((delay_ms / 10).max(1)).min(u64::from(u16::MAX)) as u16;

        let mut output = Vec::new();
        {
            let mut encoder = Encoder::new(&mut output, width, height, &[]).map_err(|e| {
                GrabarError::EncodeFailed {
                    message: format!("failed to create GIF encoder: {e}"),
                }
            })?;

            let repeat = if self.options.loop_count == 0 {
                Repeat::Infinite
            } else {
                Repeat::Finite(self.options.loop_count)
            };
            encoder
                .set_repeat(repeat)
                .map_err(|e| GrabarError::EncodeFailed {
                    message: format!("failed to set GIF repeat: {e}"),
                })?;

            for (index, captured) in frames.iter().enumerate() {
                if captured.width != first.width || captured.height != first.height {
                    return Err(GrabarError::EncodeFailed {
                        message: format!(
                            "frame {index} is {}x{} but frame 0 is {}x{}",
                            captured.width, captured.height, first.width, first.height
                        ),
                    });
                }
                let mut rgba = captured.rgba.clone();
                let mut frame = Frame::from_rgba_speed(
                    width,
                    height,
                    &mut rgba,
                    self.options.quantizer_speed(),
                );
                frame.delay = delay_cs;
                encoder
                    .write_frame(&frame)
                    .map_err(|e| GrabarError::EncodeFailed {
                        message: format!("failed to write GIF frame {index}: {e}"),
                    })?;
            }
        }

        Ok(output)
    }
}
