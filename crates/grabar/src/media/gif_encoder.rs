//! Fixed-palette GIF89a writer.
//!
//! This is the universal GIF fallback: a self-contained block-structured
//! binary writer over a fixed-density color cube (6 levels per channel,
//! 216 colors plus reserved transparent and background slots, padded to
//! 256). Compression emits literal 9-bit codes with periodic clear codes
//! instead of an adaptive dictionary, which keeps the writer tiny while
//! remaining decodable by standard GIF readers.
//!
//! The adaptive-palette path lives in [`super::gif_optimized`].

use crate::capture::CapturedFrame;
use crate::result::{GrabarError, GrabarResult};
use crate::surface::ALPHA_THRESHOLD;
use serde::{Deserialize, Serialize};

/// Levels per color channel in the fixed cube
pub const CUBE_LEVELS: u8 = 6;

/// Palette slot for fully transparent pixels
pub const TRANSPARENT_INDEX: u8 = 216;

/// Palette slot named as the logical screen background
pub const BACKGROUND_INDEX: u8 = 217;

/// Per-frame disposal instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisposalMethod {
    /// No disposal specified
    Unspecified,
    /// Leave the previous frame in place
    #[default]
    Keep,
    /// Restore the background color before the next frame
    RestoreBackground,
    /// Restore what was present before the previous frame
    RestorePrevious,
}

impl DisposalMethod {
    fn packed_bits(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::Keep => 1,
            Self::RestoreBackground => 2,
            Self::RestorePrevious => 3,
        }
    }
}

/// Options for the fixed-palette writer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GifEncodeOptions {
    /// Alpha below this maps to the transparent index
    pub alpha_threshold: u8,
    /// Loop count for the Netscape extension (0 = infinite)
    pub loop_count: u16,
    /// Disposal method applied to every frame
    pub disposal: DisposalMethod,
}

impl Default for GifEncodeOptions {
    fn default() -> Self {
        Self {
            alpha_threshold: ALPHA_THRESHOLD,
            loop_count: 0,
            disposal: DisposalMethod::Keep,
        }
    }
}

/// One quantized frame inside a [`GifDocument`]
#[derive(Debug, Clone)]
pub struct GifDocFrame {
    /// One palette index per pixel
    pub indices: Vec<u8>,
    /// Frame delay in hundredths of a second
    pub delay_cs: u16,
    /// Disposal instruction for this frame
    pub disposal: DisposalMethod,
}

/// Encoder-internal quantized document
///
/// Invariant: every index is a valid slot in the 256-entry palette.
#[derive(Debug, Clone)]
pub struct GifDocument {
    /// Logical screen width
    pub width: u16,
    /// Logical screen height
    pub height: u16,
    /// 256 RGB triples; cube colors, reserved slots, then black padding
    pub global_palette: Vec<[u8; 3]>,
    /// Quantized frames in presentation order
    pub frames: Vec<GifDocFrame>,
}

/// Map one color to its nearest fixed-cube palette index
#[must_use]
pub fn cube_index(r: u8, g: u8, b: u8) -> u8 {
    let level = |c: u8| ((u16::from(c) + 25) / 51).min(u16::from(CUBE_LEVELS - 1)) as u8;
    level(r) * CUBE_LEVELS * CUBE_LEVELS + level(g) * CUBE_LEVELS + level(b)
}

fn build_palette() -> Vec<[u8; 3]> {
    let mut palette = Vec::with_capacity(256);
    for r in 0..CUBE_LEVELS {
        for g in 0..CUBE_LEVELS {
            for b in 0..CUBE_LEVELS {
                palette.push([r * 51, g * 51, b * 51]);
            }
        }
    }
    // Reserved transparent and background slots, then black padding.
    palette.push([0, 0, 0]);
    palette.push([255, 255, 255]);
    while palette.len() < 256 {
        palette.push([0, 0, 0]);
    }
    palette
}

/// Fixed-palette GIF encoder
#[derive(Debug, Default)]
pub struct FixedPaletteGifEncoder {
    options: GifEncodeOptions,
}

impl FixedPaletteGifEncoder {
    /// Create an encoder with default options
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder with explicit options
    #[must_use]
    pub fn with_options(options: GifEncodeOptions) -> Self {
        Self { options }
    }

    /// Quantize captured frames into a [`GifDocument`]
    ///
    /// Zero frames and frame dimension mismatches are hard errors; nothing
    /// partial is produced.
    pub fn quantize(
        &self,
        frames: &[CapturedFrame],
        delay_ms: u64,
    ) -> GrabarResult<GifDocument> {
        let Some(first) = frames.first() else {
            return Err(GrabarError::EncodeFailed {
                message: "cannot encode a GIF from zero frames".to_string(),
            });
        };
        if first.width == 0 || first.height == 0 || first.width > 0xFFFF || first.height > 0xFFFF {
            return Err(GrabarError::EncodeFailed {
                message: format!(
                    "frame dimensions {}x{} are outside the GIF screen range",
                    first.width, first.height
                ),
            });
        }

        let delay_cs = ((delay_ms / 10).max(1)).min(u64::from(u16::MAX)) as u16;
        let mut doc_frames = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            if frame.width != first.width || frame.height != first.height {
                return Err(GrabarError::EncodeFailed {
                    message: format!(
                        "frame {index} is {}x{} but frame 0 is {}x{}",
                        frame.width, frame.height, first.width, first.height
                    ),
                });
            }
            let mut indices = Vec::with_capacity(frame.rgba.len() / 4);
            for pixel in frame.rgba.chunks_exact(4) {
                if pixel[3] < self.options.alpha_threshold {
                    indices.push(TRANSPARENT_INDEX);
                } else {
                    indices.push(cube_index(pixel[0], pixel[1], pixel[2]));
                }
            }
            doc_frames.push(GifDocFrame {
                indices,
                delay_cs,
                disposal: self.options.disposal,
            });
        }

        Ok(GifDocument {
            width: first.width as u16,
            height: first.height as u16,
            global_palette: build_palette(),
            frames: doc_frames,
        })
    }

    /// Encode captured frames into GIF89a bytes
    pub fn encode(&self, frames: &[CapturedFrame], delay_ms: u64) -> GrabarResult<Vec<u8>> {
        let document = self.quantize(frames, delay_ms)?;
        Ok(self.write(&document))
    }

    /// Serialize a quantized document to its binary form
    #[must_use]
    pub fn write(&self, document: &GifDocument) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(b"GIF89a");

        // Logical screen descriptor: global color table present, 8 bits of
        // color resolution, table size 2^(7+1) = 256.
        out.extend_from_slice(&document.width.to_le_bytes());
        out.extend_from_slice(&document.height.to_le_bytes());
        out.push(0xF7);
        out.push(BACKGROUND_INDEX);
        out.push(0); // pixel aspect ratio

        for rgb in &document.global_palette {
            out.extend_from_slice(rgb);
        }

        // Netscape application extension for looping.
        out.extend_from_slice(&[0x21, 0xFF, 0x0B]);
        out.extend_from_slice(b"NETSCAPE2.0");
        out.extend_from_slice(&[0x03, 0x01]);
        out.extend_from_slice(&self.options.loop_count.to_le_bytes());
        out.push(0);

        for frame in &document.frames {
            // Graphic control extension.
            out.extend_from_slice(&[0x21, 0xF9, 0x04]);
            out.push((frame.disposal.packed_bits() << 2) | 0x01);
            out.extend_from_slice(&frame.delay_cs.to_le_bytes());
            out.push(TRANSPARENT_INDEX);
            out.push(0);

            // Image descriptor: full-screen frame, no local color table.
            out.push(0x2C);
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&document.width.to_le_bytes());
            out.extend_from_slice(&document.height.to_le_bytes());
            out.push(0);

            write_image_data(&mut out, &frame.indices);
        }

        out.push(0x3B);
        out
    }
}

const LZW_MIN_CODE_SIZE: u8 = 8;
const CLEAR_CODE: u16 = 256;
const END_OF_INFORMATION: u16 = 257;
const CODE_WIDTH: u32 = 9;

// A decoder adds one dictionary entry per literal after the first one
// following a clear; its code width would grow past 9 bits once 254 entries
// are added, so a clear is re-emitted every 253 literals (252 entries),
// keeping even early-change decoders at 9 bits.
const LITERALS_PER_CLEAR: usize = 253;

struct BitPacker {
    bytes: Vec<u8>,
    acc: u32,
    bits: u32,
}

impl BitPacker {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            acc: 0,
            bits: 0,
        }
    }

    fn push(&mut self, code: u16) {
        self.acc |= u32::from(code) << self.bits;
        self.bits += CODE_WIDTH;
        while self.bits >= 8 {
            self.bytes.push((self.acc & 0xFF) as u8);
            self.acc >>= 8;
            self.bits -= 8;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.bits > 0 {
            self.bytes.push((self.acc & 0xFF) as u8);
        }
        self.bytes
    }
}

fn write_image_data(out: &mut Vec<u8>, indices: &[u8]) {
    out.push(LZW_MIN_CODE_SIZE);

    let mut packer = BitPacker::new();
    packer.push(CLEAR_CODE);
    for (i, &index) in indices.iter().enumerate() {
        if i > 0 && i % LITERALS_PER_CLEAR == 0 {
            packer.push(CLEAR_CODE);
        }
        packer.push(u16::from(index));
    }
    packer.push(END_OF_INFORMATION);

    // Data sub-blocks of at most 255 bytes, then the block terminator.
    for chunk in packer.finish().chunks(255) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
    out.push(0);
}
