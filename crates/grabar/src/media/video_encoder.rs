//! MP4 video encoding and container conversion.
//!
//! Two paths feed the same approximate MP4 writer: `encode_frames` takes an
//! already-captured frame sequence (frame-accurate), and `record_stream`
//! drives a wall-clock-bounded realtime session against a live source.
//! Hitting the wall-clock bound is a normal completion boundary, not a
//! failure. `remux` is deliberately a decode/re-encode cycle, not true
//! stream remuxing: lossy, CPU-bound, best-effort.
//!
//! The container is a minimal ftyp/mdat/moov structure, not a certified
//! MP4; substituting a standards-correct box writer behind this interface
//! touches no other component.

use crate::capture::{CapturedFrame, FrameSource};
use crate::media::gif_encoder::FixedPaletteGifEncoder;
use crate::result::{GrabarError, GrabarResult};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Video codec selection, static priority: MJPEG baseline unless the raw
/// tier is explicitly requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VideoCodec {
    /// Motion JPEG (widely compatible baseline)
    #[default]
    Mjpeg,
    /// Raw RGB (no compression, large files)
    Raw,
}

/// Target container for [`VideoEncoder::remux`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerFormat {
    /// MP4 (ftyp/mdat/moov)
    Mp4,
    /// Animated GIF
    Gif,
}

/// Configuration for video encoding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Frames per second (1-60)
    pub fps: u8,
    /// Target bitrate in kbps (advisory for the MJPEG tier)
    pub bitrate: u32,
    /// Codec tier
    pub codec: VideoCodec,
    /// JPEG quality for the MJPEG codec (1-100)
    pub jpeg_quality: u8,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            bitrate: 5000,
            codec: VideoCodec::Mjpeg,
            jpeg_quality: 85,
        }
    }
}

impl VideoConfig {
    /// Set frames per second (clamped to 1-60)
    #[must_use]
    pub fn with_fps(mut self, fps: u8) -> Self {
        self.fps = fps.clamp(1, 60);
        self
    }

    /// Set the target bitrate in kbps
    #[must_use]
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Set the codec tier
    #[must_use]
    pub fn with_codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Set JPEG quality (clamped to 1-100)
    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Ticks per second in the container timescale
    #[must_use]
    pub fn timescale(&self) -> u32 {
        u32::from(self.fps) * 100
    }

    /// Interval between frames
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

/// One encoded sample buffered during a session
#[derive(Debug, Clone)]
struct EncodedChunk {
    data: Vec<u8>,
}

/// MP4 encoder and container converter
#[derive(Debug, Default)]
pub struct VideoEncoder {
    config: VideoConfig,
}

impl VideoEncoder {
    /// Create an encoder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder with explicit configuration
    #[must_use]
    pub fn with_config(config: VideoConfig) -> Self {
        Self { config }
    }

    /// The active configuration
    #[must_use]
    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    /// Encode an already-captured frame sequence into an MP4 blob
    pub fn encode_frames(&self, frames: &[CapturedFrame]) -> GrabarResult<Vec<u8>> {
        let Some(first) = frames.first() else {
            return Err(GrabarError::EncodeFailed {
                message: "cannot encode a video from zero frames".to_string(),
            });
        };
        let mut chunks = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            if frame.width != first.width || frame.height != first.height {
                return Err(GrabarError::EncodeFailed {
                    message: format!(
                        "frame {index} is {}x{} but frame 0 is {}x{}",
                        frame.width, frame.height, first.width, first.height
                    ),
                });
            }
            chunks.push(EncodedChunk {
                data: self.encode_sample(&frame.rgba, frame.width, frame.height)?,
            });
        }
        Ok(self.write_container(first.width, first.height, &chunks))
    }

    /// Drive a realtime capture-and-encode session for `duration_ms`
    ///
    /// Encoded chunks are buffered and concatenated into a container blob
    /// on completion. The wall-clock timer bounds the session independent
    /// of frame arrival.
    pub fn record_stream(
        &self,
        source: &mut dyn FrameSource,
        duration_ms: u64,
    ) -> GrabarResult<Vec<u8>> {
        let (width, height) = source.dimensions();
        let bound = Duration::from_millis(duration_ms);
        let interval = self.config.frame_interval();
        let start = Instant::now();

        let mut chunks = Vec::new();
        let mut failures = 0u32;
        loop {
            if start.elapsed() >= bound {
                // Normal completion boundary: keep whatever was captured.
                debug!(
                    ms = duration_ms,
                    chunks = chunks.len(),
                    "recording reached its wall-clock bound"
                );
                break;
            }
            let tick_start = Instant::now();
            match source.grab_frame() {
                Ok(snapshot) => {
                    let data = self.encode_sample(
                        snapshot.raw_rgba(),
                        snapshot.width(),
                        snapshot.height(),
                    )?;
                    chunks.push(EncodedChunk { data });
                }
                Err(error) => {
                    failures += 1;
                    warn!(%error, "stream frame extraction failed, skipping");
                }
            }
            let overhead = tick_start.elapsed();
            if overhead < interval {
                let remaining = bound.saturating_sub(start.elapsed());
                std::thread::sleep((interval - overhead).min(remaining));
            }
        }

        if chunks.is_empty() {
            if failures > 0 {
                return Err(GrabarError::CaptureFailed {
                    message: format!("all {failures} stream extractions failed"),
                });
            }
            return Err(GrabarError::TimeoutExceeded { ms: duration_ms });
        }

        Ok(self.write_container(width, height, &chunks))
    }

    /// Repackage an MP4 blob into the target container
    ///
    /// No direct container-copy path exists here, so remuxing re-decodes
    /// every sample and re-encodes into a fresh session. Callers must treat
    /// it as best-effort and accept the original container on failure.
    pub fn remux(&self, source: &[u8], target: ContainerFormat) -> GrabarResult<Vec<u8>> {
        let frames = self.decode_samples(source)?;
        match target {
            ContainerFormat::Mp4 => self.encode_frames(&frames),
            ContainerFormat::Gif => {
                let delay_ms = self.config.frame_interval().as_millis() as u64;
                FixedPaletteGifEncoder::new().encode(&frames, delay_ms)
            }
        }
    }

    fn decode_samples(&self, source: &[u8]) -> GrabarResult<Vec<CapturedFrame>> {
        let interval_ms = self.config.frame_interval().as_millis() as u64;
        let mut frames = Vec::new();
        let mut offset = 0;
        while let Some(start) = find_jpeg_start(source, offset) {
            let Some(end) = find_jpeg_end(source, start) else {
                break;
            };
            match image::load_from_memory_with_format(
                &source[start..end],
                image::ImageFormat::Jpeg,
            ) {
                Ok(img) => {
                    let rgba = img.to_rgba8();
                    let (width, height) = rgba.dimensions();
                    frames.push(CapturedFrame {
                        rgba: rgba.into_raw(),
                        width,
                        height,
                        timestamp_ms: frames.len() as u64 * interval_ms,
                    });
                }
                Err(error) => {
                    warn!(%error, "skipping undecodable sample during remux");
                }
            }
            offset = end;
        }
        if frames.is_empty() {
            return Err(GrabarError::EncodeFailed {
                message: "source blob contains no decodable samples".to_string(),
            });
        }
        Ok(frames)
    }

    fn encode_sample(&self, rgba: &[u8], width: u32, height: u32) -> GrabarResult<Vec<u8>> {
        let img = image::RgbaImage::from_raw(width, height, rgba.to_vec()).ok_or_else(|| {
            GrabarError::ImageProcessing {
                message: "frame buffer does not match its dimensions".to_string(),
            }
        })?;
        let rgb = image::DynamicImage::ImageRgba8(img).to_rgb8();
        match self.config.codec {
            VideoCodec::Mjpeg => {
                let mut buffer = Cursor::new(Vec::new());
                image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut buffer,
                    self.config.jpeg_quality,
                )
                .encode(rgb.as_raw(), width, height, image::ExtendedColorType::Rgb8)
                .map_err(|e| GrabarError::EncodeFailed {
                    message: format!("JPEG encoding failed: {e}"),
                })?;
                Ok(buffer.into_inner())
            }
            VideoCodec::Raw => Ok(rgb.into_raw()),
        }
    }

    fn write_container(&self, width: u32, height: u32, chunks: &[EncodedChunk]) -> Vec<u8> {
        let ftyp = self.ftyp_content();
        let mdat: Vec<u8> = chunks.iter().flat_map(|c| c.data.iter().copied()).collect();
        // Chunk offsets in stco are absolute within the file.
        let mdat_offset = (ftyp.len() + 8 + 8) as u32;
        let moov = self.moov_content(width, height, chunks, mdat_offset);

        let mut out = Vec::new();
        push_box(&mut out, b"ftyp", &ftyp);
        push_box(&mut out, b"mdat", &mdat);
        push_box(&mut out, b"moov", &moov);
        out
    }

    fn ftyp_content(&self) -> Vec<u8> {
        let mut content = Vec::new();
        content.extend_from_slice(b"isom");
        content.extend_from_slice(&512u32.to_be_bytes());
        for brand in [b"isom", b"iso2", b"mp41"] {
            content.extend_from_slice(brand);
        }
        content
    }

    fn moov_content(
        &self,
        width: u32,
        height: u32,
        chunks: &[EncodedChunk],
        mdat_offset: u32,
    ) -> Vec<u8> {
        let mut moov = Vec::new();
        push_box(&mut moov, b"mvhd", &self.mvhd_content(chunks.len() as u32));
        let mut trak = Vec::new();
        push_box(&mut trak, b"tkhd", &self.tkhd_content(width, height, chunks.len() as u32));
        push_box(&mut trak, b"mdia", &self.mdia_content(width, height, chunks, mdat_offset));
        push_box(&mut moov, b"trak", &trak);
        moov
    }

    fn duration_ticks(&self, sample_count: u32) -> u32 {
        sample_count * (self.config.timescale() / u32::from(self.config.fps))
    }

    fn mvhd_content(&self, sample_count: u32) -> Vec<u8> {
        let mut content = vec![0, 0, 0, 0]; // version and flags
        content.extend_from_slice(&0u32.to_be_bytes()); // creation time
        content.extend_from_slice(&0u32.to_be_bytes()); // modification time
        content.extend_from_slice(&self.config.timescale().to_be_bytes());
        content.extend_from_slice(&self.duration_ticks(sample_count).to_be_bytes());
        content.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate 1.0
        content.extend_from_slice(&[0x01, 0x00]); // volume 1.0
        content.extend_from_slice(&[0u8; 10]); // reserved
        content.extend_from_slice(&identity_matrix());
        content.extend_from_slice(&[0u8; 24]); // pre-defined
        content.extend_from_slice(&2u32.to_be_bytes()); // next track id
        content
    }

    fn tkhd_content(&self, width: u32, height: u32, sample_count: u32) -> Vec<u8> {
        let mut content = vec![0, 0, 0, 3]; // version, flags: track enabled
        content.extend_from_slice(&0u32.to_be_bytes()); // creation time
        content.extend_from_slice(&0u32.to_be_bytes()); // modification time
        content.extend_from_slice(&1u32.to_be_bytes()); // track id
        content.extend_from_slice(&0u32.to_be_bytes()); // reserved
        content.extend_from_slice(&self.duration_ticks(sample_count).to_be_bytes());
        content.extend_from_slice(&[0u8; 8]); // reserved
        content.extend_from_slice(&0u16.to_be_bytes()); // layer
        content.extend_from_slice(&0u16.to_be_bytes()); // alternate group
        content.extend_from_slice(&0u16.to_be_bytes()); // volume
        content.extend_from_slice(&0u16.to_be_bytes()); // reserved
        content.extend_from_slice(&identity_matrix());
        content.extend_from_slice(&(width << 16).to_be_bytes()); // fixed point
        content.extend_from_slice(&(height << 16).to_be_bytes());
        content
    }

    fn mdia_content(
        &self,
        width: u32,
        height: u32,
        chunks: &[EncodedChunk],
        mdat_offset: u32,
    ) -> Vec<u8> {
        let mut mdia = Vec::new();
        push_box(&mut mdia, b"mdhd", &self.mdhd_content(chunks.len() as u32));
        push_box(&mut mdia, b"hdlr", &hdlr_content());
        push_box(&mut mdia, b"minf", &self.minf_content(width, height, chunks, mdat_offset));
        mdia
    }

    fn mdhd_content(&self, sample_count: u32) -> Vec<u8> {
        let mut content = vec![0, 0, 0, 0];
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&self.config.timescale().to_be_bytes());
        content.extend_from_slice(&self.duration_ticks(sample_count).to_be_bytes());
        content.extend_from_slice(&0x55C4u16.to_be_bytes()); // language: und
        content.extend_from_slice(&0u16.to_be_bytes()); // quality
        content
    }

    fn minf_content(
        &self,
        width: u32,
        height: u32,
        chunks: &[EncodedChunk],
        mdat_offset: u32,
    ) -> Vec<u8> {
        let mut minf = Vec::new();
        push_box(&mut minf, b"vmhd", &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
        let mut dinf = Vec::new();
        push_box(&mut dinf, b"dref", &dref_content());
        push_box(&mut minf, b"dinf", &dinf);
        push_box(&mut minf, b"stbl", &self.stbl_content(width, height, chunks, mdat_offset));
        minf
    }

    fn stbl_content(
        &self,
        width: u32,
        height: u32,
        chunks: &[EncodedChunk],
        mdat_offset: u32,
    ) -> Vec<u8> {
        let sample_count = chunks.len() as u32;
        let mut stbl = Vec::new();
        push_box(&mut stbl, b"stsd", &self.stsd_content(width, height));

        // Time-to-sample: one run at a fixed per-frame delta.
        let mut stts = vec![0, 0, 0, 0];
        stts.extend_from_slice(&1u32.to_be_bytes());
        stts.extend_from_slice(&sample_count.to_be_bytes());
        stts.extend_from_slice(
            &(self.config.timescale() / u32::from(self.config.fps)).to_be_bytes(),
        );
        push_box(&mut stbl, b"stts", &stts);

        // Sample-to-chunk: every sample in one chunk.
        let mut stsc = vec![0, 0, 0, 0];
        stsc.extend_from_slice(&1u32.to_be_bytes());
        stsc.extend_from_slice(&1u32.to_be_bytes());
        stsc.extend_from_slice(&sample_count.to_be_bytes());
        stsc.extend_from_slice(&1u32.to_be_bytes());
        push_box(&mut stbl, b"stsc", &stsc);

        let mut stsz = vec![0, 0, 0, 0];
        stsz.extend_from_slice(&0u32.to_be_bytes()); // variable sizes
        stsz.extend_from_slice(&sample_count.to_be_bytes());
        for chunk in chunks {
            stsz.extend_from_slice(&(chunk.data.len() as u32).to_be_bytes());
        }
        push_box(&mut stbl, b"stsz", &stsz);

        let mut stco = vec![0, 0, 0, 0];
        stco.extend_from_slice(&1u32.to_be_bytes());
        stco.extend_from_slice(&mdat_offset.to_be_bytes());
        push_box(&mut stbl, b"stco", &stco);
        stbl
    }

    fn stsd_content(&self, width: u32, height: u32) -> Vec<u8> {
        let codec_tag: &[u8; 4] = match self.config.codec {
            VideoCodec::Mjpeg => b"jpeg",
            VideoCodec::Raw => b"raw ",
        };

        let mut entry = Vec::new();
        entry.extend_from_slice(&[0u8; 6]); // reserved
        entry.extend_from_slice(&1u16.to_be_bytes()); // data reference index
        entry.extend_from_slice(&0u16.to_be_bytes()); // pre-defined
        entry.extend_from_slice(&0u16.to_be_bytes()); // reserved
        entry.extend_from_slice(&[0u8; 12]); // pre-defined
        entry.extend_from_slice(&(width as u16).to_be_bytes());
        entry.extend_from_slice(&(height as u16).to_be_bytes());
        entry.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // 72 dpi
        entry.extend_from_slice(&0x0048_0000u32.to_be_bytes());
        entry.extend_from_slice(&0u32.to_be_bytes()); // reserved
        entry.extend_from_slice(&1u16.to_be_bytes()); // frame count
        let mut compressor_name = [0u8; 32];
        let name = b"Grabar Video";
        compressor_name[0] = name.len() as u8;
        compressor_name[1..=name.len()].copy_from_slice(name);
        entry.extend_from_slice(&compressor_name);
        entry.extend_from_slice(&24u16.to_be_bytes()); // depth
        entry.extend_from_slice(&(-1i16).to_be_bytes()); // pre-defined

        let mut content = vec![0, 0, 0, 0];
        content.extend_from_slice(&1u32.to_be_bytes()); // entry count
        content.extend_from_slice(&((entry.len() + 8) as u32).to_be_bytes());
        content.extend_from_slice(codec_tag);
        content.extend_from_slice(&entry);
        content
    }
}

fn push_box(out: &mut Vec<u8>, tag: &[u8; 4], content: &[u8]) {
    out.extend_from_slice(&((content.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(tag);
    out.extend_from_slice(content);
}

fn identity_matrix() -> [u8; 36] {
    let mut bytes = [0u8; 36];
    let matrix: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];
    for (slot, value) in bytes.chunks_exact_mut(4).zip(matrix) {
        slot.copy_from_slice(&value.to_be_bytes());
    }
    bytes
}

fn hdlr_content() -> Vec<u8> {
    let mut content = vec![0, 0, 0, 0];
    content.extend_from_slice(&0u32.to_be_bytes()); // pre-defined
    content.extend_from_slice(b"vide");
    content.extend_from_slice(&[0u8; 12]); // reserved
    content.extend_from_slice(b"Grabar Video Handler\0");
    content
}

fn dref_content() -> Vec<u8> {
    let mut content = vec![0, 0, 0, 0];
    content.extend_from_slice(&1u32.to_be_bytes()); // entry count
    content.extend_from_slice(&12u32.to_be_bytes()); // url entry size
    content.extend_from_slice(b"url ");
    content.extend_from_slice(&[0, 0, 0, 1]); // self-contained
    content
}

fn find_jpeg_start(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(3)
        .position(|w| w == [0xFF, 0xD8, 0xFF])
        .map(|p| from + p)
}

fn find_jpeg_end(data: &[u8], start: usize) -> Option<usize> {
    data.get(start + 2..)?
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])
        .map(|p| start + 2 + p + 2)
}
