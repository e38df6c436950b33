//! Export orchestration.
//!
//! [`ExportManager`] is the composition root: it resolves a surface
//! reference, validates the concrete surface, asks the selector for an
//! ordered strategy list, and walks that list until one strategy produces
//! an artifact. When every strategy for an animated format fails and the
//! error is recoverable, it degrades to a single still-frame PNG rather
//! than returning nothing.
//!
//! Security violations are terminal at every level. A tainted surface
//! never reaches a fallback path.

use crate::capture::{CaptureConfig, CaptureSession, SurfaceFrameSource};
use crate::media::{
    CompressionLevel, FixedPaletteGifEncoder, OptimizedGifEncoder, OptimizedGifOptions,
    StillExporter, VideoConfig, VideoEncoder,
};
use crate::pool::ResourceManager;
use crate::resolver::SurfaceResolver;
use crate::result::{GrabarError, GrabarResult};
use crate::strategy::{ExportFormat, Strategy, StrategySelector};
use crate::surface::{PixelSurface, SurfaceKind, SurfaceRef};
use crate::validator::SurfaceValidator;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Share of overall progress attributed to the capture phase of an
/// animated export; encoding owns the remainder
const CAPTURE_PROGRESS_WEIGHT: f32 = 0.7;

/// Most-recent-first job history cap
const JOB_HISTORY_LIMIT: usize = 32;

/// Options for a single export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Target artifact format
    pub format: ExportFormat,
    /// Encoder quality (1-100)
    pub quality: u8,
    /// Capture frames per second (1-60)
    pub fps: u8,
    /// Capture duration in milliseconds
    pub duration_ms: u64,
    /// Hard cap on captured frames
    pub max_frames: u32,
    /// Degrade to a still PNG when every animated strategy fails
    pub fallback_to_still: bool,
}

impl ExportOptions {
    /// Create options for the given format with default tuning
    #[must_use]
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            quality: 80,
            fps: 30,
            duration_ms: 4000,
            max_frames: 120,
            fallback_to_still: true,
        }
    }

    /// Set encoder quality (clamped to 1-100)
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    /// Set capture frames per second (clamped to 1-60)
    #[must_use]
    pub fn with_fps(mut self, fps: u8) -> Self {
        self.fps = fps.clamp(1, 60);
        self
    }

    /// Set capture duration in milliseconds
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Set the captured-frame cap (minimum 1)
    #[must_use]
    pub fn with_max_frames(mut self, max_frames: u32) -> Self {
        self.max_frames = max_frames.max(1);
        self
    }

    /// Enable or disable the still-frame fallback
    #[must_use]
    pub fn with_fallback_to_still(mut self, enabled: bool) -> Self {
        self.fallback_to_still = enabled;
        self
    }

    fn capture_config(&self) -> CaptureConfig {
        CaptureConfig::default()
            .with_fps(self.fps)
            .with_duration_ms(self.duration_ms)
            .with_max_frames(self.max_frames)
    }

    fn frame_delay_ms(&self) -> u64 {
        1000 / u64::from(self.fps.max(1))
    }
}

/// Lifecycle state of one strategy attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Attempt registered, no work done yet
    Started,
    /// Capturing or encoding
    InProgress,
    /// Artifact produced
    Completed,
    /// Attempt failed; a later strategy or fallback may still succeed
    Failed,
}

/// Record of one strategy attempt within an export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingJob {
    /// Unique job id
    pub id: Uuid,
    /// Id of the export this attempt belongs to
    pub export_id: Uuid,
    /// Target format
    pub format: ExportFormat,
    /// The strategy this attempt ran
    pub strategy: Strategy,
    /// Last reported progress in `0.0..=1.0`
    pub progress: f32,
    /// Current lifecycle state
    pub status: JobStatus,
    /// Failure detail, when failed
    pub error: Option<String>,
}

/// A finished export
#[derive(Debug)]
pub struct ExportOutcome {
    /// Encoded artifact bytes
    pub artifact: Vec<u8>,
    /// Format actually produced; differs from the requested format when
    /// the still fallback engaged
    pub final_format: ExportFormat,
    /// Export id shared by all attempt records
    pub export_id: Uuid,
    /// Wall-clock time spent
    pub duration_ms: u64,
    /// Artifact size in bytes
    pub size_bytes: usize,
    /// Whether the still fallback produced this artifact
    pub used_fallback: bool,
    /// The animated-path error that triggered the fallback
    pub error: Option<String>,
}

/// Clamps progress reports to a monotone non-decreasing sequence
struct ProgressTracker<'a> {
    last: f32,
    callback: Option<&'a mut dyn FnMut(f32)>,
}

impl<'a> ProgressTracker<'a> {
    fn new(callback: Option<&'a mut dyn FnMut(f32)>) -> Self {
        Self {
            last: 0.0,
            callback,
        }
    }

    fn emit(&mut self, value: f32) {
        let clamped = value.clamp(0.0, 1.0);
        if clamped <= self.last {
            return;
        }
        self.last = clamped;
        if let Some(callback) = self.callback.as_deref_mut() {
            callback(clamped);
        }
    }
}

/// Orchestrates the full export pipeline
#[derive(Debug, Default)]
pub struct ExportManager {
    resolver: SurfaceResolver,
    validator: SurfaceValidator,
    resources: ResourceManager,
    active: HashMap<Uuid, EncodingJob>,
    history: Vec<EncodingJob>,
}

impl ExportManager {
    /// Create a manager with a fresh resource pool
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager around an existing resource pool
    #[must_use]
    pub fn with_resources(resources: ResourceManager) -> Self {
        Self {
            resources,
            ..Self::default()
        }
    }

    /// Job records of finished attempts, most recent first
    #[must_use]
    pub fn history(&self) -> &[EncodingJob] {
        &self.history
    }

    /// Attempts currently in flight, keyed by job id
    #[must_use]
    pub fn active_jobs(&self) -> &HashMap<Uuid, EncodingJob> {
        &self.active
    }

    /// The surface pool backing this manager
    pub fn resources_mut(&mut self) -> &mut ResourceManager {
        &mut self.resources
    }

    /// Release pooled resources; subsequent exports still run but stage
    /// nothing through the pool
    pub fn shutdown(&mut self) {
        self.resources.shutdown();
    }

    /// Export the referenced surface as the requested format
    ///
    /// Strategies are attempted best-first. A recoverable failure moves on
    /// to the next strategy; when all fail and `fallback_to_still` is set,
    /// a single still PNG is produced instead, with the triggering error
    /// preserved in the outcome.
    ///
    /// # Errors
    ///
    /// Returns an error when resolution or validation fails, on any
    /// security violation, or when every strategy and the fallback failed
    pub fn export_as(
        &mut self,
        surface_ref: SurfaceRef,
        options: &ExportOptions,
        on_progress: Option<&mut dyn FnMut(f32)>,
    ) -> GrabarResult<ExportOutcome> {
        let export_id = Uuid::new_v4();
        let started = Instant::now();
        let mut progress = ProgressTracker::new(on_progress);

        let resolution = self.resolver.resolve(surface_ref);
        let Some(surface) = resolution.surface else {
            return Err(resolution
                .error
                .unwrap_or_else(|| GrabarError::ResolutionFailed {
                    message: "surface reference did not resolve".to_string(),
                }));
        };
        debug!(
            hops = resolution.resolution_path.len(),
            "surface reference resolved"
        );

        // Validation failures are terminal: no strategy and no fallback can
        // extract from a surface that failed here.
        let validation = self.validator.validate(Some(&surface));
        if !validation.is_valid {
            return Err(validation
                .error
                .unwrap_or_else(|| GrabarError::ValidationFailed {
                    message: "surface failed validation".to_string(),
                }));
        }

        let strategies = StrategySelector::select(options.format, &validation.capabilities);
        let mut last_error: Option<GrabarError> = None;

        // The observed maximum stays the floor across attempts: a retried
        // strategy stalls at the previous high-water mark rather than
        // reporting backwards.
        for strategy in strategies {
            let job_id = self.record_attempt(export_id, options.format, strategy);
            match self.run_strategy(strategy, &surface, options, &mut progress) {
                Ok(artifact) => {
                    progress.emit(1.0);
                    self.finish_attempt(job_id, JobStatus::Completed, None);
                    info!(
                        strategy = strategy.name(),
                        size = artifact.len(),
                        "export completed"
                    );
                    return Ok(ExportOutcome {
                        size_bytes: artifact.len(),
                        artifact,
                        final_format: options.format,
                        export_id,
                        duration_ms: started.elapsed().as_millis() as u64,
                        used_fallback: false,
                        error: None,
                    });
                }
                Err(error) => {
                    self.finish_attempt(job_id, JobStatus::Failed, Some(error.to_string()));
                    if error.is_security() {
                        // Taint discovered mid-pipeline: stop immediately,
                        // no lower tier and no fallback.
                        return Err(error);
                    }
                    warn!(
                        strategy = strategy.name(),
                        %error,
                        "strategy failed, trying next"
                    );
                    last_error = Some(error);
                }
            }
        }

        let animated_error = last_error.unwrap_or_else(|| GrabarError::EncodeFailed {
            message: format!("no strategy available for {}", options.format),
        });

        if !options.fallback_to_still || !animated_error.is_recoverable() {
            return Err(animated_error);
        }

        warn!(%animated_error, "all strategies failed, degrading to a still frame");
        let job_id = self.record_attempt(export_id, ExportFormat::Png, Strategy::PngStill);
        match self.encode_still(&surface, options) {
            Ok(artifact) => {
                progress.emit(1.0);
                self.finish_attempt(job_id, JobStatus::Completed, None);
                Ok(ExportOutcome {
                    size_bytes: artifact.len(),
                    artifact,
                    final_format: ExportFormat::Png,
                    export_id,
                    duration_ms: started.elapsed().as_millis() as u64,
                    used_fallback: true,
                    error: Some(animated_error.to_string()),
                })
            }
            Err(fallback_error) => {
                self.finish_attempt(job_id, JobStatus::Failed, Some(fallback_error.to_string()));
                // The animated error is the more useful diagnosis.
                Err(animated_error)
            }
        }
    }

    fn run_strategy(
        &mut self,
        strategy: Strategy,
        surface: &PixelSurface,
        options: &ExportOptions,
        progress: &mut ProgressTracker<'_>,
    ) -> GrabarResult<Vec<u8>> {
        match strategy {
            Strategy::PngStill => self.encode_still(surface, options),
            Strategy::GifOptimized => {
                let frames = Self::capture_frames(surface, options, progress)?;
                let encoder = OptimizedGifEncoder::with_options(
                    OptimizedGifOptions::default().with_quality(options.quality),
                );
                encoder.encode(&frames, options.frame_delay_ms())
            }
            Strategy::GifFixedPalette => {
                let frames = Self::capture_frames(surface, options, progress)?;
                FixedPaletteGifEncoder::new().encode(&frames, options.frame_delay_ms())
            }
            Strategy::MediaRecorder => {
                let encoder = Self::video_encoder(options);
                let mut source = SurfaceFrameSource::new(surface.clone());
                encoder.record_stream(&mut source, options.duration_ms)
            }
            Strategy::WebCodecs | Strategy::FrameCapture => {
                let frames = Self::capture_frames(surface, options, progress)?;
                Self::video_encoder(options).encode_frames(&frames)
            }
        }
    }

    fn capture_frames(
        surface: &PixelSurface,
        options: &ExportOptions,
        progress: &mut ProgressTracker<'_>,
    ) -> GrabarResult<Vec<crate::capture::CapturedFrame>> {
        let mut session = CaptureSession::new(options.capture_config());
        let mut source = SurfaceFrameSource::new(surface.clone());
        let mut scaled = |fraction: f32| progress.emit(fraction * CAPTURE_PROGRESS_WEIGHT);
        session.run(&mut source, Some(&mut scaled))
    }

    fn video_encoder(options: &ExportOptions) -> VideoEncoder {
        VideoEncoder::with_config(
            VideoConfig::default()
                .with_fps(options.fps)
                .with_jpeg_quality(options.quality),
        )
    }

    /// Encode a single still frame, staging through the pool when the
    /// surface supports direct pixel reads
    fn encode_still(
        &mut self,
        surface: &PixelSurface,
        options: &ExportOptions,
    ) -> GrabarResult<Vec<u8>> {
        let compression = match options.quality {
            90..=100 => CompressionLevel::Best,
            1..=39 => CompressionLevel::Fast,
            _ => CompressionLevel::Default,
        };
        let exporter = StillExporter::new().with_compression(compression);

        if surface.supports_pixel_read && !surface.tainted {
            if let Ok(mut staged) =
                self.resources
                    .acquire(surface.width(), surface.height(), SurfaceKind::Rgba)
            {
                let pixels = surface.read_pixels()?;
                staged.surface.raw_rgba_mut().copy_from_slice(&pixels);
                let result = exporter.encode(&staged.surface);
                self.resources.release(staged);
                return result;
            }
        }
        exporter.encode(surface)
    }

    fn record_attempt(
        &mut self,
        export_id: Uuid,
        format: ExportFormat,
        strategy: Strategy,
    ) -> Uuid {
        let job = EncodingJob {
            id: Uuid::new_v4(),
            export_id,
            format,
            strategy,
            progress: 0.0,
            status: JobStatus::Started,
            error: None,
        };
        let id = job.id;
        self.active.insert(id, job);
        id
    }

    fn finish_attempt(&mut self, job_id: Uuid, status: JobStatus, error: Option<String>) {
        let Some(mut job) = self.active.remove(&job_id) else {
            return;
        };
        job.status = status;
        if status == JobStatus::Completed {
            job.progress = 1.0;
        }
        job.error = error;
        self.history.insert(0, job);
        self.history.truncate(JOB_HISTORY_LIMIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn quick_options(format: ExportFormat) -> ExportOptions {
        ExportOptions::new(format)
            .with_fps(10)
            .with_duration_ms(100)
    }

    #[test]
    fn test_png_export() {
        let mut manager = ExportManager::new();
        let surface = PixelSurface::solid(16, 16, [0, 128, 255, 255]);
        let outcome = manager
            .export_as(surface.into(), &ExportOptions::new(ExportFormat::Png), None)
            .unwrap();
        assert_eq!(&outcome.artifact[0..8], &PNG_MAGIC);
        assert_eq!(outcome.final_format, ExportFormat::Png);
        assert!(!outcome.used_fallback);
    }

    #[test]
    fn test_gif_export_end_to_end() {
        let mut manager = ExportManager::new();
        let surface = PixelSurface::solid(10, 10, [255, 0, 0, 255]);
        let options = ExportOptions::new(ExportFormat::Gif)
            .with_fps(10)
            .with_duration_ms(400);

        let outcome = manager.export_as(surface.into(), &options, None).unwrap();
        assert_eq!(&outcome.artifact[0..6], b"GIF89a");
        assert_eq!(*outcome.artifact.last().unwrap(), 0x3B);
        assert_eq!(outcome.final_format, ExportFormat::Gif);
        assert!(!outcome.used_fallback);
        assert_eq!(outcome.size_bytes, outcome.artifact.len());
    }

    #[test]
    fn test_video_export() {
        let mut manager = ExportManager::new();
        let surface = PixelSurface::solid(8, 8, [0, 255, 0, 255]);
        let options = ExportOptions::new(ExportFormat::Video)
            .with_fps(30)
            .with_duration_ms(60);

        let outcome = manager.export_as(surface.into(), &options, None).unwrap();
        assert_eq!(&outcome.artifact[4..8], b"ftyp");
    }

    #[test]
    fn test_video_falls_back_to_still() {
        init_tracing();
        let mut manager = ExportManager::new();
        // Serialize-only surface: every video strategy fails to extract.
        let surface =
            PixelSurface::solid(8, 8, [1, 2, 3, 255]).with_extraction_methods(false, true, false);

        let outcome = manager
            .export_as(surface.into(), &quick_options(ExportFormat::Video), None)
            .unwrap();
        assert!(outcome.used_fallback);
        assert_eq!(outcome.final_format, ExportFormat::Png);
        assert_eq!(&outcome.artifact[0..8], &PNG_MAGIC);
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_fallback_disabled_propagates_error() {
        let mut manager = ExportManager::new();
        let surface =
            PixelSurface::solid(8, 8, [1, 2, 3, 255]).with_extraction_methods(false, true, false);
        let options = quick_options(ExportFormat::Video).with_fallback_to_still(false);

        let result = manager.export_as(surface.into(), &options, None);
        assert!(matches!(result, Err(GrabarError::CaptureFailed { .. })));
    }

    #[test]
    fn test_tainted_surface_never_falls_back() {
        let mut manager = ExportManager::new();
        let surface = PixelSurface::solid(8, 8, [1, 2, 3, 255]).with_tainted(true);

        let result = manager.export_as(surface.into(), &quick_options(ExportFormat::Gif), None);
        assert!(matches!(result, Err(GrabarError::SecurityViolation { .. })));
    }

    #[test]
    fn test_resolution_failure_is_terminal() {
        let mut manager = ExportManager::new();
        let result = manager.export_as(
            SurfaceRef::Unsupported("text"),
            &quick_options(ExportFormat::Png),
            None,
        );
        assert!(matches!(result, Err(GrabarError::ResolutionFailed { .. })));
        assert!(manager.history().is_empty());
    }

    #[test]
    fn test_progress_is_monotone_and_reaches_one() {
        let mut manager = ExportManager::new();
        let surface = PixelSurface::solid(10, 10, [200, 100, 50, 255]);
        let options = ExportOptions::new(ExportFormat::Gif)
            .with_fps(10)
            .with_duration_ms(300);

        let mut reports = Vec::new();
        let mut callback = |p: f32| reports.push(p);
        manager
            .export_as(surface.into(), &options, Some(&mut callback))
            .unwrap();

        assert!(reports.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*reports.last().unwrap(), 1.0);
    }

    #[test]
    fn test_tracker_holds_high_water_mark() {
        let mut reports = Vec::new();
        let mut callback = |p: f32| reports.push(p);
        let mut tracker = ProgressTracker::new(Some(&mut callback));

        tracker.emit(0.7);
        tracker.emit(0.1);
        tracker.emit(0.7);
        tracker.emit(0.8);

        assert_eq!(reports, vec![0.7, 0.8]);
    }

    #[test]
    fn test_stream_only_surface_exports_video_without_fallback() {
        let mut manager = ExportManager::new();
        let surface =
            PixelSurface::solid(8, 8, [30, 40, 50, 255]).with_extraction_methods(false, false, true);

        let outcome = manager
            .export_as(surface.into(), &quick_options(ExportFormat::Video), None)
            .unwrap();

        assert!(!outcome.used_fallback);
        assert_eq!(outcome.final_format, ExportFormat::Video);
        assert_eq!(&outcome.artifact[4..8], b"ftyp");
    }

    #[test]
    fn test_fallback_never_reports_backwards() {
        let mut manager = ExportManager::new();
        let surface =
            PixelSurface::solid(8, 8, [1, 2, 3, 255]).with_extraction_methods(false, true, false);

        let mut reports = Vec::new();
        let mut callback = |p: f32| reports.push(p);
        let outcome = manager
            .export_as(
                surface.into(),
                &quick_options(ExportFormat::Video),
                Some(&mut callback),
            )
            .unwrap();

        assert!(outcome.used_fallback);
        assert!(reports.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*reports.last().unwrap(), 1.0);
    }

    #[test]
    fn test_history_records_attempts_most_recent_first() {
        let mut manager = ExportManager::new();
        let surface =
            PixelSurface::solid(8, 8, [1, 2, 3, 255]).with_extraction_methods(false, true, false);

        manager
            .export_as(surface.into(), &quick_options(ExportFormat::Video), None)
            .unwrap();

        // Fallback completes last, so it sits at the front.
        let history = manager.history();
        assert_eq!(history[0].strategy, Strategy::PngStill);
        assert_eq!(history[0].status, JobStatus::Completed);
        assert!(history[1..]
            .iter()
            .all(|job| job.status == JobStatus::Failed));
        assert!(manager.active_jobs().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut manager = ExportManager::new();
        for _ in 0..40 {
            let surface = PixelSurface::solid(4, 4, [9, 9, 9, 255]);
            manager
                .export_as(surface.into(), &ExportOptions::new(ExportFormat::Png), None)
                .unwrap();
        }
        assert_eq!(manager.history().len(), 32);
    }

    #[test]
    fn test_nested_reference_resolves_through_hops() {
        let mut manager = ExportManager::new();
        let surface = PixelSurface::solid(6, 6, [255, 255, 0, 255]);
        let nested = SurfaceRef::current(SurfaceRef::current(surface.into()));

        let outcome = manager
            .export_as(nested, &ExportOptions::new(ExportFormat::Png), None)
            .unwrap();
        assert_eq!(&outcome.artifact[0..8], &PNG_MAGIC);
    }

    #[test]
    fn test_options_clamping() {
        let options = ExportOptions::new(ExportFormat::Gif)
            .with_quality(0)
            .with_fps(200)
            .with_max_frames(0);
        assert_eq!(options.quality, 1);
        assert_eq!(options.fps, 60);
        assert_eq!(options.max_frames, 1);
    }
}
