//! Fixed-rate frame capture against a live surface.
//!
//! A [`CaptureSession`] drives the `Idle -> Capturing -> Stopped` state
//! machine: pull a frame from the [`FrameSource`], stamp it relative to the
//! session start, report progress, then sleep the remainder of the frame
//! interval so the effective rate tracks the target fps even though
//! extraction time is not exact. A single extraction failure is logged and
//! skipped; the session only fails when every attempt failed.

use crate::result::{GrabarError, GrabarResult};
use crate::surface::PixelSurface;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Something frames can be pulled from during capture
pub trait FrameSource {
    /// Extract the current pixel contents as a surface snapshot
    fn grab_frame(&mut self) -> GrabarResult<PixelSurface>;

    /// Dimensions of the frames this source produces
    fn dimensions(&self) -> (u32, u32);
}

/// A frame source that snapshots a single live surface on every grab
#[derive(Debug)]
pub struct SurfaceFrameSource {
    surface: PixelSurface,
}

impl SurfaceFrameSource {
    /// Wrap a surface as a frame source
    #[must_use]
    pub fn new(surface: PixelSurface) -> Self {
        Self { surface }
    }

    /// Mutable access to the live surface between grabs
    pub fn surface_mut(&mut self) -> &mut PixelSurface {
        &mut self.surface
    }
}

impl FrameSource for SurfaceFrameSource {
    fn grab_frame(&mut self) -> GrabarResult<PixelSurface> {
        // Prefer direct pixel read-back, then the stream-capture path, so a
        // surface is usable through whichever extraction method it exposes.
        let pixels = match self.surface.read_pixels() {
            Ok(pixels) => pixels,
            Err(error @ GrabarError::SecurityViolation { .. }) => return Err(error),
            Err(_) => self.surface.stream_frame()?,
        };
        PixelSurface::from_rgba(self.surface.width(), self.surface.height(), pixels)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.surface.width(), self.surface.height())
    }
}

/// Configuration for a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Frames per second (1-60)
    pub fps: u8,
    /// Capture duration in milliseconds
    pub duration_ms: u64,
    /// Hard cap on the number of frames
    pub max_frames: u32,
    /// Whether to sleep between ticks; disable for offline capture
    pub paced: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            duration_ms: 4000,
            max_frames: 120,
            paced: true,
        }
    }
}

impl CaptureConfig {
    /// Set frames per second (clamped to 1-60)
    #[must_use]
    pub fn with_fps(mut self, fps: u8) -> Self {
        self.fps = fps.clamp(1, 60);
        self
    }

    /// Set the capture duration in milliseconds
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Set the frame cap
    #[must_use]
    pub fn with_max_frames(mut self, max_frames: u32) -> Self {
        self.max_frames = max_frames.max(1);
        self
    }

    /// Disable or enable tick pacing
    #[must_use]
    pub fn with_pacing(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Interval between scheduled ticks
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }

    /// Total frames to capture: `min(duration_ms/1000 * fps, max_frames)`
    ///
    /// A duration shorter than one frame interval yields zero; the session
    /// then completes with an empty frame set and the encoder's zero-frame
    /// error surfaces downstream.
    #[must_use]
    pub fn total_frames(&self) -> u32 {
        let by_duration = (self.duration_ms * u64::from(self.fps)) / 1000;
        by_duration.min(u64::from(self.max_frames)) as u32
    }
}

/// Capture session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Session created, not yet running
    Idle,
    /// Capture loop in progress
    Capturing,
    /// Loop finished or aborted
    Stopped,
}

/// One captured frame with its timestamp relative to session start
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    /// RGBA pixel data
    pub rgba: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Milliseconds since the session started
    pub timestamp_ms: u64,
}

/// Shared cooperative-cancellation flag, polled at tick boundaries
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create an un-triggered abort handle
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the capture loop stop at the next tick boundary
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether an abort has been requested
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Drives the fixed-rate capture loop for one export
#[derive(Debug)]
pub struct CaptureSession {
    config: CaptureConfig,
    state: CaptureState,
    abort: AbortHandle,
    frames_failed: u32,
}

impl CaptureSession {
    /// Create a session; one session serves exactly one capture run
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: CaptureState::Idle,
            abort: AbortHandle::new(),
            frames_failed: 0,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Clone of the session's abort handle for the caller to keep
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Number of extraction attempts that failed and were skipped
    #[must_use]
    pub fn frames_failed(&self) -> u32 {
        self.frames_failed
    }

    /// Run the capture loop to completion, abort, or total failure
    ///
    /// Aborting does not discard frames already captured; partial results
    /// are still encodable. Fails only when every extraction attempt failed
    /// and zero frames were collected.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        mut on_progress: Option<&mut dyn FnMut(f32)>,
    ) -> GrabarResult<Vec<CapturedFrame>> {
        if self.state != CaptureState::Idle {
            return Err(GrabarError::InvalidState {
                message: "capture session already ran".to_string(),
            });
        }
        self.state = CaptureState::Capturing;

        let total = self.config.total_frames();
        let interval = self.config.frame_interval();
        let start = Instant::now();
        let mut frames = Vec::with_capacity(total as usize);

        for tick in 0..total {
            if self.abort.is_aborted() {
                debug!(captured = frames.len(), "capture aborted at tick boundary");
                break;
            }

            // Request paint, then delay the remainder: extraction stands in
            // for the paint opportunity, and the sleep below subtracts its
            // overhead from the interval.
            let tick_start = Instant::now();
            match source.grab_frame() {
                Ok(snapshot) => {
                    let timestamp_ms = start.elapsed().as_millis() as u64;
                    frames.push(CapturedFrame {
                        width: snapshot.width(),
                        height: snapshot.height(),
                        rgba: snapshot.raw_rgba().to_vec(),
                        timestamp_ms,
                    });
                }
                Err(error) => {
                    self.frames_failed += 1;
                    warn!(tick, %error, "frame extraction failed, skipping frame");
                }
            }

            if let Some(callback) = on_progress.as_deref_mut() {
                callback(frames.len() as f32 / total as f32);
            }

            let is_last = tick + 1 == total;
            if self.config.paced && !is_last {
                let overhead = tick_start.elapsed();
                if overhead < interval {
                    std::thread::sleep(interval - overhead);
                }
            }
        }

        self.state = CaptureState::Stopped;

        if frames.is_empty() && self.frames_failed > 0 {
            return Err(GrabarError::CaptureFailed {
                message: format!(
                    "all {} extraction attempts failed, zero frames collected",
                    self.frames_failed
                ),
            });
        }

        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailEveryOther {
        calls: u32,
    }

    impl FrameSource for FailEveryOther {
        fn grab_frame(&mut self) -> GrabarResult<PixelSurface> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                Err(GrabarError::CaptureFailed {
                    message: "transient".to_string(),
                })
            } else {
                Ok(PixelSurface::new(4, 4))
            }
        }

        fn dimensions(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    struct AlwaysFails;

    impl FrameSource for AlwaysFails {
        fn grab_frame(&mut self) -> GrabarResult<PixelSurface> {
            Err(GrabarError::CaptureFailed {
                message: "broken".to_string(),
            })
        }

        fn dimensions(&self) -> (u32, u32) {
            (4, 4)
        }
    }

    mod capture_config_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = CaptureConfig::default();
            assert_eq!(config.fps, 30);
            assert_eq!(config.duration_ms, 4000);
            assert_eq!(config.max_frames, 120);
            assert!(config.paced);
        }

        #[test]
        fn test_total_frames_bounded_by_duration() {
            let config = CaptureConfig::default()
                .with_fps(30)
                .with_duration_ms(2000)
                .with_max_frames(120);
            assert_eq!(config.total_frames(), 60);
        }

        #[test]
        fn test_total_frames_bounded_by_cap() {
            let config = CaptureConfig::default()
                .with_fps(30)
                .with_duration_ms(10_000)
                .with_max_frames(50);
            assert_eq!(config.total_frames(), 50);
        }

        #[test]
        fn test_total_frames_zero_for_subinterval_duration() {
            let config = CaptureConfig::default()
                .with_fps(10)
                .with_duration_ms(50)
                .with_max_frames(120);
            assert_eq!(config.total_frames(), 0);
        }

        #[test]
        fn test_fps_clamping() {
            assert_eq!(CaptureConfig::default().with_fps(0).fps, 1);
            assert_eq!(CaptureConfig::default().with_fps(200).fps, 60);
        }

        #[test]
        fn test_frame_interval() {
            let config = CaptureConfig::default().with_fps(10);
            assert_eq!(config.frame_interval().as_millis(), 100);
        }
    }

    mod session_tests {
        use super::*;

        fn offline(fps: u8, duration_ms: u64, max_frames: u32) -> CaptureConfig {
            CaptureConfig::default()
                .with_fps(fps)
                .with_duration_ms(duration_ms)
                .with_max_frames(max_frames)
                .with_pacing(false)
        }

        #[test]
        fn test_captures_expected_frame_count() {
            let mut session = CaptureSession::new(offline(30, 2000, 120));
            let mut source = SurfaceFrameSource::new(PixelSurface::new(4, 4));
            let frames = session.run(&mut source, None).unwrap();
            assert_eq!(frames.len(), 60);
            assert_eq!(session.state(), CaptureState::Stopped);
        }

        #[test]
        fn test_timestamps_monotone_non_decreasing() {
            let mut session = CaptureSession::new(offline(30, 1000, 120));
            let mut source = SurfaceFrameSource::new(PixelSurface::new(4, 4));
            let frames = session.run(&mut source, None).unwrap();
            for pair in frames.windows(2) {
                assert!(pair[1].timestamp_ms >= pair[0].timestamp_ms);
            }
        }

        #[test]
        fn test_progress_reaches_one() {
            let mut session = CaptureSession::new(offline(10, 1000, 120));
            let mut source = SurfaceFrameSource::new(PixelSurface::new(4, 4));
            let mut reports = Vec::new();
            let mut callback = |p: f32| reports.push(p);
            session.run(&mut source, Some(&mut callback)).unwrap();
            assert_eq!(reports.len(), 10);
            assert!((reports.last().unwrap() - 1.0).abs() < f32::EPSILON);
            for pair in reports.windows(2) {
                assert!(pair[1] >= pair[0]);
            }
        }

        #[test]
        fn test_stream_only_surface_is_capturable() {
            let surface = PixelSurface::solid(4, 4, [5, 6, 7, 255])
                .with_extraction_methods(false, false, true);
            let mut session = CaptureSession::new(offline(10, 500, 120));
            let frames = session.run(&mut SurfaceFrameSource::new(surface), None).unwrap();
            assert_eq!(frames.len(), 5);
            assert_eq!(session.frames_failed(), 0);
            assert_eq!(&frames[0].rgba[0..4], &[5, 6, 7, 255]);
        }

        #[test]
        fn test_subinterval_duration_captures_nothing() {
            let mut session = CaptureSession::new(offline(10, 50, 120));
            let mut source = SurfaceFrameSource::new(PixelSurface::new(4, 4));
            let frames = session.run(&mut source, None).unwrap();
            assert!(frames.is_empty());
            assert_eq!(session.state(), CaptureState::Stopped);
        }

        #[test]
        fn test_transient_failures_are_skipped() {
            let mut session = CaptureSession::new(offline(10, 1000, 120));
            let mut source = FailEveryOther { calls: 0 };
            let frames = session.run(&mut source, None).unwrap();
            assert_eq!(frames.len(), 5);
            assert_eq!(session.frames_failed(), 5);
        }

        #[test]
        fn test_total_failure_errors() {
            let mut session = CaptureSession::new(offline(10, 500, 120));
            let result = session.run(&mut AlwaysFails, None);
            assert!(matches!(result, Err(GrabarError::CaptureFailed { .. })));
        }

        #[test]
        fn test_session_runs_only_once() {
            let mut session = CaptureSession::new(offline(10, 100, 4));
            let mut source = SurfaceFrameSource::new(PixelSurface::new(2, 2));
            session.run(&mut source, None).unwrap();
            let again = session.run(&mut source, None);
            assert!(matches!(again, Err(GrabarError::InvalidState { .. })));
        }

        #[test]
        fn test_abort_keeps_partial_frames() {
            let mut session = CaptureSession::new(offline(10, 2000, 120));
            let handle = session.abort_handle();
            let mut grabbed = 0u32;
            struct AbortAfter<'a> {
                handle: &'a AbortHandle,
                grabbed: &'a mut u32,
            }
            impl FrameSource for AbortAfter<'_> {
                fn grab_frame(&mut self) -> GrabarResult<PixelSurface> {
                    *self.grabbed += 1;
                    if *self.grabbed == 3 {
                        self.handle.abort();
                    }
                    Ok(PixelSurface::new(2, 2))
                }
                fn dimensions(&self) -> (u32, u32) {
                    (2, 2)
                }
            }
            let mut source = AbortAfter {
                handle: &handle,
                grabbed: &mut grabbed,
            };
            let frames = session.run(&mut source, None).unwrap();
            assert_eq!(frames.len(), 3);
            assert_eq!(session.state(), CaptureState::Stopped);
        }

        #[test]
        fn test_paced_session_tracks_wall_clock() {
            let config = CaptureConfig::default()
                .with_fps(50)
                .with_duration_ms(100)
                .with_max_frames(5);
            let mut session = CaptureSession::new(config);
            let mut source = SurfaceFrameSource::new(PixelSurface::new(2, 2));
            let start = Instant::now();
            let frames = session.run(&mut source, None).unwrap();
            assert_eq!(frames.len(), 5);
            // 5 frames at 20ms intervals sleeps between the first 4 ticks.
            assert!(start.elapsed() >= Duration::from_millis(60));
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_total_frames_never_exceeds_cap(
                fps in 1u8..=60,
                duration_ms in 0u64..60_000,
                max_frames in 1u32..500,
            ) {
                let config = CaptureConfig::default()
                    .with_fps(fps)
                    .with_duration_ms(duration_ms)
                    .with_max_frames(max_frames);
                prop_assert!(config.total_frames() <= max_frames);
                let expected = ((duration_ms * u64::from(fps)) / 1000)
                    .min(u64::from(max_frames)) as u32;
                prop_assert_eq!(config.total_frames(), expected);
            }
        }
    }
}
