//! The capture loop: acquire a bundle, fuse it for the active mode, publish.

use crate::compositor::{Composite, Compositor};
use crate::config::{RetryPolicy, SessionConfig};
use crate::detector::AnalyticsTrigger;
use crate::presentation::PresentationHandle;
use crate::provider::{BodyTracker, DeviceProvider};
use crate::reproject;
use crate::session::{self, ModeCell};
use crate::telemetry::TelemetryUpdate;
use crate::types::{BodyFrame, FrameBundle, Image, OutputFrame, VisualizationMode, BODY_INDEX_BACKGROUND};
use crate::{FuseError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Producer side of the pipeline. Owns everything one iteration touches.
pub struct CaptureLoop {
    device: Arc<dyn DeviceProvider>,
    tracker: Arc<dyn BodyTracker>,
    compositor: Compositor,
    trigger: AnalyticsTrigger,
    mode: Arc<ModeCell>,
    presentation: PresentationHandle,
    stop: Arc<AtomicBool>,
    acquire_timeout: Duration,
    tracker_timeout: Duration,
    retry: RetryPolicy,
    frame_count: u64,
    last_mode: VisualizationMode,
}

impl CaptureLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        device: Arc<dyn DeviceProvider>,
        tracker: Arc<dyn BodyTracker>,
        compositor: Compositor,
        trigger: AnalyticsTrigger,
        mode: Arc<ModeCell>,
        presentation: PresentationHandle,
        stop: Arc<AtomicBool>,
        config: &SessionConfig,
    ) -> CaptureLoop {
        let last_mode = mode.get();
        CaptureLoop {
            device,
            tracker,
            compositor,
            trigger,
            mode,
            presentation,
            stop,
            acquire_timeout: config.acquire_timeout,
            tracker_timeout: config.tracker_timeout,
            retry: config.retry,
            frame_count: 0,
            last_mode,
        }
    }

    /// Bundles processed so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Run until the stop flag is seen or an iteration fails.
    pub(crate) fn run(mut self) {
        log::info!("Capture loop started in {} mode", self.last_mode.name());

        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            match self.step() {
                Ok(()) => {}
                // Acquire and tracking failures arrive here already fatal
                Err(e) if !e.is_fatal() => log::warn!("Frame skipped: {}", e),
                Err(e) => {
                    session::worker_failed("Capture loop", &e, &self.stop, &self.presentation);
                    break;
                }
            }
        }

        log::info!("Capture loop stopped after {} frames", self.frame_count);
    }

    /// One full iteration. The bundle is released when this returns.
    pub fn step(&mut self) -> Result<()> {
        let bundle = self.retry.run("Acquire bundle", &self.stop, || {
            self.device.acquire_bundle(self.acquire_timeout)
        })
        .map_err(FuseError::into_device_failure)?;
        self.frame_count += 1;

        let mode = self.mode.get();
        if mode != self.last_mode {
            log::info!("Visualization mode {} -> {}", self.last_mode.name(), mode.name());
            self.last_mode = mode;
            self.presentation.update_telemetry(vec![TelemetryUpdate::Clear])?;
        }

        log::trace!("Frame {} ({:?}) in {} mode", self.frame_count, bundle.timestamp, mode.name());

        let composite = self.compose(mode, bundle)?;
        self.presentation.update_telemetry(composite.telemetry)?;
        self.presentation.publish_frame(composite.frame)
    }

    fn compose(&mut self, mode: VisualizationMode, bundle: FrameBundle) -> Result<Composite> {
        let calibration = self.compositor.calibration().clone();

        let composite = match mode {
            VisualizationMode::Color => Composite::image(OutputFrame::Bgra32(bundle.color)),
            VisualizationMode::Depth => {
                let aligned = reproject::depth_to_color(&calibration, &bundle.depth, None);
                self.compositor.depth(&bundle.color, &aligned.depth)
            }
            VisualizationMode::Infrared => match bundle.infrared {
                Some(ir) => Composite::image(OutputFrame::Gray16(ir)),
                None => {
                    log::trace!("No infrared image in bundle, showing colour");
                    Composite::image(OutputFrame::Bgra32(bundle.color))
                }
            },
            VisualizationMode::BodyMask => {
                let bodies = self.track(&bundle)?;
                let aligned =
                    reproject::depth_to_color(&calibration, &bundle.depth, Some(&bodies.body_index));
                let body_index = aligned.body_index.unwrap_or_else(|| {
                    let color = calibration.color();
                    Image::filled(color.width, color.height, BODY_INDEX_BACKGROUND)
                });
                self.compositor
                    .body_mask(&bundle.color, &body_index, bodies.number_of_bodies())
            }
            VisualizationMode::Skeleton => {
                let bodies = self.track(&bundle)?;
                self.compositor.skeleton(&bundle.color, &bodies.bodies)
            }
            VisualizationMode::BrandOverlay => {
                self.trigger.on_frame(self.frame_count, &bundle.color)?;
                let predictions = self.trigger.cache().snapshot();
                self.compositor.brand_overlay(&bundle.color, &predictions)
            }
        };

        Ok(composite)
    }

    fn track(&self, bundle: &FrameBundle) -> Result<BodyFrame> {
        self.retry
            .run("Body tracking", &self.stop, || {
                self.tracker.enqueue(bundle)?;
                self.tracker.pop_result(self.tracker_timeout)
            })
            .map_err(|e| match e {
                e if e.is_fatal() => e,
                e => FuseError::Tracker(e.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::BODY_PALETTE;
    use crate::dummy::{DummyDevice, DummyTracker};
    use crate::presentation::{PresentationExecutor, PresentationSink};
    use crate::telemetry::{self, TelemetryBoard};
    use crate::types::{Bgra, ColorResolution, DepthMode, PixelFormat};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Seen {
        frames: Vec<OutputFrame>,
        board: TelemetryBoard,
        clears: usize,
    }

    struct Sink(Arc<Mutex<Seen>>);

    impl PresentationSink for Sink {
        fn present(&mut self, frame: &OutputFrame) {
            self.0.lock().unwrap().frames.push(frame.clone());
        }

        fn telemetry_changed(&mut self, board: &TelemetryBoard) {
            let mut seen = self.0.lock().unwrap();
            if board.is_empty() {
                seen.clears += 1;
            }
            seen.board = board.clone();
        }

        fn failure(&mut self, _message: &str) {}
    }

    struct Rig {
        capture: CaptureLoop,
        mode: Arc<ModeCell>,
        seen: Arc<Mutex<Seen>>,
        _exec: PresentationExecutor,
    }

    fn rig(initial: VisualizationMode) -> Rig {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let sink_seen = seen.clone();
        let exec = PresentationExecutor::spawn(move || Sink(sink_seen)).unwrap();

        let mut config = SessionConfig::default();
        config.device.color_resolution = ColorResolution::R720p;
        config.device.depth_mode = DepthMode::NfovBinned;

        let device = Arc::new(DummyDevice::new(64, 48, 32, 24));
        let calibration = Arc::new(
            device
                .calibration(config.device.depth_mode, config.device.color_resolution)
                .unwrap(),
        );
        let compositor = Compositor::new(calibration, BODY_PALETTE, config.probability_threshold);
        let trigger = AnalyticsTrigger::new(None, &config, exec.handle()).unwrap();
        let mode = Arc::new(ModeCell::new(initial));

        let capture = CaptureLoop::new(
            device,
            Arc::new(DummyTracker::new(1)),
            compositor,
            trigger,
            mode.clone(),
            exec.handle(),
            Arc::new(AtomicBool::new(false)),
            &config,
        );
        Rig {
            capture,
            mode,
            seen,
            _exec: exec,
        }
    }

    #[test]
    fn test_color_mode_passes_bundle_through() {
        let mut rig = rig(VisualizationMode::Color);
        rig.capture.step().unwrap();
        let seen = rig.seen.lock().unwrap();
        assert_eq!(seen.frames.len(), 1);
        assert_eq!(seen.frames[0].format(), PixelFormat::Bgra32);
        assert_eq!((seen.frames[0].width(), seen.frames[0].height()), (64, 48));
        assert_eq!(rig.capture.frame_count(), 1);
    }

    #[test]
    fn test_infrared_mode_publishes_gray16() {
        let mut rig = rig(VisualizationMode::Infrared);
        rig.capture.step().unwrap();
        let seen = rig.seen.lock().unwrap();
        assert_eq!(seen.frames[0].format(), PixelFormat::Gray16);
        assert_eq!((seen.frames[0].width(), seen.frames[0].height()), (32, 24));
    }

    #[test]
    fn test_depth_mode_output_is_colour_sized() {
        let mut rig = rig(VisualizationMode::Depth);
        rig.capture.step().unwrap();
        let seen = rig.seen.lock().unwrap();
        match &seen.frames[0] {
            OutputFrame::Bgra32(img) => {
                assert_eq!((img.width(), img.height()), (64, 48));
                // The dummy scene is closer than 2 m, so something stays visible
                assert!(img.pixels().iter().any(|p| *p != Bgra::ZERO));
            }
            other => panic!("unexpected frame {:?}", other.format()),
        }
    }

    #[test]
    fn test_body_modes_publish_body_count() {
        let mut rig = rig(VisualizationMode::BodyMask);
        rig.capture.step().unwrap();
        assert_eq!(
            rig.seen.lock().unwrap().board.get(telemetry::NUMBER_OF_BODIES),
            Some("1")
        );

        rig.mode.set(VisualizationMode::Skeleton);
        rig.capture.step().unwrap();
        let seen = rig.seen.lock().unwrap();
        assert_eq!(seen.board.get(telemetry::NUMBER_OF_BODIES), Some("1"));
        assert!(seen.board.get("Body: 1 Joint: Head").is_some());
    }

    #[test]
    fn test_mode_change_clears_telemetry_once() {
        let mut rig = rig(VisualizationMode::Skeleton);
        rig.capture.step().unwrap();
        assert!(!rig.seen.lock().unwrap().board.is_empty());

        rig.mode.set(VisualizationMode::Color);
        rig.capture.step().unwrap();
        rig.capture.step().unwrap();

        let seen = rig.seen.lock().unwrap();
        assert_eq!(seen.clears, 1);
        assert!(seen.board.is_empty());
        assert_eq!(seen.frames.len(), 3);
    }
}
