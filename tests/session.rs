//! End-to-end runs of the two-thread pipeline against the dummy device.

use crossbeam_channel::Sender;
use framefuse::dummy::{DummyDevice, DummyTracker, ScriptedDetector};
use framefuse::{
    BoundingBox, Calibration, ColorResolution, DepthMode, DetectionDispatch, DeviceConfig,
    DeviceProvider, FrameBundle, FuseError, ImuSample, ModelRef, OutputFrame, PixelFormat,
    Prediction, PresentationExecutor, PresentationSink, RemoteDetector, Session, SessionConfig,
    TelemetryBoard, VisualizationMode,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Record {
    frames: usize,
    last_format: Option<PixelFormat>,
    board: TelemetryBoard,
    failures: Vec<String>,
}

struct RecordingSink(Arc<Mutex<Record>>);

impl PresentationSink for RecordingSink {
    fn present(&mut self, frame: &OutputFrame) {
        let mut r = self.0.lock().unwrap();
        r.frames += 1;
        r.last_format = Some(frame.format());
    }

    fn telemetry_changed(&mut self, board: &TelemetryBoard) {
        self.0.lock().unwrap().board = board.clone();
    }

    fn failure(&mut self, message: &str) {
        self.0.lock().unwrap().failures.push(message.to_string());
    }
}

fn recording_executor() -> (PresentationExecutor, Arc<Mutex<Record>>) {
    let record = Arc::new(Mutex::new(Record::default()));
    let sink_record = record.clone();
    let executor = PresentationExecutor::spawn(move || RecordingSink(sink_record)).unwrap();
    (executor, record)
}

fn small_device() -> Arc<DummyDevice> {
    Arc::new(DummyDevice::new(64, 48, 32, 24).with_frame_interval(Duration::from_millis(2)))
}

fn test_config() -> SessionConfig {
    SessionConfig {
        shutdown_grace: Duration::from_millis(500),
        ..SessionConfig::default()
    }
}

fn prediction(tag: &str, probability: f64, offset: f64, size: f64) -> Prediction {
    Prediction {
        tag_name: tag.into(),
        probability,
        bounding_box: BoundingBox {
            left: offset,
            top: offset,
            width: size,
            height: size,
        },
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_frames_and_imu_telemetry_flow() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (executor, record) = recording_executor();
    let device = small_device();
    let tracker = Arc::new(DummyTracker::new(1));

    let session = Session::start(
        device.clone(),
        tracker.clone(),
        None,
        executor.handle(),
        test_config(),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        let r = record.lock().unwrap();
        r.frames >= 5 && r.board.get("Temperature").is_some()
    }));
    assert!(session.is_running());

    let r = record.lock().unwrap();
    assert_eq!(r.last_format, Some(PixelFormat::Bgra32));
    assert_eq!(r.board.get("Accelerometer: Y"), Some("-9.8"));
    assert_eq!(r.board.get("Gyro: X"), Some("0"));
    drop(r);

    session.stop();
    assert!(device.is_closed());
    assert!(!device.is_streaming());
    assert!(tracker.is_shut_down());
}

#[test]
fn test_no_frames_after_stop() {
    let (executor, record) = recording_executor();
    let session = Session::start(
        small_device(),
        Arc::new(DummyTracker::new(1)),
        None,
        executor.handle(),
        test_config(),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || record.lock().unwrap().frames > 0));

    let started = Instant::now();
    session.stop();
    // Workers finish well inside the grace period, so release does not wait for it
    assert!(started.elapsed() < Duration::from_secs(2));

    let frames = record.lock().unwrap().frames;
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(record.lock().unwrap().frames, frames);
    assert!(record.lock().unwrap().failures.is_empty());
}

#[test]
fn test_device_failure_halts_session_and_reports() {
    let (executor, record) = recording_executor();
    let device = small_device();
    device.fail_after(3);

    let session = Session::start(
        device.clone(),
        Arc::new(DummyTracker::new(1)),
        None,
        executor.handle(),
        test_config(),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || !record
        .lock()
        .unwrap()
        .failures
        .is_empty()));
    assert!(wait_until(Duration::from_secs(1), || !session.is_running()));

    {
        let r = record.lock().unwrap();
        assert_eq!(r.frames, 3);
        assert_eq!(r.failures.len(), 1);
        assert!(r.failures[0].starts_with("Capture loop halted"));
        assert!(r.failures[0].contains("device disconnected"));
    }

    session.stop();
    assert!(device.is_closed());
}

#[test]
fn test_brand_detection_reaches_telemetry() {
    let (executor, record) = recording_executor();
    let detector = ScriptedDetector::new(
        std::iter::repeat_with(|| {
            Ok(vec![
                prediction("acme", 0.904, 0.25, 0.5),
                prediction("noise", 0.3, 0.0, 1.0),
            ])
        })
        .take(10_000),
    );
    let calls = detector.calls();
    let detector: Box<dyn RemoteDetector> = Box::new(detector);
    let model = ModelRef {
        project_id: "project".into(),
        published_name: "brands".into(),
    };
    let config = SessionConfig {
        detection_interval: 5,
        dispatch: DetectionDispatch::Inline,
        initial_mode: VisualizationMode::BrandOverlay,
        ..test_config()
    };

    let session = Session::start(
        small_device(),
        Arc::new(DummyTracker::new(1)),
        Some((detector, model)),
        executor.handle(),
        config,
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        record.lock().unwrap().board.get("Brand: acme").is_some()
    }));
    session.stop();

    let r = record.lock().unwrap();
    assert_eq!(r.board.get("Brand: acme"), Some("90%"));
    assert_eq!(r.board.get("Brand: noise"), None);
    // One call per five frames, never more
    let made = calls.load(Ordering::SeqCst);
    assert!(made >= 1);
    assert!(made <= r.frames / 5 + 1, "{} calls for {} frames", made, r.frames);
}

#[test]
fn test_mode_switch_changes_output_format() {
    let (executor, record) = recording_executor();
    let session = Session::start(
        small_device(),
        Arc::new(DummyTracker::new(1)),
        None,
        executor.handle(),
        test_config(),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || record.lock().unwrap().frames > 0));
    session.set_mode(VisualizationMode::Infrared);
    assert_eq!(session.mode(), VisualizationMode::Infrared);
    assert!(wait_until(Duration::from_secs(5), || {
        record.lock().unwrap().last_format == Some(PixelFormat::Gray16)
    }));

    session.stop();
}

#[test]
fn test_invalid_config_is_rejected_before_streaming() {
    let (executor, _record) = recording_executor();
    let device = small_device();
    let config = SessionConfig {
        detection_interval: 0,
        ..test_config()
    };
    let result = Session::start(
        device.clone(),
        Arc::new(DummyTracker::new(1)),
        None,
        executor.handle(),
        config,
    );
    assert!(result.is_err());
    assert!(!device.is_streaming());
    assert_eq!(device.frames_served(), 0);
}

/// How a [`FaultyDevice`] misbehaves on every bundle acquire.
#[derive(Clone, Copy)]
enum Fault {
    InvalidImage,
    Panic,
}

/// A dummy device whose bundle acquire always goes wrong.
struct FaultyDevice {
    inner: DummyDevice,
    fault: Fault,
    acquires: AtomicUsize,
}

impl FaultyDevice {
    fn new(fault: Fault) -> Self {
        FaultyDevice {
            inner: DummyDevice::new(64, 48, 32, 24).with_frame_interval(Duration::from_millis(2)),
            fault,
            acquires: AtomicUsize::new(0),
        }
    }
}

impl DeviceProvider for FaultyDevice {
    fn start_cameras(&self, config: &DeviceConfig) -> framefuse::Result<()> {
        self.inner.start_cameras(config)
    }

    fn stop_cameras(&self) {
        self.inner.stop_cameras()
    }

    fn calibration(
        &self,
        depth_mode: DepthMode,
        resolution: ColorResolution,
    ) -> framefuse::Result<Calibration> {
        self.inner.calibration(depth_mode, resolution)
    }

    fn acquire_bundle(&self, _timeout: Duration) -> framefuse::Result<FrameBundle> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            Fault::InvalidImage => Err(FuseError::InvalidImage("truncated colour buffer".into())),
            Fault::Panic => panic!("driver crashed"),
        }
    }

    fn start_imu(&self) -> framefuse::Result<()> {
        self.inner.start_imu()
    }

    fn stop_imu(&self) {
        self.inner.stop_imu()
    }

    fn acquire_imu_sample(&self, timeout: Duration) -> framefuse::Result<ImuSample> {
        self.inner.acquire_imu_sample(timeout)
    }

    fn close(&self) {
        self.inner.close()
    }
}

fn run_faulty(fault: Fault) -> (Arc<FaultyDevice>, Arc<Mutex<Record>>) {
    let (executor, record) = recording_executor();
    let device = Arc::new(FaultyDevice::new(fault));
    let session = Session::start(
        device.clone(),
        Arc::new(DummyTracker::new(1)),
        None,
        executor.handle(),
        test_config(),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || !record
        .lock()
        .unwrap()
        .failures
        .is_empty()));
    assert!(wait_until(Duration::from_secs(1), || !session.is_running()));
    session.stop();
    (device, record)
}

#[test]
fn test_malformed_bundle_is_fatal() {
    let (device, record) = run_faulty(Fault::InvalidImage);

    let r = record.lock().unwrap();
    assert_eq!(r.frames, 0);
    assert_eq!(r.failures.len(), 1);
    assert_eq!(
        r.failures[0],
        "Capture loop halted: Device error: Invalid image: truncated colour buffer"
    );
    assert_eq!(device.acquires.load(Ordering::SeqCst), 1);
    assert!(device.inner.is_closed());
}

#[test]
fn test_worker_panic_halts_session_and_reports() {
    let (device, record) = run_faulty(Fault::Panic);

    let r = record.lock().unwrap();
    assert_eq!(r.failures.len(), 1);
    assert_eq!(
        r.failures[0],
        "Capture loop halted: Worker panicked: driver crashed"
    );
    assert!(device.inner.is_closed());
}

/// Holds every frame for `delay` and notes whether the device was still open
/// when the frame finished presenting.
struct SlowSink {
    device: Arc<DummyDevice>,
    delay: Duration,
    started: Sender<()>,
    open_after_present: Arc<Mutex<Vec<bool>>>,
}

impl PresentationSink for SlowSink {
    fn present(&mut self, _frame: &OutputFrame) {
        let _ = self.started.try_send(());
        std::thread::sleep(self.delay);
        self.open_after_present
            .lock()
            .unwrap()
            .push(!self.device.is_closed());
    }

    fn failure(&mut self, _message: &str) {}
}

/// Stop a session while its first frame is being presented.
fn stop_mid_frame(delay: Duration, grace: Duration) -> (Arc<DummyDevice>, Arc<Mutex<Vec<bool>>>) {
    let device = small_device();
    let presented = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started) = crossbeam_channel::unbounded();

    let sink_device = device.clone();
    let sink_presented = presented.clone();
    let executor = PresentationExecutor::spawn(move || SlowSink {
        device: sink_device,
        delay,
        started: started_tx,
        open_after_present: sink_presented,
    })
    .unwrap();

    let config = SessionConfig {
        shutdown_grace: grace,
        ..SessionConfig::default()
    };
    let session = Session::start(
        device.clone(),
        Arc::new(DummyTracker::new(1)),
        None,
        executor.handle(),
        config,
    )
    .unwrap();

    started.recv_timeout(Duration::from_secs(5)).unwrap();
    session.stop();
    assert!(device.is_closed());
    (device, presented)
}

#[test]
fn test_in_flight_frame_finishes_before_release() {
    let (_device, presented) = stop_mid_frame(Duration::from_millis(200), Duration::from_secs(2));

    // The frame in flight when stop was requested is delivered with the
    // device still open, and nothing follows it.
    assert_eq!(presented.lock().unwrap().as_slice(), [true]);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(presented.lock().unwrap().len(), 1);
}

#[test]
fn test_release_does_not_wait_past_grace() {
    let (_device, presented) =
        stop_mid_frame(Duration::from_millis(500), Duration::from_millis(50));

    // The device was released while the slow frame was still presenting
    assert_eq!(presented.lock().unwrap().as_slice(), [false]);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(presented.lock().unwrap().len(), 1);
}
