//! A running capture session: device streams, worker threads and shutdown.
//!
//! Start order is cameras, calibration, IMU, then the workers. Shutdown sets
//! a shared flag that each worker checks at the top of its loop, waits for
//! in-flight iterations up to the grace period, releases the device and
//! tracker, and finally joins the threads.

use crate::capture::CaptureLoop;
use crate::compositor::Compositor;
use crate::config::SessionConfig;
use crate::detector::AnalyticsTrigger;
use crate::imu::ImuSampler;
use crate::presentation::PresentationHandle;
use crate::provider::{BodyTracker, DeviceProvider, ModelRef, RemoteDetector};
use crate::types::{Streams, VisualizationMode};
use crate::{FuseError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// The active visualization mode, shared between the UI side and the capture loop.
///
/// Reads are relaxed: a change made mid-iteration shows up on the next one.
#[derive(Debug)]
pub struct ModeCell(AtomicU8);

impl ModeCell {
    pub fn new(mode: VisualizationMode) -> Self {
        ModeCell(AtomicU8::new(mode as u8))
    }

    pub fn get(&self) -> VisualizationMode {
        VisualizationMode::from_u8(self.0.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set(&self, mode: VisualizationMode) {
        self.0.store(mode as u8, Ordering::Relaxed);
    }
}

/// Common exit path for a worker whose iteration failed.
///
/// Once shutdown has begun, failures are just the device going away under us.
pub(crate) fn worker_failed(
    worker: &str,
    err: &FuseError,
    stop: &AtomicBool,
    presentation: &PresentationHandle,
) {
    if stop.load(Ordering::Relaxed) {
        log::info!("{} exiting during shutdown: {}", worker, err);
        return;
    }

    log::error!("{} halted: {}", worker, err);
    stop.store(true, Ordering::Relaxed);
    if presentation
        .report_failure(format!("{} halted: {}", worker, err))
        .is_err()
    {
        log::warn!("Presentation gone, failure not delivered");
    }
}

struct Worker {
    name: &'static str,
    // Disconnects when the worker thread exits.
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn `body` on a named thread. A panic in `body` halts the session
    /// like any other fatal error of `label`.
    fn spawn(
        name: &'static str,
        label: &'static str,
        stop: Arc<AtomicBool>,
        presentation: PresentationHandle,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<Worker> {
        let (done_tx, done) = crossbeam_channel::bounded::<()>(0);
        let thread = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let _done = done_tx;
                if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(body)) {
                    let err = FuseError::Panic(panic_message(payload.as_ref()));
                    worker_failed(label, &err, &stop, &presentation);
                }
            })
            .map_err(|e| FuseError::Spawn(format!("{}: {}", name, e)))?;
        Ok(Worker {
            name,
            done,
            thread: Some(thread),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// A running capture session.
///
/// Dropping the session performs the same shutdown as [`Session::stop`].
pub struct Session {
    device: Arc<dyn DeviceProvider>,
    tracker: Arc<dyn BodyTracker>,
    mode: Arc<ModeCell>,
    stop_flag: Arc<AtomicBool>,
    grace: std::time::Duration,
    imu_started: bool,
    workers: Vec<Worker>,
    released: bool,
}

impl Session {
    /// Start streaming and spawn the capture loop (and IMU sampler when the
    /// IMU stream is enabled).
    pub fn start(
        device: Arc<dyn DeviceProvider>,
        tracker: Arc<dyn BodyTracker>,
        detector: Option<(Box<dyn RemoteDetector>, ModelRef)>,
        presentation: PresentationHandle,
        config: SessionConfig,
    ) -> Result<Session> {
        config.validate()?;

        device.start_cameras(&config.device)?;

        // From here on, dropping the session on error releases the device.
        let mut session = Session {
            device: device.clone(),
            tracker: tracker.clone(),
            mode: Arc::new(ModeCell::new(config.initial_mode)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            grace: config.shutdown_grace,
            imu_started: false,
            workers: Vec::new(),
            released: false,
        };

        let calibration = Arc::new(
            device.calibration(config.device.depth_mode, config.device.color_resolution)?,
        );
        log::info!(
            "Calibration: depth {}x{}, colour {}x{}",
            calibration.depth().width,
            calibration.depth().height,
            calibration.color().width,
            calibration.color().height
        );

        let with_imu = config.device.streams.contains(Streams::IMU);
        if with_imu {
            device.start_imu()?;
            session.imu_started = true;
        }

        let compositor = Compositor::new(calibration, config.palette, config.probability_threshold);
        let trigger = AnalyticsTrigger::new(detector, &config, presentation.clone())?;
        let capture = CaptureLoop::new(
            device.clone(),
            tracker,
            compositor,
            trigger,
            session.mode.clone(),
            presentation.clone(),
            session.stop_flag.clone(),
            &config,
        );
        session.workers.push(Worker::spawn(
            "framefuse-capture",
            "Capture loop",
            session.stop_flag.clone(),
            presentation.clone(),
            move || capture.run(),
        )?);

        if with_imu {
            let sampler =
                ImuSampler::new(device, presentation.clone(), session.stop_flag.clone(), &config);
            session.workers.push(Worker::spawn(
                "framefuse-imu",
                "IMU sampler",
                session.stop_flag.clone(),
                presentation,
                move || sampler.run(),
            )?);
        }

        log::info!(
            "Session started: {} fps, {} mode",
            config.device.frame_rate.hz(),
            config.initial_mode.name()
        );
        Ok(session)
    }

    pub fn mode(&self) -> VisualizationMode {
        self.mode.get()
    }

    /// Takes effect at the start of the next capture iteration.
    pub fn set_mode(&self, mode: VisualizationMode) {
        self.mode.set(mode);
    }

    /// False once shutdown was requested or a worker halted on a fatal error.
    pub fn is_running(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
    }

    /// Stop the workers and release the device.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.released {
            return;
        }
        self.stop_flag.store(true, Ordering::Relaxed);

        let deadline = Instant::now() + self.grace;
        for worker in &self.workers {
            if let Err(RecvTimeoutError::Timeout) = worker.done.recv_deadline(deadline) {
                log::warn!(
                    "{} still busy after {:?}, releasing device anyway",
                    worker.name,
                    self.grace
                );
            }
        }

        self.release();

        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
        log::info!("Session stopped");
    }

    fn release(&mut self) {
        self.released = true;
        if self.imu_started {
            self.device.stop_imu();
        }
        self.device.stop_cameras();
        self.tracker.shutdown();
        self.device.close();
        log::debug!("Device and tracker released");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presentation::{PresentationExecutor, PresentationSink};
    use crate::types::OutputFrame;
    use std::sync::Mutex;

    struct FailureSink(Arc<Mutex<Vec<String>>>);

    impl PresentationSink for FailureSink {
        fn present(&mut self, _frame: &OutputFrame) {}

        fn failure(&mut self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_worker_panic_halts_and_reports() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink_failures = failures.clone();
        let exec = PresentationExecutor::spawn(move || FailureSink(sink_failures)).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let mut worker = Worker::spawn("test-worker", "Test worker", stop.clone(), exec.handle(), || {
            panic!("sensor exploded")
        })
        .unwrap();
        worker.thread.take().unwrap().join().unwrap();

        assert!(stop.load(Ordering::Relaxed));
        assert_eq!(
            failures.lock().unwrap().as_slice(),
            ["Test worker halted: Worker panicked: sensor exploded"]
        );
    }

    #[test]
    fn test_worker_panic_during_shutdown_is_not_reported() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink_failures = failures.clone();
        let exec = PresentationExecutor::spawn(move || FailureSink(sink_failures)).unwrap();
        let stop = Arc::new(AtomicBool::new(true));

        let mut worker =
            Worker::spawn("test-worker", "Test worker", stop, exec.handle(), || panic!("late"))
                .unwrap();
        worker.thread.take().unwrap().join().unwrap();
        assert!(failures.lock().unwrap().is_empty());
    }

    #[test]
    fn test_panic_message_formats() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_mode_cell_round_trips_every_mode() {
        let cell = ModeCell::new(VisualizationMode::Color);
        for mode in VisualizationMode::ALL {
            cell.set(mode);
            assert_eq!(cell.get(), mode);
        }
    }

    #[test]
    fn test_mode_cell_falls_back_to_colour() {
        let cell = ModeCell(AtomicU8::new(200));
        assert_eq!(cell.get(), VisualizationMode::Color);
    }
}
