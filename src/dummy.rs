//! Synthetic collaborators for running the pipeline without hardware.
//!
//! The device serves a colour gradient, a left-to-right depth ramp from 0.8 m
//! to 2.6 m, a matching infrared image and a gravity-only IMU. Failures can be
//! injected to exercise the fatal-error path.

use crate::calibration::{Calibration, CameraIntrinsics, Extrinsics};
use crate::error::DetectorError;
use crate::provider::{BodyTracker, DeviceProvider, ModelRef, RemoteDetector};
use crate::types::{
    Bgra, Body, BodyFrame, ColorResolution, DepthMode, DeviceConfig, FrameBundle, Image, ImuSample,
    JointConfidence, JointId, Prediction, BODY_INDEX_BACKGROUND,
};
use crate::{FuseError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

const NEAR_MM: u16 = 800;
const FAR_MM: u16 = 2600;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    cameras_running: bool,
    imu_running: bool,
    closed: bool,
    frames: u64,
    imu_samples: u64,
    fail_after: Option<u64>,
}

/// A fake depth sensor.
#[derive(Debug)]
pub struct DummyDevice {
    color_size: (usize, usize),
    depth_size: (usize, usize),
    frame_interval: Duration,
    state: Mutex<DeviceState>,
}

impl DummyDevice {
    pub fn new(color_width: usize, color_height: usize, depth_width: usize, depth_height: usize) -> Self {
        Self {
            color_size: (color_width, color_height),
            depth_size: (depth_width, depth_height),
            frame_interval: Duration::ZERO,
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Pace bundles and IMU samples like a real sensor.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Serve `frames` bundles, then report the device as unplugged.
    pub fn fail_after(&self, frames: u64) {
        lock(&self.state).fail_after = Some(frames);
    }

    pub fn frames_served(&self) -> u64 {
        lock(&self.state).frames
    }

    pub fn is_streaming(&self) -> bool {
        let state = lock(&self.state);
        state.cameras_running || state.imu_running
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn color_image(&self, frame: u64) -> Result<Image<Bgra>> {
        let (w, h) = self.color_size;
        let shift = (frame % 256) as usize;
        let mut pixels = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                pixels.push(Bgra::rgb(
                    ((x * 255 / w.max(1) + shift) % 256) as u8,
                    (y * 255 / h.max(1)) as u8,
                    96,
                ));
            }
        }
        Image::from_pixels(w, h, pixels)
    }

    fn depth_image(&self) -> Result<Image<u16>> {
        let (w, h) = self.depth_size;
        let span = (FAR_MM - NEAR_MM) as usize;
        let mut pixels = Vec::with_capacity(w * h);
        for _ in 0..h {
            for x in 0..w {
                pixels.push(NEAR_MM + (x * span / w.max(1)) as u16);
            }
        }
        Image::from_pixels(w, h, pixels)
    }
}

impl DeviceProvider for DummyDevice {
    fn start_cameras(&self, config: &DeviceConfig) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(FuseError::Device("device closed".into()));
        }
        state.cameras_running = true;
        log::info!("Dummy cameras started at {} fps", config.frame_rate.hz());
        Ok(())
    }

    fn stop_cameras(&self) {
        lock(&self.state).cameras_running = false;
    }

    /// Ignores the requested modes; the sizes come from the constructor.
    fn calibration(&self, _depth_mode: DepthMode, _resolution: ColorResolution) -> Result<Calibration> {
        let (dw, dh) = self.depth_size;
        let (cw, ch) = self.color_size;
        // Same field of view for both cameras
        let depth = CameraIntrinsics {
            width: dw,
            height: dh,
            fx: dw as f32 * 0.8,
            fy: dw as f32 * 0.8,
            cx: dw as f32 / 2.0,
            cy: dh as f32 / 2.0,
        };
        let color = CameraIntrinsics {
            width: cw,
            height: ch,
            fx: cw as f32 * 0.8,
            fy: cw as f32 * 0.8,
            cx: cw as f32 / 2.0,
            cy: ch as f32 / 2.0,
        };
        Calibration::new(depth, color, Extrinsics::IDENTITY)
    }

    fn acquire_bundle(&self, timeout: Duration) -> Result<FrameBundle> {
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval.min(timeout));
        }

        let frame = {
            let mut state = lock(&self.state);
            if !state.cameras_running {
                return Err(FuseError::Device("cameras not running".into()));
            }
            if state.fail_after.is_some_and(|n| state.frames >= n) {
                return Err(FuseError::Device("device disconnected".into()));
            }
            state.frames += 1;
            state.frames
        };

        let depth = self.depth_image()?;
        let infrared = Image::from_pixels(
            depth.width(),
            depth.height(),
            depth.pixels().iter().map(|d| FAR_MM - d + NEAR_MM).collect(),
        )?;
        Ok(FrameBundle {
            color: self.color_image(frame)?,
            depth,
            infrared: Some(infrared),
            timestamp: Duration::from_millis(frame * 33),
        })
    }

    fn start_imu(&self) -> Result<()> {
        lock(&self.state).imu_running = true;
        Ok(())
    }

    fn stop_imu(&self) {
        lock(&self.state).imu_running = false;
    }

    fn acquire_imu_sample(&self, timeout: Duration) -> Result<ImuSample> {
        std::thread::sleep(self.frame_interval.max(Duration::from_millis(1)).min(timeout));

        let mut state = lock(&self.state);
        if !state.imu_running {
            return Err(FuseError::Device("IMU not running".into()));
        }
        state.imu_samples += 1;
        let ts = Duration::from_millis(state.imu_samples * 5);
        Ok(ImuSample {
            temperature: 31.5,
            accelerometer: [0.0, -9.81, 0.0],
            accelerometer_timestamp: ts,
            gyro: [0.0, 0.0, 0.0],
            gyro_timestamp: ts,
        })
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.cameras_running = false;
        state.imu_running = false;
        state.closed = true;
        log::info!("Dummy device closed after {} frames", state.frames);
    }
}

/// A fake body tracker that reports `bodies` people standing side by side
/// 1.5 m from the camera.
#[derive(Debug)]
pub struct DummyTracker {
    bodies: usize,
    queue: Mutex<VecDeque<BodyFrame>>,
    shut_down: Mutex<bool>,
}

impl DummyTracker {
    pub fn new(bodies: usize) -> Self {
        Self {
            bodies,
            queue: Mutex::new(VecDeque::new()),
            shut_down: Mutex::new(false),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *lock(&self.shut_down)
    }

    fn track(&self, bundle: &FrameBundle) -> Result<BodyFrame> {
        let (w, h) = (bundle.depth.width(), bundle.depth.height());
        let slots = self.bodies.max(1);

        // Each body owns a vertical band in the middle half of the frame
        let mut index = vec![BODY_INDEX_BACKGROUND; w * h];
        for y in h / 4..h * 3 / 4 {
            for x in 0..w {
                let slot = x * slots / w.max(1);
                if slot < self.bodies {
                    index[y * w + x] = slot as u8;
                }
            }
        }

        let bodies = (0..self.bodies)
            .map(|i| {
                let mut body = Body::untracked(i as u32 + 1);
                let x = (i as f32 + 0.5) / slots as f32 * 1000.0 - 500.0;
                for (n, id) in JointId::ALL.into_iter().enumerate() {
                    let joint = body.joint_mut(id);
                    joint.position = [x, 400.0 - n as f32 * 25.0, 1500.0];
                    joint.confidence = if n % 4 == 3 {
                        JointConfidence::Low
                    } else {
                        JointConfidence::High
                    };
                }
                body
            })
            .collect();

        Ok(BodyFrame {
            bodies,
            body_index: Image::from_pixels(w, h, index)?,
        })
    }
}

impl BodyTracker for DummyTracker {
    fn enqueue(&self, bundle: &FrameBundle) -> Result<()> {
        if self.is_shut_down() {
            return Err(FuseError::Tracker("tracker shut down".into()));
        }
        let frame = self.track(bundle)?;
        lock(&self.queue).push_back(frame);
        Ok(())
    }

    fn pop_result(&self, _timeout: Duration) -> Result<BodyFrame> {
        lock(&self.queue).pop_front().ok_or(FuseError::Timeout)
    }

    fn shutdown(&self) {
        *lock(&self.shut_down) = true;
        lock(&self.queue).clear();
    }
}

/// A detector that replays a fixed list of responses, then answers with
/// nothing.
pub struct ScriptedDetector {
    responses: VecDeque<std::result::Result<Vec<Prediction>, DetectorError>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(
        responses: impl IntoIterator<Item = std::result::Result<Vec<Prediction>, DetectorError>>,
    ) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of calls made so far, readable after the detector is moved.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl RemoteDetector for ScriptedDetector {
    fn detect(
        &mut self,
        _jpeg: &[u8],
        model: &ModelRef,
    ) -> std::result::Result<Vec<Prediction>, DetectorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("Scripted detection #{} against {}", n, model.published_name);
        self.responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}
