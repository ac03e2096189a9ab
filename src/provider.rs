//! Contracts for the hardware and cloud collaborators.
//!
//! The pipeline only talks to sensors, the body tracker and the detection
//! service through these traits. Implementations must be safe to call from the
//! capture and IMU threads at the same time.

use crate::calibration::Calibration;
use crate::error::DetectorError;
use crate::types::{BodyFrame, ColorResolution, DeviceConfig, DepthMode, FrameBundle, ImuSample, Prediction};
use crate::Result;
use std::time::Duration;

/// An opened depth sensor.
///
/// Opening happens when the provider is constructed; [`DeviceProvider::close`]
/// releases the handle at the end of a session.
pub trait DeviceProvider: Send + Sync {
    /// Start the colour, depth and infrared streams.
    fn start_cameras(&self, config: &DeviceConfig) -> Result<()>;

    fn stop_cameras(&self);

    /// Calibration for the given depth mode and colour resolution.
    fn calibration(&self, depth_mode: DepthMode, resolution: ColorResolution) -> Result<Calibration>;

    /// Block until the next synchronized bundle arrives.
    ///
    /// Fails with [`crate::FuseError::Timeout`] when nothing arrives in time and
    /// [`crate::FuseError::Device`] when the device is gone.
    fn acquire_bundle(&self, timeout: Duration) -> Result<FrameBundle>;

    fn start_imu(&self) -> Result<()>;

    fn stop_imu(&self);

    /// Block until the next motion sample arrives.
    fn acquire_imu_sample(&self, timeout: Duration) -> Result<ImuSample>;

    fn close(&self) {}
}

/// Body tracking for captured bundles.
pub trait BodyTracker: Send + Sync {
    /// Queue a bundle for tracking.
    fn enqueue(&self, bundle: &FrameBundle) -> Result<()>;

    /// Block until the result for the oldest queued bundle is ready.
    fn pop_result(&self, timeout: Duration) -> Result<BodyFrame>;

    fn shutdown(&self);
}

/// Identifies the published detection model to query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub project_id: String,
    pub published_name: String,
}

/// Object detection service.
pub trait RemoteDetector: Send {
    /// Submit a JPEG image and return every prediction, unfiltered.
    fn detect(&mut self, jpeg: &[u8], model: &ModelRef) -> std::result::Result<Vec<Prediction>, DetectorError>;
}

impl<F> RemoteDetector for F
where
    F: FnMut(&[u8], &ModelRef) -> std::result::Result<Vec<Prediction>, DetectorError> + Send,
{
    fn detect(&mut self, jpeg: &[u8], model: &ModelRef) -> std::result::Result<Vec<Prediction>, DetectorError> {
        self(jpeg, model)
    }
}
