//! The IMU sampler: motion samples to telemetry, independent of the camera.

use crate::config::{RetryPolicy, SessionConfig};
use crate::presentation::PresentationHandle;
use crate::provider::DeviceProvider;
use crate::session;
use crate::telemetry::{self, TelemetryUpdate};
use crate::types::ImuSample;
use crate::{FuseError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Device timestamp as `hh:mm:ss`. Hours are not wrapped.
pub fn format_timestamp(ts: Duration) -> String {
    let secs = ts.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Round half to even at `places` decimals. Never prints `-0`.
pub fn format_rounded(value: f32, places: usize) -> String {
    let scale = 10f64.powi(places as i32);
    // Adding +0.0 turns a -0.0 result into 0.0
    let rounded = (value as f64 * scale).round_ties_even() / scale + 0.0;
    format!("{:.*}", places, rounded)
}

/// The telemetry upserts for one motion sample.
pub fn sample_updates(sample: &ImuSample) -> Vec<TelemetryUpdate> {
    let [ax, ay, az] = sample.accelerometer;
    let [gx, gy, gz] = sample.gyro;
    vec![
        TelemetryUpdate::upsert(
            telemetry::ACCELEROMETER_TIMESTAMP,
            format_timestamp(sample.accelerometer_timestamp),
        ),
        TelemetryUpdate::upsert(telemetry::ACCELEROMETER_X, format_rounded(ax, 1)),
        TelemetryUpdate::upsert(telemetry::ACCELEROMETER_Y, format_rounded(ay, 1)),
        TelemetryUpdate::upsert(telemetry::ACCELEROMETER_Z, format_rounded(az, 1)),
        TelemetryUpdate::upsert(telemetry::GYRO_TIMESTAMP, format_timestamp(sample.gyro_timestamp)),
        TelemetryUpdate::upsert(telemetry::GYRO_X, format_rounded(gx, 0)),
        TelemetryUpdate::upsert(telemetry::GYRO_Y, format_rounded(gy, 0)),
        TelemetryUpdate::upsert(telemetry::GYRO_Z, format_rounded(gz, 0)),
        TelemetryUpdate::upsert(telemetry::TEMPERATURE, format_rounded(sample.temperature, 1)),
    ]
}

pub struct ImuSampler {
    device: Arc<dyn DeviceProvider>,
    presentation: PresentationHandle,
    stop: Arc<AtomicBool>,
    timeout: Duration,
    retry: RetryPolicy,
    samples: u64,
}

impl ImuSampler {
    pub(crate) fn new(
        device: Arc<dyn DeviceProvider>,
        presentation: PresentationHandle,
        stop: Arc<AtomicBool>,
        config: &SessionConfig,
    ) -> ImuSampler {
        ImuSampler {
            device,
            presentation,
            stop,
            timeout: config.imu_timeout,
            retry: config.retry,
            samples: 0,
        }
    }

    pub(crate) fn run(mut self) {
        log::info!("IMU sampler started");

        loop {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            if let Err(e) = self.step() {
                session::worker_failed("IMU sampler", &e, &self.stop, &self.presentation);
                break;
            }
        }

        log::info!("IMU sampler stopped after {} samples", self.samples);
    }

    pub fn step(&mut self) -> Result<()> {
        let sample = self.retry.run("Acquire IMU sample", &self.stop, || {
            self.device.acquire_imu_sample(self.timeout)
        })
        .map_err(FuseError::into_device_failure)?;
        self.samples += 1;
        self.presentation.update_telemetry(sample_updates(&sample))
    }
}
