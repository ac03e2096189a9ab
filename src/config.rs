//! Session configuration.
//!
//! Everything is decided once at startup and never changes while a session
//! runs. Defaults match a 30 fps 1080p colour stream with wide binned depth;
//! `FRAMEFUSE_*` environment variables override individual values.

use crate::compositor::{Palette, BODY_PALETTE, DEFAULT_PROBABILITY_THRESHOLD};
use crate::encode::DETECTION_JPEG_QUALITY;
use crate::provider::ModelRef;
use crate::types::{ColorResolution, DepthMode, DeviceConfig, FrameRate, VisualizationMode};
use crate::{FuseError, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often a backoff sleep checks the stop flag.
const STOP_POLL: Duration = Duration::from_millis(10);

/// Where remote detection calls run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionDispatch {
    /// On the capture thread; a slow detector stalls frame production.
    Inline,
    /// On a dedicated worker; cycles are skipped while it is busy.
    Background,
}

/// Retries for a failed device or tracker call before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure. 0 fails immediately.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        backoff: Duration::from_millis(100),
    };

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .checked_mul(2u32.pow(attempt.saturating_sub(1).min(16)))
            .unwrap_or(Duration::MAX)
    }

    /// Run `op`, retrying failures until the budget is spent or `stop` is set.
    pub fn run<T>(
        &self,
        what: &str,
        stop: &AtomicBool,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if attempt < self.max_retries && !stop.load(Ordering::Relaxed) => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    log::warn!(
                        "{} failed ({}), retry {}/{} in {:?}",
                        what,
                        e,
                        attempt,
                        self.max_retries,
                        delay
                    );
                    if !sleep_unless_stopped(delay, stop) {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Sleep for `delay` in short slices. Returns false if `stop` was set first.
fn sleep_unless_stopped(delay: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now().checked_add(delay);
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => STOP_POLL,
        };
        if remaining.is_zero() {
            return true;
        }
        std::thread::sleep(remaining.min(STOP_POLL));
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::NONE
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device: DeviceConfig,
    /// How long the capture loop waits for one bundle.
    pub acquire_timeout: Duration,
    /// How long the IMU sampler waits for one motion sample.
    pub imu_timeout: Duration,
    /// How long the capture loop waits for a body-tracking result.
    pub tracker_timeout: Duration,
    /// How long shutdown waits for in-flight iterations before releasing the device.
    pub shutdown_grace: Duration,
    /// Run the detector on every Nth frame.
    pub detection_interval: u64,
    pub probability_threshold: f64,
    /// Down-scale factor applied before JPEG encoding for detection.
    pub detection_scale: f64,
    pub jpeg_quality: u8,
    pub dispatch: DetectionDispatch,
    pub retry: RetryPolicy,
    pub initial_mode: VisualizationMode,
    pub palette: Palette,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            acquire_timeout: Duration::from_secs(2),
            imu_timeout: Duration::from_secs(2),
            tracker_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(1),
            detection_interval: 30,
            probability_threshold: DEFAULT_PROBABILITY_THRESHOLD,
            detection_scale: 0.5,
            jpeg_quality: DETECTION_JPEG_QUALITY,
            dispatch: DetectionDispatch::Background,
            retry: RetryPolicy::NONE,
            initial_mode: VisualizationMode::Color,
            palette: BODY_PALETTE,
        }
    }
}

impl SessionConfig {
    /// Defaults with `FRAMEFUSE_*` environment overrides applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = SessionConfig::default();

        if let Some(fps) = read_parsed::<u32>(&lookup, "FRAMEFUSE_FPS") {
            match FrameRate::from_hz(fps) {
                Some(rate) => config.device.frame_rate = rate,
                None => log::warn!("Unsupported FRAMEFUSE_FPS={} (supported: 5|15|30)", fps),
            }
        }
        if let Some(v) = read_string(&lookup, "FRAMEFUSE_COLOR_RESOLUTION") {
            match ColorResolution::parse(&v) {
                Some(res) => config.device.color_resolution = res,
                None => log::warn!("Unknown FRAMEFUSE_COLOR_RESOLUTION='{}'", v),
            }
        }
        if let Some(v) = read_string(&lookup, "FRAMEFUSE_DEPTH_MODE") {
            match DepthMode::parse(&v) {
                Some(mode) => config.device.depth_mode = mode,
                None => log::warn!("Unknown FRAMEFUSE_DEPTH_MODE='{}'", v),
            }
        }
        if let Some(v) = read_string(&lookup, "FRAMEFUSE_MODE") {
            match VisualizationMode::parse(&v) {
                Some(mode) => config.initial_mode = mode,
                None => log::warn!("Unknown FRAMEFUSE_MODE='{}'", v),
            }
        }
        if let Some(n) = read_parsed::<u64>(&lookup, "FRAMEFUSE_DETECTION_INTERVAL") {
            config.detection_interval = n;
        }
        if let Some(inline) = read_bool(&lookup, "FRAMEFUSE_DETECTION_INLINE") {
            config.dispatch = if inline {
                DetectionDispatch::Inline
            } else {
                DetectionDispatch::Background
            };
        }
        if let Some(ms) = read_parsed::<u64>(&lookup, "FRAMEFUSE_GRACE_MS") {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(n) = read_parsed::<u32>(&lookup, "FRAMEFUSE_RETRIES") {
            config.retry.max_retries = n;
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.detection_interval == 0 {
            return Err(FuseError::Config("detection interval must be at least 1".into()));
        }
        if !(self.detection_scale > 0.0 && self.detection_scale <= 1.0) {
            return Err(FuseError::Config(format!(
                "detection scale must be in (0, 1], got {}",
                self.detection_scale
            )));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(FuseError::Config(format!(
                "JPEG quality must be 1-100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

fn read_string(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = read_string(lookup, name)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring unparseable {}='{}'", name, raw);
            None
        }
    }
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let raw = read_string(lookup, name)?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("Ignoring unparseable {}='{}'", name, raw);
            None
        }
    }
}

/// Credentials and model identity for the remote detector, as stored in
/// `appSettings.json`.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DetectorSettings {
    pub endpoint: String,
    #[serde(default)]
    pub prediction_url: Option<String>,
    pub key: String,
    pub project_id: String,
    pub published_name: String,
}

impl std::fmt::Debug for DetectorSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorSettings")
            .field("endpoint", &self.endpoint)
            .field("prediction_url", &self.prediction_url)
            .field("key", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("published_name", &self.published_name)
            .finish()
    }
}

impl DetectorSettings {
    pub fn from_json(json: &str) -> Result<DetectorSettings> {
        serde_json::from_str(json).map_err(|e| FuseError::Config(format!("detector settings: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<DetectorSettings> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| FuseError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn model(&self) -> ModelRef {
        ModelRef {
            project_id: self.project_id.clone(),
            published_name: self.published_name.clone(),
        }
    }
}
