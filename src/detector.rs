//! Periodic brand detection.
//!
//! Every Nth frame the colour image is shrunk, JPEG-encoded and sent to the
//! remote detector. Confident predictions replace the shared cache, which the
//! compositor reads for every frame in between. Detector failures are logged
//! and leave the cache alone; the next cycle simply tries again.
//!
//! Brand telemetry is only ever published from [`AnalyticsTrigger::on_frame`],
//! i.e. from the capture thread while brand overlay is the active mode.
//! Background results wait in a queue until the next such frame.

use crate::config::{DetectionDispatch, SessionConfig};
use crate::encode;
use crate::error::DetectorError;
use crate::presentation::PresentationHandle;
use crate::provider::{ModelRef, RemoteDetector};
use crate::telemetry::{self, TelemetryUpdate};
use crate::types::{Bgra, Image, Prediction};
use crate::{FuseError, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Deserialize;
use std::sync::{Arc, Mutex};

/// Response body of the prediction endpoint.
#[derive(Debug, Deserialize)]
struct PredictionResponse {
    predictions: Vec<Prediction>,
}

/// Parse a prediction response body into its prediction list.
pub fn parse_predictions(body: &[u8]) -> std::result::Result<Vec<Prediction>, DetectorError> {
    let response: PredictionResponse = serde_json::from_slice(body)?;
    Ok(response.predictions)
}

/// Last accepted detection result, shared by the trigger and the compositor.
///
/// Readers get a snapshot; the lock is only held to swap or clone an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct DetectionCache {
    latest: Arc<Mutex<Arc<Vec<Prediction>>>>,
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<Vec<Prediction>> {
        match self.latest.lock() {
            Ok(latest) => latest.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, predictions: Vec<Prediction>) {
        let predictions = Arc::new(predictions);
        match self.latest.lock() {
            Ok(mut latest) => *latest = predictions,
            Err(poisoned) => *poisoned.into_inner() = predictions,
        }
    }
}

/// Fold one detector outcome into the cache and return the telemetry changes.
///
/// Failures change nothing. Success keeps only predictions above `threshold`;
/// an empty survivor list removes every published brand item.
pub fn apply_detection(
    cache: &DetectionCache,
    outcome: std::result::Result<Vec<Prediction>, DetectorError>,
    threshold: f64,
) -> Vec<TelemetryUpdate> {
    let predictions = match outcome {
        Ok(predictions) => predictions,
        Err(e) => {
            log::warn!("Brand detection failed, keeping previous result: {}", e);
            return Vec::new();
        }
    };

    let accepted: Vec<Prediction> = predictions
        .into_iter()
        .filter(|p| p.probability > threshold)
        .collect();

    let updates = if accepted.is_empty() {
        vec![TelemetryUpdate::RemovePrefix(telemetry::BRAND_PREFIX.into())]
    } else {
        accepted
            .iter()
            .map(|p| {
                TelemetryUpdate::upsert(
                    telemetry::brand_item_name(&p.tag_name),
                    format!("{}%", (p.probability * 100.0).round_ties_even()),
                )
            })
            .collect()
    };

    log::debug!("Brand detection accepted {} predictions", accepted.len());
    cache.replace(accepted);
    updates
}

enum Dispatcher {
    Disabled,
    Inline {
        detector: Box<dyn RemoteDetector>,
        model: ModelRef,
    },
    Background {
        jobs: Sender<Vec<u8>>,
        results: Receiver<Vec<TelemetryUpdate>>,
    },
}

/// Decides when to run detection and routes the request.
pub struct AnalyticsTrigger {
    interval: u64,
    scale: f64,
    quality: u8,
    threshold: f64,
    cache: DetectionCache,
    presentation: PresentationHandle,
    dispatcher: Dispatcher,
    submitted: u64,
}

impl AnalyticsTrigger {
    /// Without a detector the trigger never fires and the cache stays empty.
    pub fn new(
        detector: Option<(Box<dyn RemoteDetector>, ModelRef)>,
        config: &SessionConfig,
        presentation: PresentationHandle,
    ) -> Result<AnalyticsTrigger> {
        let cache = DetectionCache::new();

        let dispatcher = match (detector, config.dispatch) {
            (None, _) => Dispatcher::Disabled,
            (Some((detector, model)), DetectionDispatch::Inline) => {
                Dispatcher::Inline { detector, model }
            }
            (Some((detector, model)), DetectionDispatch::Background) => {
                let (jobs, receiver) = crossbeam_channel::bounded(1);
                let (results_tx, results) = crossbeam_channel::unbounded();
                let worker_cache = cache.clone();
                let threshold = config.probability_threshold;
                std::thread::Builder::new()
                    .name("framefuse-detect".into())
                    .spawn(move || {
                        detection_worker(
                            detector,
                            model,
                            receiver,
                            worker_cache,
                            results_tx,
                            threshold,
                        );
                    })
                    .map_err(|e| FuseError::Spawn(format!("detection worker: {}", e)))?;
                Dispatcher::Background { jobs, results }
            }
        };

        Ok(AnalyticsTrigger {
            interval: config.detection_interval.max(1),
            scale: config.detection_scale,
            quality: config.jpeg_quality,
            threshold: config.probability_threshold,
            cache,
            presentation,
            dispatcher,
            submitted: 0,
        })
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    /// Number of detection requests handed to the detector so far.
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn is_due(&self, frame_number: u64) -> bool {
        frame_number % self.interval == 0
    }

    /// Run detection for this frame if it falls on the interval.
    ///
    /// Only presentation failures are returned; detector and encoding
    /// problems are logged and skipped.
    pub fn on_frame(&mut self, frame_number: u64, color: &Image<Bgra>) -> Result<()> {
        if let Dispatcher::Background { results, .. } = &self.dispatcher {
            for updates in results.try_iter() {
                self.presentation.update_telemetry(updates)?;
            }
        }

        if !self.is_due(frame_number) || matches!(self.dispatcher, Dispatcher::Disabled) {
            return Ok(());
        }

        let jpeg = match encode::compress_scaled(color, self.scale, self.quality) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                log::warn!("Skipping detection for frame {}: {}", frame_number, e);
                return Ok(());
            }
        };

        match &mut self.dispatcher {
            Dispatcher::Disabled => Ok(()),
            Dispatcher::Inline { detector, model } => {
                self.submitted += 1;
                let outcome = detector.detect(&jpeg, model);
                let updates = apply_detection(&self.cache, outcome, self.threshold);
                self.presentation.update_telemetry(updates)
            }
            Dispatcher::Background { jobs, .. } => {
                match jobs.try_send(jpeg) {
                    Ok(()) => self.submitted += 1,
                    Err(TrySendError::Full(_)) => {
                        log::debug!("Detector busy, skipping frame {}", frame_number);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        log::warn!("Detection worker gone, disabling detection");
                        self.dispatcher = Dispatcher::Disabled;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Runs remote detection off the capture thread. Exits once the trigger is
/// dropped and any in-flight call has returned.
fn detection_worker(
    mut detector: Box<dyn RemoteDetector>,
    model: ModelRef,
    jobs: Receiver<Vec<u8>>,
    cache: DetectionCache,
    results: Sender<Vec<TelemetryUpdate>>,
    threshold: f64,
) {
    log::info!("Detection worker started");

    for jpeg in jobs.iter() {
        let outcome = detector.detect(&jpeg, &model);
        let updates = apply_detection(&cache, outcome, threshold);
        if updates.is_empty() {
            continue;
        }
        if results.send(updates).is_err() {
            break;
        }
    }

    log::info!("Detection worker stopped");
}
