//! # framefuse - real-time fusion of depth-sensor frames
//!
//! Takes synchronized colour, depth and infrared frames plus body tracking and
//! remote object detection, and turns each bundle into one displayable image
//! and a set of telemetry values. Provides:
//! - Depth reprojection into colour-camera pixel space
//! - Per-mode fusion: colour, depth ramp, infrared, body mask, skeleton, brand overlay
//! - A capture loop and an IMU sampler on their own threads
//! - A single-threaded presentation executor with back-pressure
//!
//! ## Quick Start
//! ```no_run
//! use framefuse::dummy::{DummyDevice, DummyTracker};
//! use framefuse::{OutputFrame, PresentationExecutor, PresentationSink, Session, SessionConfig};
//! use std::sync::Arc;
//!
//! struct Print;
//!
//! impl PresentationSink for Print {
//!     fn present(&mut self, frame: &OutputFrame) {
//!         println!("{}x{} {:?}", frame.width(), frame.height(), frame.format());
//!     }
//!
//!     fn failure(&mut self, message: &str) {
//!         eprintln!("{}", message);
//!     }
//! }
//!
//! let executor = PresentationExecutor::spawn(|| Print).unwrap();
//! let session = Session::start(
//!     Arc::new(DummyDevice::new(1280, 720, 640, 576)),
//!     Arc::new(DummyTracker::new(1)),
//!     None,
//!     executor.handle(),
//!     SessionConfig::from_env(),
//! )
//! .unwrap();
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! session.stop();
//! ```

pub mod error;
pub mod types;
pub mod config;
pub mod calibration;
pub mod reproject;
pub mod overlay;
pub mod compositor;
pub mod encode;
pub mod telemetry;
pub mod presentation;
pub mod provider;
pub mod detector;
pub mod capture;
pub mod imu;
pub mod session;
pub mod dummy;

pub use calibration::{Calibration, CameraIntrinsics, Extrinsics};
pub use compositor::{Composite, Compositor, BODY_PALETTE};
pub use config::{DetectionDispatch, DetectorSettings, RetryPolicy, SessionConfig};
pub use detector::{AnalyticsTrigger, DetectionCache};
pub use error::{DetectorError, FuseError};
pub use presentation::{PresentationExecutor, PresentationHandle, PresentationSink};
pub use provider::{BodyTracker, DeviceProvider, ModelRef, RemoteDetector};
pub use session::{ModeCell, Session};
pub use telemetry::{TelemetryBoard, TelemetryItem, TelemetryUpdate};
pub use types::*;

/// Result type alias for framefuse operations.
pub type Result<T> = std::result::Result<T, FuseError>;
