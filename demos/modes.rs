//! Cycle through every visualization mode on the synthetic device and report
//! what each one produces.
//!
//! Usage: cargo run --example modes

use framefuse::dummy::{DummyDevice, DummyTracker};
use framefuse::{
    ColorResolution, DepthMode, OutputFrame, PresentationExecutor, PresentationSink, Session,
    SessionConfig, TelemetryBoard, VisualizationMode,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Latest {
    frame: Option<OutputFrame>,
    telemetry_items: usize,
}

struct LatestSink(Arc<Mutex<Latest>>);

impl PresentationSink for LatestSink {
    fn present(&mut self, frame: &OutputFrame) {
        if let Ok(mut latest) = self.0.lock() {
            latest.frame = Some(frame.clone());
        }
    }

    fn telemetry_changed(&mut self, board: &TelemetryBoard) {
        if let Ok(mut latest) = self.0.lock() {
            latest.telemetry_items = board.len();
        }
    }

    fn failure(&mut self, message: &str) {
        eprintln!("FAILURE: {}", message);
    }
}

/// Share of bytes that are non-zero, as a rough "how much is drawn" figure.
fn coverage(frame: &OutputFrame) -> f64 {
    let bytes = frame.as_bytes();
    let lit = bytes.iter().filter(|b| **b != 0).count();
    lit as f64 / bytes.len().max(1) as f64 * 100.0
}

fn main() {
    env_logger::init();

    let mut config = SessionConfig::default();
    config.device.color_resolution = ColorResolution::R720p;
    config.device.depth_mode = DepthMode::NfovUnbinned;
    let (cw, ch) = config.device.color_resolution.dimensions();
    let (dw, dh) = config.device.depth_mode.dimensions();

    let latest = Arc::new(Mutex::new(Latest::default()));
    let sink_latest = latest.clone();
    let executor = match PresentationExecutor::spawn(move || LatestSink(sink_latest)) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Failed to start presentation: {}", e);
            std::process::exit(1);
        }
    };

    let session = match Session::start(
        Arc::new(DummyDevice::new(cw, ch, dw, dh).with_frame_interval(Duration::from_millis(33))),
        Arc::new(DummyTracker::new(3)),
        None,
        executor.handle(),
        config,
    ) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start session: {}", e);
            std::process::exit(1);
        }
    };

    for mode in VisualizationMode::ALL {
        session.set_mode(mode);
        std::thread::sleep(Duration::from_millis(750));

        let Ok(latest) = latest.lock() else {
            break;
        };
        match &latest.frame {
            Some(frame) => println!(
                "{:<18} {}x{} {:?}  {:5.1}% non-zero  {} telemetry items",
                mode.name(),
                frame.width(),
                frame.height(),
                frame.format(),
                coverage(frame),
                latest.telemetry_items
            ),
            None => println!("{:<18} no frame yet", mode.name()),
        }
    }

    session.stop();
}
