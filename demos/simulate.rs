//! Run a full session against the synthetic device and print what the
//! presentation side receives.
//!
//! Usage: cargo run --example simulate [seconds]
//! Environment: FRAMEFUSE_* overrides, RUST_LOG for logging.

use framefuse::dummy::{DummyDevice, DummyTracker, ScriptedDetector};
use framefuse::{
    BoundingBox, ModelRef, OutputFrame, Prediction, PresentationExecutor, PresentationSink,
    RemoteDetector, Session, SessionConfig, TelemetryBoard,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct ConsoleSink {
    frames: u64,
    started: Instant,
}

impl PresentationSink for ConsoleSink {
    fn present(&mut self, frame: &OutputFrame) {
        self.frames += 1;
        // Print every 30th frame to avoid flooding the terminal
        if self.frames % 30 == 1 {
            let elapsed = self.started.elapsed().as_secs_f64();
            println!(
                "frame {:<6} {}x{} {:?} stride={}  ({:.1} fps)",
                self.frames,
                frame.width(),
                frame.height(),
                frame.format(),
                frame.stride(),
                self.frames as f64 / elapsed.max(0.001)
            );
        }
    }

    fn telemetry_changed(&mut self, board: &TelemetryBoard) {
        if self.frames % 30 == 1 {
            for item in board.items() {
                println!("    {:<28} {}", item.name, item.value);
            }
        }
    }

    fn failure(&mut self, message: &str) {
        eprintln!("FAILURE: {}", message);
    }
}

fn main() {
    env_logger::init();

    let seconds: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);

    let config = SessionConfig::from_env();
    let (cw, ch) = config.device.color_resolution.dimensions();
    let (dw, dh) = config.device.depth_mode.dimensions();
    let interval = config.device.frame_rate.frame_interval();

    let executor = match PresentationExecutor::spawn(|| ConsoleSink {
        frames: 0,
        started: Instant::now(),
    }) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Failed to start presentation: {}", e);
            std::process::exit(1);
        }
    };

    let detector: Box<dyn RemoteDetector> = Box::new(ScriptedDetector::new(
        std::iter::repeat_with(|| {
            Ok(vec![Prediction {
                tag_name: "framefuse".into(),
                probability: 0.87,
                bounding_box: BoundingBox {
                    left: 0.3,
                    top: 0.3,
                    width: 0.4,
                    height: 0.25,
                },
            }])
        })
        .take(1000),
    ));
    let model = ModelRef {
        project_id: "demo".into(),
        published_name: "brands".into(),
    };

    println!(
        "Simulating {}x{} colour, {}x{} depth at {} fps in {} mode for {}s",
        cw,
        ch,
        dw,
        dh,
        config.device.frame_rate.hz(),
        config.initial_mode.name(),
        seconds
    );

    let session = match Session::start(
        Arc::new(DummyDevice::new(cw, ch, dw, dh).with_frame_interval(interval)),
        Arc::new(DummyTracker::new(2)),
        Some((detector, model)),
        executor.handle(),
        config,
    ) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start session: {}", e);
            std::process::exit(1);
        }
    };

    let deadline = Instant::now() + Duration::from_secs(seconds);
    while Instant::now() < deadline && session.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    session.stop();
    executor.stop();
    println!("Done");
}
