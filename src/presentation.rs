//! Single-threaded presentation side.
//!
//! The sink lives on one dedicated executor thread. Workers hand results to it
//! through a [`PresentationHandle`] and block until the executor has applied
//! them, so a slow sink slows the producers down instead of queueing frames.

use crate::telemetry::{TelemetryBoard, TelemetryUpdate};
use crate::types::OutputFrame;
use crate::{FuseError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::thread::JoinHandle;

/// Consumer of finished frames and telemetry. Only ever called from the
/// presentation executor thread.
pub trait PresentationSink {
    /// Display a finished frame.
    fn present(&mut self, frame: &OutputFrame);

    /// The telemetry collection changed.
    fn telemetry_changed(&mut self, _board: &TelemetryBoard) {}

    /// A worker stopped on a fatal error.
    fn failure(&mut self, message: &str);
}

enum Delivery {
    Frame(OutputFrame),
    Telemetry(Vec<TelemetryUpdate>),
    Failure(String),
}

enum Message {
    Deliver(Delivery, Sender<()>),
    Stop,
}

/// Owns the presentation thread.
pub struct PresentationExecutor {
    sender: Sender<Message>,
    thread: Option<JoinHandle<()>>,
}

impl PresentationExecutor {
    /// Start the executor. `make_sink` runs on the new thread, so the sink
    /// itself does not need to be `Send`.
    pub fn spawn<S, F>(make_sink: F) -> Result<PresentationExecutor>
    where
        S: PresentationSink + 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();

        let thread = std::thread::Builder::new()
            .name("framefuse-present".into())
            .spawn(move || {
                let sink = make_sink();
                executor_loop(sink, receiver);
            })
            .map_err(|e| FuseError::Spawn(format!("presentation executor: {}", e)))?;

        Ok(PresentationExecutor {
            sender,
            thread: Some(thread),
        })
    }

    /// A new handle for a worker thread.
    pub fn handle(&self) -> PresentationHandle {
        PresentationHandle {
            sender: self.sender.clone(),
        }
    }

    /// Apply everything already delivered, then stop the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.sender.send(Message::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PresentationExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn executor_loop<S: PresentationSink>(mut sink: S, receiver: Receiver<Message>) {
    let mut board = TelemetryBoard::new();

    log::info!("Presentation executor started");

    for message in receiver.iter() {
        let (delivery, ack) = match message {
            Message::Deliver(delivery, ack) => (delivery, ack),
            Message::Stop => break,
        };

        match delivery {
            Delivery::Frame(frame) => sink.present(&frame),
            Delivery::Telemetry(updates) => {
                let mut changed = false;
                for update in updates {
                    changed |= board.apply(update);
                }
                if changed {
                    sink.telemetry_changed(&board);
                }
            }
            Delivery::Failure(message) => sink.failure(&message),
        }

        // The worker may have given up waiting; that is not our problem.
        let _ = ack.send(());
    }

    // Dropping undelivered envelopes releases any worker waiting on them.
    let dropped = receiver.try_iter().count();
    if dropped > 0 {
        log::debug!("Presentation executor dropped {} pending deliveries", dropped);
    }

    log::info!("Presentation executor stopped");
}

/// Worker-side handle to the presentation executor.
///
/// Every call blocks until the executor has applied the delivery. Never call
/// it from the executor thread itself.
#[derive(Clone)]
pub struct PresentationHandle {
    sender: Sender<Message>,
}

impl PresentationHandle {
    fn deliver(&self, delivery: Delivery) -> Result<()> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.sender
            .send(Message::Deliver(delivery, ack_tx))
            .map_err(|_| FuseError::ChannelDisconnected)?;
        // A dropped envelope drops its ack sender, which ends this wait.
        ack_rx.recv().map_err(|_| FuseError::ChannelDisconnected)
    }

    pub fn publish_frame(&self, frame: OutputFrame) -> Result<()> {
        self.deliver(Delivery::Frame(frame))
    }

    /// Apply a batch of telemetry changes. Empty batches are skipped.
    pub fn update_telemetry(&self, updates: Vec<TelemetryUpdate>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.deliver(Delivery::Telemetry(updates))
    }

    pub fn report_failure(&self, message: impl Into<String>) -> Result<()> {
        self.deliver(Delivery::Failure(message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bgra, Image};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Record {
        frames: usize,
        boards: Vec<TelemetryBoard>,
        failures: Vec<String>,
        thread: Option<String>,
    }

    struct RecordingSink(Arc<Mutex<Record>>);

    impl PresentationSink for RecordingSink {
        fn present(&mut self, _frame: &OutputFrame) {
            let mut r = self.0.lock().unwrap();
            r.frames += 1;
            r.thread = std::thread::current().name().map(String::from);
        }

        fn telemetry_changed(&mut self, board: &TelemetryBoard) {
            self.0.lock().unwrap().boards.push(board.clone());
        }

        fn failure(&mut self, message: &str) {
            self.0.lock().unwrap().failures.push(message.to_string());
        }
    }

    fn spawn_recording() -> (PresentationExecutor, Arc<Mutex<Record>>) {
        let record = Arc::new(Mutex::new(Record::default()));
        let sink_record = record.clone();
        let exec = PresentationExecutor::spawn(move || RecordingSink(sink_record)).unwrap();
        (exec, record)
    }

    #[test]
    fn test_delivery_is_applied_before_call_returns() {
        let (exec, record) = spawn_recording();
        let handle = exec.handle();
        handle
            .publish_frame(OutputFrame::Bgra32(Image::filled(2, 2, Bgra::ZERO)))
            .unwrap();
        let r = record.lock().unwrap();
        assert_eq!(r.frames, 1);
        assert_eq!(r.thread.as_deref(), Some("framefuse-present"));
    }

    #[test]
    fn test_telemetry_batches_update_the_board() {
        let (exec, record) = spawn_recording();
        let handle = exec.handle();
        handle
            .update_telemetry(vec![
                TelemetryUpdate::upsert("a", "1"),
                TelemetryUpdate::upsert("b", "2"),
            ])
            .unwrap();
        // No change, no notification
        handle
            .update_telemetry(vec![TelemetryUpdate::upsert("a", "1")])
            .unwrap();
        handle.update_telemetry(vec![TelemetryUpdate::Clear]).unwrap();

        let r = record.lock().unwrap();
        assert_eq!(r.boards.len(), 2);
        assert_eq!(r.boards[0].get("b"), Some("2"));
        assert!(r.boards[1].is_empty());
    }

    #[test]
    fn test_failures_reach_the_sink() {
        let (exec, record) = spawn_recording();
        exec.handle().report_failure("device unplugged").unwrap();
        assert_eq!(record.lock().unwrap().failures, vec!["device unplugged"]);
    }

    #[test]
    fn test_handle_fails_after_stop() {
        let (exec, _record) = spawn_recording();
        let handle = exec.handle();
        exec.stop();
        assert!(matches!(
            handle.report_failure("late"),
            Err(FuseError::ChannelDisconnected)
        ));
    }
}
