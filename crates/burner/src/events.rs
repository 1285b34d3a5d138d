use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::FinishAction;
use crate::job::{BatchSummary, JobOutcome, RunState};
use crate::monitor::MonitorReading;

/// Everything the core reports to a presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BurnEvent {
    StateChanged { state: RunState },
    JobStarted { index: usize },
    Progress { index: usize, fraction: f64 },
    JobFinished { index: usize, outcome: JobOutcome, exit_code: Option<i32> },
    JobSpawnFailed { index: usize, message: String },
    BatchFinished { all_succeeded: bool, summary: BatchSummary },
    FinishRequested { action: FinishAction },
    MonitorSample { reading: MonitorReading },
}

/// Receiver of emitted events.
///
/// `BatchController` emits while holding its state lock, which is what keeps
/// batch events totally ordered. An implementation must not block and must
/// not call back into the controller; forward events to a channel and act on
/// them from the receiving side instead.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BurnEvent);
}

impl EventSink for UnboundedSender<BurnEvent> {
    fn emit(&self, event: BurnEvent) {
        // A dropped receiver only means nobody is watching any more
        let _ = self.send(event);
    }
}

/// Sink that writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: BurnEvent) {
        match event {
            BurnEvent::StateChanged { state } => info!("Batch state: {:?}", state),
            BurnEvent::JobStarted { index } => info!("Job #{} started", index + 1),
            BurnEvent::Progress { index, fraction } => {
                info!("Job #{} progress {:.1}%", index + 1, fraction * 100.0)
            }
            BurnEvent::JobFinished { index, outcome, exit_code } => {
                info!("Job #{} finished: {:?} (exit code {:?})", index + 1, outcome, exit_code)
            }
            BurnEvent::JobSpawnFailed { index, message } => {
                warn!("Job #{} could not be started: {}", index + 1, message)
            }
            BurnEvent::BatchFinished { all_succeeded, summary } => info!(
                "Batch finished (all succeeded: {}): {} ok, {} failed, {} cancelled, {} not started",
                all_succeeded, summary.succeeded, summary.failed, summary.cancelled, summary.not_started
            ),
            BurnEvent::FinishRequested { action } => info!("Finish action requested: {:?}", action),
            BurnEvent::MonitorSample { reading } => info!("GPU: {}", reading),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(BurnEvent::Progress { index: 2, fraction: 0.5 }).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["index"], 2);
        assert_eq!(json["fraction"], 0.5);
    }

    #[test]
    fn test_sender_sink_ignores_closed_channel() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        tx.emit(BurnEvent::JobStarted { index: 0 });
    }
}
