pub mod batch;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod finish;
pub mod job;
pub mod monitor;
pub mod process;
pub mod progress;
pub mod scan;
pub mod sidecar;

pub use batch::{BatchController, BatchOptions, MoveDirection};
pub use command::{CommandBuilder, CommandLine, FfmpegCommandBuilder};
pub use config::{AppConfig, AudioMode, EncodePreset, EncodeSettings, FinishAction, SubtitleColor};
pub use error::{BatchError, ProcessControlError, SpawnError};
pub use events::{BurnEvent, EventSink, LogSink};
pub use job::{BatchRun, BatchSummary, JobDescriptor, JobOutcome, JobState, RunState};
pub use monitor::{MonitorReading, SystemMonitor};
pub use process::{platform_signals, ProcessControl, ProcessHandle, ProcessSignals};
