use std::path::PathBuf;
use thiserror::Error;

use crate::job::RunState;

/// The external binary could not be located or launched
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("executable not found: {}", program.display())]
    NotFound { program: PathBuf },

    #[error("failed to launch {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} started without a diagnostic stream", program.display())]
    MissingStream { program: PathBuf },
}

/// Suspend/resume/terminate could not be applied to a process
#[derive(Debug, Error)]
pub enum ProcessControlError {
    #[error("process {pid} has already exited")]
    Exited { pid: u32 },

    #[error("signal {signal} is not supported on this platform")]
    Unsupported { signal: &'static str },

    #[error("signal {signal} was rejected by process {pid}")]
    SignalRejected { pid: u32, signal: &'static str },
}

/// Errors returned synchronously by `BatchController` commands
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("{command} is not allowed while the batch is {state:?}")]
    InvalidState {
        command: &'static str,
        state: RunState,
    },

    #[error("cannot start an empty batch")]
    EmptyBatch,

    #[error("no queued job with id {0}")]
    UnknownJob(uuid::Uuid),

    #[error("invalid encode settings: {0}")]
    InvalidSettings(String),

    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

impl BatchError {
    /// Whether the command was refused because of the controller's state
    /// (an empty batch counts as one: nothing was started).
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, BatchError::InvalidState { .. } | BatchError::EmptyBatch)
    }
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;
