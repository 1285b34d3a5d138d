use std::io;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use log::{debug, error, info, warn};

use crate::command::CommandLine;
use crate::config::FinishAction;
use crate::events::{BurnEvent, EventSink};
use crate::job::BatchSummary;

/// Executes the configured finish action once a batch is over
pub trait FinishHandler: Send + Sync {
    fn run(&self, action: FinishAction, summary: &BatchSummary);
}

/// Platform command that powers the host off after a one minute delay
pub fn shutdown_command() -> CommandLine {
    if cfg!(windows) {
        CommandLine::new("shutdown").args(["/s", "/t", "60"])
    } else {
        CommandLine::new("shutdown").args(["-h", "+1"])
    }
}

/// Start `cmd` without waiting for it. The child is reaped on a detached
/// thread so it does not linger as a zombie if the host stays up.
pub fn spawn_detached(cmd: &CommandLine) -> io::Result<JoinHandle<io::Result<ExitStatus>>> {
    let mut child = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    let program = cmd.program.clone();
    Ok(std::thread::spawn(move || {
        let status = child.wait();
        debug!("{} finished: {:?}", program.display(), status);
        status
    }))
}

/// Default handler: UI-facing actions become events, host shutdown spawns
/// the platform shutdown command without waiting for it.
pub struct SystemFinishHandler {
    sink: Arc<dyn EventSink>,
}

impl SystemFinishHandler {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// A cancelled batch never closes or powers off the host
    pub fn effective_action(action: FinishAction, summary: &BatchSummary) -> FinishAction {
        match action {
            FinishAction::CloseApp | FinishAction::ShutdownHost if summary.was_cancelled() => {
                FinishAction::Notify
            }
            other => other,
        }
    }
}

impl FinishHandler for SystemFinishHandler {
    fn run(&self, action: FinishAction, summary: &BatchSummary) {
        let action = Self::effective_action(action, summary);
        match action {
            FinishAction::None => {}
            FinishAction::Notify | FinishAction::CloseApp => {
                self.sink.emit(BurnEvent::FinishRequested { action });
            }
            FinishAction::ShutdownHost => {
                let cmd = shutdown_command();
                info!("Scheduling host shutdown: {}", cmd);
                match spawn_detached(&cmd) {
                    Ok(_) => self.sink.emit(BurnEvent::FinishRequested { action }),
                    Err(e) => {
                        error!("Failed to schedule shutdown: {}", e);
                        warn!("Falling back to a notification");
                        self.sink.emit(BurnEvent::FinishRequested { action: FinishAction::Notify });
                    }
                }
            }
        }
    }
}
