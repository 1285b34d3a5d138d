//! Sequential batch controller.
//!
//! One background task walks the job list in order and drives at most one
//! external process at a time. Commands from the caller (`pause`, `resume`,
//! `cancel`, queue edits) are applied synchronously under a single mutex; the
//! background task observes them through a watch channel carrying the run
//! state, so pause and cancel never require polling.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::timeout;
use uuid::Uuid;

use crate::command::{CommandBuilder, FfmpegCommandBuilder};
use crate::config::{AppConfig, EncodeSettings};
use crate::error::{BatchError, BatchResult, SpawnError};
use crate::events::{BurnEvent, EventSink};
use crate::finish::{FinishHandler, SystemFinishHandler};
use crate::job::{BatchRun, BatchSummary, JobDescriptor, JobOutcome, JobRecord, JobState, RunState};
use crate::process::{platform_signals, ProcessControl, ProcessHandle, ProcessSignals};
use crate::progress::{parse_duration, parse_progress_line};

/// Tunables of the batch loop
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Duration used for progress when the probe yields nothing
    pub fallback_duration_secs: f64,
    /// How long a terminated process may take before it is killed
    pub terminate_grace: Duration,
    /// Upper bound of one idle wait while paused
    pub pause_idle: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for BatchOptions {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            fallback_duration_secs: cfg.fallback_duration_secs,
            terminate_grace: cfg.terminate_grace(),
            pause_idle: cfg.pause_idle(),
        }
    }
}

/// Direction for reordering a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

/// Resolve the transcoder binary before anything is started
pub fn locate_program(program: &Path) -> Result<PathBuf, SpawnError> {
    which::which(program).map_err(|e| {
        debug!("Could not locate {}: {}", program.display(), e);
        SpawnError::NotFound { program: program.to_path_buf() }
    })
}

struct Inner {
    run: BatchRun,
    /// Control half of whichever process the batch task is currently driving
    active: Option<ProcessControl>,
}

struct Shared {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<RunState>,
    /// Number of batches completed so far and the summary of the last one
    done_tx: watch::Sender<(u64, BatchSummary)>,
    sink: Arc<dyn EventSink>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: RunState) {
        if inner.run.run_state == state {
            return;
        }
        debug!("Run state {:?} -> {:?}", inner.run.run_state, state);
        inner.run.run_state = state;
        self.state_tx.send_replace(state);
        self.sink.emit(BurnEvent::StateChanged { state });
    }
}

/// Owns the batch and its state machine; the only writer of `BatchRun`
pub struct BatchController {
    shared: Arc<Shared>,
    commands: Arc<dyn CommandBuilder>,
    finisher: Arc<dyn FinishHandler>,
    signals: Arc<dyn ProcessSignals>,
    options: BatchOptions,
}

impl BatchController {
    pub fn new(
        commands: Arc<dyn CommandBuilder>,
        sink: Arc<dyn EventSink>,
        finisher: Arc<dyn FinishHandler>,
        options: BatchOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(RunState::Idle);
        let (done_tx, _) = watch::channel((0, BatchSummary::default()));
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner { run: BatchRun::default(), active: None }),
                state_tx,
                done_tx,
                sink,
            }),
            commands,
            finisher,
            signals: platform_signals(),
            options,
        }
    }

    /// Controller wired to ffmpeg and the platform finish handler
    pub fn from_config(cfg: &AppConfig, sink: Arc<dyn EventSink>) -> Self {
        let finisher = Arc::new(SystemFinishHandler::new(sink.clone()));
        Self::new(
            Arc::new(FfmpegCommandBuilder::new(cfg)),
            sink,
            finisher,
            BatchOptions::from(cfg),
        )
    }

    /// Replace the signalling backend used for suspend/resume/terminate
    pub fn with_signals(mut self, signals: Arc<dyn ProcessSignals>) -> Self {
        self.signals = signals;
        self
    }

    pub fn run_state(&self) -> RunState {
        self.shared.lock().run.run_state
    }

    /// Copy of the current batch state
    pub fn snapshot(&self) -> BatchRun {
        self.shared.lock().run.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.shared.state_tx.subscribe()
    }

    /// Summary of the current batch once it is `Completed`.
    ///
    /// The batch is pinned when this is called, not when the future is first
    /// polled, so a `reset()` in between does not lose the completion. Called
    /// while idle, it resolves with the next batch to complete.
    pub fn wait_finished(&self) -> impl Future<Output = BatchSummary> + Send + 'static {
        let shared = self.shared.clone();
        let mut rx = shared.done_tx.subscribe();
        let (ready, seen) = {
            let inner = shared.lock();
            let ready = (inner.run.run_state == RunState::Completed).then(|| inner.run.summary());
            (ready, rx.borrow_and_update().0)
        };

        async move {
            if let Some(summary) = ready {
                return summary;
            }
            match rx.wait_for(|(completed, _)| *completed > seen).await {
                Ok(done) => done.1,
                // The sender lives in `shared`, which this future keeps alive
                Err(_) => shared.lock().run.summary(),
            }
        }
    }

    fn require(inner: &Inner, command: &'static str, allowed: &[RunState]) -> BatchResult<()> {
        let state = inner.run.run_state;
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(BatchError::InvalidState { command, state })
        }
    }

    /// Jobs staged for the next batch
    pub fn queued(&self) -> Vec<JobDescriptor> {
        self.shared.lock().run.descriptors()
    }

    pub fn enqueue(&self, job: JobDescriptor) -> BatchResult<()> {
        let mut inner = self.shared.lock();
        Self::require(&inner, "enqueue", &[RunState::Idle])?;
        inner.run.jobs.push(JobRecord::new(job));
        Ok(())
    }

    pub fn remove(&self, id: Uuid) -> BatchResult<JobDescriptor> {
        let mut inner = self.shared.lock();
        Self::require(&inner, "remove", &[RunState::Idle])?;
        let pos = inner
            .run
            .jobs
            .iter()
            .position(|r| r.descriptor.id == id)
            .ok_or(BatchError::UnknownJob(id))?;
        Ok(inner.run.jobs.remove(pos).descriptor)
    }

    /// Swap a job with its neighbour. Returns false at either end of the queue.
    pub fn move_job(&self, id: Uuid, direction: MoveDirection) -> BatchResult<bool> {
        let mut inner = self.shared.lock();
        Self::require(&inner, "move", &[RunState::Idle])?;
        let jobs = &mut inner.run.jobs;
        let pos = jobs
            .iter()
            .position(|r| r.descriptor.id == id)
            .ok_or(BatchError::UnknownJob(id))?;
        let target = match direction {
            MoveDirection::Up if pos > 0 => pos - 1,
            MoveDirection::Down if pos + 1 < jobs.len() => pos + 1,
            _ => return Ok(false),
        };
        jobs.swap(pos, target);
        Ok(true)
    }

    pub fn clear(&self) -> BatchResult<()> {
        let mut inner = self.shared.lock();
        Self::require(&inner, "clear", &[RunState::Idle])?;
        inner.run.jobs.clear();
        Ok(())
    }

    /// Start the staged queue
    pub fn start_queued(&self, settings: EncodeSettings) -> BatchResult<()> {
        let jobs = self.queued();
        self.start(jobs, settings)
    }

    /// Start a batch over `jobs` with a snapshot of `settings`.
    ///
    /// Returns as soon as the background task is spawned; progress arrives as
    /// events. Must be called from within a tokio runtime.
    pub fn start(&self, jobs: Vec<JobDescriptor>, settings: EncodeSettings) -> BatchResult<()> {
        let mut inner = self.shared.lock();
        Self::require(&inner, "start", &[RunState::Idle])?;
        if jobs.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        settings.validate().map_err(BatchError::InvalidSettings)?;
        let program = locate_program(self.commands.program())?;
        info!("Starting batch of {} job(s) with {}", jobs.len(), program.display());

        let mut run = BatchRun::idle(jobs.clone());
        run.settings = Some(settings.clone());
        run.started_at = Some(Utc::now());
        inner.run = run;
        inner.active = None;
        self.shared.set_state(&mut inner, RunState::Running);

        let worker = Worker {
            shared: self.shared.clone(),
            commands: self.commands.clone(),
            finisher: self.finisher.clone(),
            signals: self.signals.clone(),
            options: self.options.clone(),
            settings,
            jobs,
        };
        tokio::spawn(worker.run());
        Ok(())
    }

    /// Suspend the active process; only valid while running
    pub fn pause(&self) -> BatchResult<()> {
        let mut inner = self.shared.lock();
        Self::require(&inner, "pause", &[RunState::Running])?;
        if let Some(control) = &inner.active {
            if let Err(e) = control.suspend() {
                warn!("Suspend of process {} failed, continuing as paused: {}", control.pid(), e);
            }
        }
        self.shared.set_state(&mut inner, RunState::Paused);
        info!("Batch paused");
        Ok(())
    }

    /// Continue a paused batch
    pub fn resume(&self) -> BatchResult<()> {
        let mut inner = self.shared.lock();
        Self::require(&inner, "resume", &[RunState::Paused])?;
        if let Some(control) = &inner.active {
            if let Err(e) = control.resume() {
                warn!("Resume of process {} failed: {}", control.pid(), e);
            }
        }
        self.shared.set_state(&mut inner, RunState::Running);
        info!("Batch resumed");
        Ok(())
    }

    /// Request cancellation. Completion is reported by `BatchFinished`.
    pub fn cancel(&self) -> BatchResult<()> {
        let mut inner = self.shared.lock();
        Self::require(&inner, "cancel", &[RunState::Running, RunState::Paused])?;
        if inner.run.run_state == RunState::Paused {
            if let Some(control) = &inner.active {
                // A frozen process may not act on the termination request
                if let Err(e) = control.resume() {
                    warn!("Resume before cancel of process {} failed: {}", control.pid(), e);
                }
            }
        }
        self.shared.set_state(&mut inner, RunState::Cancelling);
        info!("Batch cancellation requested");
        Ok(())
    }

    /// Return a completed controller to idle with the same jobs staged again
    pub fn reset(&self) -> BatchResult<()> {
        let mut inner = self.shared.lock();
        Self::require(&inner, "reset", &[RunState::Completed])?;
        let staged = inner.run.descriptors();
        inner.run = BatchRun::idle(staged);
        self.shared.set_state(&mut inner, RunState::Idle);
        Ok(())
    }
}

/// How a process's diagnostic stream stopped being consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Closed,
    Cancelled,
}

/// How a process whose output already closed came to an end
#[derive(Debug)]
enum Exit {
    Code(i32),
    /// Cancelled and still running after the grace period
    Stopped(Option<i32>),
    Error(io::Error),
}

/// Result of waiting out a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Proceed,
    Cancelled,
}

/// Background task driving one batch
struct Worker {
    shared: Arc<Shared>,
    commands: Arc<dyn CommandBuilder>,
    finisher: Arc<dyn FinishHandler>,
    signals: Arc<dyn ProcessSignals>,
    options: BatchOptions,
    settings: EncodeSettings,
    jobs: Vec<JobDescriptor>,
}

impl Worker {
    async fn run(self) {
        let mut state_rx = self.shared.state_tx.subscribe();

        for (index, job) in self.jobs.iter().enumerate() {
            if self.hold_while_paused(&mut state_rx).await == Gate::Cancelled {
                break;
            }
            if !self.begin_job(index, job) {
                break;
            }
            let keep_going = self.run_job(index, job, &mut state_rx).await;
            if !keep_going || self.is_cancelling() {
                break;
            }
        }

        self.complete();
    }

    fn is_cancelling(&self) -> bool {
        self.shared.lock().run.run_state == RunState::Cancelling
    }

    /// Do not start the next job while paused
    async fn hold_while_paused(&self, state_rx: &mut watch::Receiver<RunState>) -> Gate {
        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                RunState::Paused => {
                    let _ = timeout(self.options.pause_idle, state_rx.changed()).await;
                }
                RunState::Cancelling => return Gate::Cancelled,
                _ => return Gate::Proceed,
            }
        }
    }

    fn begin_job(&self, index: usize, job: &JobDescriptor) -> bool {
        let mut inner = self.shared.lock();
        if inner.run.run_state == RunState::Cancelling {
            return false;
        }
        if !inner.run.jobs[index].transition(JobState::Active) {
            error!("Job #{} could not be activated from {:?}", index + 1, inner.run.jobs[index].state);
            return false;
        }
        inner.run.active_index = Some(index);
        inner.run.current_progress = 0.0;
        info!("Processing job #{}: {}", index + 1, job.display_name());
        self.shared.sink.emit(BurnEvent::JobStarted { index });
        true
    }

    /// Run one job to a terminal state. Returns false when the batch must stop.
    async fn run_job(
        &self,
        index: usize,
        job: &JobDescriptor,
        state_rx: &mut watch::Receiver<RunState>,
    ) -> bool {
        let total_duration = match self.probe_duration(job, state_rx).await {
            Some(duration) => duration,
            None => {
                self.finish_job(index, JobOutcome::Cancelled, None, Some("cancelled while probing".to_string()));
                return false;
            }
        };

        let cmd = self.commands.transcode_command(job, &self.settings);
        info!("Transcoding {} ({:.2}s)", job.display_name(), total_duration);
        debug!("Command: {}", cmd);

        let mut handle = match ProcessHandle::start_with_signals(&cmd, self.signals.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to start transcoder for job #{}: {}", index + 1, e);
                self.shared.sink.emit(BurnEvent::JobSpawnFailed { index, message: e.to_string() });
                self.finish_job(index, JobOutcome::Failed, None, Some(e.to_string()));
                return false;
            }
        };

        let end = if self.attach(&handle) {
            self.drain(&mut handle, state_rx, |line| {
                if let Some(fraction) = parse_progress_line(line, total_duration) {
                    self.record_progress(index, fraction);
                }
            })
            .await
        } else {
            StreamEnd::Cancelled
        };
        self.detach();

        match end {
            StreamEnd::Closed => match self.wait_closed(handle, state_rx).await {
                Exit::Code(0) => {
                    self.finish_job(index, JobOutcome::Succeeded, Some(0), None);
                    true
                }
                Exit::Code(code) => {
                    self.finish_job(
                        index,
                        JobOutcome::Failed,
                        Some(code),
                        Some(format!("transcoder exited with code {}", code)),
                    );
                    true
                }
                Exit::Error(e) => {
                    self.finish_job(
                        index,
                        JobOutcome::Failed,
                        None,
                        Some(format!("failed to wait for transcoder: {}", e)),
                    );
                    true
                }
                Exit::Stopped(exit_code) => {
                    self.finish_job(
                        index,
                        JobOutcome::Cancelled,
                        exit_code,
                        Some("cancelled after output closed".to_string()),
                    );
                    false
                }
            },
            StreamEnd::Cancelled => {
                let exit_code = self.stop(handle).await;
                self.finish_job(index, JobOutcome::Cancelled, exit_code, Some("cancelled".to_string()));
                false
            }
        }
    }

    /// Total duration of the source. Falls back to the nominal duration on any
    /// probe problem; `None` only when the batch was cancelled meanwhile.
    async fn probe_duration(
        &self,
        job: &JobDescriptor,
        state_rx: &mut watch::Receiver<RunState>,
    ) -> Option<f64> {
        let fallback = self.options.fallback_duration_secs;
        let cmd = self.commands.probe_command(job);

        let mut handle = match ProcessHandle::start_with_signals(&cmd, self.signals.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Probe of {} failed ({}), assuming {}s", job.display_name(), e, fallback);
                return Some(fallback);
            }
        };

        let mut output = String::new();
        let end = if self.attach(&handle) {
            self.drain(&mut handle, state_rx, |line| {
                output.push_str(line);
                output.push('\n');
            })
            .await
        } else {
            StreamEnd::Cancelled
        };
        self.detach();

        if end == StreamEnd::Cancelled {
            self.stop(handle).await;
            return None;
        }
        match self.wait_closed(handle, state_rx).await {
            Exit::Stopped(_) => return None,
            Exit::Error(e) => warn!("Failed to reap probe of {}: {}", job.display_name(), e),
            Exit::Code(_) => {}
        }

        match parse_duration(&output) {
            Some(duration) if duration > 0.0 => Some(duration),
            _ => {
                warn!("No duration found for {}, assuming {}s", job.display_name(), fallback);
                Some(fallback)
            }
        }
    }

    /// Publish the process as the one pause/resume act on. Returns false if
    /// the batch is already cancelling.
    fn attach(&self, handle: &ProcessHandle) -> bool {
        let mut inner = self.shared.lock();
        match inner.run.run_state {
            RunState::Cancelling => false,
            RunState::Paused => {
                if let Err(e) = handle.suspend() {
                    warn!("Suspend of freshly started process {} failed: {}", handle.pid(), e);
                }
                inner.active = Some(handle.control());
                true
            }
            _ => {
                inner.active = Some(handle.control());
                true
            }
        }
    }

    fn detach(&self) {
        self.shared.lock().active = None;
    }

    /// Feed lines to `on_line` until the stream closes or cancellation is observed.
    ///
    /// While paused no line is consumed; the loop waits on the next state change.
    async fn drain<F>(
        &self,
        handle: &mut ProcessHandle,
        state_rx: &mut watch::Receiver<RunState>,
        mut on_line: F,
    ) -> StreamEnd
    where
        F: FnMut(&str),
    {
        loop {
            if self.hold_while_paused(state_rx).await == Gate::Cancelled {
                return self.drain_ready(handle, &mut on_line).await;
            }

            tokio::select! {
                biased;
                line = handle.read_line() => match line {
                    Some(line) => on_line(&line),
                    None => return StreamEnd::Closed,
                },
                // The sender lives in `shared`, so this only fires on a state change
                _ = state_rx.changed() => {}
            }
        }
    }

    /// On cancellation, consume whatever output is already available. If the
    /// stream turns out to be closed the job had finished on its own and is
    /// scored by its exit code instead of as cancelled.
    async fn drain_ready<F>(&self, handle: &mut ProcessHandle, on_line: &mut F) -> StreamEnd
    where
        F: FnMut(&str),
    {
        loop {
            match timeout(Duration::ZERO, handle.read_line()).await {
                Ok(Some(line)) => on_line(&line),
                Ok(None) => return StreamEnd::Closed,
                Err(_) => return StreamEnd::Cancelled,
            }
        }
    }

    /// Reap a process whose output has closed. Once the batch is cancelling the
    /// process gets the grace period to exit on its own, so a job that was
    /// already finishing keeps its exit code; after that it is stopped.
    async fn wait_closed(&self, mut handle: ProcessHandle, state_rx: &mut watch::Receiver<RunState>) -> Exit {
        while *state_rx.borrow_and_update() != RunState::Cancelling {
            tokio::select! {
                biased;
                code = handle.exited() => return match code {
                    Ok(code) => Exit::Code(code),
                    Err(e) => Exit::Error(e),
                },
                _ = state_rx.changed() => {}
            }
        }

        match timeout(self.options.terminate_grace, handle.exited()).await {
            Ok(Ok(code)) => Exit::Code(code),
            Ok(Err(e)) => Exit::Error(e),
            Err(_) => {
                warn!("Process {} kept running after its output closed, stopping it", handle.pid());
                Exit::Stopped(self.stop(handle).await)
            }
        }
    }

    /// Terminate and reap a process, killing it after the grace period
    async fn stop(&self, handle: ProcessHandle) -> Option<i32> {
        if let Err(e) = handle.terminate() {
            warn!("Terminate of process {} failed: {}", handle.pid(), e);
        }
        match handle.wait_with_grace(Some(self.options.terminate_grace)).await {
            Ok(code) => Some(code),
            Err(e) => {
                error!("Failed to reap cancelled process: {}", e);
                None
            }
        }
    }

    fn record_progress(&self, index: usize, fraction: f64) {
        let mut inner = self.shared.lock();
        if inner.run.run_state != RunState::Running || inner.run.active_index != Some(index) {
            return;
        }
        if fraction < inner.run.current_progress {
            debug!("Ignoring progress regression {:.4} < {:.4}", fraction, inner.run.current_progress);
            return;
        }
        inner.run.current_progress = fraction;
        self.shared.sink.emit(BurnEvent::Progress { index, fraction });
    }

    fn finish_job(&self, index: usize, outcome: JobOutcome, exit_code: Option<i32>, reason: Option<String>) {
        let mut inner = self.shared.lock();
        let record = &mut inner.run.jobs[index];
        if !record.transition(outcome.into()) {
            error!("Job #{} cannot move from {:?} to {:?}", index + 1, record.state, outcome);
            return;
        }
        record.exit_code = exit_code;
        record.reason = reason;
        match outcome {
            JobOutcome::Succeeded => info!("Job #{} succeeded", index + 1),
            JobOutcome::Failed => warn!("Job #{} failed: {:?}", index + 1, record.reason),
            JobOutcome::Cancelled => info!("Job #{} cancelled", index + 1),
        }
        self.shared.sink.emit(BurnEvent::JobFinished { index, outcome, exit_code });
    }

    fn complete(&self) {
        let summary = {
            let mut inner = self.shared.lock();
            inner.active = None;
            inner.run.finished_at = Some(Utc::now());
            let summary = inner.run.summary();
            self.shared.set_state(&mut inner, RunState::Completed);
            self.shared.sink.emit(BurnEvent::BatchFinished {
                all_succeeded: summary.all_succeeded,
                summary,
            });
            self.shared.done_tx.send_modify(|done| *done = (done.0 + 1, summary));
            summary
        };
        info!(
            "Batch complete: {} succeeded, {} failed, {} cancelled, {} not started",
            summary.succeeded, summary.failed, summary.cancelled, summary.not_started
        );
        self.finisher.run(self.settings.finish_action, &summary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandLine;
    use crate::config::FinishAction;

    struct NoopCommands;

    impl CommandBuilder for NoopCommands {
        fn program(&self) -> &Path {
            Path::new("/nonexistent/transcoder")
        }
        fn probe_command(&self, _job: &JobDescriptor) -> CommandLine {
            CommandLine::new(self.program())
        }
        fn transcode_command(&self, _job: &JobDescriptor, _settings: &EncodeSettings) -> CommandLine {
            CommandLine::new(self.program())
        }
    }

    struct NoopFinisher;

    impl FinishHandler for NoopFinisher {
        fn run(&self, _action: FinishAction, _summary: &BatchSummary) {}
    }

    fn controller() -> BatchController {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        BatchController::new(Arc::new(NoopCommands), Arc::new(tx), Arc::new(NoopFinisher), BatchOptions::default())
    }

    fn job(name: &str) -> JobDescriptor {
        JobDescriptor::new(PathBuf::from(name), None, PathBuf::from(format!("out/{}", name)))
    }

    #[test]
    fn test_commands_rejected_while_idle() {
        let ctl = controller();
        assert!(ctl.pause().unwrap_err().is_invalid_state());
        assert!(ctl.resume().unwrap_err().is_invalid_state());
        assert!(ctl.cancel().unwrap_err().is_invalid_state());
        assert!(ctl.reset().unwrap_err().is_invalid_state());
        assert_eq!(ctl.run_state(), RunState::Idle);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let ctl = controller();
        let err = ctl.start(Vec::new(), EncodeSettings::default()).unwrap_err();
        assert!(matches!(err, BatchError::EmptyBatch));
        assert!(err.is_invalid_state());
    }

    #[test]
    fn test_missing_transcoder_is_fatal_before_any_job() {
        let ctl = controller();
        let err = ctl.start(vec![job("a.mkv")], EncodeSettings::default()).unwrap_err();
        assert!(matches!(err, BatchError::Spawn(SpawnError::NotFound { .. })));
        assert_eq!(ctl.run_state(), RunState::Idle);
        assert!(ctl.snapshot().jobs.is_empty());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let ctl = controller();
        let settings = EncodeSettings { font_size: 0, ..Default::default() };
        let err = ctl.start(vec![job("a.mkv")], settings).unwrap_err();
        assert!(matches!(err, BatchError::InvalidSettings(_)));
    }

    #[test]
    fn test_queue_editing_while_idle() {
        let ctl = controller();
        let (a, b, c) = (job("a.mkv"), job("b.mkv"), job("c.mkv"));
        ctl.enqueue(a.clone()).unwrap();
        ctl.enqueue(b.clone()).unwrap();
        ctl.enqueue(c.clone()).unwrap();

        assert!(ctl.move_job(c.id, MoveDirection::Up).unwrap());
        assert!(!ctl.move_job(a.id, MoveDirection::Up).unwrap());
        let order: Vec<_> = ctl.queued().into_iter().map(|j| j.id).collect();
        assert_eq!(order, vec![a.id, c.id, b.id]);

        assert_eq!(ctl.remove(c.id).unwrap().id, c.id);
        assert!(matches!(ctl.remove(c.id), Err(BatchError::UnknownJob(_))));

        ctl.clear().unwrap();
        assert!(ctl.queued().is_empty());
    }

    #[test]
    fn test_locate_program_missing() {
        assert!(matches!(
            locate_program(Path::new("/nonexistent/ffmpeg")),
            Err(SpawnError::NotFound { .. })
        ));
    }
}
