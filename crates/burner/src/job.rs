use std::path::PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EncodeSettings;

/// One unit of work: burn subtitles into a single source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: Uuid,
    pub source_path: PathBuf,
    /// Sidecar subtitle file; when absent the source's own subtitle stream is burned
    pub subtitle_path: Option<PathBuf>,
    /// Opaque output location chosen by the import layer
    pub output_path: PathBuf,
}

impl JobDescriptor {
    pub fn new(source_path: PathBuf, subtitle_path: Option<PathBuf>, output_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_path,
            subtitle_path,
            output_path,
        }
    }

    /// File name used in logs and status lines
    pub fn display_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.source_path.display().to_string())
    }
}

/// Lifecycle state of a job inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Active,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }

    /// Allowed moves: Pending -> Active, Active -> terminal. Nothing returns to Pending.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Active)
                | (JobState::Active, JobState::Succeeded)
                | (JobState::Active, JobState::Failed)
                | (JobState::Active, JobState::Cancelled)
        )
    }
}

/// Terminal outcome reported in `JobFinished`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl From<JobOutcome> for JobState {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Succeeded => JobState::Succeeded,
            JobOutcome::Failed => JobState::Failed,
            JobOutcome::Cancelled => JobState::Cancelled,
        }
    }
}

/// A job together with the record of what happened to it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub descriptor: JobDescriptor,
    pub state: JobState,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Why a job did not succeed
    pub reason: Option<String>,
}

impl JobRecord {
    pub fn new(descriptor: JobDescriptor) -> Self {
        Self {
            descriptor,
            state: JobState::Pending,
            exit_code: None,
            started_at: None,
            finished_at: None,
            reason: None,
        }
    }

    /// Apply a state change; illegal moves are refused and leave the record untouched
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        match next {
            JobState::Active => self.started_at = Some(Utc::now()),
            _ => self.finished_at = Some(Utc::now()),
        }
        self.state = next;
        true
    }
}

/// Run-level state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Cancelling,
    Completed,
}

/// All state of one batch, owned by the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    pub jobs: Vec<JobRecord>,
    pub active_index: Option<usize>,
    pub run_state: RunState,
    pub current_progress: f64,
    /// Settings snapshot taken when the batch started
    pub settings: Option<EncodeSettings>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for BatchRun {
    fn default() -> Self {
        Self::idle(Vec::new())
    }
}

impl BatchRun {
    pub fn idle(jobs: Vec<JobDescriptor>) -> Self {
        Self {
            jobs: jobs.into_iter().map(JobRecord::new).collect(),
            active_index: None,
            run_state: RunState::Idle,
            current_progress: 0.0,
            settings: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn descriptors(&self) -> Vec<JobDescriptor> {
        self.jobs.iter().map(|r| r.descriptor.clone()).collect()
    }

    pub fn outcomes(&self) -> Vec<JobState> {
        self.jobs.iter().map(|r| r.state).collect()
    }

    pub fn all_succeeded(&self) -> bool {
        !self.jobs.is_empty() && self.jobs.iter().all(|r| r.state == JobState::Succeeded)
    }

    pub fn summary(&self) -> BatchSummary {
        let count = |state: JobState| self.jobs.iter().filter(|r| r.state == state).count();
        BatchSummary {
            total: self.jobs.len(),
            succeeded: count(JobState::Succeeded),
            failed: count(JobState::Failed),
            cancelled: count(JobState::Cancelled),
            not_started: count(JobState::Pending),
            all_succeeded: self.all_succeeded(),
        }
    }
}

/// Counts reported once a batch is over
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub not_started: usize,
    pub all_succeeded: bool,
}

impl BatchSummary {
    pub fn was_cancelled(&self) -> bool {
        self.cancelled > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> JobDescriptor {
        JobDescriptor::new(
            PathBuf::from(format!("/media/{}.mkv", name)),
            None,
            PathBuf::from(format!("/media/Output_V3/{}.mkv", name)),
        )
    }

    #[test]
    fn test_job_never_returns_to_pending() {
        let mut record = JobRecord::new(descriptor("a"));
        assert!(record.transition(JobState::Active));
        assert!(!record.transition(JobState::Pending));
        assert_eq!(record.state, JobState::Active);
        assert!(record.started_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut record = JobRecord::new(descriptor("a"));
        record.transition(JobState::Active);
        assert!(record.transition(JobState::Cancelled));
        assert!(!record.transition(JobState::Succeeded));
        assert_eq!(record.state, JobState::Cancelled);
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_pending_cannot_finish_directly() {
        let mut record = JobRecord::new(descriptor("a"));
        assert!(!record.transition(JobState::Succeeded));
        assert_eq!(record.state, JobState::Pending);
    }

    #[test]
    fn test_summary_counts() {
        let mut run = BatchRun::idle(vec![descriptor("a"), descriptor("b"), descriptor("c")]);
        run.jobs[0].transition(JobState::Active);
        run.jobs[0].transition(JobState::Succeeded);
        run.jobs[1].transition(JobState::Active);
        run.jobs[1].transition(JobState::Failed);

        let summary = run.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.not_started, 1);
        assert!(!summary.all_succeeded);
    }

    #[test]
    fn test_empty_run_is_not_all_succeeded() {
        assert!(!BatchRun::default().all_succeeded());
    }

    #[test]
    fn test_display_name() {
        assert_eq!(descriptor("episode01").display_name(), "episode01.mkv");
    }
}
