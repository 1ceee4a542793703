use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, warn};

/// Lifecycle of the most recent job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Done,
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    FullScan,
    SmartRescan,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::FullScan => write!(f, "full-scan"),
            JobKind::SmartRescan => write!(f, "smart-rescan"),
        }
    }
}

/// Observable state of background work. One per process.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub status: JobStatus,
    pub kind: Option<JobKind>,
    pub step: String,
    pub started_at: Option<DateTime<Local>>,
    pub ended_at: Option<DateTime<Local>>,
    pub error: Option<String>,
    pub indexed: usize,
}

impl Default for JobState {
    fn default() -> Self {
        Self {
            status: JobStatus::Idle,
            kind: None,
            step: String::new(),
            started_at: None,
            ended_at: None,
            error: None,
            indexed: 0,
        }
    }
}

/// Rejection of a trigger while another job runs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("A job is already running ({step})")]
pub struct AlreadyRunning {
    pub kind: Option<JobKind>,
    pub step: String,
}

/// Owner of the job state. Every transition happens under one lock, and
/// starting a run is a compare-and-set on `status`.
#[derive(Debug, Clone, Default)]
pub struct JobTracker {
    state: Arc<Mutex<JobState>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `running` unless a run is already in progress
    pub fn begin(&self, kind: JobKind, step: impl Into<String>) -> Result<JobRun, AlreadyRunning> {
        let step = step.into();
        let mut state = lock(&self.state);
        if state.status == JobStatus::Running {
            warn!(requested = %kind, running = %state.step, "Job already running, trigger rejected");
            return Err(AlreadyRunning {
                kind: state.kind,
                step: state.step.clone(),
            });
        }

        *state = JobState {
            status: JobStatus::Running,
            kind: Some(kind),
            step,
            started_at: Some(Local::now()),
            ended_at: None,
            error: None,
            indexed: 0,
        };
        log_transition(&state);

        Ok(JobRun {
            state: Arc::clone(&self.state),
            kind,
            finished: false,
        })
    }

    pub fn snapshot(&self) -> JobState {
        lock(&self.state).clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).status == JobStatus::Running
    }
}

/// Handle on the running job. Dropping it without `complete` or `fail`
/// (for instance on a panic in the worker) records the job as failed.
#[derive(Debug)]
pub struct JobRun {
    state: Arc<Mutex<JobState>>,
    kind: JobKind,
    finished: bool,
}

impl JobRun {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Update the progress label
    pub fn advance(&self, step: impl Into<String>) {
        let mut state = lock(&self.state);
        state.step = step.into();
        log_transition(&state);
    }

    pub fn complete(mut self, indexed: usize) {
        self.finish(JobStatus::Done, indexed, None);
    }

    /// Record the failure. The step label is left at the step that failed.
    pub fn fail(mut self, error: impl Into<String>) {
        self.finish(JobStatus::Error, 0, Some(error.into()));
    }

    fn finish(&mut self, status: JobStatus, indexed: usize, error: Option<String>) {
        let mut state = lock(&self.state);
        state.status = status;
        state.ended_at = Some(Local::now());
        state.indexed = indexed;
        if status == JobStatus::Done {
            state.step = "complete".to_string();
        }
        state.error = error;
        self.finished = true;
        log_transition(&state);
    }
}

impl Drop for JobRun {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(JobStatus::Error, 0, Some("Job ended unexpectedly".to_string()));
        }
    }
}

// A poisoned lock still holds a consistent state: every transition is a
// complete assignment made while holding it.
fn lock(state: &Mutex<JobState>) -> MutexGuard<'_, JobState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn log_transition(state: &JobState) {
    info!(
        status = %state.status,
        step = %state.step,
        indexed = state.indexed,
        error = state.error.as_deref().unwrap_or(""),
        "Job {}: {}",
        state.status,
        state.step
    );
}
