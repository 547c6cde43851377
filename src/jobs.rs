use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::JobKind;
use crate::error::ArchiverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum JobState {
    Idle,
    Running {
        kind: JobKind,
        started_at: DateTime<Local>,
    },
}

impl JobState {
    pub fn is_busy(&self) -> bool {
        matches!(self, JobState::Running { .. })
    }

    pub fn kind(&self) -> Option<JobKind> {
        match self {
            JobState::Idle => None,
            JobState::Running { kind, .. } => Some(*kind),
        }
    }
}

/// Admits at most one background job at a time across the whole process.
#[derive(Debug, Clone)]
pub struct JobRunner {
    state: Arc<Mutex<JobState>>,
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Resets the runner to `Idle` when dropped, including during unwinding.
#[derive(Debug)]
pub struct JobGuard {
    state: Arc<Mutex<JobState>>,
    kind: JobKind,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        *lock(&self.state) = JobState::Idle;
        info!(job = %self.kind, "job finished");
    }
}

impl JobRunner {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(JobState::Idle)),
        }
    }

    pub fn state(&self) -> JobState {
        *lock(&self.state)
    }

    pub fn is_busy(&self) -> bool {
        self.state().is_busy()
    }

    /// Claims the runner without blocking; `JobBusy` if a job is running.
    pub fn acquire(&self, kind: JobKind) -> Result<JobGuard, ArchiverError> {
        let mut state = lock(&self.state);
        if let JobState::Running { kind: running, .. } = *state {
            warn!(requested = %kind, running = %running, "job rejected, runner busy");
            return Err(ArchiverError::JobBusy(running.to_string()));
        }
        *state = JobState::Running {
            kind,
            started_at: Local::now(),
        };
        info!(job = %kind, "job started");
        Ok(JobGuard {
            state: self.state.clone(),
            kind,
        })
    }

    /// Runs `job` on a worker thread if the runner is idle.
    pub fn try_start<F>(&self, kind: JobKind, job: F) -> Result<JoinHandle<()>, ArchiverError>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.acquire(kind)?;
        thread::Builder::new()
            .name(format!("job-{kind}"))
            .spawn(move || {
                let _guard = guard;
                job();
            })
            .map_err(|err| ArchiverError::Server(format!("failed to spawn job thread: {err}")))
    }
}

fn lock(state: &Mutex<JobState>) -> MutexGuard<'_, JobState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
