//! Completion detection for a browser-triggered download.
//!
//! The browser gives no reliable "download finished" signal, so the
//! reconciler watches the download directory: a file that was not in the
//! pre-click [`DownloadSnapshot`] becomes a [`PendingCandidate`], and is only
//! accepted once no `.crdownload` sibling exists and two samples taken
//! `settle_interval` apart agree on a non-zero size.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::domain::{IN_PROGRESS_EXT, TargetArtifact};
use crate::error::ArchiverError;
use crate::store::{DownloadSnapshot, Store, list_with_ext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileTiming {
    pub timeout: Duration,
    /// How long a candidate may sit at zero bytes before it is discarded.
    pub stuck_budget: Duration,
    pub poll_interval: Duration,
    pub settle_interval: Duration,
}

impl Default for ReconcileTiming {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            stuck_budget: Duration::from_secs(20),
            poll_interval: Duration::from_secs(1),
            settle_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    New,
    InProgress,
    Growing,
    Stable,
    Resolved,
    Discarded,
}

#[derive(Debug, Clone)]
pub struct PendingCandidate {
    pub path: PathBuf,
    pub state: CandidateState,
    pub last_size: Option<u64>,
    zero_since: Option<Duration>,
}

impl PendingCandidate {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: CandidateState::New,
            last_size: None,
            zero_since: None,
        }
    }

    fn name(&self) -> String {
        file_name(&self.path)
    }
}

/// What one poll concluded about the tracked candidate.
enum Step {
    Wait,
    Done(PathBuf),
}

pub struct Reconciler<C: Clock> {
    clock: C,
    timing: ReconcileTiming,
}

impl<C: Clock> Reconciler<C> {
    pub fn new(clock: C, timing: ReconcileTiming) -> Self {
        Self { clock, timing }
    }

    /// Blocks until a new file has fully landed and sits at `target.path`.
    pub fn reconcile(
        &self,
        snapshot: &DownloadSnapshot,
        target: &TargetArtifact,
    ) -> Result<PathBuf, ArchiverError> {
        let dir = target
            .path
            .parent()
            .ok_or_else(|| ArchiverError::Filesystem("target has no parent directory".into()))?
            .to_path_buf();
        info!(target = %target.file_name, "waiting for new download");

        let started = self.clock.elapsed();
        let mut tracked: Option<PendingCandidate> = None;

        while self.clock.elapsed().saturating_sub(started) < self.timing.timeout {
            let new_files = snapshot.new_files(&dir)?;
            if let Some(path) = pick_candidate(&new_files) {
                let candidate = match tracked.take() {
                    Some(existing) if existing.path == path => existing,
                    _ => {
                        debug!(candidate = %file_name(&path), "new file observed");
                        PendingCandidate::new(path)
                    }
                };
                let candidate = tracked.insert(candidate);
                if let Step::Done(path) = self.step(candidate, &dir, target)? {
                    return Ok(path);
                }
            }
            self.clock.sleep(self.timing.poll_interval);
        }

        if let Some(candidate) = &tracked {
            warn!(
                candidate = %candidate.name(),
                state = ?candidate.state,
                "download never completed"
            );
        }
        Err(ArchiverError::DownloadTimeout {
            target: target.file_name.clone(),
            seconds: self.timing.timeout.as_secs(),
        })
    }

    fn step(
        &self,
        candidate: &mut PendingCandidate,
        dir: &Path,
        target: &TargetArtifact,
    ) -> Result<Step, ArchiverError> {
        if has_in_progress_sibling(dir, &candidate.path)? {
            candidate.state = CandidateState::InProgress;
            candidate.zero_since = None;
            return Ok(Step::Wait);
        }

        let Some(size) = file_size(&candidate.path) else {
            // renamed or removed under us; the next poll picks again
            candidate.state = CandidateState::New;
            return Ok(Step::Wait);
        };

        if size == 0 {
            let now = self.clock.elapsed();
            let since = *candidate.zero_since.get_or_insert(now);
            let stuck = now.saturating_sub(since);
            if stuck > self.timing.stuck_budget {
                warn!(
                    candidate = %candidate.name(),
                    seconds = stuck.as_secs(),
                    "download stuck at zero bytes, discarding"
                );
                candidate.state = CandidateState::Discarded;
                if let Err(err) = fs::remove_file(&candidate.path) {
                    warn!(candidate = %candidate.name(), error = %err, "could not remove stalled file");
                }
                return Err(ArchiverError::DownloadStalled {
                    path: candidate.path.clone(),
                    seconds: stuck.as_secs(),
                });
            }
            return Ok(Step::Wait);
        }
        candidate.zero_since = None;

        self.clock.sleep(self.timing.settle_interval);
        let settled = file_size(&candidate.path);
        candidate.last_size = settled;
        if settled != Some(size) {
            candidate.state = CandidateState::Growing;
            return Ok(Step::Wait);
        }
        candidate.state = CandidateState::Stable;
        info!(candidate = %candidate.name(), bytes = size, "download complete");

        if candidate.path != target.path {
            Store::replace_onto(&candidate.path, &target.path)?;
            info!(from = %candidate.name(), to = %target.file_name, "saved under canonical name");
        }
        candidate.state = CandidateState::Resolved;
        Ok(Step::Done(target.path.clone()))
    }
}

/// Newest modification time wins; ties go to the greatest name.
pub fn pick_candidate(paths: &[PathBuf]) -> Option<PathBuf> {
    paths
        .iter()
        .map(|path| {
            let modified = fs::metadata(path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, file_name(path), path)
        })
        .max_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)))
        .map(|(_, _, path)| path.clone())
}

fn has_in_progress_sibling(dir: &Path, candidate: &Path) -> Result<bool, ArchiverError> {
    let name = file_name(candidate);
    Ok(list_with_ext(dir, IN_PROGRESS_EXT)?
        .iter()
        .any(|partial| file_name(partial).starts_with(&name)))
}

fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|meta| meta.len())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
