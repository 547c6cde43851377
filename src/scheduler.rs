use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::domain::JobKind;
use crate::error::ArchiverError;
use crate::jobs::JobRunner;

const TICK: Duration = Duration::from_secs(30);

/// Exclusive advisory lock on `scheduler.lock`; released on drop.
#[derive(Debug)]
pub struct LeaderLock {
    file: File,
    path: PathBuf,
}

impl LeaderLock {
    /// `Ok(None)` when another process already holds the lock.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, ArchiverError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|err| ArchiverError::Scheduler(format!("{}: {err}", path.display())))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(ArchiverError::Scheduler(format!(
                "{}: {err}",
                path.display()
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LeaderLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(error = %err, "could not release scheduler lock");
        }
    }
}

type JobFn = Arc<dyn Fn() + Send + Sync>;

struct DailyJob {
    kind: JobKind,
    at: NaiveTime,
    run: JobFn,
    last_run: Option<NaiveDate>,
}

/// Fires each registered job once per day at its configured local time,
/// through the shared [`JobRunner`].
pub struct Scheduler {
    runner: JobRunner,
    jobs: Vec<DailyJob>,
}

impl Scheduler {
    pub fn new(runner: JobRunner) -> Self {
        Self {
            runner,
            jobs: Vec::new(),
        }
    }

    pub fn every_day<F>(mut self, at: NaiveTime, kind: JobKind, run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.jobs.push(DailyJob {
            kind,
            at,
            run: Arc::new(run),
            last_run: None,
        });
        self
    }

    /// Marks every job whose time already passed today as done, so a
    /// restart in the afternoon does not replay the morning jobs.
    pub fn starting_at(mut self, now: DateTime<Local>) -> Self {
        for job in &mut self.jobs {
            if now.time() >= job.at {
                job.last_run = Some(now.date_naive());
            }
        }
        self
    }

    /// Starts every job that is due at `now`; returns the kinds started.
    pub fn tick(&mut self, now: DateTime<Local>) -> Vec<JobKind> {
        let today = now.date_naive();
        let mut started = Vec::new();
        for job in &mut self.jobs {
            if now.time() < job.at || job.last_run == Some(today) {
                continue;
            }
            job.last_run = Some(today);
            let run = job.run.clone();
            match self.runner.try_start(job.kind, move || run()) {
                Ok(_) => {
                    info!(job = %job.kind, "scheduled job started");
                    started.push(job.kind);
                }
                Err(err) => warn!(job = %job.kind, error = %err, "scheduled job skipped"),
            }
        }
        started
    }

    /// Runs the schedule on a background thread until `stop` is set. The
    /// lock is held for as long as the thread lives.
    pub fn spawn(mut self, lock: LeaderLock, stop: Arc<AtomicBool>) -> Result<JoinHandle<()>, ArchiverError> {
        info!(lock = %lock.path().display(), jobs = self.jobs.len(), "scheduler is leader");
        thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || {
                let _lock = lock;
                while !stop.load(Ordering::Relaxed) {
                    self.tick(Local::now());
                    debug!("scheduler tick");
                    thread::sleep(TICK);
                }
            })
            .map_err(|err| ArchiverError::Scheduler(format!("failed to spawn scheduler: {err}")))
    }
}
