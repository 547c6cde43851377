use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::browser::{Browser, BrowserLauncher};
use crate::domain::{ArchiveRange, TargetArtifact};
use crate::error::ArchiverError;
use crate::fetch::{ARCHIVE_PAGE_PAUSE, EditionResult, FetchStatus, Fetcher};
use crate::retry::RetryOutcome;
use crate::session::Session;

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub start: String,
    pub days: u32,
    pub editions: Vec<EditionResult>,
}

impl ArchiveReport {
    /// Paths downloaded during this run, newest date first.
    pub fn fetched(&self) -> Vec<PathBuf> {
        self.editions
            .iter()
            .filter(|edition| edition.is_fresh())
            .filter_map(|edition| edition.path.clone())
            .collect()
    }
}

enum DayOutcome {
    Resolved(PathBuf),
    NoEdition,
}

impl<L: BrowserLauncher> Fetcher<L> {
    /// Walks `range` backwards from its start date, fetching every edition
    /// that is not already on disk. Days without an edition are skipped
    /// without consuming an attempt.
    pub fn run_archive(&self, range: ArchiveRange, sink: &dyn ProgressSink) -> ArchiveReport {
        let mut report = ArchiveReport {
            start: range.start.iso(),
            days: range.days,
            editions: Vec::new(),
        };

        let mut pending = Vec::new();
        for date in range.dates() {
            let target = self.target(date);
            match self.already_resolved(&target) {
                Ok(true) => report
                    .editions
                    .push(EditionResult::new(&target, FetchStatus::AlreadyPresent)),
                Ok(false) => pending.push(target),
                Err(err) => {
                    warn!(date = %date, error = %err, "could not inspect existing edition");
                    report
                        .editions
                        .push(EditionResult::new(&target, FetchStatus::failed(&err)));
                }
            }
        }
        if pending.is_empty() {
            info!(days = range.days, "archive range already complete");
            return report;
        }

        let mut session = match self.open_session() {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, "archive run aborted");
                report.editions.extend(
                    pending
                        .iter()
                        .map(|target| EditionResult::new(target, FetchStatus::failed(&err))),
                );
                sort_newest_first(&mut report.editions);
                return report;
            }
        };

        let total = pending.len();
        for (index, target) in pending.iter().enumerate() {
            sink.event(ProgressEvent::message(format!(
                "archive {} ({}/{total})",
                target.date,
                index + 1
            )));
            let status = self.archive_day(&mut session, target);
            report.editions.push(EditionResult::new(target, status));
        }

        session.logout();
        session.close();
        sort_newest_first(&mut report.editions);
        info!(fetched = report.fetched().len(), days = range.days, "archive run finished");
        report
    }

    fn archive_day(&self, session: &mut Session<L::Browser>, target: &TargetArtifact) -> FetchStatus {
        let outcome = self.settings.retry.run(&*self.clock, &target.file_name, |attempt| {
            info!(date = %target.date, attempt, "archive attempt");
            let result = self.archive_attempt(session, target);
            if result.is_err() && target.current_size() == Some(0) {
                if let Err(err) = fs::remove_file(&target.path) {
                    warn!(file = %target.file_name, error = %err, "could not remove empty file");
                }
            }
            result
        });

        match outcome {
            RetryOutcome::Succeeded {
                value: DayOutcome::Resolved(_),
                attempt,
            } => FetchStatus::Fetched { attempts: attempt },
            RetryOutcome::Succeeded {
                value: DayOutcome::NoEdition,
                ..
            } => {
                info!(date = %target.date, "no edition");
                FetchStatus::NoEdition
            }
            RetryOutcome::Exhausted { last } => {
                warn!(date = %target.date, error = %last, "giving up on date");
                FetchStatus::failed(&last)
            }
            RetryOutcome::Fatal { error, .. } => {
                error!(date = %target.date, error = %error, "giving up on date");
                FetchStatus::failed(&error)
            }
        }
    }

    fn archive_attempt(
        &self,
        session: &mut Session<L::Browser>,
        target: &TargetArtifact,
    ) -> Result<DayOutcome, ArchiverError> {
        let iso = target.date.iso();
        let url = self.settings.portal.archive_url(&iso);
        let link = self.settings.portal.archive_link_selector(&iso);

        session.browser()?.navigate(&url)?;
        self.clock.sleep(ARCHIVE_PAGE_PAUSE);
        if !session.browser()?.exists(&link)? {
            return Ok(DayOutcome::NoEdition);
        }

        self.sweep()?;
        let snapshot = self.snapshot()?;
        session.browser()?.click(&link)?;
        self.clock.sleep(ARCHIVE_PAGE_PAUSE);
        session.close_popups();

        self.settle_download(&snapshot, target)
            .map(DayOutcome::Resolved)
    }
}

fn sort_newest_first(editions: &mut [EditionResult]) {
    editions.sort_by(|a, b| b.date.cmp(&a.date));
}
