//! Pieces shared by the daily and archive orchestrators: settings, the
//! per-edition result type, and the session bootstrap.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::browser::{BrowserLauncher, LaunchOptions};
use crate::config::{Credentials, PortalSettings, ResolvedConfig, Timing};
use crate::domain::{EditionDate, Publication, TargetArtifact};
use crate::error::ArchiverError;
use crate::reconcile::Reconciler;
use crate::retry::RetryPolicy;
use crate::session::{Session, SharedClock};
use crate::store::{DownloadSnapshot, Store, TargetStatus};
use crate::sweeper::Sweeper;

/// Pause after the refresh that precedes a repeated daily attempt.
pub const REFRESH_PAUSE: Duration = Duration::from_secs(3);
/// Pause after clicking the daily download control.
pub const DAILY_CLICK_PAUSE: Duration = Duration::from_secs(2);
/// Pause after loading a dated archive view and after clicking its link.
pub const ARCHIVE_PAGE_PAUSE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub publication: Publication,
    pub min_valid_bytes: u64,
    pub portal: PortalSettings,
    pub credentials: Credentials,
    pub timing: Timing,
    pub retry: RetryPolicy,
    pub launch: LaunchOptions,
}

impl FetchSettings {
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, ArchiverError> {
        let credentials = config.require_credentials()?.clone();
        let mut launch = LaunchOptions::new(config.download_dir.clone());
        launch.headless = config.headless;
        launch.proxy = config.proxy.clone();
        Ok(Self {
            publication: config.publication.clone(),
            min_valid_bytes: config.min_valid_bytes,
            portal: config.portal.clone(),
            credentials,
            timing: config.timing.clone(),
            retry: RetryPolicy::new(3, config.timing.retry_backoff),
            launch,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum FetchStatus {
    /// A valid file was already at the canonical path; nothing was clicked.
    AlreadyPresent,
    Fetched { attempts: u32 },
    /// The portal has no edition for this date.
    NoEdition,
    Failed { reason: String },
}

impl FetchStatus {
    pub fn failed(err: &ArchiverError) -> Self {
        FetchStatus::Failed {
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EditionResult {
    pub date: EditionDate,
    pub file_name: String,
    pub path: Option<PathBuf>,
    #[serde(flatten)]
    pub status: FetchStatus,
}

impl EditionResult {
    pub(crate) fn new(target: &TargetArtifact, status: FetchStatus) -> Self {
        let path = match status {
            FetchStatus::AlreadyPresent | FetchStatus::Fetched { .. } => Some(target.path.clone()),
            _ => None,
        };
        Self {
            date: target.date,
            file_name: target.file_name.clone(),
            path,
            status,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.path.is_some()
    }

    /// Downloaded during this run, as opposed to found on disk.
    pub fn is_fresh(&self) -> bool {
        matches!(self.status, FetchStatus::Fetched { .. })
    }
}

/// Drives the portal for one run. Generic over the launcher so tests can
/// substitute a scripted browser.
pub struct Fetcher<L: BrowserLauncher> {
    pub(crate) launcher: L,
    pub(crate) settings: FetchSettings,
    pub(crate) store: Store,
    pub(crate) clock: SharedClock,
}

impl<L: BrowserLauncher> Fetcher<L> {
    pub fn new(launcher: L, settings: FetchSettings, clock: SharedClock) -> Result<Self, ArchiverError> {
        let store = Store::new(&settings.launch.download_dir)?;
        Ok(Self {
            launcher,
            settings,
            store,
            clock,
        })
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn target(&self, date: EditionDate) -> TargetArtifact {
        self.store
            .target(date, &self.settings.publication, self.settings.min_valid_bytes)
    }

    /// `Ok(true)` when the edition is already on disk and valid.
    pub(crate) fn already_resolved(&self, target: &TargetArtifact) -> Result<bool, ArchiverError> {
        let status = self.store.check_target(target)?;
        if status == TargetStatus::Valid {
            info!(file = %target.file_name, "edition already present, skipping");
        }
        Ok(status == TargetStatus::Valid)
    }

    pub(crate) fn open_session(&self) -> Result<Session<L::Browser>, ArchiverError> {
        let mut session = Session::open(
            &self.launcher,
            &self.settings.launch,
            self.settings.portal.clone(),
            self.settings.timing.wait_timeout,
            self.clock.clone(),
        )?;
        if let Err(err) = session.login(&self.settings.credentials) {
            error!(error = %err, "login failed");
            session.close();
            return Err(err);
        }
        Ok(session)
    }

    pub(crate) fn reconciler(&self) -> Reconciler<SharedClock> {
        Reconciler::new(self.clock.clone(), self.settings.timing.reconcile)
    }

    /// Reconciles the triggered download and rejects a result that does not
    /// clear the size threshold; the stub is removed so the retry starts clean.
    pub(crate) fn settle_download(
        &self,
        snapshot: &DownloadSnapshot,
        target: &TargetArtifact,
    ) -> Result<PathBuf, ArchiverError> {
        let path = self.reconciler().reconcile(snapshot, target)?;
        if target.is_valid() {
            return Ok(path);
        }
        let bytes = target.current_size().unwrap_or(0);
        warn!(
            file = %target.file_name,
            bytes,
            min = target.min_valid_bytes,
            "download too small, discarding"
        );
        if let Err(err) = fs::remove_file(&path) {
            warn!(file = %target.file_name, error = %err, "could not remove undersized file");
        }
        Err(ArchiverError::UndersizedDownload {
            path,
            bytes,
            min_bytes: target.min_valid_bytes,
        })
    }

    pub(crate) fn sweep(&self) -> Result<(), ArchiverError> {
        Sweeper::new(self.store.root().as_std_path()).sweep()?;
        Ok(())
    }

    pub(crate) fn snapshot(&self) -> Result<DownloadSnapshot, ArchiverError> {
        DownloadSnapshot::capture(self.store.root().as_std_path())
    }
}
