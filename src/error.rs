use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ArchiverError {
    #[error("authentication failed: {0}")]
    #[diagnostic(help("check PAPER_USER / PAPER_PASS and that the portal login page still matches the configured selectors"))]
    Authentication(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("download stalled at zero bytes for {seconds}s: {path}")]
    DownloadStalled { path: PathBuf, seconds: u64 },

    #[error("no completed download within {seconds}s for {target}")]
    DownloadTimeout { target: String, seconds: u64 },

    #[error("download of {bytes} bytes is not above the {min_bytes}-byte minimum: {path}")]
    UndersizedDownload {
        path: PathBuf,
        bytes: u64,
        min_bytes: u64,
    },

    #[error("could not move {from} onto {to}: {message}")]
    RenameCollision {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("failed to launch browser: {0}")]
    BrowserLaunch(String),

    #[error("invalid edition date: {0}")]
    InvalidDate(String),

    #[error("invalid archive range: {0}")]
    InvalidRange(String),

    #[error("missing portal credentials (set PAPER_USER and PAPER_PASS)")]
    MissingCredentials,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("external tool failed: {0}")]
    ToolFailed(String),

    #[error("index error: {0}")]
    Index(#[from] rusqlite::Error),

    #[error("file not found in archive: {0}")]
    ArtifactNotFound(String),

    #[error("another job is already running: {0}")]
    JobBusy(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("webhook request failed: {0}")]
    WebhookHttp(String),

    #[error("webhook returned status {status}: {message}")]
    WebhookStatus { status: u16, message: String },

    #[error("server error: {0}")]
    Server(String),

    #[error("worker thread exited without a result")]
    WorkerLost,
}

impl ArchiverError {
    /// Attempt-level failures that a fresh click may cure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArchiverError::DownloadStalled { .. }
                | ArchiverError::DownloadTimeout { .. }
                | ArchiverError::UndersizedDownload { .. }
                | ArchiverError::RenameCollision { .. }
                | ArchiverError::ElementNotFound(_)
                | ArchiverError::Browser(_)
                | ArchiverError::Filesystem(_)
        )
    }
}
