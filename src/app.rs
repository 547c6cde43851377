use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::archive::ArchiveReport;
use crate::browser::BrowserLauncher;
use crate::clock::SystemClock;
use crate::compress::{CompressionOutcome, Compressor};
use crate::config::ResolvedConfig;
use crate::domain::{ArchiveRange, EditionDate, JobKind};
use crate::error::ArchiverError;
use crate::fetch::{EditionResult, FetchSettings, Fetcher};
use crate::indexer::{ArchiveEntry, Indexer, RebuildReport, SearchHit};
use crate::jobs::{JobRunner, JobState};
use crate::notify::{Notifier, notify_quietly};
use crate::session::SharedClock;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct PostFetch {
    pub compressed: Option<CompressionOutcome>,
    pub indexed: bool,
    pub thumbnail: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyResult {
    pub edition: EditionResult,
    pub post: Option<PostFetch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveResult {
    pub report: ArchiveReport,
    pub fetched: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub files: Vec<ArchiveEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub job: JobState,
    pub files: usize,
    pub indexed: usize,
}

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Fetch,
    Archive,
    Reindex,
    Compress,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Sink for background jobs; progress only reaches the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        info!("{}", event.message);
    }
}

/// Optional collaborators around the fetch pipeline.
pub struct Services {
    pub indexer: Indexer,
    pub compressor: Option<Box<dyn Compressor>>,
    pub notifier: Option<Box<dyn Notifier>>,
    pub clock: SharedClock,
}

impl Services {
    pub fn new(indexer: Indexer) -> Self {
        Self {
            indexer,
            compressor: None,
            notifier: None,
            clock: Arc::new(SystemClock::new()),
        }
    }
}

struct AppInner<L> {
    config: ResolvedConfig,
    store: Store,
    launcher: L,
    services: Services,
    runner: JobRunner,
}

/// Entry point shared by the CLI, the scheduler and the web front end.
/// Cloning is cheap; all clones share one [`JobRunner`].
pub struct App<L: BrowserLauncher + Clone + 'static> {
    inner: Arc<AppInner<L>>,
}

impl<L: BrowserLauncher + Clone + 'static> Clone for App<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: BrowserLauncher + Clone + 'static> App<L> {
    pub fn new(config: ResolvedConfig, launcher: L, services: Services) -> Result<Self, ArchiverError> {
        let store = Store::new(&config.download_dir)?;
        store.ensure_dirs()?;
        Ok(Self {
            inner: Arc::new(AppInner {
                config,
                store,
                launcher,
                services,
                runner: JobRunner::new(),
            }),
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn runner(&self) -> &JobRunner {
        &self.inner.runner
    }

    pub fn is_busy(&self) -> bool {
        self.inner.runner.is_busy()
    }

    fn fetcher(&self) -> Result<Fetcher<L>, ArchiverError> {
        let settings = FetchSettings::from_config(&self.inner.config)?;
        Fetcher::new(
            self.inner.launcher.clone(),
            settings,
            self.inner.services.clock.clone(),
        )
    }

    pub fn fetch_daily(&self, date: EditionDate, sink: &dyn ProgressSink) -> Result<DailyResult, ArchiverError> {
        let _guard = self.inner.runner.acquire(JobKind::DailyFetch)?;
        self.daily_job(date, sink)
    }

    pub fn fetch_archive(
        &self,
        range: ArchiveRange,
        sink: &dyn ProgressSink,
    ) -> Result<ArchiveResult, ArchiverError> {
        let _guard = self.inner.runner.acquire(JobKind::ArchiveBackfill)?;
        self.archive_job(range, sink)
    }

    pub fn reindex(&self, sink: &dyn ProgressSink) -> Result<RebuildReport, ArchiverError> {
        let _guard = self.inner.runner.acquire(JobKind::FullReindex)?;
        self.reindex_job(sink)
    }

    pub fn compress(&self, path: &Path, sink: &dyn ProgressSink) -> Result<CompressionOutcome, ArchiverError> {
        let _guard = self.inner.runner.acquire(JobKind::Compression)?;
        let compressor = self
            .inner
            .services
            .compressor
            .as_deref()
            .ok_or_else(|| ArchiverError::MissingTool("ghostscript".to_string()))?;
        sink.event(ProgressEvent::message(format!("compressing {}", path.display())));
        compressor.compress(path)
    }

    /// Starts today's fetch on a worker thread, `JobBusy` if a job is running.
    pub fn spawn_daily(&self) -> Result<JoinHandle<()>, ArchiverError> {
        let app = self.clone();
        self.inner
            .runner
            .try_start(JobKind::DailyFetch, move || app.run_admitted(JobKind::DailyFetch))
    }

    pub fn spawn_archive(&self, range: ArchiveRange) -> Result<JoinHandle<()>, ArchiverError> {
        let app = self.clone();
        self.inner.runner.try_start(JobKind::ArchiveBackfill, move || {
            if let Err(err) = app.archive_job(range, &LogSink) {
                error!(error = %err, "archive job failed");
            }
        })
    }

    pub fn spawn_reindex(&self) -> Result<JoinHandle<()>, ArchiverError> {
        let app = self.clone();
        self.inner
            .runner
            .try_start(JobKind::FullReindex, move || app.run_admitted(JobKind::FullReindex))
    }

    /// Body of a job the runner already admitted (the caller holds the
    /// guard). Used by the scheduler; archive and compression need
    /// arguments and are ignored here.
    pub fn run_admitted(&self, kind: JobKind) {
        let result = match kind {
            JobKind::DailyFetch => self.daily_job(EditionDate::today(), &LogSink).map(|_| ()),
            JobKind::FullReindex => self.reindex_job(&LogSink).map(|_| ()),
            JobKind::ArchiveBackfill | JobKind::Compression => {
                warn!(job = %kind, "job needs arguments, not run");
                Ok(())
            }
        };
        if let Err(err) = result {
            error!(job = %kind, error = %err, "job failed");
        }
    }

    fn daily_job(&self, date: EditionDate, sink: &dyn ProgressSink) -> Result<DailyResult, ArchiverError> {
        let start = Instant::now();
        let fetcher = self.fetcher()?;
        let edition = fetcher.run_daily(date, sink);
        let post = edition
            .path
            .as_deref()
            .map(|path| self.post_fetch(path, edition.is_fresh(), sink));
        if edition.is_fresh() {
            notify_quietly(
                self.inner.services.notifier.as_deref(),
                &format!("New edition downloaded: {}", edition.file_name),
            );
        }
        sink.event(ProgressEvent {
            message: format!("daily fetch finished: {}", edition.file_name),
            elapsed: Some(start.elapsed()),
        });
        Ok(DailyResult { edition, post })
    }

    fn archive_job(&self, range: ArchiveRange, sink: &dyn ProgressSink) -> Result<ArchiveResult, ArchiverError> {
        let start = Instant::now();
        let fetcher = self.fetcher()?;
        let report = fetcher.run_archive(range, sink);
        let fetched = report.fetched();
        for path in &fetched {
            self.post_fetch(path, true, sink);
        }
        if !fetched.is_empty() {
            notify_quietly(
                self.inner.services.notifier.as_deref(),
                &format!(
                    "Archive download from {} ({} days) finished: {} new editions",
                    report.start,
                    report.days,
                    fetched.len()
                ),
            );
        }
        sink.event(ProgressEvent {
            message: format!("archive finished: {} new editions", fetched.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(ArchiveResult { report, fetched })
    }

    fn reindex_job(&self, sink: &dyn ProgressSink) -> Result<RebuildReport, ArchiverError> {
        let start = Instant::now();
        sink.event(ProgressEvent::message("rebuilding index"));
        let report = self.inner.services.indexer.rebuild()?;
        sink.event(ProgressEvent {
            message: format!("index rebuilt: {} new, {} pruned", report.indexed, report.pruned),
            elapsed: Some(start.elapsed()),
        });
        Ok(report)
    }

    /// Compression runs only for freshly downloaded files; indexing and
    /// thumbnails are idempotent and run for every resolved edition.
    fn post_fetch(&self, path: &Path, fresh: bool, sink: &dyn ProgressSink) -> PostFetch {
        let services = &self.inner.services;
        let mut post = PostFetch {
            compressed: None,
            indexed: false,
            thumbnail: false,
        };

        if fresh && self.inner.config.compress_after_fetch {
            if let Some(compressor) = services.compressor.as_deref() {
                sink.event(ProgressEvent::message("compressing"));
                match compressor.compress(path) {
                    Ok(outcome) => post.compressed = Some(outcome),
                    Err(err) => warn!(file = %path.display(), error = %err, "compression failed"),
                }
            }
        }

        sink.event(ProgressEvent::message("indexing"));
        match services.indexer.index_file(path) {
            Ok(_) => post.indexed = true,
            Err(err) => warn!(file = %path.display(), error = %err, "indexing failed"),
        }
        match services.indexer.ensure_thumbnail(path) {
            Ok(_) => post.thumbnail = self.inner.store.thumbnail_path(path).exists(),
            Err(err) => warn!(file = %path.display(), error = %err, "thumbnail failed"),
        }
        post
    }

    pub fn search(&self, query: &str) -> SearchResult {
        SearchResult {
            query: query.trim().to_string(),
            hits: self.inner.services.indexer.search(query),
        }
    }

    pub fn list(&self) -> Result<ListResult, ArchiverError> {
        Ok(ListResult {
            files: self.inner.services.indexer.list()?,
        })
    }

    pub fn status(&self) -> Result<StatusResult, ArchiverError> {
        let files = self.inner.services.indexer.list()?;
        Ok(StatusResult {
            job: self.inner.runner.state(),
            indexed: files.iter().filter(|entry| entry.indexed).count(),
            files: files.len(),
        })
    }
}
