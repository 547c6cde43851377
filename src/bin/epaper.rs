use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::{info, warn};

use epaper_archiver::app::{App, ProgressSinkKind, Services};
use epaper_archiver::chrome::ChromeLauncher;
use epaper_archiver::compress::{Compressor, Ghostscript};
use epaper_archiver::config::{ConfigLoader, ResolvedConfig};
use epaper_archiver::domain::{ArchiveRange, EditionDate, JobKind};
use epaper_archiver::error::ArchiverError;
use epaper_archiver::fetch::FetchStatus;
use epaper_archiver::indexer::{Indexer, Pdftotext, TextExtractor, Thumbnailer, Unavailable};
use epaper_archiver::logging;
use epaper_archiver::notify::{Notifier, WebhookNotifier};
use epaper_archiver::output::{JsonOutput, OutputMode};
use epaper_archiver::scheduler::{LeaderLock, Scheduler};
use epaper_archiver::store::Store;
use epaper_archiver::tools;
use epaper_archiver::tui::Tui;
use epaper_archiver::web;

#[derive(Parser)]
#[command(name = "epaper")]
#[command(about = "Downloads daily e-paper editions and keeps a searchable local archive")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// JSON config file (defaults to ./epaper.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch one edition from the dashboard (today by default)")]
    Fetch(FetchArgs),
    #[command(about = "Backfill editions from the portal archive")]
    Archive(ArchiveArgs),
    #[command(about = "Index new files, prune stale rows and render missing thumbnails")]
    Reindex,
    #[command(about = "Recompress a PDF in place when it gets smaller")]
    Compress(CompressArgs),
    #[command(about = "Full-text search over indexed editions")]
    Search(SearchArgs),
    #[command(about = "List archived editions")]
    List,
    #[command(about = "Show job state and archive counts")]
    Status,
    #[command(about = "Run the web front end and the daily scheduler")]
    Serve(ServeArgs),
}

#[derive(Args)]
struct FetchArgs {
    /// Edition date, YYYY-MM-DD
    #[arg(long)]
    date: Option<EditionDate>,
}

#[derive(Args)]
struct ArchiveArgs {
    /// Newest date of the range, YYYY-MM-DD
    #[arg(long)]
    date: EditionDate,

    /// Number of days to walk back from --date
    #[arg(long, default_value_t = 1)]
    days: u32,
}

#[derive(Args)]
struct CompressArgs {
    file: PathBuf,
}

#[derive(Args)]
struct SearchArgs {
    query: String,
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:5000")]
    bind: SocketAddr,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ArchiverError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ArchiverError) -> u8 {
    match error {
        ArchiverError::MissingCredentials
        | ArchiverError::ConfigRead(_)
        | ArchiverError::ConfigParse(_)
        | ArchiverError::InvalidDate(_)
        | ArchiverError::InvalidRange(_) => 2,
        ArchiverError::Authentication(_)
        | ArchiverError::BrowserLaunch(_)
        | ArchiverError::MissingTool(_) => 3,
        ArchiverError::JobBusy(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let output_mode = OutputMode::from_flag(cli.non_interactive);

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let store = Store::new(&config.download_dir)?;
    store.ensure_dirs()?;
    // The TUI owns the terminal; interactive runs log to the file only.
    let stderr = output_mode.logs_to_stderr() || matches!(cli.command, Commands::Serve(_));
    logging::init(Some(store.log_path().as_std_path()), stderr)?;
    info!(
        download_dir = %config.download_dir.display(),
        publication = %config.publication,
        headless = config.headless,
        "configuration loaded"
    );

    let app = build_app(config, store)?;

    match cli.command {
        Commands::Fetch(args) => run_fetch(app, args, output_mode),
        Commands::Archive(args) => run_archive(app, args, output_mode),
        Commands::Reindex => run_reindex(app, output_mode),
        Commands::Compress(args) => run_compress(app, args, output_mode),
        Commands::Search(args) => run_search(app, args, output_mode),
        Commands::List => run_list(app, output_mode),
        Commands::Status => run_status(app, output_mode),
        Commands::Serve(args) => run_serve(app, args),
    }
}

fn build_app(config: ResolvedConfig, store: Store) -> Result<App<ChromeLauncher>, ArchiverError> {
    let launcher = match std::env::var_os("CHROME_PATH") {
        Some(path) => ChromeLauncher::with_executable(PathBuf::from(path)),
        None => ChromeLauncher::new(),
    };
    match launcher.executable() {
        Some(path) => info!(chrome = %path.display(), "browser found"),
        None => warn!("no chrome executable on PATH, fetches will fail to launch"),
    }

    let extractor: Box<dyn TextExtractor> = match Pdftotext::locate() {
        Ok(tool) => {
            info!(pdftotext = %tool.executable().display(), "text extractor found");
            Box::new(tool)
        }
        Err(err) => {
            warn!(error = %err, "full-text indexing disabled");
            Box::new(Unavailable("pdftotext".to_string()))
        }
    };

    let ghostscript = match Ghostscript::locate() {
        Ok(gs) => {
            let version = tools::tool_version(gs.executable(), &["--version"]).unwrap_or_default();
            info!(ghostscript = %gs.executable().display(), %version, "ghostscript found");
            Some(gs)
        }
        Err(err) => {
            warn!(error = %err, "compression and thumbnails disabled");
            None
        }
    };
    let thumbnailer = ghostscript
        .clone()
        .map(|gs| Box::new(gs) as Box<dyn Thumbnailer>);

    let mut services = Services::new(Indexer::new(store, extractor, thumbnailer)?);
    services.compressor = ghostscript.map(|gs| Box::new(gs) as Box<dyn Compressor>);
    services.notifier = match config.webhook_url.as_deref() {
        Some(url) => Some(Box::new(WebhookNotifier::new(url)?) as Box<dyn Notifier>),
        None => None,
    };

    App::new(config, launcher, services)
}

fn run_fetch(app: App<ChromeLauncher>, args: FetchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let date = args.date.unwrap_or_else(EditionDate::today);
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.fetch_daily(date, &JsonOutput)?;
            JsonOutput::print(&result).into_diagnostic()?;
            fail_on_status(&result.edition.status)
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Fetch);
            let result = tui.run(move |sink| app.fetch_daily(date, sink))?;
            let mut lines = vec![format!(
                "{}: {}",
                result.edition.file_name,
                status_label(&result.edition.status)
            )];
            if let Some(compressed) = result.post.as_ref().and_then(|post| post.compressed.as_ref()) {
                lines.push(format!(
                    "compressed {:.1}% ({} -> {} bytes)",
                    compressed.savings_percent(),
                    compressed.original_bytes,
                    compressed.final_bytes
                ));
            }
            tui.finish(lines)?;
            fail_on_status(&result.edition.status)
        }
    }
}

fn run_archive(app: App<ChromeLauncher>, args: ArchiveArgs, output_mode: OutputMode) -> miette::Result<()> {
    let range = ArchiveRange::new(args.date, args.days)?;
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.fetch_archive(range, &JsonOutput)?;
            JsonOutput::print(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Archive);
            let result = tui.run(move |sink| app.fetch_archive(range, sink))?;
            let mut lines = vec![format!(
                "{} new editions over {} days",
                result.fetched.len(),
                result.report.days
            )];
            lines.extend(
                result
                    .report
                    .editions
                    .iter()
                    .map(|edition| format!("{}: {}", edition.date, status_label(&edition.status))),
            );
            tui.finish(lines)?;
            Ok(())
        }
    }
}

fn run_reindex(app: App<ChromeLauncher>, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.reindex(&JsonOutput)?;
            JsonOutput::print(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Reindex);
            let report = tui.run(move |sink| app.reindex(sink))?;
            tui.finish(vec![
                format!("indexed: {}", report.indexed),
                format!("already indexed: {}", report.already_indexed),
                format!("failed: {}", report.failed),
                format!("pruned: {}", report.pruned),
                format!("thumbnails: {}", report.thumbnails),
            ])
        }
    }
}

fn run_compress(app: App<ChromeLauncher>, args: CompressArgs, output_mode: OutputMode) -> miette::Result<()> {
    let path = args.file;
    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.compress(&path, &JsonOutput)?;
            JsonOutput::print(&result).into_diagnostic()?;
            Ok(())
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(ProgressSinkKind::Compress);
            let outcome = tui.run(move |sink| app.compress(&path, sink))?;
            let verdict = match outcome.pass {
                Some(pass) if outcome.replaced => format!("replaced using the {pass} pass"),
                _ => "kept original".to_string(),
            };
            tui.finish(vec![
                format!("{}: {verdict}", outcome.file),
                format!(
                    "{} -> {} bytes ({:.1}%)",
                    outcome.original_bytes,
                    outcome.final_bytes,
                    outcome.savings_percent()
                ),
            ])
        }
    }
}

fn run_search(app: App<ChromeLauncher>, args: SearchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.search(&args.query);
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Interactive => {
            if result.hits.is_empty() {
                println!("no matches for \"{}\"", result.query);
            }
            for hit in &result.hits {
                println!("{}  {}", hit.date, hit.filename);
                println!("    {}", hit.snippet);
            }
            Ok(())
        }
    }
}

fn run_list(app: App<ChromeLauncher>, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.list()?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Interactive => {
            for entry in &result.files {
                println!(
                    "{:<40} {:>8}  {}{}",
                    entry.filename,
                    bytes_to_human(entry.size_bytes),
                    entry.week.as_deref().unwrap_or("-"),
                    if entry.indexed { "" } else { "  (not indexed)" }
                );
            }
            println!("{} files", result.files.len());
            Ok(())
        }
    }
}

fn run_status(app: App<ChromeLauncher>, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.status()?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(&result).into_diagnostic(),
        OutputMode::Interactive => {
            let job = match result.job.kind() {
                Some(kind) => format!("running {kind}"),
                None => "idle".to_string(),
            };
            println!("job: {job}");
            println!("files: {} ({} indexed)", result.files, result.indexed);
            Ok(())
        }
    }
}

fn run_serve(app: App<ChromeLauncher>, args: ServeArgs) -> miette::Result<()> {
    let schedule = app.config().schedule;
    let users = app.config().web_users.clone();
    let stop = Arc::new(AtomicBool::new(false));

    let lock_path = app.store().scheduler_lock_path();
    let scheduler = match LeaderLock::try_acquire(lock_path.as_std_path())? {
        Some(lock) => {
            let daily = app.clone();
            let reindex = app.clone();
            let handle = Scheduler::new(app.runner().clone())
                .every_day(schedule.fetch_at, JobKind::DailyFetch, move || {
                    daily.run_admitted(JobKind::DailyFetch)
                })
                .every_day(schedule.reindex_at, JobKind::FullReindex, move || {
                    reindex.run_admitted(JobKind::FullReindex)
                })
                .starting_at(Local::now())
                .spawn(lock, stop.clone())?;
            Some(handle)
        }
        None => {
            info!("another process holds the scheduler lock, serving only");
            None
        }
    };

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    let served = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(args.bind)
            .await
            .map_err(|err| ArchiverError::Server(format!("bind {}: {err}", args.bind)))?;
        web::serve(listener, app, users, async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
        })
        .await
    });

    stop.store(true, Ordering::Relaxed);
    if let Some(handle) = scheduler {
        handle.join().ok();
    }
    served?;
    Ok(())
}

fn fail_on_status(status: &FetchStatus) -> miette::Result<()> {
    match status {
        FetchStatus::Failed { reason } => Err(miette::Report::msg(format!("fetch failed: {reason}"))),
        _ => Ok(()),
    }
}

fn status_label(status: &FetchStatus) -> String {
    match status {
        FetchStatus::AlreadyPresent => "already present".to_string(),
        FetchStatus::Fetched { attempts } => format!("downloaded (attempt {attempts})"),
        FetchStatus::NoEdition => "no edition".to_string(),
        FetchStatus::Failed { reason } => format!("failed: {reason}"),
    }
}

fn bytes_to_human(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let value = bytes as f64;
    if value >= MB {
        format!("{:.1} MB", value / MB)
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{bytes} B")
    }
}
