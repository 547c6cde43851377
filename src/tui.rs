use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::error::ArchiverError;

const EVENTS_MAX: usize = 8;

#[derive(Debug)]
struct AppState {
    status: String,
    attempts: u32,
    progress: Option<(usize, usize)>,
    events: VecDeque<String>,
    summary: Vec<String>,
    started: Instant,
    last_elapsed: Option<Duration>,
    active: bool,
}

/// Full-screen progress view for interactive CLI runs. The job itself runs on
/// a worker thread and reports through [`TuiProgress`].
pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<AppState>>,
}

#[derive(Clone)]
struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let message = event.message;
        if message.starts_with("attempt ") {
            state.attempts = state.attempts.saturating_add(1);
        }
        if let Some(progress) = parse_progress(&message) {
            state.progress = Some(progress);
        }
        if event.elapsed.is_some() {
            state.last_elapsed = event.elapsed;
        }
        state.status = message.clone();
        push_bounded(&mut state.events, format!("[{}] {message}", timestamp()), EVENTS_MAX);
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(AppState {
                status: "ready".to_string(),
                attempts: 0,
                progress: None,
                events: VecDeque::new(),
                summary: Vec::new(),
                started: Instant::now(),
                last_elapsed: None,
                active: false,
            })),
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. Keys are
    /// ignored until the job returns; the screen is restored either way.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, ArchiverError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        let result = loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, tick))
                    .into_diagnostic()?;
            }

            match rx.try_recv() {
                Ok(result) => break result,
                Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                    break Err(ArchiverError::WorkerLost);
                }
                Err(std::sync::mpsc::TryRecvError::Empty) => {}
            }

            // Drain input so the terminal does not echo it after exit.
            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                let _ = event::read().into_diagnostic()?;
            }
            tick = tick.wrapping_add(1);
        };

        self.set_active(false);
        restore_terminal()?;
        handle.join().ok();
        result.map_err(miette::Report::new)
    }

    /// Shows `lines` as the run summary until the user presses q, Esc or Enter.
    pub fn finish(&mut self, lines: Vec<String>) -> miette::Result<()> {
        if let Ok(mut state) = self.state.lock() {
            state.summary = lines;
        }

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, 0))
                    .into_diagnostic()?;
            }
            if event::poll(Duration::from_millis(200)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if key.kind == KeyEventKind::Press
                        && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter)
                    {
                        break;
                    }
                }
            }
        }

        restore_terminal()
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
                state.attempts = 0;
                state.progress = None;
                state.summary.clear();
            }
        }
    }
}

fn restore_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    io::stdout()
        .execute(LeaveAlternateScreen)
        .into_diagnostic()?;
    Ok(())
}

fn draw_ui(frame: &mut ratatui::Frame, kind: ProgressSinkKind, state: &AppState, tick: usize) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(6),
            Constraint::Min(6),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(kind, state, tick), chunks[0]);
    frame.render_widget(draw_status_panel(state), chunks[1]);
    frame.render_widget(draw_events_panel(state), chunks[2]);
}

fn draw_header(kind: ProgressSinkKind, state: &AppState, tick: usize) -> Paragraph<'static> {
    let hb = if state.active && tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Fetch => "Daily fetch",
        ProgressSinkKind::Archive => "Archive",
        ProgressSinkKind::Reindex => "Reindex",
        ProgressSinkKind::Compress => "Compress",
    };
    let line = Line::from(vec![
        Span::styled(
            "EPAPER",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    Paragraph::new(line)
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &AppState) -> Paragraph<'static> {
    let (label, color) = if state.active {
        ("running", Color::Cyan)
    } else {
        ("done", Color::Green)
    };
    let elapsed = if state.active {
        state.started.elapsed()
    } else {
        state.last_elapsed.unwrap_or_else(|| state.started.elapsed())
    };
    let progress = match state.progress {
        Some((done, total)) => format!(
            "{} {done}/{total}",
            progress_bar(percent(done, total))
        ),
        None => "--".to_string(),
    };
    let lines = vec![
        Line::from(vec![
            Span::styled("State: ", Style::default().fg(Color::Gray)),
            Span::styled(label, Style::default().fg(color)),
            Span::styled("   Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}s", elapsed.as_secs())),
        ]),
        Line::from(vec![
            Span::styled("Progress: ", Style::default().fg(Color::Gray)),
            Span::raw(progress),
        ]),
        Line::from(vec![
            Span::styled("Attempts: ", Style::default().fg(Color::Gray)),
            Span::raw(state.attempts.to_string()),
        ]),
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
    ];
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::BOTTOM))
        .wrap(Wrap { trim: true })
}

fn draw_events_panel(state: &AppState) -> Paragraph<'static> {
    let mut lines = Vec::new();
    if state.summary.is_empty() {
        lines.push(Line::from(Span::styled(
            "Recent events:",
            Style::default().fg(Color::Gray),
        )));
        for event in &state.events {
            lines.push(Line::from(event.clone()));
        }
    } else {
        lines.push(Line::from(Span::styled(
            "Summary (q to exit):",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )));
        for line in &state.summary {
            lines.push(Line::from(format!("- {line}")));
        }
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

fn progress_bar(percent: u8) -> String {
    let total = 10;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

/// Extracts `(done, total)` from messages ending in `(3/14)`.
fn parse_progress(message: &str) -> Option<(usize, usize)> {
    let inner = message.trim_end().strip_suffix(')')?;
    let (_, counts) = inner.rsplit_once('(')?;
    let (done, total) = counts.split_once('/')?;
    Some((done.trim().parse().ok()?, total.trim().parse().ok()?))
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
