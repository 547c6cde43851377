use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::app::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

impl OutputMode {
    pub fn from_flag(non_interactive: bool) -> Self {
        if non_interactive {
            Self::NonInteractive
        } else {
            Self::Interactive
        }
    }

    /// Whether log lines may go to stderr alongside the result.
    pub fn logs_to_stderr(self) -> bool {
        self == Self::NonInteractive
    }
}

/// Machine-readable output: one pretty JSON document per command on stdout.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{json}")?;
        stdout.flush()
    }
}

// stdout is reserved for the final document
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        debug!(elapsed = ?event.elapsed, "{}", event.message);
    }
}
