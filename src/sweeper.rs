use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{ARTIFACT_EXT, IN_PROGRESS_EXT};
use crate::error::ArchiverError;
use crate::store::list_with_ext;

/// `name(1).pdf`, `name (2).pdf`: the browser's answer to a taken file name.
static DUPLICATE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^.+?\s?\(\d+\)\.pdf$").unwrap());

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub zero_byte: Vec<PathBuf>,
    pub duplicates: Vec<PathBuf>,
    pub partials: Vec<PathBuf>,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.zero_byte.len() + self.duplicates.len() + self.partials.len()
    }
}

/// Clears leftovers of earlier attempts out of the download directory.
///
/// Only zero-byte files, duplicate-suffixed copies and `.crdownload`
/// partials are touched, so a resolved edition is never removed.
#[derive(Debug, Clone)]
pub struct Sweeper {
    dir: PathBuf,
}

impl Sweeper {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn sweep(&self) -> Result<SweepReport, ArchiverError> {
        let mut report = SweepReport::default();

        for partial in list_with_ext(&self.dir, IN_PROGRESS_EXT)? {
            if remove_quietly(&partial) {
                report.partials.push(partial);
            }
        }

        for path in list_with_ext(&self.dir, ARTIFACT_EXT)? {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let size = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
            if DUPLICATE_SUFFIX.is_match(&name) {
                if remove_quietly(&path) {
                    report.duplicates.push(path);
                }
                continue;
            }
            if size == 0 && remove_quietly(&path) {
                report.zero_byte.push(path);
            }
        }

        if report.removed() > 0 {
            info!(
                zero_byte = report.zero_byte.len(),
                duplicates = report.duplicates.len(),
                partials = report.partials.len(),
                "swept download directory"
            );
        }
        Ok(report)
    }
}

fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "could not remove leftover");
            false
        }
    }
}
