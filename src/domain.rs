use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ArchiverError;

pub const ARTIFACT_EXT: &str = "pdf";
pub const IN_PROGRESS_EXT: &str = "crdownload";
pub const DEFAULT_MIN_VALID_BYTES: u64 = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EditionDate(NaiveDate);

impl EditionDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn today() -> Self {
        Self(chrono::Local::now().date_naive())
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }

    pub fn iso(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    pub fn days_before(&self, days: u32) -> Self {
        Self(self.0 - Duration::days(i64::from(days)))
    }

    /// ISO week label such as `2025-W01`.
    pub fn week_label(&self) -> String {
        let week = self.0.iso_week();
        format!("{}-W{:02}", week.year(), week.week())
    }
}

impl fmt::Display for EditionDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iso())
    }
}

impl FromStr for EditionDate {
    type Err = ArchiverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| ArchiverError::InvalidDate(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Publication(String);

impl Publication {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Publication {
    type Err = ArchiverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().replace(' ', "_");
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '-');
        if !is_valid {
            return Err(ArchiverError::ConfigParse(format!(
                "invalid publication name: {value}"
            )));
        }
        Ok(Self(normalized))
    }
}

/// The file one fetch for `date` must end up as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetArtifact {
    pub date: EditionDate,
    pub file_name: String,
    pub path: PathBuf,
    pub min_valid_bytes: u64,
}

impl TargetArtifact {
    pub fn new(
        download_dir: &Path,
        date: EditionDate,
        publication: &Publication,
        min_valid_bytes: u64,
    ) -> Self {
        let file_name = canonical_file_name(date, publication);
        Self {
            date,
            path: download_dir.join(&file_name),
            file_name,
            min_valid_bytes,
        }
    }

    pub fn current_size(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|meta| meta.len())
    }

    pub fn is_valid(&self) -> bool {
        self.current_size()
            .map(|size| size > self.min_valid_bytes)
            .unwrap_or(false)
    }
}

pub fn canonical_file_name(date: EditionDate, publication: &Publication) -> String {
    format!("{}_{}.{ARTIFACT_EXT}", date.iso(), publication.as_str())
}

/// Extracts the edition date from a canonical file name, `None` for anything else.
pub fn date_from_file_name(file_name: &str) -> Option<EditionDate> {
    let (prefix, _) = file_name.split_once('_')?;
    prefix.parse().ok()
}

/// Walks backwards from `start`: `start`, `start - 1`, ... `start - (days - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveRange {
    pub start: EditionDate,
    pub days: u32,
}

impl ArchiveRange {
    pub const MAX_DAYS: u32 = 366;

    pub fn new(start: EditionDate, days: u32) -> Result<Self, ArchiverError> {
        if days == 0 || days > Self::MAX_DAYS {
            return Err(ArchiverError::InvalidRange(format!(
                "range must be between 1 and {} days, got {days}",
                Self::MAX_DAYS
            )));
        }
        Ok(Self { start, days })
    }

    pub fn dates(&self) -> impl Iterator<Item = EditionDate> + '_ {
        (0..self.days).map(|offset| self.start.days_before(offset))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    DailyFetch,
    ArchiveBackfill,
    FullReindex,
    Compression,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::DailyFetch => write!(f, "daily-fetch"),
            JobKind::ArchiveBackfill => write!(f, "archive-backfill"),
            JobKind::FullReindex => write!(f, "full-reindex"),
            JobKind::Compression => write!(f, "compression"),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_edition_date() {
        let date: EditionDate = "2025-01-02".parse().unwrap();
        assert_eq!(date.iso(), "2025-01-02");
        assert_eq!(date.days_before(2).iso(), "2024-12-31");
    }

    #[test]
    fn parse_edition_date_invalid() {
        let err = "02.01.2025".parse::<EditionDate>().unwrap_err();
        assert_matches!(err, ArchiverError::InvalidDate(_));
    }

    #[test]
    fn canonical_name() {
        let date: EditionDate = "2025-01-02".parse().unwrap();
        let publication: Publication = "Wormser Zeitung".parse().unwrap();
        assert_eq!(
            canonical_file_name(date, &publication),
            "2025-01-02_Wormser_Zeitung.pdf"
        );
        assert_eq!(
            date_from_file_name("2025-01-02_Wormser_Zeitung.pdf"),
            Some(date)
        );
        assert_eq!(date_from_file_name("download(1).pdf"), None);
    }

    #[test]
    fn archive_range_walks_backwards() {
        let start: EditionDate = "2025-03-02".parse().unwrap();
        let range = ArchiveRange::new(start, 3).unwrap();
        let dates: Vec<String> = range.dates().map(|d| d.iso()).collect();
        assert_eq!(dates, vec!["2025-03-02", "2025-03-01", "2025-02-28"]);
    }

    #[test]
    fn archive_range_rejects_zero() {
        let start: EditionDate = "2025-03-02".parse().unwrap();
        assert_matches!(
            ArchiveRange::new(start, 0),
            Err(ArchiverError::InvalidRange(_))
        );
    }

    #[test]
    fn week_label() {
        let date: EditionDate = "2025-01-01".parse().unwrap();
        assert_eq!(date.week_label(), "2025-W01");
    }
}
