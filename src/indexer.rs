//! Full-text index over the archive (SQLite FTS5) plus first-page thumbnails.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::compress::Ghostscript;
use crate::domain::date_from_file_name;
use crate::error::ArchiverError;
use crate::store::Store;
use crate::tools::{capture_cmd, find_any, path_arg};

pub trait TextExtractor: Send + Sync {
    fn extract(&self, pdf: &Path) -> Result<String, ArchiverError>;
}

pub trait Thumbnailer: Send + Sync {
    fn render(&self, pdf: &Path, output: &Path) -> Result<(), ArchiverError>;
}

/// Poppler's `pdftotext`, writing to stdout.
#[derive(Debug, Clone)]
pub struct Pdftotext {
    executable: PathBuf,
}

impl Pdftotext {
    pub fn locate() -> Result<Self, ArchiverError> {
        find_any(&["pdftotext"])
            .map(|executable| Self { executable })
            .ok_or_else(|| ArchiverError::MissingTool("pdftotext".to_string()))
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl TextExtractor for Pdftotext {
    fn extract(&self, pdf: &Path) -> Result<String, ArchiverError> {
        capture_cmd(
            &self.executable,
            &[
                "-enc".to_string(),
                "UTF-8".to_string(),
                path_arg(pdf),
                "-".to_string(),
            ],
        )
    }
}

/// Stand-in when no extractor is installed; listing and search still work.
#[derive(Debug, Clone)]
pub struct Unavailable(pub String);

impl TextExtractor for Unavailable {
    fn extract(&self, _pdf: &Path) -> Result<String, ArchiverError> {
        Err(ArchiverError::MissingTool(self.0.clone()))
    }
}

impl Thumbnailer for Ghostscript {
    fn render(&self, pdf: &Path, output: &Path) -> Result<(), ArchiverError> {
        self.thumbnail(pdf, output)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub filename: String,
    pub date: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveEntry {
    pub filename: String,
    pub date: Option<String>,
    pub week: Option<String>,
    pub size_bytes: u64,
    pub indexed: bool,
    pub thumbnail: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub indexed: usize,
    pub already_indexed: usize,
    pub failed: usize,
    pub pruned: usize,
    pub thumbnails: usize,
}

pub struct Indexer {
    store: Store,
    extractor: Box<dyn TextExtractor>,
    thumbnailer: Option<Box<dyn Thumbnailer>>,
}

impl Indexer {
    pub fn new(
        store: Store,
        extractor: Box<dyn TextExtractor>,
        thumbnailer: Option<Box<dyn Thumbnailer>>,
    ) -> Result<Self, ArchiverError> {
        let indexer = Self {
            store,
            extractor,
            thumbnailer,
        };
        indexer.connect()?;
        Ok(indexer)
    }

    fn connect(&self) -> Result<Connection, ArchiverError> {
        let conn = Connection::open(self.store.index_path().as_std_path())?;
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS articles USING fts5(filename, date, content);",
        )?;
        Ok(conn)
    }

    fn indexed_names(&self, conn: &Connection) -> Result<HashSet<String>, ArchiverError> {
        let mut stmt = conn.prepare("SELECT filename FROM articles")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    /// `Ok(false)` when the file was already in the index.
    pub fn index_file(&self, pdf: &Path) -> Result<bool, ArchiverError> {
        let conn = self.connect()?;
        self.index_with(&conn, pdf)
    }

    fn index_with(&self, conn: &Connection, pdf: &Path) -> Result<bool, ArchiverError> {
        let filename = file_name(pdf);
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM articles WHERE filename = ?1)",
            params![filename],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(false);
        }
        info!(file = %filename, "indexing");
        let content = self.extractor.extract(pdf)?;
        conn.execute(
            "INSERT INTO articles (filename, date, content) VALUES (?1, ?2, ?3)",
            params![filename, date_column(&filename), content],
        )?;
        Ok(true)
    }

    /// `Ok(false)` when the thumbnail already existed or no renderer is set.
    pub fn ensure_thumbnail(&self, pdf: &Path) -> Result<bool, ArchiverError> {
        let Some(thumbnailer) = &self.thumbnailer else {
            return Ok(false);
        };
        let output = self.store.thumbnail_path(pdf);
        if output.exists() {
            return Ok(false);
        }
        thumbnailer.render(pdf, output.as_std_path())?;
        Ok(true)
    }

    pub fn prune_orphans(&self) -> Result<usize, ArchiverError> {
        let conn = self.connect()?;
        self.prune_with(&conn)
    }

    fn prune_with(&self, conn: &Connection) -> Result<usize, ArchiverError> {
        let mut pruned = 0;
        for name in self.indexed_names(conn)? {
            if self.store.root().join(&name).exists() {
                continue;
            }
            info!(file = %name, "removing orphaned index entry");
            pruned += conn.execute("DELETE FROM articles WHERE filename = ?1", params![name])?;
        }
        Ok(pruned)
    }

    /// Indexes every archive file, prunes entries whose file is gone and
    /// renders missing thumbnails. Per-file failures are counted, not fatal.
    pub fn rebuild(&self) -> Result<RebuildReport, ArchiverError> {
        let conn = self.connect()?;
        let mut report = RebuildReport::default();
        for pdf in self.store.list_artifacts()? {
            match self.index_with(&conn, &pdf) {
                Ok(true) => report.indexed += 1,
                Ok(false) => report.already_indexed += 1,
                Err(err) => {
                    error!(file = %pdf.display(), error = %err, "indexing failed");
                    report.failed += 1;
                }
            }
            match self.ensure_thumbnail(&pdf) {
                Ok(true) => report.thumbnails += 1,
                Ok(false) => {}
                Err(err) => warn!(file = %pdf.display(), error = %err, "thumbnail failed"),
            }
        }
        report.pruned = self.prune_with(&conn)?;
        info!(
            indexed = report.indexed,
            pruned = report.pruned,
            thumbnails = report.thumbnails,
            failed = report.failed,
            "index rebuilt"
        );
        Ok(report)
    }

    /// Phrase search, newest edition first. Query errors yield no hits.
    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        match self.try_search(query) {
            Ok(hits) => hits,
            Err(err) => {
                error!(%query, error = %err, "search failed");
                Vec::new()
            }
        }
    }

    fn try_search(&self, query: &str) -> Result<Vec<SearchHit>, ArchiverError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT filename, date, snippet(articles, 2, '<mark>', '</mark>', '...', 20) \
             FROM articles WHERE articles MATCH ?1 ORDER BY date DESC",
        )?;
        let hits = stmt
            .query_map(params![phrase(query)], |row| {
                Ok(SearchHit {
                    filename: row.get(0)?,
                    date: row.get(1)?,
                    snippet: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hits)
    }

    /// Every archive file on disk, newest name first.
    pub fn list(&self) -> Result<Vec<ArchiveEntry>, ArchiverError> {
        let indexed = match self.connect().and_then(|conn| self.indexed_names(&conn)) {
            Ok(names) => names,
            Err(err) => {
                warn!(error = %err, "index unavailable, listing without it");
                HashSet::new()
            }
        };
        let mut entries: Vec<ArchiveEntry> = self
            .store
            .list_artifacts()?
            .into_iter()
            .map(|path| {
                let filename = file_name(&path);
                let date = date_from_file_name(&filename);
                ArchiveEntry {
                    date: date.map(|d| d.iso()),
                    week: date.map(|d| d.week_label()),
                    size_bytes: std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
                    indexed: indexed.contains(&filename),
                    thumbnail: self.store.thumbnail_path(&path).exists(),
                    filename,
                }
            })
            .collect();
        entries.sort_by(|a, b| b.filename.cmp(&a.filename));
        Ok(entries)
    }
}

/// FTS5 phrase literal: the whole query, inner quotes doubled.
fn phrase(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

fn date_column(filename: &str) -> String {
    filename
        .split_once('_')
        .map(|(prefix, _)| prefix.to_string())
        .unwrap_or_else(|| "0000-00-00".to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
