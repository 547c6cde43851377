use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

use crate::domain::{ARTIFACT_EXT, EditionDate, Publication, TargetArtifact};
use crate::error::ArchiverError;

pub const THUMBNAILS_DIR: &str = "thumbnails";
pub const LOG_FILE: &str = "system.log";
pub const INDEX_DB: &str = "epaper.db";
pub const SCHEDULER_LOCK: &str = "scheduler.lock";

/// Flat download directory plus the files that live alongside the editions.
#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Present and above the size threshold.
    Valid,
    Missing,
    /// Present but too small; it was deleted.
    RemovedBroken,
}

impl Store {
    pub fn new(download_dir: &Path) -> Result<Self, ArchiverError> {
        let root = Utf8PathBuf::from_path_buf(download_dir.to_path_buf())
            .map_err(|_| ArchiverError::Filesystem("non-utf8 download directory".to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn thumbnails_dir(&self) -> Utf8PathBuf {
        self.root.join(THUMBNAILS_DIR)
    }

    pub fn thumbnail_path(&self, artifact: &Path) -> Utf8PathBuf {
        let stem = artifact
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        self.thumbnails_dir().join(format!("{stem}.jpg"))
    }

    pub fn log_path(&self) -> Utf8PathBuf {
        self.root.join(LOG_FILE)
    }

    pub fn index_path(&self) -> Utf8PathBuf {
        self.root.join(INDEX_DB)
    }

    pub fn scheduler_lock_path(&self) -> Utf8PathBuf {
        self.root.join(SCHEDULER_LOCK)
    }

    pub fn ensure_dirs(&self) -> Result<(), ArchiverError> {
        fs::create_dir_all(self.thumbnails_dir().as_std_path())
            .map_err(|err| ArchiverError::Filesystem(err.to_string()))
    }

    pub fn target(
        &self,
        date: EditionDate,
        publication: &Publication,
        min_valid_bytes: u64,
    ) -> TargetArtifact {
        TargetArtifact::new(self.root.as_std_path(), date, publication, min_valid_bytes)
    }

    /// Resolves `name` inside the download directory, refusing anything that
    /// would escape it.
    pub fn artifact_path(&self, name: &str) -> Result<PathBuf, ArchiverError> {
        resolve_flat(self.root.as_std_path(), name)
    }

    pub fn thumbnail_file(&self, name: &str) -> Result<PathBuf, ArchiverError> {
        resolve_flat(self.thumbnails_dir().as_std_path(), name)
    }

    /// Deletes a below-threshold file at the canonical path.
    pub fn check_target(&self, target: &TargetArtifact) -> Result<TargetStatus, ArchiverError> {
        let Some(size) = target.current_size() else {
            return Ok(TargetStatus::Missing);
        };
        if size > target.min_valid_bytes {
            return Ok(TargetStatus::Valid);
        }
        warn!(
            file = %target.file_name,
            size,
            min = target.min_valid_bytes,
            "existing edition below size threshold, deleting"
        );
        fs::remove_file(&target.path).map_err(|err| {
            ArchiverError::Filesystem(format!("remove broken {}: {err}", target.path.display()))
        })?;
        Ok(TargetStatus::RemovedBroken)
    }

    pub fn list_artifacts(&self) -> Result<Vec<PathBuf>, ArchiverError> {
        list_with_ext(self.root.as_std_path(), ARTIFACT_EXT)
    }

    /// Moves `candidate` onto `target`, replacing whatever is there.
    pub fn replace_onto(candidate: &Path, target: &Path) -> Result<(), ArchiverError> {
        let collision = |message: String| ArchiverError::RenameCollision {
            from: candidate.to_path_buf(),
            to: target.to_path_buf(),
            message,
        };
        if target.exists() {
            fs::remove_file(target).map_err(|err| collision(format!("remove existing: {err}")))?;
            info!(target = %target.display(), "replaced previous file at canonical path");
        }
        match fs::rename(candidate, target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                Self::copy_file_atomic(candidate, target).map_err(|err| collision(err.to_string()))?;
                fs::remove_file(candidate).map_err(|err| collision(err.to_string()))
            }
            Err(err) => Err(collision(err.to_string())),
        }
    }

    pub fn copy_file_atomic(source: &Path, dest: &Path) -> Result<(), ArchiverError> {
        let parent = dest
            .parent()
            .ok_or_else(|| ArchiverError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("epaper-file")
            .tempfile_in(parent)
            .map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        fs::copy(source, temp.path()).map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        if dest.exists() {
            fs::remove_file(dest).map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        }
        temp.persist(dest)
            .map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Artifact-extension files present in the download directory right before a click.
#[derive(Debug, Clone, Default)]
pub struct DownloadSnapshot {
    files: HashSet<PathBuf>,
}

impl DownloadSnapshot {
    pub fn capture(dir: &Path) -> Result<Self, ArchiverError> {
        Ok(Self {
            files: list_with_ext(dir, ARTIFACT_EXT)?.into_iter().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Artifact files in `dir` that were not part of the snapshot.
    pub fn new_files(&self, dir: &Path) -> Result<Vec<PathBuf>, ArchiverError> {
        Ok(list_with_ext(dir, ARTIFACT_EXT)?
            .into_iter()
            .filter(|path| !self.files.contains(path))
            .collect())
    }
}

pub fn list_with_ext(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, ArchiverError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ArchiverError::Filesystem(err.to_string())),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ArchiverError::Filesystem(err.to_string()))?;
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|value| value.to_str())
            .map(|value| value.eq_ignore_ascii_case(ext))
            .unwrap_or(false);
        if matches && path.is_file() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn resolve_flat(dir: &Path, name: &str) -> Result<PathBuf, ArchiverError> {
    let is_plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name().map(|f| f == name).unwrap_or(false);
    if !is_plain {
        return Err(ArchiverError::ArtifactNotFound(name.to_string()));
    }
    let path = dir.join(name);
    if !path.is_file() {
        return Err(ArchiverError::ArtifactNotFound(name.to_string()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn store_in(dir: &Path) -> Store {
        Store::new(dir).unwrap()
    }

    #[test]
    fn layout_paths() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        assert!(store.log_path().ends_with("system.log"));
        assert!(store.index_path().ends_with("epaper.db"));
        let thumb = store.thumbnail_path(Path::new("2025-01-02_Paper.pdf"));
        assert!(thumb.ends_with("thumbnails/2025-01-02_Paper.jpg"));
    }

    #[test]
    fn broken_target_is_removed() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        let publication: Publication = "Paper".parse().unwrap();
        let target = store.target("2025-01-02".parse().unwrap(), &publication, 1024);

        assert_eq!(store.check_target(&target).unwrap(), TargetStatus::Missing);

        fs::write(&target.path, b"<html>error</html>").unwrap();
        assert_eq!(
            store.check_target(&target).unwrap(),
            TargetStatus::RemovedBroken
        );
        assert!(!target.path.exists());

        fs::write(&target.path, vec![0u8; 2048]).unwrap();
        assert_eq!(store.check_target(&target).unwrap(), TargetStatus::Valid);
        assert!(target.path.exists());
    }

    #[test]
    fn snapshot_diff() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("2025-01-01_Paper.pdf"), b"old").unwrap();
        fs::write(temp.path().join("notes.txt"), b"x").unwrap();
        let snapshot = DownloadSnapshot::capture(temp.path()).unwrap();
        assert_eq!(snapshot.len(), 1);

        fs::write(temp.path().join("download(1).pdf"), b"").unwrap();
        let new_files = snapshot.new_files(temp.path()).unwrap();
        assert_eq!(new_files, vec![temp.path().join("download(1).pdf")]);
    }

    #[test]
    fn replace_onto_overwrites() {
        let temp = tempfile::tempdir().unwrap();
        let candidate = temp.path().join("download.pdf");
        let target = temp.path().join("2025-01-02_Paper.pdf");
        fs::write(&candidate, b"new").unwrap();
        fs::write(&target, b"old").unwrap();

        Store::replace_onto(&candidate, &target).unwrap();
        assert!(!candidate.exists());
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn artifact_path_rejects_traversal() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(temp.path());
        fs::write(temp.path().join("2025-01-02_Paper.pdf"), b"x").unwrap();
        assert!(store.artifact_path("2025-01-02_Paper.pdf").is_ok());
        assert_matches!(
            store.artifact_path("../etc/passwd"),
            Err(ArchiverError::ArtifactNotFound(_))
        );
        assert_matches!(
            store.artifact_path("missing.pdf"),
            Err(ArchiverError::ArtifactNotFound(_))
        );
    }
}
