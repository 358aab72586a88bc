//! Output naming, relocation and deletion of recorded files.

use std::path::{Path, PathBuf};

use duotrack_common::error::{DuotrackError, DuotrackResult};

/// File utilities the orchestrator calls into when a session completes.
pub trait FileStore: Send + Sync {
    /// A fresh, not yet existing path for a finished recording.
    fn make_output_path(&self) -> DuotrackResult<PathBuf>;

    /// Move `from` to `to`.
    fn relocate(&self, from: &Path, to: &Path) -> DuotrackResult<()>;

    /// Remove an intermediate file.
    fn delete(&self, path: &Path) -> DuotrackResult<()>;
}

/// [`FileStore`] on the local filesystem, naming outputs
/// `<dir>/<prefix><unix millis><suffix>`.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    dir: PathBuf,
    prefix: String,
    suffix: String,
}

impl LocalFileStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl FileStore for LocalFileStore {
    fn make_output_path(&self) -> DuotrackResult<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let millis = chrono::Utc::now().timestamp_millis();
        let mut candidate = self
            .dir
            .join(format!("{}{millis}{}", self.prefix, self.suffix));
        let mut attempt = 1;
        while candidate.exists() {
            candidate = self
                .dir
                .join(format!("{}{millis}_{attempt}{}", self.prefix, self.suffix));
            attempt += 1;
        }
        Ok(candidate)
    }

    fn relocate(&self, from: &Path, to: &Path) -> DuotrackResult<()> {
        if !from.exists() {
            return Err(DuotrackError::FileNotFound {
                path: from.to_path_buf(),
            });
        }
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(e) => {
                // rename fails across filesystems
                tracing::debug!(error = %e, "rename failed, falling back to copy");
                std::fs::copy(from, to)?;
                std::fs::remove_file(from)?;
                Ok(())
            }
        }
    }

    fn delete(&self, path: &Path) -> DuotrackResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_paths_are_unique_and_use_prefix_and_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path(), "bc_media_", ".mp4");
        let first = store.make_output_path().unwrap();
        std::fs::write(&first, b"x").unwrap();
        let second = store.make_output_path().unwrap();

        assert_ne!(first, second);
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("bc_media_"));
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn relocate_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path(), "", ".mp4");
        let from = dir.path().join("video.tmp");
        let to = dir.path().join("out").join("final.mp4");
        std::fs::write(&from, b"frames").unwrap();

        store.relocate(&from, &to).unwrap();

        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"frames");
    }

    #[test]
    fn relocate_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path(), "", ".mp4");
        let err = store
            .relocate(&dir.path().join("missing"), &dir.path().join("to"))
            .unwrap_err();
        assert!(matches!(err, DuotrackError::FileNotFound { .. }));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path(), "", ".mp4");
        let path = dir.path().join("audio.tmp");
        std::fs::write(&path, b"pcm").unwrap();
        store.delete(&path).unwrap();
        store.delete(&path).unwrap();
        assert!(!path.exists());
    }
}
