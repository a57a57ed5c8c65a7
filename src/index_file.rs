//! Filesystem [`IndexStore`]: `index.json` inside the configured index
//! directory, replaced atomically on every write.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use docqa_core::index::IndexStore;
use docqa_core::{RagError, Result};

const INDEX_FILE: &str = "index.json";

pub struct FileIndexStore {
    dir: PathBuf,
}

impl FileIndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn storage_err(context: &str, path: &Path, e: impl std::fmt::Display) -> RagError {
    RagError::Storage(format!("{} {}: {}", context, path.display(), e))
}

impl IndexStore for FileIndexStore {
    fn location(&self) -> String {
        self.path().display().to_string()
    }

    fn exists(&self) -> bool {
        self.path().is_file()
    }

    fn read(&self) -> Result<Vec<u8>> {
        let path = self.path();
        std::fs::read(&path).map_err(|e| storage_err("failed to read", &path, e))
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| storage_err("failed to create", &self.dir, e))?;

        // Write next to the target so the final rename stays on one filesystem.
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| storage_err("failed to create temp file in", &self.dir, e))?;
        tmp.write_all(bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| storage_err("failed to write", tmp.path(), e))?;

        let path = self.path();
        tmp.persist(&path)
            .map_err(|e| storage_err("failed to replace", &path, e.error))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err("failed to remove", &path, e)),
        }
    }
}
