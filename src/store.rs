//! File source and sink behind the protocol.
//!
//! Names are joined onto a root directory as-is. Writes are staged to a
//! temporary sibling and renamed into place on commit, so an abandoned
//! transfer never leaves a partial target behind.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Whole file contents, `None` if there is no such file.
    pub async fn read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_of(name)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Open a staging file for `name`. Fails if the target directory is
    /// not writable.
    pub async fn stage(&self, name: &str) -> io::Result<StagedFile> {
        let target = self.path_of(name);
        let file_name = target
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "name has no file part"))?
            .to_string_lossy()
            .into_owned();
        let temp_path = target.with_file_name(format!(".{}.udpft.tmp", file_name));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .await?;

        Ok(StagedFile {
            file: Some(file),
            temp_path,
            target,
        })
    }

    /// Remove `name`. True only if it existed and is gone afterwards.
    pub async fn remove(&self, name: &str) -> bool {
        let path = self.path_of(name);
        match fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_file() || meta.file_type().is_symlink() => {}
            _ => return false,
        }
        if let Err(e) = fs::remove_file(&path).await {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
            return false;
        }
        fs::symlink_metadata(&path).await.is_err()
    }

    /// Entry names in the root, sorted.
    pub async fn list(&self) -> io::Result<Vec<String>> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

/// A write in progress; the temp file is removed unless committed.
#[derive(Debug)]
pub struct StagedFile {
    file: Option<File>,
    temp_path: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    /// Write `contents` and move the file into place.
    pub async fn commit(mut self, contents: &[u8]) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.write_all(contents).await?;
            file.flush().await?;
            file.sync_all().await?;
        }
        fs::rename(&self.temp_path, &self.target).await?;
        // Renamed: nothing left for Drop to clean up
        self.temp_path = PathBuf::new();
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.temp_path.as_os_str().is_empty() {
            self.file.take();
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}
