//! Filesystem-backed [`super::Store`]: one file per fingerprint, content is
//! the upload URL as UTF-8 text, written atomically.

use std::path::PathBuf;

use tokio::fs;

use super::Store;
use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// Persists each fingerprint as a file named after it under `root`, so
/// resumable state survives a process restart without an external database.
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Use `root` as the entries directory, creating it if necessary. Call
    /// sites should await this before any `set`/`get`/`remove` call.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.as_str())
    }
}

#[async_trait::async_trait]
impl Store for FilesystemStore {
    async fn set(&self, fingerprint: &Fingerprint, url: &str) -> Result<()> {
        let path = self.entry_path(fingerprint);
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, url.as_bytes()).await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<String>> {
        match fs::read_to_string(self.entry_path(fingerprint)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        match fs::remove_file(self.entry_path(fingerprint)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
