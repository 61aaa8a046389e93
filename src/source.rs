//! The file abstraction an [`crate::engine::UploadEngine`] reads from.
//!
//! tus itself is agnostic to where bytes come from; this crate ships one
//! concrete, filesystem-backed implementation so the library is usable out
//! of the box, while leaving [`UploadSource`] open for callers supplying
//! in-memory buffers, chunked network sources, or platform file pickers.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::Result;

/// A readable, ranged, appropriately-sized upload source.
#[async_trait::async_trait]
pub trait UploadSource: Send + Sync {
    /// The file's display name, used for fingerprinting and default
    /// `Upload-Metadata` filename population.
    fn name(&self) -> &str;

    /// The file's MIME type, if known.
    fn mime(&self) -> Option<&str>;

    /// The total size in bytes, if known up front. `None` means the size
    /// must be discovered by reading the source to completion before
    /// creation (mirrors the engine's "materialize byte length" fallback).
    fn size(&self) -> Option<u64>;

    /// Read exactly `len` bytes starting at `offset`, or fewer at EOF.
    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
}

/// An [`UploadSource`] backed by a file on the local filesystem.
pub struct FileSource {
    path: PathBuf,
    name: String,
    mime: Option<String>,
    size: u64,
}

impl FileSource {
    /// Open `path`, stat it for size, and derive a default display name
    /// from its final path component.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Self {
            path,
            name,
            mime: None,
            size: metadata.len(),
        })
    }

    /// Attach a MIME type to be reported alongside the file.
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Override the display name used for fingerprinting and metadata.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait::async_trait]
impl UploadSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; len];
        let mut total_read = 0;
        loop {
            let n = file.read(&mut buffer[total_read..]).await?;
            if n == 0 {
                break;
            }
            total_read += n;
            if total_read == len {
                break;
            }
        }
        buffer.truncate(total_read);
        Ok(buffer)
    }
}

/// An in-memory [`UploadSource`], useful for tests and for callers that
/// already hold the file's bytes.
pub struct BytesSource {
    name: String,
    mime: Option<String>,
    data: Vec<u8>,
}

impl BytesSource {
    /// Wrap an in-memory buffer as an upload source.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: None,
            data,
        }
    }

    /// Attach a MIME type to be reported alongside the buffer.
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

#[async_trait::async_trait]
impl UploadSource for BytesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(Vec::new());
        }
        let end = (offset + len).min(self.data.len());
        Ok(self.data[offset..end].to_vec())
    }
}
