//! Client library for the [tus 1.0.0](https://tus.io) resumable upload
//! protocol.
//!
//! A single file is driven through creation, chunked `PATCH`, and resumption
//! by an [`UploadEngine`]; [`UploadManager`] coordinates many engines with a
//! concurrency bound, a FIFO ready queue, and a broadcast event stream.
//!
//! ```ignore
//! use std::sync::Arc;
//! use tus_client::{FileSource, Store, UploadConfig, UploadEngine, VolatileStore};
//!
//! let source = Arc::new(FileSource::open("video.mp4").await?);
//! let store = Arc::new(VolatileStore::new());
//! let mut engine = UploadEngine::new(source, store, UploadConfig::default());
//!
//! engine
//!     .upload(
//!         "https://tus.example.com/files",
//!         Default::default(),
//!         Default::default(),
//!         Default::default(),
//!         Default::default(),
//!         Default::default(),
//!     )
//!     .await?;
//! ```
//!
//! ## Resumption
//!
//! The engine fingerprints each source by name, size, and MIME type, and
//! persists the server-assigned upload URL against that fingerprint in a
//! [`Store`]. A later `upload()` call for the same logical file adopts the
//! stored URL and resumes from the offset the server reports, rather than
//! starting over.
//!
//! ## Managing many uploads
//!
//! ```ignore
//! use tus_client::{ManagerConfig, UploadManager, VolatileStore};
//!
//! let manager = UploadManager::new(ManagerConfig {
//!     server_url: "https://tus.example.com/files".to_string(),
//!     concurrency_bound: 3,
//!     ..Default::default()
//! }, Arc::new(VolatileStore::new()));
//!
//! let mut events = manager.subscribe();
//! let id = manager.add_upload(source, Default::default(), Default::default())?;
//! ```

mod engine;
mod error;
mod fingerprint;
pub mod http;
mod manager;
mod metadata;
mod retry;
mod source;
mod speed;
mod store;

pub use engine::{
    CallbackSlot, CompleteFn, DEFAULT_CHUNK_SIZE, EngineState, ProgressFn, StartFn, UploadConfig,
    UploadEngine,
};
pub use error::{Result, TusError};
pub use fingerprint::Fingerprint;
pub use manager::{
    EventKind, ManagerConfig, ManagerEvent, UploadId, UploadManager, UploadSnapshot, UploadStatus,
};
pub use retry::RetryPolicy;
pub use source::{BytesSource, FileSource, UploadSource};
pub use store::{FilesystemStore, KvStore, Store, VolatileStore};

/// Encode/decode helpers for the `Upload-Metadata` header, exposed for
/// callers that want to build or inspect metadata without driving an
/// upload (e.g. displaying a pending upload's filename).
pub mod upload_metadata {
    pub use crate::metadata::{decode, encode};
}
