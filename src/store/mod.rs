//! Pluggable resumption stores mapping a file fingerprint to the upload URL
//! the server minted for it.

mod filesystem;
mod kv;
mod volatile;

pub use filesystem::FilesystemStore;
pub use kv::KvStore;
pub use volatile::VolatileStore;

use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// A thread-safe mapping from [`Fingerprint`] to upload URL.
///
/// Implementations must serialize their own writes: concurrent `set`/`get`/
/// `remove` for the same fingerprint from different uploads must not race.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Persist the URL the server assigned to this fingerprint's upload.
    async fn set(&self, fingerprint: &Fingerprint, url: &str) -> Result<()>;

    /// Look up a previously stored URL, if any.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<String>>;

    /// Remove a stored URL, e.g. on completion or cancellation.
    async fn remove(&self, fingerprint: &Fingerprint) -> Result<()>;
}
