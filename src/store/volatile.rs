//! In-memory [`super::Store`], lost on process exit.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::Store;
use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// Keeps fingerprint-to-URL mappings in a `HashMap` guarded by a
/// [`parking_lot::Mutex`], matching the locking idiom used throughout the
/// rest of this crate's synchronous state (e.g. the manager's active set).
#[derive(Default)]
pub struct VolatileStore {
    entries: Mutex<HashMap<String, String>>,
}

impl VolatileStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for VolatileStore {
    async fn set(&self, fingerprint: &Fingerprint, url: &str) -> Result<()> {
        self.entries
            .lock()
            .insert(fingerprint.as_str().to_string(), url.to_string());
        Ok(())
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<String>> {
        Ok(self.entries.lock().get(fingerprint.as_str()).cloned())
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.entries.lock().remove(fingerprint.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let store = VolatileStore::new();
        let fp = Fingerprint::new("a.bin", 10, None);

        assert_eq!(store.get(&fp).await.unwrap(), None);

        store.set(&fp, "https://example.com/files/1").await.unwrap();
        assert_eq!(
            store.get(&fp).await.unwrap(),
            Some("https://example.com/files/1".to_string())
        );

        store.remove(&fp).await.unwrap();
        assert_eq!(store.get(&fp).await.unwrap(), None);
    }
}
