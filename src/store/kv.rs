//! In-memory KV [`super::Store`] modeled on a browser's named-database /
//! object-store storage shape, so the same `Store` consumer code can later
//! be backed by a real IndexedDB or `localStorage` binding on `wasm32`
//! targets without changing its call sites.

use std::collections::HashMap;

use async_lock::Mutex;

use super::Store;
use crate::error::Result;
use crate::fingerprint::Fingerprint;

/// A single named "database" holding one object store, keyed by
/// fingerprint, value = upload URL. The default implementation here is an
/// in-process map behind an [`async_lock::Mutex`]; this crate targets
/// native async executors, so no browser binding is provided.
pub struct KvStore {
    #[allow(dead_code)]
    database_name: String,
    object_store: Mutex<HashMap<String, String>>,
}

impl KvStore {
    /// Open (or, here, simply name) a database with the given name.
    pub fn new(database_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            object_store: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for KvStore {
    fn default() -> Self {
        Self::new("tus-uploads")
    }
}

#[async_trait::async_trait]
impl Store for KvStore {
    async fn set(&self, fingerprint: &Fingerprint, url: &str) -> Result<()> {
        self.object_store
            .lock()
            .await
            .insert(fingerprint.as_str().to_string(), url.to_string());
        Ok(())
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<String>> {
        Ok(self
            .object_store
            .lock()
            .await
            .get(fingerprint.as_str())
            .cloned())
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<()> {
        self.object_store.lock().await.remove(fingerprint.as_str());
        Ok(())
    }
}
