//! The per-file tus protocol state machine: creation, offset discovery, the
//! chunked `PATCH` loop, pause/resume/cancel, retry, and progress/ETA
//! reporting.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{Result, TusError};
use crate::fingerprint::Fingerprint;
use crate::http::HttpClient;
use crate::metadata;
use crate::retry::RetryPolicy;
use crate::source::UploadSource;
use crate::speed::SpeedEstimator;
use crate::store::Store;

const TUS_VERSION: &str = "1.0.0";
/// Default chunk size: 512 KiB, matching common tus client defaults.
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Engine-level configuration, covering the options `upload()` accepts.
#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Maximum bytes sent per `PATCH` request.
    pub chunk_size: usize,
    /// Maximum retry attempts per chunk before surfacing the error.
    pub retries: u32,
    /// Backoff strategy applied between chunk retry attempts.
    pub retry_policy: RetryPolicy,
    /// Base interval (seconds) fed to `retry_policy`.
    pub retry_interval_secs: f64,
    /// Run a best-effort bandwidth probe before the chunk loop starts.
    pub measure_speed: bool,
    /// Reject re-creation when a store entry exists but the server has
    /// forgotten it, rather than silently starting a fresh upload.
    pub prevent_duplicates: bool,
    /// Whether resumption via the store is attempted at all.
    pub resume_enabled: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retries: 0,
            retry_policy: RetryPolicy::default(),
            retry_interval_secs: 0.0,
            measure_speed: false,
            prevent_duplicates: true,
            resume_enabled: true,
        }
    }
}

/// The upload engine's current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, never started.
    Idle,
    /// `POST` in flight.
    Creating,
    /// Chunk loop in flight.
    Running,
    /// Paused; `offset`/`upload_url` retained for `resume()`.
    Paused,
    /// Finished successfully; store entry removed.
    Completed,
    /// Terminated by an unrecoverable error.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

/// Signature for an `on_start` callback: receives the initial ETA, if one
/// could be computed before the first chunk was sent.
pub type StartFn = Box<dyn FnMut(Option<Duration>) + Send>;
/// Signature for an `on_progress` callback: percent complete (0-100) and
/// the current ETA.
pub type ProgressFn = Box<dyn FnMut(f64, Duration) + Send>;
/// Signature for an `on_complete` callback.
pub type CompleteFn = Box<dyn FnMut() + Send>;

/// How a callback slot (`on_start`/`on_progress`/`on_complete`) should be
/// updated by an `upload()` or `resume()` call: keep the slot as-is
/// (default), clear it, or replace it. Precedence when more than one
/// applies conceptually: clear beats a new value, a new value beats
/// keeping the old one.
pub enum CallbackSlot<F> {
    /// Leave whatever callback (or absence of one) was already installed.
    Keep,
    /// Remove any installed callback.
    Clear,
    /// Install this callback, replacing any prior one.
    Set(F),
}

impl<F> Default for CallbackSlot<F> {
    fn default() -> Self {
        Self::Keep
    }
}

fn apply_slot<F>(slot: &mut Option<F>, update: CallbackSlot<F>) {
    match update {
        CallbackSlot::Keep => {}
        CallbackSlot::Clear => *slot = None,
        CallbackSlot::Set(f) => *slot = Some(f),
    }
}

/// Drives a single file through the tus protocol against one server URI.
pub struct UploadEngine {
    source: Arc<dyn UploadSource>,
    store: Arc<dyn Store>,
    client: HttpClient,
    config: UploadConfig,
    fingerprint: Fingerprint,

    state: EngineState,
    upload_url: Option<String>,
    offset: u64,
    total: u64,

    creation_uri: String,
    user_headers: http::HeaderMap,
    metadata: BTreeMap<String, String>,

    paused: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,

    on_start: Option<StartFn>,
    on_progress: Option<ProgressFn>,
    on_complete: Option<CompleteFn>,
}

impl UploadEngine {
    /// Construct an engine for `source`. Fingerprinting happens here, with
    /// no I/O: it is pure function of the source's reported name/size/mime.
    pub fn new(source: Arc<dyn UploadSource>, store: Arc<dyn Store>, config: UploadConfig) -> Self {
        let fingerprint = match source.size() {
            Some(size) => Fingerprint::new(source.name(), size, source.mime()),
            None => Fingerprint::dynamic(source.name(), source.mime()),
        };
        Self {
            source,
            store,
            client: HttpClient::new(),
            config,
            fingerprint,
            state: EngineState::Idle,
            upload_url: None,
            offset: 0,
            total: 0,
            creation_uri: String::new(),
            user_headers: http::HeaderMap::new(),
            metadata: BTreeMap::new(),
            paused: Arc::new(AtomicBool::new(false)),
            cancel_notify: Arc::new(Notify::new()),
            on_start: None,
            on_progress: None,
            on_complete: None,
        }
    }

    /// Use a specific HTTP client rather than the crate-default one.
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = client;
        self
    }

    /// This upload's fingerprint (stable store key).
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Bytes confirmed by the server so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The upload URL minted by the server, once creation has happened.
    pub fn upload_url(&self) -> Option<&str> {
        self.upload_url.as_deref()
    }

    /// A clone of the internal pause flag. Lets a caller (e.g. a manager
    /// driving this engine from a spawned task) request a pause without
    /// needing `&mut self`.
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        self.paused.clone()
    }

    /// A clone of the notifier that interrupts an in-flight chunk send or
    /// retry backoff sleep as soon as a pause or cancel is requested.
    pub fn cancel_notify(&self) -> Arc<Notify> {
        self.cancel_notify.clone()
    }

    /// Returns true iff resumption is enabled, a store entry exists for
    /// this fingerprint, and a `HEAD` to it yields 2xx with a valid
    /// `Upload-Offset`.
    pub async fn is_resumable(&self) -> bool {
        if !self.config.resume_enabled {
            return false;
        }
        let Ok(Some(url)) = self.store.get(&self.fingerprint).await else {
            return false;
        };
        matches!(self.fetch_offset(&url).await, Ok(_))
    }

    /// Drive the full protocol: resume if possible, else create, then run
    /// the chunk loop to completion, pause, or failure.
    #[tracing::instrument(skip_all, fields(fingerprint = %self.fingerprint))]
    pub async fn upload(
        &mut self,
        uri: &str,
        headers: http::HeaderMap,
        metadata: BTreeMap<String, String>,
        on_start: CallbackSlot<StartFn>,
        on_progress: CallbackSlot<ProgressFn>,
        on_complete: CallbackSlot<CompleteFn>,
    ) -> Result<()> {
        self.creation_uri = uri.to_string();
        self.user_headers = headers;
        self.metadata = metadata;
        apply_slot(&mut self.on_start, on_start);
        apply_slot(&mut self.on_progress, on_progress);
        apply_slot(&mut self.on_complete, on_complete);

        self.paused.store(false, Ordering::SeqCst);

        let total = match self.source.size() {
            Some(0) | None => self.materialize_size().await?,
            Some(size) => size,
        };
        self.total = total;

        let resumed = self.try_adopt_existing_upload().await?;
        if !resumed {
            self.create().await?;
        }

        self.run_chunk_loop().await
    }

    /// Resume a paused engine from where the server last confirmed it.
    /// A no-op if the engine was not paused or never created.
    pub async fn resume(
        &mut self,
        on_start: CallbackSlot<StartFn>,
        on_progress: CallbackSlot<ProgressFn>,
        on_complete: CallbackSlot<CompleteFn>,
    ) -> Result<()> {
        if self.state != EngineState::Paused || self.upload_url.is_none() {
            return Ok(());
        }
        apply_slot(&mut self.on_start, on_start);
        apply_slot(&mut self.on_progress, on_progress);
        apply_slot(&mut self.on_complete, on_complete);

        self.paused.store(false, Ordering::SeqCst);

        let url = self.upload_url.clone().expect("checked above");
        match self.fetch_offset(&url).await {
            Ok(offset) => self.offset = offset,
            Err(_) => {
                self.store.remove(&self.fingerprint).await?;
                self.upload_url = None;
                self.create().await?;
            }
        }
        self.run_chunk_loop().await
    }

    /// Request a pause. The chunk loop exits after the current chunk
    /// settles (or immediately, if sleeping between retries).
    pub fn pause(&mut self) -> bool {
        if self.state != EngineState::Running {
            return false;
        }
        self.paused.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
        true
    }

    /// Pause (best-effort) then forget this upload. Always attempts store
    /// removal, even if pause itself was a no-op.
    pub async fn cancel(&mut self) -> Result<()> {
        self.paused.store(true, Ordering::SeqCst);
        self.cancel_notify.notify_waiters();
        self.store.remove(&self.fingerprint).await?;
        self.state = EngineState::Cancelled;
        Ok(())
    }

    async fn materialize_size(&self) -> Result<u64> {
        let mut total = 0u64;
        let probe_chunk = self.config.chunk_size.max(1);
        loop {
            let chunk = self.source.read_range(total, probe_chunk).await?;
            if chunk.is_empty() {
                break;
            }
            total += chunk.len() as u64;
            if chunk.len() < probe_chunk {
                break;
            }
        }
        Ok(total)
    }

    async fn try_adopt_existing_upload(&mut self) -> Result<bool> {
        if !self.config.resume_enabled {
            return Ok(false);
        }
        let Some(url) = self.store.get(&self.fingerprint).await? else {
            return Ok(false);
        };
        match self.fetch_offset(&url).await {
            Ok(offset) => {
                self.upload_url = Some(url);
                self.offset = offset;
                self.state = EngineState::Running;
                Ok(true)
            }
            Err(err) => {
                self.store.remove(&self.fingerprint).await?;
                if self.config.prevent_duplicates {
                    return Err(TusError::Duplicate(format!(
                        "stored upload URL is no longer valid on the server: {err}"
                    )));
                }
                Ok(false)
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn create(&mut self) -> Result<()> {
        self.state = EngineState::Creating;

        let mut headers = self.user_headers.clone();
        headers.insert("Tus-Resumable", TUS_VERSION.parse().unwrap());
        headers.insert("Upload-Length", self.total.to_string().parse()?);
        if !self.metadata.is_empty() {
            let encoded = metadata::encode(self.metadata.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            headers.insert("Upload-Metadata", encoded.parse()?);
        }

        let response = self
            .client
            .post(&self.creation_uri)
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        if !(response.is_success() || status == 404) {
            return Err(TusError::protocol_status(
                "tus creation POST rejected",
                status,
            ));
        }

        let location = response
            .header("Location")
            .ok_or_else(|| TusError::protocol("creation response missing Location header"))?
            .to_string();

        let upload_url = resolve_location(&location, &self.creation_uri)?;
        self.store.set(&self.fingerprint, &upload_url).await?;
        self.upload_url = Some(upload_url);
        self.offset = 0;
        self.state = EngineState::Running;
        Ok(())
    }

    async fn fetch_offset(&self, url: &str) -> Result<u64> {
        let response = self
            .client
            .head(url)
            .header("Tus-Resumable", TUS_VERSION)
            .send()
            .await?;
        if !response.is_success() {
            return Err(TusError::protocol_status(
                "HEAD for resumption rejected",
                response.status(),
            ));
        }
        let offset = response
            .header("Upload-Offset")
            .ok_or_else(|| TusError::protocol("HEAD response missing Upload-Offset header"))?;
        offset
            .parse::<u64>()
            .map_err(|_| TusError::protocol(format!("invalid Upload-Offset value: {offset}")))
    }

    async fn run_chunk_loop(&mut self) -> Result<()> {
        self.state = EngineState::Running;

        let measured_bandwidth = if self.config.measure_speed {
            crate::speed::probe_bandwidth(&self.client, self.upload_url.as_deref().unwrap_or(""), self.config.chunk_size as u64).await
        } else {
            None
        };
        let mut estimator = SpeedEstimator::start(measured_bandwidth);

        self.invoke_start(estimator.eta(self.total.saturating_sub(self.offset)));

        while self.offset < self.total {
            if self.paused.load(Ordering::SeqCst) {
                self.state = EngineState::Paused;
                return Ok(());
            }

            let read_len = self
                .config
                .chunk_size
                .min((self.total - self.offset) as usize);
            let chunk = self.source.read_range(self.offset, read_len).await?;
            if chunk.is_empty() {
                return Err(TusError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "upload source returned no data before reaching the expected total",
                )));
            }

            match self.send_chunk_with_retry(chunk).await {
                ChunkOutcome::Advanced(new_offset) => {
                    let sent = new_offset.saturating_sub(self.offset);
                    self.offset = new_offset;
                    estimator.record(sent);
                    let remaining = self.total.saturating_sub(self.offset);
                    let percent = if self.total == 0 {
                        100.0
                    } else {
                        (self.offset as f64 / self.total as f64 * 100.0).clamp(0.0, 100.0)
                    };
                    let eta = estimator.eta(remaining).unwrap_or(Duration::ZERO);
                    self.invoke_progress(percent, eta);
                }
                ChunkOutcome::Paused => {
                    self.state = EngineState::Paused;
                    return Ok(());
                }
                ChunkOutcome::Failed(err) => {
                    self.state = EngineState::Failed;
                    return Err(err);
                }
            }
        }

        self.store.remove(&self.fingerprint).await?;
        self.state = EngineState::Completed;
        self.invoke_complete();
        Ok(())
    }

    async fn send_chunk_with_retry(&self, chunk: Vec<u8>) -> ChunkOutcome {
        let url = self.upload_url.clone().expect("chunk loop requires a created upload");
        let mut attempt = 0u32;
        loop {
            if self.paused.load(Ordering::SeqCst) {
                return ChunkOutcome::Paused;
            }

            let send = self.send_chunk(&url, self.offset, &chunk);
            let outcome = tokio::select! {
                result = send => result,
                _ = self.cancel_notify.notified() => {
                    return ChunkOutcome::Paused;
                }
            };

            match outcome {
                Ok(new_offset) => return ChunkOutcome::Advanced(new_offset),
                Err(err) => {
                    if attempt >= self.config.retries {
                        return ChunkOutcome::Failed(err);
                    }
                    tracing::warn!(attempt, error = %err, "chunk PATCH failed, retrying");
                    let wait = self
                        .config
                        .retry_policy
                        .interval(attempt, self.config.retry_interval_secs);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = self.cancel_notify.notified() => {
                            return ChunkOutcome::Paused;
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn send_chunk(&self, url: &str, offset: u64, chunk: &[u8]) -> Result<u64> {
        let response = self
            .client
            .patch(url)
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Offset", offset.to_string())
            .header("Content-Type", "application/offset+octet-stream")
            .headers(self.user_headers.clone())
            .bytes(chunk.to_vec())
            .send()
            .await?;

        if !response.is_success() {
            return Err(TusError::protocol_status(
                "chunk PATCH rejected",
                response.status(),
            ));
        }

        let header = response
            .header("Upload-Offset")
            .ok_or_else(|| TusError::protocol("chunk response missing Upload-Offset header"))?
            .to_string();
        let server_offset: u64 = header
            .parse()
            .map_err(|_| TusError::protocol(format!("invalid Upload-Offset value: {header}")))?;

        let expected = offset + chunk.len() as u64;
        if server_offset != expected {
            return Err(TusError::protocol(format!(
                "server offset {server_offset} disagrees with expected {expected}"
            )));
        }
        Ok(server_offset)
    }

    fn invoke_start(&mut self, eta: Option<Duration>) {
        if let Some(cb) = self.on_start.as_mut() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(eta)));
            if result.is_err() {
                tracing::error!("on_start callback panicked");
            }
        }
    }

    fn invoke_progress(&mut self, percent: f64, eta: Duration) {
        if let Some(cb) = self.on_progress.as_mut() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(percent, eta)));
            if result.is_err() {
                tracing::error!("on_progress callback panicked");
            }
        }
    }

    fn invoke_complete(&mut self) {
        if let Some(cb) = self.on_complete.as_mut() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb()));
            if result.is_err() {
                tracing::error!("on_complete callback panicked");
            }
        }
    }
}

enum ChunkOutcome {
    Advanced(u64),
    Paused,
    Failed(TusError),
}

/// Resolve a (possibly relative, possibly comma-truncated-by-the-caller)
/// `Location` header against the URI the creation `POST` was sent to.
fn resolve_location(location: &str, base: &str) -> Result<String> {
    match url::Url::parse(location) {
        Ok(parsed) if parsed.host().is_some() => Ok(parsed.to_string()),
        _ => {
            let base = url::Url::parse(base)?;
            Ok(base.join(location)?.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_location_keeps_absolute_urls() {
        let resolved =
            resolve_location("https://tus.example.com/files/abc", "https://tus.example.com/files").unwrap();
        assert_eq!(resolved, "https://tus.example.com/files/abc");
    }

    #[test]
    fn resolve_location_joins_relative_paths() {
        let resolved = resolve_location("/files/abc", "https://tus.example.com/files").unwrap();
        assert_eq!(resolved, "https://tus.example.com/files/abc");
    }

    #[tokio::test]
    async fn new_engine_starts_idle_with_zero_offset() {
        let source = Arc::new(crate::source::BytesSource::new("a.bin", vec![1, 2, 3]));
        let store = Arc::new(crate::store::VolatileStore::new());
        let engine = UploadEngine::new(source, store, UploadConfig::default());
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.offset(), 0);
        assert!(engine.upload_url().is_none());
    }

    #[tokio::test]
    async fn fingerprint_is_stable_for_identical_sources() {
        let store = Arc::new(crate::store::VolatileStore::new());
        let a = UploadEngine::new(
            Arc::new(crate::source::BytesSource::new("a.bin", vec![1, 2, 3])),
            store.clone(),
            UploadConfig::default(),
        );
        let b = UploadEngine::new(
            Arc::new(crate::source::BytesSource::new("a.bin", vec![1, 2, 3])),
            store,
            UploadConfig::default(),
        );
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
