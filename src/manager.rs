//! Bounded-concurrency coordinator for many [`UploadEngine`]s: a FIFO ready
//! queue, duplicate suppression by fingerprint, and a broadcast event
//! stream.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast};

use crate::engine::{CallbackSlot, EngineState, UploadConfig, UploadEngine};
use crate::error::{Result, TusError};
use crate::fingerprint::Fingerprint;
use crate::http::HttpClient;
use crate::retry::RetryPolicy;
use crate::source::UploadSource;
use crate::store::Store;

/// Identifies one managed upload: `"<fingerprint>-<creation-timestamp-ms>"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UploadId(String);

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A managed upload's externally observable status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadStatus {
    /// Registered, not yet started (or re-queued after a slot freed up).
    Ready,
    /// Actively uploading on a manager-owned task.
    Uploading,
    /// Paused; resumable via [`UploadManager::resume_upload`].
    Paused,
    /// Finished successfully.
    Completed,
    /// Terminated by an unrecoverable error.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

impl UploadStatus {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The payload of a manager event.
#[derive(Clone, Debug)]
pub enum EventKind {
    /// A new upload was registered.
    Add,
    /// The engine began (or resumed) sending chunks.
    Start,
    /// A chunk was confirmed by the server.
    Progress {
        /// Percent complete, clamped to `[0, 100]`.
        percent: f64,
        /// Estimated time remaining.
        eta: Duration,
    },
    /// The upload was paused.
    Pause,
    /// The upload resumed from a pause.
    Resume,
    /// The upload finished successfully.
    Complete,
    /// The upload failed.
    Error {
        /// Human-readable failure description.
        message: String,
    },
    /// The upload was cancelled.
    Cancel,
}

/// One event broadcast by the manager: which upload, and what happened.
#[derive(Clone, Debug)]
pub struct ManagerEvent {
    /// The managed upload the event pertains to.
    pub id: UploadId,
    /// What happened.
    pub kind: EventKind,
}

/// A point-in-time snapshot of a managed upload, returned by
/// [`UploadManager::get_upload`] and [`UploadManager::get_all_uploads`].
#[derive(Clone, Debug)]
pub struct UploadSnapshot {
    /// The managed upload's id.
    pub id: UploadId,
    /// Its fingerprint.
    pub fingerprint: Fingerprint,
    /// Its current status.
    pub status: UploadStatus,
    /// Percent complete, clamped to `[0, 100]`.
    pub progress: f64,
    /// The failure message, if `status` is `Failed`.
    pub error: Option<String>,
}

/// Manager-wide configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Base URI uploads are created against.
    pub server_url: String,
    /// Default chunk size for uploads added without an override.
    pub chunk_size: usize,
    /// Maximum number of uploads running concurrently.
    pub concurrency_bound: usize,
    /// Start uploads as soon as they're added, subject to the bound.
    pub auto_start: bool,
    /// Run the speed probe before each upload's chunk loop.
    pub measure_speed: bool,
    /// Reject re-creation of an upload whose store entry the server forgot.
    pub prevent_duplicates: bool,
    /// Retry backoff strategy passed through to each engine.
    pub retry_policy: RetryPolicy,
    /// Retries per chunk passed through to each engine.
    pub retries: u32,
    /// Base retry interval (seconds) passed through to each engine.
    pub retry_interval_secs: f64,
    /// Emit verbose `tracing::debug!` events for every lifecycle transition
    /// (add/start/pause/resume/cancel/queue admission) rather than just the
    /// terminal ones.
    pub debug: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            chunk_size: crate::engine::DEFAULT_CHUNK_SIZE,
            concurrency_bound: 3,
            auto_start: true,
            measure_speed: false,
            prevent_duplicates: true,
            retry_policy: RetryPolicy::default(),
            retries: 0,
            retry_interval_secs: 0.0,
            debug: false,
        }
    }
}

struct PauseHandle {
    paused: Arc<std::sync::atomic::AtomicBool>,
    notify: Arc<Notify>,
}

impl PauseHandle {
    fn signal(&self) {
        self.paused.store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

struct ManagedUpload {
    id: UploadId,
    fingerprint: Fingerprint,
    status: UploadStatus,
    progress: f64,
    error: Option<String>,
    created_at_ms: u128,
    headers: http::HeaderMap,
    metadata: BTreeMap<String, String>,
    pause_handle: PauseHandle,
    /// `None` while a manager-owned task is actively driving the engine.
    engine: Option<UploadEngine>,
}

struct ManagerState {
    uploads: HashMap<UploadId, ManagedUpload>,
    queue: VecDeque<UploadId>,
    active: HashSet<UploadId>,
}

/// Owns many [`UploadEngine`]s, enforcing a concurrency bound, FIFO
/// scheduling, and duplicate suppression by fingerprint.
pub struct UploadManager {
    config: ManagerConfig,
    store: Arc<dyn Store>,
    client: HttpClient,
    state: Mutex<ManagerState>,
    events: broadcast::Sender<ManagerEvent>,
}

impl UploadManager {
    /// Create a manager with the given configuration and shared store.
    pub fn new(config: ManagerConfig, store: Arc<dyn Store>) -> Arc<Self> {
        Self::with_client(config, store, HttpClient::new())
    }

    /// Create a manager using a caller-supplied HTTP client.
    pub fn with_client(config: ManagerConfig, store: Arc<dyn Store>, client: HttpClient) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            config,
            store,
            client,
            state: Mutex::new(ManagerState {
                uploads: HashMap::new(),
                queue: VecDeque::new(),
                active: HashSet::new(),
            }),
            events,
        })
    }

    /// Subscribe to the event stream. A subscriber only sees events
    /// dispatched after it subscribes; a lagging subscriber silently drops
    /// events rather than stalling the manager (native `broadcast`
    /// semantics).
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Register a new upload. If `prevent_duplicates` is set and a
    /// non-terminal managed upload already exists for this fingerprint, its
    /// id is returned instead of creating a second one.
    pub fn add_upload(
        self: &Arc<Self>,
        source: Arc<dyn UploadSource>,
        mut metadata: BTreeMap<String, String>,
        headers: http::HeaderMap,
    ) -> Result<UploadId> {
        let engine_config = UploadConfig {
            chunk_size: self.config.chunk_size,
            retries: self.config.retries,
            retry_policy: self.config.retry_policy,
            retry_interval_secs: self.config.retry_interval_secs,
            measure_speed: self.config.measure_speed,
            prevent_duplicates: self.config.prevent_duplicates,
            resume_enabled: true,
        };
        metadata
            .entry("filename".to_string())
            .or_insert_with(|| source.name().to_string());

        let engine = UploadEngine::new(source, self.store.clone(), engine_config).with_client(self.client.clone());
        let fingerprint = engine.fingerprint().clone();

        let pause_handle = PauseHandle {
            paused: engine.pause_flag(),
            notify: engine.cancel_notify(),
        };

        let created_at_ms = now_ms();
        let id = UploadId(format!("{fingerprint}-{created_at_ms}"));

        let managed = ManagedUpload {
            id: id.clone(),
            fingerprint: fingerprint.clone(),
            status: UploadStatus::Ready,
            progress: 0.0,
            error: None,
            created_at_ms,
            headers,
            metadata,
            pause_handle,
            engine: Some(engine),
        };

        // The duplicate check and the insert must happen under the same
        // lock guard: dropping the lock in between would let two concurrent
        // `add_upload` calls for the same fingerprint both observe "no
        // entry" and both insert, minting two managed uploads (and two
        // creations) for what should be a single deduplicated upload.
        let id = {
            let mut state = self.state.lock();
            if self.config.prevent_duplicates {
                if let Some(existing) = state
                    .uploads
                    .values()
                    .filter(|m| m.fingerprint == fingerprint && !m.status.is_terminal())
                    .max_by_key(|m| m.created_at_ms)
                {
                    return Ok(existing.id.clone());
                }
            }
            state.uploads.insert(id.clone(), managed);
            id
        };
        self.emit(id.clone(), EventKind::Add);

        if self.config.auto_start {
            self.start_upload(&id)?;
        }
        Ok(id)
    }

    /// Start (or re-queue) a registered upload.
    pub fn start_upload(self: &Arc<Self>, id: &UploadId) -> Result<()> {
        let mut state = self.state.lock();
        let managed = state
            .uploads
            .get_mut(id)
            .ok_or_else(|| TusError::State(format!("unknown upload id: {id}")))?;

        let via_resume = match managed.status {
            UploadStatus::Uploading => return Ok(()),
            _ if managed.status.is_terminal() => {
                return Err(TusError::State(format!("upload {id} already finished")));
            }
            UploadStatus::Paused => true,
            _ => false,
        };

        if state.active.len() >= self.config.concurrency_bound {
            if !state.queue.contains(id) {
                state.queue.push_back(id.clone());
            }
            if self.config.debug {
                tracing::debug!(%id, active = state.active.len(), bound = self.config.concurrency_bound, "queued: concurrency bound reached");
            }
            return Ok(());
        }

        state.active.insert(id.clone());
        drop(state);

        if self.config.debug {
            tracing::debug!(%id, via_resume, "admitted to active set");
        }

        let manager = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move { manager.drive(id, via_resume).await });
        Ok(())
    }

    /// Pause an actively uploading entry.
    pub fn pause_upload(self: &Arc<Self>, id: &UploadId) -> Result<()> {
        let state = self.state.lock();
        let managed = state
            .uploads
            .get(id)
            .ok_or_else(|| TusError::State(format!("unknown upload id: {id}")))?;
        if managed.status != UploadStatus::Uploading {
            return Ok(());
        }
        managed.pause_handle.signal();
        Ok(())
    }

    /// Resume a paused entry, subject to the concurrency bound.
    pub fn resume_upload(self: &Arc<Self>, id: &UploadId) -> Result<()> {
        let mut state = self.state.lock();
        let managed = state
            .uploads
            .get_mut(id)
            .ok_or_else(|| TusError::State(format!("unknown upload id: {id}")))?;
        if managed.status != UploadStatus::Paused {
            return Ok(());
        }

        if state.active.len() >= self.config.concurrency_bound {
            if !state.queue.contains(id) {
                state.queue.push_back(id.clone());
            }
            return Ok(());
        }

        state.active.insert(id.clone());
        drop(state);

        let manager = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move { manager.drive(id, true).await });
        Ok(())
    }

    /// Cancel an upload: pause it (best-effort) and forget its store entry.
    /// Idempotent; always removes manager-side bookkeeping.
    pub async fn cancel_upload(self: &Arc<Self>, id: &UploadId) -> Result<bool> {
        let fingerprint = {
            let mut state = self.state.lock();
            let Some(managed) = state.uploads.get_mut(id) else {
                return Ok(false);
            };
            managed.pause_handle.signal();
            managed.status = UploadStatus::Cancelled;
            state.active.remove(id);
            state.queue.retain(|queued| queued != id);
            managed.fingerprint.clone()
        };
        self.store.remove(&fingerprint).await?;
        self.emit(id.clone(), EventKind::Cancel);
        self.process_queue();
        Ok(true)
    }

    /// Pause every currently uploading entry.
    pub fn pause_all(self: &Arc<Self>) {
        let ids: Vec<UploadId> = {
            let state = self.state.lock();
            state
                .uploads
                .values()
                .filter(|m| m.status == UploadStatus::Uploading)
                .map(|m| m.id.clone())
                .collect()
        };
        for id in ids {
            let _ = self.pause_upload(&id);
        }
    }

    /// Resume every currently paused entry.
    pub fn resume_all(self: &Arc<Self>) {
        let ids: Vec<UploadId> = {
            let state = self.state.lock();
            state
                .uploads
                .values()
                .filter(|m| m.status == UploadStatus::Paused)
                .map(|m| m.id.clone())
                .collect()
        };
        for id in ids {
            let _ = self.resume_upload(&id);
        }
    }

    /// Cancel every non-terminal entry.
    pub async fn cancel_all(self: &Arc<Self>) {
        let ids: Vec<UploadId> = {
            let state = self.state.lock();
            state
                .uploads
                .values()
                .filter(|m| !m.status.is_terminal())
                .map(|m| m.id.clone())
                .collect()
        };
        for id in ids {
            let _ = self.cancel_upload(&id).await;
        }
    }

    /// A snapshot of one managed upload's current state.
    pub fn get_upload(&self, id: &UploadId) -> Option<UploadSnapshot> {
        self.state.lock().uploads.get(id).map(ManagedUpload::snapshot)
    }

    /// Snapshots of every tracked upload.
    pub fn get_all_uploads(&self) -> Vec<UploadSnapshot> {
        self.state.lock().uploads.values().map(ManagedUpload::snapshot).collect()
    }

    /// Find the newest non-terminal id registered for a given fingerprint.
    pub fn get_id_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<UploadId> {
        self.state
            .lock()
            .uploads
            .values()
            .filter(|m| &m.fingerprint == fingerprint)
            .max_by_key(|m| m.created_at_ms)
            .map(|m| m.id.clone())
    }

    /// The fingerprint a managed id was registered under.
    pub fn get_fingerprint_for_id(&self, id: &UploadId) -> Option<Fingerprint> {
        self.state.lock().uploads.get(id).map(|m| m.fingerprint.clone())
    }

    /// Cancel every non-terminal upload and drop all manager bookkeeping.
    /// The manager remains usable afterwards; this just clears its state.
    pub async fn dispose(self: &Arc<Self>) {
        self.cancel_all().await;
        self.state.lock().uploads.clear();
    }

    fn emit(&self, id: UploadId, kind: EventKind) {
        if self.config.debug {
            tracing::debug!(%id, ?kind, "manager event");
        }
        let _ = self.events.send(ManagerEvent { id, kind });
    }

    fn process_queue(self: &Arc<Self>) {
        let next = {
            let mut state = self.state.lock();
            if state.active.len() >= self.config.concurrency_bound {
                None
            } else {
                state.queue.pop_front()
            }
        };
        if let Some(id) = next {
            let _ = self.start_upload(&id);
        }
    }

    async fn drive(self: Arc<Self>, id: UploadId, via_resume: bool) {
        let (mut engine, uri, headers, metadata) = {
            let mut state = self.state.lock();
            let Some(managed) = state.uploads.get_mut(&id) else {
                return;
            };
            managed.status = UploadStatus::Uploading;
            let engine = managed.engine.take().expect("engine checked out exactly once");
            (
                engine,
                self.config.server_url.clone(),
                managed.headers.clone(),
                managed.metadata.clone(),
            )
        };

        self.emit(id.clone(), if via_resume { EventKind::Resume } else { EventKind::Start });

        let progress_tx = self.events.clone();
        let progress_id = id.clone();
        let progress_manager = self.clone();
        let progress_id_for_store = id.clone();
        let on_progress: Box<dyn FnMut(f64, Duration) + Send> = Box::new(move |percent, eta| {
            progress_manager.record_progress(&progress_id_for_store, percent);
            let _ = progress_tx.send(ManagerEvent {
                id: progress_id.clone(),
                kind: EventKind::Progress { percent, eta },
            });
        });

        let result = if via_resume {
            engine
                .resume(CallbackSlot::Keep, CallbackSlot::Set(on_progress), CallbackSlot::Keep)
                .await
        } else {
            engine
                .upload(
                    &uri,
                    headers,
                    metadata,
                    CallbackSlot::Keep,
                    CallbackSlot::Set(on_progress),
                    CallbackSlot::Keep,
                )
                .await
        };

        let final_state = engine.state();

        let cancelled_during_drive = {
            let mut state = self.state.lock();
            state.active.remove(&id);
            if let Some(managed) = state.uploads.get_mut(&id) {
                managed.engine = Some(engine);
                // `cancel_upload` races an in-flight drive by signalling the
                // pause handle; if it already marked this entry Cancelled,
                // that verdict wins over whatever the interrupted upload
                // settled into (the store removal it performed still holds).
                if managed.status == UploadStatus::Cancelled {
                    true
                } else {
                    match &result {
                        Err(err) => {
                            managed.status = UploadStatus::Failed;
                            managed.error = Some(err.to_string());
                        }
                        Ok(()) => match final_state {
                            EngineState::Completed => managed.status = UploadStatus::Completed,
                            EngineState::Paused => managed.status = UploadStatus::Paused,
                            _ => {
                                managed.status = UploadStatus::Failed;
                                managed.error = Some("upload ended in an unexpected state".to_string());
                            }
                        },
                    }
                    false
                }
            } else {
                true
            }
        };

        if !cancelled_during_drive {
            match result {
                Err(err) => self.emit(id.clone(), EventKind::Error { message: err.to_string() }),
                Ok(()) => match final_state {
                    EngineState::Completed => self.emit(id.clone(), EventKind::Complete),
                    EngineState::Paused => self.emit(id.clone(), EventKind::Pause),
                    _ => {}
                },
            }
        }

        self.process_queue();
    }

    fn record_progress(&self, id: &UploadId, percent: f64) {
        if let Some(managed) = self.state.lock().uploads.get_mut(id) {
            managed.progress = percent;
        }
    }
}

impl ManagedUpload {
    fn snapshot(&self) -> UploadSnapshot {
        UploadSnapshot {
            id: self.id.clone(),
            fingerprint: self.fingerprint.clone(),
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
        }
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
