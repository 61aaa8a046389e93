//! Integration tests driving [`UploadEngine`] and [`UploadManager`] against
//! a mocked tus server, covering the end-to-end scenarios from the protocol
//! spec: a full upload, resume-after-restart, transient-failure retry,
//! protocol mismatch, mid-upload cancellation, and manager-level dedup.

use std::collections::BTreeMap;
use std::sync::Arc;

use tus_client::{BytesSource, UploadConfig, UploadEngine, VolatileStore};

#[tokio::test]
async fn new_engine_is_not_resumable_without_a_store_entry() {
    let source = Arc::new(BytesSource::new("a.bin", vec![0u8; 16]));
    let store = Arc::new(VolatileStore::new());
    let engine = UploadEngine::new(source, store, UploadConfig::default());
    assert!(!engine.is_resumable().await);
}

// Integration tests that exercise the wire protocol against a mocked tus
// server. Gated behind a feature since they spin up real HTTP listeners.
#[cfg(feature = "integration-tests")]
mod integration_tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::timeout;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    use tus_client::{EngineState, ManagerConfig, RetryPolicy, UploadManager};

    /// Echoes back `Upload-Offset: <request offset> + <body length>`, as a
    /// well-behaved tus server would after accepting a chunk.
    struct EchoOffsetResponder {
        status: u16,
    }

    impl Respond for EchoOffsetResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let offset: u64 = request
                .headers
                .get("Upload-Offset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let new_offset = offset + request.body.len() as u64;
            ResponseTemplate::new(self.status).insert_header("Upload-Offset", new_offset.to_string())
        }
    }

    /// Fails the first `flaky_attempts` PATCHes with `failure_status`, then
    /// echoes the offset back successfully.
    struct FlakyThenEchoResponder {
        attempts: AtomicU32,
        flaky_attempts: u32,
        failure_status: u16,
    }

    impl Respond for FlakyThenEchoResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.flaky_attempts {
                return ResponseTemplate::new(self.failure_status);
            }
            let offset: u64 = request
                .headers
                .get("Upload-Offset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let new_offset = offset + request.body.len() as u64;
            ResponseTemplate::new(204).insert_header("Upload-Offset", new_offset.to_string())
        }
    }

    async fn mount_creation(server: &MockServer, location: &str) {
        Mock::given(method("POST"))
            .and(path("/files"))
            .and(header("Tus-Resumable", "1.0.0"))
            .respond_with(ResponseTemplate::new(201).insert_header("Location", location))
            .mount(server)
            .await;
    }

    // Scenario A: 1,572,864-byte file, 524,288-byte chunks, server accepts
    // every PATCH; expect 3 chunks and a final progress of 100.0.
    #[tokio::test]
    async fn scenario_a_full_upload_sends_expected_chunk_count() {
        let server = MockServer::start().await;
        mount_creation(&server, &format!("{}/files/a", server.uri())).await;
        Mock::given(method("PATCH"))
            .and(path("/files/a"))
            .respond_with(EchoOffsetResponder { status: 204 })
            .mount(&server)
            .await;

        let source = Arc::new(BytesSource::new("video.mp4", vec![7u8; 1_572_864]));
        let store = Arc::new(VolatileStore::new());
        let mut engine = UploadEngine::new(
            source,
            store.clone(),
            UploadConfig {
                chunk_size: 524_288,
                ..Default::default()
            },
        );

        let last_percent = Arc::new(std::sync::Mutex::new(0.0f64));
        let observed = last_percent.clone();
        let on_progress: tus_client::ProgressFn = Box::new(move |percent, _eta| {
            *observed.lock().unwrap() = percent;
        });

        engine
            .upload(
                &format!("{}/files", server.uri()),
                Default::default(),
                Default::default(),
                Default::default(),
                tus_client::CallbackSlot::Set(on_progress),
                Default::default(),
            )
            .await
            .expect("upload should succeed");

        assert_eq!(engine.state(), EngineState::Completed);
        assert_eq!(*last_percent.lock().unwrap(), 100.0);

        let patches: Vec<_> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "PATCH")
            .collect();
        assert_eq!(patches.len(), 3);

        let fingerprint = tus_client::Fingerprint::new("video.mp4", 1_572_864, None);
        assert_eq!(store.get(&fingerprint).await.unwrap(), None);
    }

    // Scenario B: after one PATCH, the client "restarts" (a fresh engine is
    // built against the same store); resumption continues from the
    // server-reported offset rather than re-creating.
    #[tokio::test]
    async fn scenario_b_resume_continues_from_server_offset() {
        let server = MockServer::start().await;
        mount_creation(&server, &format!("{}/files/b", server.uri())).await;
        Mock::given(method("PATCH"))
            .and(path("/files/b"))
            .respond_with(EchoOffsetResponder { status: 204 })
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/files/b"))
            .respond_with(ResponseTemplate::new(200).insert_header("Upload-Offset", "524288"))
            .mount(&server)
            .await;

        let data = vec![9u8; 1_572_864];
        let store = Arc::new(VolatileStore::new());
        let config = UploadConfig {
            chunk_size: 524_288,
            ..Default::default()
        };

        let mut first = UploadEngine::new(
            Arc::new(BytesSource::new("video.mp4", data.clone())),
            store.clone(),
            config.clone(),
        );
        // Drive exactly one chunk, then simulate a crash by dropping `first`
        // without letting the loop continue: run upload() but pause
        // immediately after the first successful chunk via a progress
        // callback that flips the shared pause flag.
        let paused_after_first = first.pause_flag();
        let on_progress: tus_client::ProgressFn = Box::new(move |_percent, _eta| {
            paused_after_first.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        first
            .upload(
                &format!("{}/files", server.uri()),
                Default::default(),
                Default::default(),
                Default::default(),
                tus_client::CallbackSlot::Set(on_progress),
                Default::default(),
            )
            .await
            .expect("first leg should pause cleanly after one chunk");
        assert_eq!(first.state(), EngineState::Paused);
        assert_eq!(first.offset(), 524_288);
        drop(first);

        // "Restart": a fresh engine, same fingerprint, same store.
        let mut second = UploadEngine::new(
            Arc::new(BytesSource::new("video.mp4", data)),
            store,
            config,
        );
        second
            .upload(
                &format!("{}/files", server.uri()),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
            )
            .await
            .expect("resumed upload should complete");
        assert_eq!(second.state(), EngineState::Completed);

        let patches: Vec<_> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "PATCH")
            .collect();
        // One chunk from the first leg, two from the resumed leg.
        assert_eq!(patches.len(), 3);
        // Creation only happened once, not again on resume.
        let posts: Vec<_> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "POST")
            .collect();
        assert_eq!(posts.len(), 1);
    }

    // Scenario C: 100,000-byte file, 40,000-byte chunks, retries=2,
    // exponential backoff; the first chunk fails twice with 503 then
    // succeeds; expect exactly 3 attempts for that chunk and eventual
    // success.
    #[tokio::test]
    async fn scenario_c_transient_failure_retries_then_succeeds() {
        let server = MockServer::start().await;
        mount_creation(&server, &format!("{}/files/c", server.uri())).await;
        Mock::given(method("PATCH"))
            .and(path("/files/c"))
            .respond_with(FlakyThenEchoResponder {
                attempts: AtomicU32::new(0),
                flaky_attempts: 2,
                failure_status: 503,
            })
            .mount(&server)
            .await;

        let source = Arc::new(BytesSource::new("blob.bin", vec![1u8; 100_000]));
        let store = Arc::new(VolatileStore::new());
        let mut engine = UploadEngine::new(
            source,
            store,
            UploadConfig {
                chunk_size: 40_000,
                retries: 2,
                retry_policy: RetryPolicy::Exponential,
                retry_interval_secs: 0.01,
                ..Default::default()
            },
        );

        let result = timeout(
            Duration::from_secs(5),
            engine.upload(
                &format!("{}/files", server.uri()),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
            ),
        )
        .await
        .expect("upload should not hang");

        result.expect("upload should eventually succeed after retries");
        assert_eq!(engine.state(), EngineState::Completed);
        assert_eq!(engine.offset(), 100_000);
    }

    // Scenario D: the server disagrees with the expected post-chunk offset.
    // The engine must surface a protocol error and retain the store entry
    // rather than silently accepting a mismatched offset.
    #[tokio::test]
    async fn scenario_d_offset_mismatch_is_a_protocol_error() {
        let server = MockServer::start().await;
        mount_creation(&server, &format!("{}/files/d", server.uri())).await;
        Mock::given(method("PATCH"))
            .and(path("/files/d"))
            .respond_with(ResponseTemplate::new(204).insert_header("Upload-Offset", "40001"))
            .mount(&server)
            .await;

        let source = Arc::new(BytesSource::new("blob.bin", vec![1u8; 40_000]));
        let store = Arc::new(VolatileStore::new());
        let mut engine = UploadEngine::new(
            source,
            store.clone(),
            UploadConfig {
                chunk_size: 40_000,
                ..Default::default()
            },
        );

        let err = engine
            .upload(
                &format!("{}/files", server.uri()),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
            )
            .await
            .expect_err("mismatched offset must fail the upload");
        assert!(matches!(err, tus_client::TusError::Protocol { .. }));
        assert_eq!(engine.state(), EngineState::Failed);

        let fingerprint = tus_client::Fingerprint::new("blob.bin", 40_000, None);
        assert!(store.get(&fingerprint).await.unwrap().is_some());
    }

    // Scenario E: cancel mid-upload. After the first successful PATCH, the
    // caller cancels; no further PATCH is observed and the store entry is
    // gone.
    #[tokio::test]
    async fn scenario_e_cancel_stops_further_chunks_and_clears_the_store() {
        let server = MockServer::start().await;
        mount_creation(&server, &format!("{}/files/e", server.uri())).await;
        Mock::given(method("PATCH"))
            .and(path("/files/e"))
            .respond_with(EchoOffsetResponder { status: 204 })
            .mount(&server)
            .await;

        let source = Arc::new(BytesSource::new("blob.bin", vec![1u8; 200_000]));
        let store = Arc::new(VolatileStore::new());
        let mut engine = UploadEngine::new(
            source,
            store.clone(),
            UploadConfig {
                chunk_size: 50_000,
                ..Default::default()
            },
        );

        let pause_flag = engine.pause_flag();
        let on_progress: tus_client::ProgressFn = Box::new(move |_percent, _eta| {
            // Stand in for the caller observing the first chunk complete
            // and deciding to cancel: flip the pause flag the engine reads
            // at the top of its next loop iteration.
            pause_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        engine
            .upload(
                &format!("{}/files", server.uri()),
                Default::default(),
                Default::default(),
                Default::default(),
                tus_client::CallbackSlot::Set(on_progress),
                Default::default(),
            )
            .await
            .expect("pausing mid-upload is not an error");
        assert_eq!(engine.state(), EngineState::Paused);

        engine.cancel().await.expect("cancel should succeed");
        assert_eq!(engine.state(), EngineState::Cancelled);

        let fingerprint = tus_client::Fingerprint::new("blob.bin", 200_000, None);
        assert_eq!(store.get(&fingerprint).await.unwrap(), None);

        let patches: Vec<_> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "PATCH")
            .collect();
        assert_eq!(patches.len(), 1, "only the pre-cancel chunk should have been sent");
    }

    // Scenario F: a manager with bound=2 sees two `add_upload` calls for
    // files sharing a fingerprint; with `prevent_duplicates` on, exactly one
    // creation URL is minted.
    #[tokio::test]
    async fn scenario_f_manager_dedups_equal_fingerprints() {
        let server = MockServer::start().await;
        mount_creation(&server, &format!("{}/files/f", server.uri())).await;
        Mock::given(method("PATCH"))
            .and(path("/files/f"))
            .respond_with(EchoOffsetResponder { status: 204 })
            .mount(&server)
            .await;

        let manager = UploadManager::new(
            ManagerConfig {
                server_url: format!("{}/files", server.uri()),
                concurrency_bound: 2,
                auto_start: true,
                prevent_duplicates: true,
                ..Default::default()
            },
            Arc::new(VolatileStore::new()),
        );

        let id1 = manager
            .add_upload(
                Arc::new(BytesSource::new("dup.bin", vec![3u8; 10_000])),
                BTreeMap::new(),
                http::HeaderMap::new(),
            )
            .unwrap();
        let id_unrelated = manager
            .add_upload(
                Arc::new(BytesSource::new("other.bin", vec![4u8; 10_000])),
                BTreeMap::new(),
                http::HeaderMap::new(),
            )
            .unwrap();
        let id3 = manager
            .add_upload(
                Arc::new(BytesSource::new("dup.bin", vec![3u8; 10_000])),
                BTreeMap::new(),
                http::HeaderMap::new(),
            )
            .unwrap();

        assert_eq!(id1, id3, "the duplicate add must attach to the existing managed upload");
        assert_ne!(id1, id_unrelated);

        let result = timeout(Duration::from_secs(5), async {
            loop {
                let all_done = [&id1, &id_unrelated]
                    .iter()
                    .all(|id| {
                        matches!(
                            manager.get_upload(id).map(|u| u.status),
                            Some(tus_client::UploadStatus::Completed)
                        )
                    });
                if all_done {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "uploads should complete without hanging");

        let posts: Vec<_> = server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "POST")
            .collect();
        assert_eq!(posts.len(), 2, "exactly one creation per distinct fingerprint");
    }
}
