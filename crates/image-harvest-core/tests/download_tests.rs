mod common;

use std::time::Duration;

use common::*;
use image_harvest_core::session::{SessionState, SessionStore, TaskOutcome, SESSION_FILE_NAME};
use image_harvest_core::{ErrorKind, Orchestrator, SessionControl};
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::sleep;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn serve_png(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(png_bytes(&rings(96, 96)), "image/png"),
        )
        .mount(server)
        .await;
}

/// Answers every connection with an image/png body that never ends
async fn endless_chunked_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await;
                let head = "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nTransfer-Encoding: chunked\r\n\r\n";
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                let chunk = vec![0x5au8; 8192];
                let size_line = format!("{:x}\r\n", chunk.len());
                loop {
                    let sent = async {
                        socket.write_all(size_line.as_bytes()).await?;
                        socket.write_all(&chunk).await?;
                        socket.write_all(b"\r\n").await
                    };
                    if sent.await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    format!("http://{}", addr)
}

async fn request_count(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}

#[tokio::test]
async fn test_rate_limited_once_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a.png"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    serve_png(&server, "/a.png").await;

    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new())
        .unwrap()
        .with_retry_policy(fast_policy(3));
    let summary = orchestrator
        .run_session(vec![format!("{}/a.png", server.uri())], 1000, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(request_count(&server, "/a.png").await, 2);

    let saved = std::fs::read(dir.path().join("1000.jpeg")).unwrap();
    assert_eq!(image::guess_format(&saved).unwrap(), image::ImageFormat::Jpeg);
}

#[tokio::test]
async fn test_server_error_retried_exactly_retries_times() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down.png"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new())
        .unwrap()
        .with_retry_policy(fast_policy(3));
    let summary = orchestrator
        .run_session(vec![format!("{}/down.png", server.uri())], 1000, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures_by_kind.get(&ErrorKind::TransientNetwork), Some(&1));
    assert_eq!(request_count(&server, "/down.png").await, 3);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new()).unwrap();
    let summary = orchestrator
        .run_session(vec![format!("{}/missing.png", server.uri())], 1000, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures_by_kind.get(&ErrorKind::PermanentNetwork), Some(&1));
    assert_eq!(request_count(&server, "/missing.png").await, 1);
}

#[tokio::test]
async fn test_html_response_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![b'x'; 500], "text/html"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new()).unwrap();
    let summary = orchestrator
        .run_session(vec![format!("{}/page", server.uri())], 1000, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures_by_kind.get(&ErrorKind::InvalidInput), Some(&1));
    assert!(!dir.path().join("1000.jpeg").exists());
}

#[tokio::test]
async fn test_undecodable_payload_kept_as_unknown() {
    let server = MockServer::start().await;
    let garbage = vec![0x5au8; 2048];
    Mock::given(method("GET"))
        .and(path("/broken.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(garbage.clone(), "image/jpeg"))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new()).unwrap();
    let summary = orchestrator
        .run_session(vec![format!("{}/broken.jpg", server.uri())], 1000, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures_by_kind.get(&ErrorKind::DecodeFailure), Some(&1));
    assert!(!dir.path().join("1000.jpeg").exists());
    assert_eq!(std::fs::read(dir.path().join("1000.jpeg.unknown")).unwrap(), garbage);
}

#[tokio::test]
async fn test_existing_file_is_not_overwritten() {
    let server = MockServer::start().await;
    serve_png(&server, "/a.png").await;

    let dir = tempdir().unwrap();
    write_file(dir.path(), "1000.jpeg", b"already here");

    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new()).unwrap();
    let summary = orchestrator
        .run_session(vec![format!("{}/a.png", server.uri())], 1000, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(std::fs::read(dir.path().join("1000.jpeg")).unwrap(), b"already here");
    assert!(dir.path().join("1000.1.jpeg").exists());
}

#[tokio::test]
async fn test_finished_session_removes_file() {
    let server = MockServer::start().await;
    serve_png(&server, "/a.png").await;
    serve_png(&server, "/b.png").await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let urls = vec![
        format!("{}/a.png", server.uri()),
        format!("{}/b.png", server.uri()),
        format!("{}/gone.png", server.uri()),
    ];
    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new()).unwrap();
    let summary = orchestrator.run_session(urls, 1000, dir.path()).await.unwrap();

    assert_eq!((summary.succeeded, summary.failed, summary.skipped), (2, 1, 0));
    assert!(!dir.path().join(SESSION_FILE_NAME).exists());
    assert_eq!(file_names(dir.path()), vec!["1000.jpeg", "1001.jpeg"]);
}

#[tokio::test]
async fn test_resume_fetches_only_remaining_urls() {
    let server = MockServer::start().await;
    serve_png(&server, "/a.png").await;
    serve_png(&server, "/b.png").await;
    serve_png(&server, "/c.png").await;

    let dir = tempdir().unwrap();
    let urls = vec![
        format!("{}/a.png", server.uri()),
        format!("{}/b.png", server.uri()),
        format!("{}/c.png", server.uri()),
    ];
    let mut state = SessionState::new(urls.clone(), 2000, 3, dir.path());
    state.record(&urls[0], TaskOutcome::Completed);
    state.set_paused(true);
    SessionStore::for_dir(dir.path()).save(&state).await.unwrap();

    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new()).unwrap();
    let summary = orchestrator.resume_session(dir.path()).await.unwrap();

    assert_eq!(summary.session_id, state.session_id);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(request_count(&server, "/a.png").await, 0);
    // Each URL keeps the index it was given when the session was created
    assert_eq!(file_names(dir.path()), vec!["2001.jpeg", "2002.jpeg"]);
    assert!(!dir.path().join(SESSION_FILE_NAME).exists());
}

#[tokio::test]
async fn test_resume_without_session_fails() {
    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new()).unwrap();

    assert!(orchestrator.resume_session(dir.path()).await.is_err());
}

#[tokio::test]
async fn test_cancel_before_start_keeps_session() {
    let server = MockServer::start().await;
    serve_png(&server, "/a.png").await;
    serve_png(&server, "/b.png").await;

    let dir = tempdir().unwrap();
    let control = SessionControl::new();
    control.cancel();

    let urls = vec![
        format!("{}/a.png", server.uri()),
        format!("{}/b.png", server.uri()),
    ];
    let orchestrator = Orchestrator::new(&test_config(), control).unwrap();
    let summary = orchestrator.run_session(urls, 1000, dir.path()).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!((summary.succeeded, summary.failed, summary.skipped), (0, 0, 2));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());

    let saved = SessionStore::for_dir(dir.path()).load().await.unwrap().unwrap();
    assert!(saved.paused);
    assert_eq!(saved.remaining_urls().len(), 2);
}

#[tokio::test]
async fn test_progress_events_follow_outcomes() {
    let server = MockServer::start().await;
    serve_png(&server, "/a.png").await;
    Mock::given(method("GET"))
        .and(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new())
        .unwrap()
        .with_progress(tx);
    let urls = vec![
        format!("{}/a.png", server.uri()),
        format!("{}/missing.png", server.uri()),
    ];
    orchestrator.run_session(urls, 1000, dir.path()).await.unwrap();
    drop(orchestrator);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    assert_eq!(events.len(), 2);
    let last = events.last().unwrap();
    assert_eq!((last.completed, last.failed, last.total), (1, 1, 2));
    assert_eq!(last.percentage(), 100.0);
}

#[tokio::test]
async fn test_body_without_length_stops_at_size_ceiling() {
    let base = endless_chunked_server().await;

    let dir = tempdir().unwrap();
    let mut config = test_config();
    config.validation.max_download_size = 64 * 1024;
    let orchestrator = Orchestrator::new(&config, SessionControl::new())
        .unwrap()
        .with_retry_policy(fast_policy(1));
    let summary = orchestrator
        .run_session(vec![format!("{}/huge.png", base)], 1000, dir.path())
        .await
        .unwrap();

    // Buffering the whole body would run into the client timeout instead
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures_by_kind.get(&ErrorKind::InvalidInput), Some(&1));
    assert!(summary.elapsed < Duration::from_secs(5));
    assert!(!dir.path().join("1000.jpeg").exists());
    assert!(!dir.path().join("1000.jpeg.unknown").exists());
}

#[tokio::test]
async fn test_pause_blocks_new_attempts_until_resume() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(png_bytes(&rings(96, 96)), "image/png")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let mut config = test_config();
    config.download.concurrency = 1;
    let control = SessionControl::new();
    let orchestrator = Orchestrator::new(&config, control.clone()).unwrap();
    let urls: Vec<String> = (0..4)
        .map(|n| format!("{}/{}.png", server.uri(), n))
        .collect();

    let steer = async {
        sleep(Duration::from_millis(100)).await;
        control.pause();
        sleep(Duration::from_millis(1000)).await;
        let while_paused = server.received_requests().await.unwrap_or_default().len();
        let saved = SessionStore::for_dir(dir.path()).load().await.unwrap().unwrap();
        control.resume();
        (while_paused, saved)
    };
    let (summary, (while_paused, saved)) =
        tokio::join!(orchestrator.run_session(urls, 1000, dir.path()), steer);
    let summary = summary.unwrap();

    // Only the request already in flight when paused went out
    assert_eq!(while_paused, 1);
    assert!(saved.paused);
    assert_eq!(saved.completed_urls.len(), 1);

    assert_eq!(summary.succeeded, 4);
    assert!(!summary.cancelled);
    assert_eq!(server.received_requests().await.unwrap_or_default().len(), 4);
    assert!(!dir.path().join(SESSION_FILE_NAME).exists());
}

#[tokio::test]
async fn test_new_run_reports_replaced_session() {
    let server = MockServer::start().await;
    serve_png(&server, "/a.png").await;

    let dir = tempdir().unwrap();
    let pending = SessionState::new(
        vec![format!("{}/never.png", server.uri())],
        1,
        3,
        dir.path(),
    );
    SessionStore::for_dir(dir.path()).save(&pending).await.unwrap();

    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new()).unwrap();
    let summary = orchestrator
        .run_session(vec![format!("{}/a.png", server.uri())], 1000, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.replaced_session.as_deref(), Some(pending.session_id.as_str()));
    assert_ne!(summary.session_id, pending.session_id);
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn test_fresh_directory_replaces_nothing() {
    let server = MockServer::start().await;
    serve_png(&server, "/a.png").await;

    let dir = tempdir().unwrap();
    let orchestrator = Orchestrator::new(&test_config(), SessionControl::new()).unwrap();
    let summary = orchestrator
        .run_session(vec![format!("{}/a.png", server.uri())], 1000, dir.path())
        .await
        .unwrap();

    assert_eq!(summary.replaced_session, None);
}
