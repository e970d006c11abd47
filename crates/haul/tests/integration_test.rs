// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    convert::Infallible,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::head,
};
use axum_test::TestServer;
use futures::StreamExt as _;
use haul::{
    Chunk, ChunkDownloader, ChunkLayout, DownloadConfig, DownloadError, DownloadRequest,
    DownloadState, Downloader, FailureKind, MemoryStorage, PauseSignal, RateLimiter,
    RequestBuilder, chunk_boundaries, progress_channel,
};
use haul_base::readable_size::ReadableSize;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    sync::{Mutex, Notify, oneshot},
};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct GetHooks {
    started: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    release: Arc<Notify>,
}

#[derive(Clone)]
struct AppState {
    content:       Arc<Vec<u8>>,
    accept_ranges: bool,
    /// Force this status on every GET, regardless of range handling
    get_status:    Option<u16>,
    /// Range headers observed on GET requests, in arrival order
    ranges_seen:   Arc<Mutex<Vec<Option<String>>>>,
    /// GETs stall forever (headers sent, no body) for the first N attempts
    stall_gets:    usize,
    get_attempts:  Arc<AtomicUsize>,
    hooks:         Option<GetHooks>,
}

impl AppState {
    fn new(content: Vec<u8>) -> Self {
        Self {
            content:       Arc::new(content),
            accept_ranges: false,
            get_status:    None,
            ranges_seen:   Arc::new(Mutex::new(Vec::new())),
            stall_gets:    0,
            get_attempts:  Arc::new(AtomicUsize::new(0)),
            hooks:         None,
        }
    }
}

async fn handle_head(State(state): State<AppState>) -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&state.content.len().to_string()).unwrap(),
    );
    if state.accept_ranges {
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    (StatusCode::OK, headers)
}

async fn handle_get(headers: HeaderMap, State(state): State<AppState>) -> Response {
    if let Some(hooks) = state.hooks.as_ref() {
        let mut sender = hooks.started.lock().await;
        if let Some(tx) = sender.take() {
            let _ = tx.send(());
        }
        hooks.release.notified().await;
    }

    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    state.ranges_seen.lock().await.push(range_header.clone());

    if let Some(status) = state.get_status {
        return StatusCode::from_u16(status).unwrap().into_response();
    }

    let attempt = state.get_attempts.fetch_add(1, Ordering::SeqCst);
    if attempt < state.stall_gets {
        // Headers go out, the body never arrives.
        let stalled = futures::stream::pending::<Result<Bytes, Infallible>>();
        return Response::builder()
            .status(StatusCode::OK)
            .body(Body::from_stream(stalled))
            .unwrap();
    }

    let total_len = state.content.len();
    let range = range_header.and_then(|value| parse_range(&value, total_len));

    if state.accept_ranges
        && let Some((start, end)) = range
    {
        let slice = &state.content[start..=end];
        let mut response_headers = HeaderMap::new();
        response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        response_headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {start}-{end}/{total_len}")).unwrap(),
        );
        response_headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&slice.len().to_string()).unwrap(),
        );
        return (
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            Bytes::copy_from_slice(slice),
        )
            .into_response();
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&total_len.to_string()).unwrap(),
    );
    (
        StatusCode::OK,
        response_headers,
        Bytes::copy_from_slice(&state.content),
    )
        .into_response()
}

fn parse_range(value: &str, total: usize) -> Option<(usize, usize)> {
    let value = value.strip_prefix("bytes=")?;
    let (start_str, end_str) = value.split_once('-')?;
    let start: usize = start_str.parse().ok()?;
    let end: usize = end_str.parse().ok()?;
    if start <= end && end < total {
        Some((start, end))
    } else {
        None
    }
}

fn create_temp_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("haul-{prefix}-"))
        .tempdir()
        .expect("failed to create temp dir")
}

fn create_test_server(state: AppState) -> TestServer {
    let app = Router::new()
        .route("/file", head(handle_head).get(handle_get))
        .with_state(state);

    // Create a test server with HTTP transport for real network access
    TestServer::builder()
        .http_transport()
        .build(app)
}

/// Get the full URL for the /file endpoint
fn get_file_url(server: &TestServer) -> String {
    let base = server
        .server_address()
        .expect("server should have HTTP address")
        .to_string();
    if base.ends_with('/') {
        format!("{base}file")
    } else {
        format!("{base}/file")
    }
}

fn test_config(temp_dir: &TempDir) -> DownloadConfig {
    DownloadConfig {
        temp_dir: temp_dir.path().to_path_buf(),
        read_timeout_ms: 2_000,
        ..DownloadConfig::default()
    }
}

fn hash_url(url: &str) -> String {
    use std::fmt::Write as _;
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// A raw HTTP server that drops the first `drop_first` connections without
/// answering, simulating a host forcibly closing the connection, then serves
/// the full content in a single write.
async fn spawn_flaky_http_server(content: Vec<u8>, drop_first: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut dropped = 0usize;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            if dropped < drop_first {
                dropped += 1;
                drop(socket);
                continue;
            }

            let content = content.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = vec![0u8; 4096];
                loop {
                    let Ok(n) = socket.read(&mut buf).await else {
                        return;
                    };
                    if n == 0 {
                        return;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|window| window == b"\r\n\r\n") {
                        break;
                    }
                }

                let mut response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    content.len()
                )
                .into_bytes();
                response.extend_from_slice(&content);
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}/file")
}

fn chunk_downloader_for(
    url_config: &DownloadConfig,
    start: i64,
    end: i64,
) -> (ChunkDownloader, haul::ProgressReceiver) {
    let (sender, receiver) = progress_channel();
    let chunk = Chunk::new(
        start,
        end,
        Box::new(MemoryStorage::new()),
        url_config.read_timeout_ms,
        url_config.max_try_again_on_failover,
    );
    let downloader = ChunkDownloader::new(
        chunk,
        Arc::new(url_config.clone()),
        1,
        Arc::new(RateLimiter::new(url_config.max_bytes_per_second)),
        Some(sender),
    );
    (downloader, receiver)
}

#[tokio::test]
async fn download_single_file() {
    haul_telemetry::logging::init_default_ut_logging();

    let content = b"single-download-test".repeat(512);
    let server = create_test_server(AppState::new(content.clone()));

    let temp_dir = create_temp_dir("temp");
    let output_dir = create_temp_dir("out");
    let mut downloader = Downloader::new(test_config(&temp_dir));
    let mut progress = downloader.subscribe_progress();

    let output_path = output_dir.path().join("file.bin");
    let result = downloader
        .download(DownloadRequest {
            url:         get_file_url(&server),
            output_path: output_path.clone(),
        })
        .await
        .unwrap();

    assert!(!result.resumed);
    assert_eq!(result.size, content.len() as u64);
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);

    // Per-read events add up to the whole file, in stream order.
    let mut events = Vec::new();
    while let Ok(event) = progress.try_recv() {
        events.push(event);
    }
    let total: usize = events.iter().map(|e| e.received_this_read).sum();
    assert_eq!(total, content.len());
    assert!(
        events
            .windows(2)
            .all(|pair| pair[0].received_cumulative <= pair[1].received_cumulative)
    );
}

#[tokio::test]
async fn download_parallel_with_range_support() {
    let content = b"parallel-download-test".repeat(1024);
    let state = AppState {
        accept_ranges: true,
        ..AppState::new(content.clone())
    };
    let ranges_seen = Arc::clone(&state.ranges_seen);
    let server = create_test_server(state);

    let temp_dir = create_temp_dir("temp");
    let output_dir = create_temp_dir("out");

    let chunking = haul::ChunkingConfig {
        min_chunk_size:        ReadableSize::kb(1),
        max_chunks:            4,
        small_file_threshold:  ReadableSize(1),
        medium_file_threshold: ReadableSize::mb(1),
    };
    let config = DownloadConfig {
        chunking,
        ..test_config(&temp_dir)
    };

    let downloader = Downloader::new(config);
    let result = downloader
        .download(DownloadRequest {
            url:         get_file_url(&server),
            output_path: output_dir.path().join("parallel.bin"),
        })
        .await
        .unwrap();

    assert_eq!(result.size, content.len() as u64);
    assert_eq!(tokio::fs::read(&result.path).await.unwrap(), content);

    // Multiple chunks means every request carried a range header.
    let ranges = ranges_seen.lock().await;
    assert_eq!(ranges.len(), 4);
    assert!(ranges.iter().all(Option::is_some));
}

#[tokio::test]
async fn download_unknown_length_streams_to_eof() {
    let content = b"unknown-length-stream".repeat(700);

    // HEAD reports no usable size and GET streams chunked, so the single
    // chunk has an open-ended range and reads until the stream ends.
    let get_content = content.clone();
    let app = Router::new().route(
        "/file",
        head(|| async { StatusCode::OK }).get(move || {
            let content = get_content.clone();
            async move {
                let frames = content
                    .chunks(512)
                    .map(|frame| Ok::<_, Infallible>(Bytes::copy_from_slice(frame)))
                    .collect::<Vec<_>>();
                Body::from_stream(futures::stream::iter(frames))
            }
        }),
    );
    let server = TestServer::builder().http_transport().build(app);

    let temp_dir = create_temp_dir("temp");
    let output_dir = create_temp_dir("out");
    let downloader = Downloader::new(test_config(&temp_dir));

    let result = downloader
        .download(DownloadRequest {
            url:         get_file_url(&server),
            output_path: output_dir.path().join("streamed.bin"),
        })
        .await
        .unwrap();

    assert_eq!(result.size, content.len() as u64);
    assert_eq!(tokio::fs::read(&result.path).await.unwrap(), content);
}

#[tokio::test]
async fn download_resumes_after_interruption() {
    let content = b"resume-after-interruption-test".repeat(2048);
    let state = AppState {
        accept_ranges: true,
        ..AppState::new(content.clone())
    };
    let ranges_seen = Arc::clone(&state.ranges_seen);
    let server = create_test_server(state);

    let temp_dir = create_temp_dir("temp");
    let output_dir = create_temp_dir("out");
    let url = get_file_url(&server);
    let url_hash = hash_url(&url);
    let temp_path = temp_dir.path();

    // Manually persist a state simulating a prior interrupted download:
    // chunk 0 fully stored, chunk 1 partially stored, chunk 2 untouched.
    let boundaries = chunk_boundaries(content.len() as u64, 3);
    let chunks: Vec<ChunkLayout> = boundaries
        .iter()
        .enumerate()
        .map(|(index, (start, end))| ChunkLayout {
            index,
            start: *start,
            end: *end,
            part_file: temp_path.join(format!("{url_hash}.part{index}")),
        })
        .collect();

    let (start0, end0) = boundaries[0];
    tokio::fs::write(
        &chunks[0].part_file,
        &content[usize::try_from(start0).unwrap()..=usize::try_from(end0).unwrap()],
    )
    .await
    .unwrap();

    let (start1, _) = boundaries[1];
    let partial = 100usize;
    let start1 = usize::try_from(start1).unwrap();
    tokio::fs::write(&chunks[1].part_file, &content[start1..start1 + partial])
        .await
        .unwrap();

    let now = jiff::Timestamp::now().as_second();
    let download_state = DownloadState {
        url: url.clone(),
        file_size: Some(content.len() as u64),
        chunks,
        created_at: now,
        updated_at: now,
    };
    let state_json = serde_json::to_string_pretty(&download_state).unwrap();
    tokio::fs::write(temp_path.join(format!("{url_hash}.state.json")), state_json)
        .await
        .unwrap();

    let downloader = Downloader::new(test_config(&temp_dir));
    let output_path = output_dir.path().join("resume.bin");
    let result = downloader
        .download(DownloadRequest {
            url:         url.clone(),
            output_path: output_path.clone(),
        })
        .await
        .unwrap();

    assert!(result.resumed, "download should continue from saved state");
    assert_eq!(result.size, content.len() as u64);
    assert_eq!(tokio::fs::read(&output_path).await.unwrap(), content);

    // The completed chunk stayed offline; the partial chunk re-requested
    // from its persisted position, not from its start.
    let ranges = ranges_seen.lock().await;
    assert_eq!(ranges.len(), 2, "completed chunk must not hit the network");
    let expected = format!(
        "bytes={}-{}",
        boundaries[1].0 + i64::try_from(partial).unwrap(),
        boundaries[1].1
    );
    assert!(
        ranges.contains(&Some(expected.clone())),
        "partial chunk should resume at {expected}, saw {ranges:?}"
    );

    // State file has been cleaned up after completion.
    assert!(
        !tokio::fs::try_exists(temp_path.join(format!("{url_hash}.state.json")))
            .await
            .unwrap_or(true)
    );
}

#[tokio::test]
async fn rejected_status_is_fatal_without_retry() {
    let content = b"irrelevant".repeat(64);
    let state = AppState {
        get_status: Some(404),
        ..AppState::new(content.clone())
    };
    let server = create_test_server(state);

    let temp_dir = create_temp_dir("temp");
    let config = test_config(&temp_dir);
    let (mut downloader, _progress) =
        chunk_downloader_for(&config, 0, content.len() as i64 - 1);

    let request = RequestBuilder::new(reqwest::Client::new(), get_file_url(&server), &config);
    let error = downloader
        .download(&request, &PauseSignal::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(FailureKind::classify(&error), FailureKind::RejectedStatus);
    assert!(error.to_string().contains("download response status was 404"));
    // Server-side rejection consumes no failover budget and stores nothing.
    assert_eq!(downloader.chunk().failover_count(), 0);
    assert_eq!(downloader.chunk().position(), 0);
}

#[tokio::test]
async fn transport_failover_retries_then_succeeds() {
    let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let url = spawn_flaky_http_server(content.clone(), 2).await;

    let temp_dir = create_temp_dir("temp");
    let config = DownloadConfig {
        read_timeout_ms: 100,
        max_try_again_on_failover: 2,
        block_size: ReadableSize(256),
        ..test_config(&temp_dir)
    };
    let (mut downloader, mut progress) = chunk_downloader_for(&config, 0, 999);

    let request = RequestBuilder::new(reqwest::Client::new(), url, &config);
    downloader
        .download(&request, &PauseSignal::new(), &CancellationToken::new())
        .await
        .expect("third attempt should succeed");

    let chunk = downloader.chunk();
    assert!(chunk.is_download_completed().await);
    assert_eq!(chunk.position(), 1000);
    // Two transport faults consumed exactly two failover units.
    assert_eq!(chunk.failover_count(), 2);
    // One timeout escalation per top-level attempt.
    assert_eq!(chunk.timeout(), 100 + 3 * 10);

    let mut events = Vec::new();
    while let Ok(event) = progress.try_recv() {
        events.push(event);
    }
    let cumulative: Vec<i64> = events.iter().map(|e| e.received_cumulative).collect();
    let reads: Vec<usize> = events.iter().map(|e| e.received_this_read).collect();
    assert_eq!(cumulative, vec![256, 512, 768, 1000]);
    assert_eq!(reads, vec![256, 256, 256, 232]);
    assert!(events.iter().all(|e| e.total_expected == 1000));
}

#[tokio::test]
async fn stall_retries_without_consuming_failover_budget() {
    let content = b"stall-then-succeed".repeat(100);
    let state = AppState {
        stall_gets: 2,
        ..AppState::new(content.clone())
    };
    let server = create_test_server(state);

    let temp_dir = create_temp_dir("temp");
    let config = DownloadConfig {
        read_timeout_ms: 100,
        ..test_config(&temp_dir)
    };
    let (mut downloader, _progress) =
        chunk_downloader_for(&config, 0, content.len() as i64 - 1);

    let request = RequestBuilder::new(reqwest::Client::new(), get_file_url(&server), &config);
    downloader
        .download(&request, &PauseSignal::new(), &CancellationToken::new())
        .await
        .expect("attempt after the stalls should succeed");

    let chunk = downloader.chunk();
    assert!(chunk.is_download_completed().await);
    // Stalls are retried unbudgeted; only the timeout escalates.
    assert_eq!(chunk.failover_count(), 0);
    assert_eq!(chunk.timeout(), 100 + 3 * 10);
}

#[tokio::test]
async fn cancellation_mid_read_is_terminal() {
    let first_frame = Bytes::from(vec![0xAB; 256]);

    // Serves one frame then stalls forever, to park the reader mid-stream.
    let app = Router::new().route(
        "/file",
        axum::routing::get(move || {
            let first_frame = first_frame.clone();
            async move {
                let stream = futures::stream::iter(vec![Ok::<_, Infallible>(first_frame)])
                    .chain(futures::stream::pending());
                Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from_stream(stream))
                    .unwrap()
            }
        }),
    );
    let server = TestServer::builder().http_transport().build(app);

    let temp_dir = create_temp_dir("temp");
    let config = DownloadConfig {
        read_timeout_ms: 30_000,
        ..test_config(&temp_dir)
    };
    let (downloader, mut progress) = chunk_downloader_for(&config, 0, 9999);
    let request = RequestBuilder::new(reqwest::Client::new(), get_file_url(&server), &config);

    let pause = PauseSignal::new();
    let cancel = CancellationToken::new();
    let task = {
        let cancel = cancel.clone();
        let mut downloader = downloader;
        tokio::spawn(async move {
            let outcome = downloader
                .download(&request, &pause, &cancel)
                .await
                .map(|_| ());
            (downloader, outcome)
        })
    };

    // Cancel only once bytes are flowing, so the read loop is mid-stream.
    let first = tokio::time::timeout(Duration::from_secs(5), progress.recv())
        .await
        .expect("first frame should arrive")
        .expect("progress channel open");
    assert_eq!(first.received_this_read, 256);

    cancel.cancel();
    let (downloader, outcome) = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancellation must end the download promptly")
        .unwrap();

    let error = outcome.unwrap_err();
    assert_eq!(FailureKind::classify(&error), FailureKind::Cancelled);
    // Cancellation is not a transport fault; no failover was consumed.
    assert_eq!(downloader.chunk().failover_count(), 0);
}

#[tokio::test]
async fn pause_blocks_reads_until_resumed() {
    let content = b"pause-resume-test".repeat(512);
    let server = create_test_server(AppState::new(content.clone()));

    let temp_dir = create_temp_dir("temp");
    let config = test_config(&temp_dir);
    let (downloader, mut progress) =
        chunk_downloader_for(&config, 0, content.len() as i64 - 1);
    let request = RequestBuilder::new(reqwest::Client::new(), get_file_url(&server), &config);

    let pause = PauseSignal::new();
    pause.pause();

    let task = {
        let pause = pause.clone();
        let mut downloader = downloader;
        tokio::spawn(async move {
            let outcome = downloader
                .download(&request, &pause, &CancellationToken::new())
                .await
                .map(|_| ());
            (downloader, outcome)
        })
    };

    // While paused, nothing is read and nothing is reported.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(progress.try_recv().is_err(), "no bytes may flow while paused");

    pause.resume();
    let (downloader, outcome) = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("resume should let the download finish")
        .unwrap();

    outcome.unwrap();
    assert!(downloader.chunk().is_download_completed().await);
    assert!(progress.recv().await.is_some(), "progress resumes with reads");
}

#[tokio::test]
async fn download_fails_when_lock_held() {
    let content = b"lock-test-content".repeat(512);
    let (tx, rx) = oneshot::channel();
    let hooks = GetHooks {
        started: Arc::new(Mutex::new(Some(tx))),
        release: Arc::new(Notify::new()),
    };

    let state = AppState {
        hooks: Some(hooks.clone()),
        ..AppState::new(content.clone())
    };
    let server = create_test_server(state);

    let temp_dir = create_temp_dir("temp");
    let output_dir = create_temp_dir("out");
    let downloader = Arc::new(Downloader::new(test_config(&temp_dir)));
    let url = get_file_url(&server);

    let first = {
        let downloader = Arc::clone(&downloader);
        let request = DownloadRequest {
            url:         url.clone(),
            output_path: output_dir.path().join("locked.bin"),
        };
        tokio::spawn(async move { downloader.download(request).await })
    };

    let _ = rx.await;

    let second = downloader
        .download(DownloadRequest {
            url,
            output_path: output_dir.path().join("locked-2.bin"),
        })
        .await;
    assert!(matches!(
        second,
        Err(DownloadError::DownloadInProgress { .. })
    ));

    hooks.release.notify_one();
    let _ = first.await.unwrap();
}

#[tokio::test]
async fn in_memory_download_leaves_no_part_files() {
    let content = b"in-memory-download".repeat(256);
    let server = create_test_server(AppState::new(content.clone()));

    let temp_dir = create_temp_dir("temp");
    let output_dir = create_temp_dir("out");
    let config = DownloadConfig {
        in_memory: true,
        ..test_config(&temp_dir)
    };
    let downloader = Downloader::new(config);

    let result = downloader
        .download(DownloadRequest {
            url:         get_file_url(&server),
            output_path: output_dir.path().join("memory.bin"),
        })
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(&result.path).await.unwrap(), content);

    let mut entries = tokio::fs::read_dir(temp_dir.path()).await.unwrap();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        let name = entry.file_name().to_string_lossy().to_string();
        assert!(
            !name.contains(".part"),
            "in-memory mode must not write part files, found {name}"
        );
    }
}

#[tokio::test]
async fn speed_limit_lift_applies_mid_download() {
    let content = vec![0x5A; 4096];
    let server = create_test_server(AppState::new(content.clone()));

    let temp_dir = create_temp_dir("temp");
    let output_dir = create_temp_dir("out");
    let config = DownloadConfig {
        // 64-byte blocks at 64 B/s: one block per second while throttled.
        block_size: ReadableSize(64),
        max_bytes_per_second: 64,
        read_timeout_ms: 10_000,
        ..test_config(&temp_dir)
    };
    let downloader = Arc::new(Downloader::new(config));
    let started = std::time::Instant::now();

    let handle = {
        let downloader = Arc::clone(&downloader);
        let request = DownloadRequest {
            url:         get_file_url(&server),
            output_path: output_dir.path().join("limited.bin"),
        };
        tokio::spawn(async move { downloader.download(request).await })
    };

    // Under the 64 B/s ceiling the full 4096 bytes would take about a
    // minute; lifting the ceiling mid-flight must unblock the stream on its
    // next read, without restarting the download.
    tokio::time::sleep(Duration::from_millis(300)).await;
    downloader.set_speed_limit(0);

    let result = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("lifted ceiling must let the download finish promptly")
        .unwrap()
        .unwrap();

    assert_eq!(result.size, content.len() as u64);
    assert_eq!(
        tokio::fs::read(&result.path).await.unwrap(),
        content,
        "throttled and unthrottled reads must assemble the same bytes"
    );
    assert!(started.elapsed() >= Duration::from_millis(300));
}
