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

#![allow(clippy::unused_self)]

use std::{io::ErrorKind, sync::Arc};

use fd_lock::RwLock;
use jiff::Timestamp;
use snafu::{ResultExt, ensure};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::{
    chunk::Chunk,
    chunk_merger::ChunkMerger,
    config::DownloadConfig,
    error::{
        DownloadError, DownloadInProgressSnafu, FileSizeUnknownSnafu, FileWriteSnafu,
        RangeNotSupportedSnafu,
    },
    file_info::{FileInfo, FileInfoFetcher},
    parallel_manager::ParallelDownloadManager,
    pause::PauseSignal,
    progress::{ProgressReceiver, ProgressSender, progress_channel},
    request::{RequestBuilder, build_client},
    state_manager::{StateManager, chunk_boundaries},
    storage::{FileStorage, MemoryStorage, Storage},
    throttle::RateLimiter,
    types::{DownloadRequest, DownloadResult, DownloadState},
};

/// Resumable parallel HTTP downloader.
///
/// Components:
/// - `StateManager`: persists chunk layouts so interrupted downloads resume
/// - `FileInfoFetcher`: probes size and range support from the server
/// - `ParallelDownloadManager`: drives per-chunk downloaders concurrently
/// - `ChunkMerger`: assembles completed chunks into the final file
///
/// Runtime controls operate on every in-flight chunk at once: `pause` /
/// `resume` gate the read loops, `set_speed_limit` adjusts the shared
/// bandwidth ceiling, and `cancel` terminally stops this downloader.
pub struct Downloader {
    config:    Arc<DownloadConfig>,
    client:    reqwest::Client,
    state:     StateManager,
    file_info: FileInfoFetcher,
    parallel:  ParallelDownloadManager,
    limiter:   Arc<RateLimiter>,
    pause:     PauseSignal,
    cancel:    CancellationToken,
    progress:  Option<ProgressSender>,
}

impl Downloader {
    /// Create a new downloader with the given configuration
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client fails to build (should never happen with
    /// valid config)
    #[must_use]
    pub fn new(config: DownloadConfig) -> Self {
        let client = build_client(&config);
        let config = Arc::new(config);
        let state = StateManager::new(config.temp_dir.clone());
        let file_info = FileInfoFetcher::new(client.clone());
        let limiter = Arc::new(RateLimiter::new(config.max_bytes_per_second));
        let parallel = ParallelDownloadManager::new(Arc::clone(&config), Arc::clone(&limiter));

        Self {
            config,
            client,
            state,
            file_info,
            parallel,
            limiter,
            pause: PauseSignal::new(),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Suspends every chunk's read loop at its next read without dropping
    /// connections.
    pub fn pause(&self) { self.pause.pause(); }

    /// Releases a previous `pause`.
    pub fn resume(&self) { self.pause.resume(); }

    /// Terminally stops all downloads driven by this downloader. In-flight
    /// calls surface `DownloadError::Cancelled`; partial progress stays on
    /// disk for a later resume by a fresh downloader.
    pub fn cancel(&self) { self.cancel.cancel(); }

    /// Adjusts the shared bandwidth ceiling (bytes per second, 0 for
    /// unlimited); in-flight streams pick it up on their next read.
    pub fn set_speed_limit(&self, bytes_per_second: u64) {
        self.limiter.set_ceiling(bytes_per_second);
    }

    /// The shared pause signal, for callers that gate several downloaders
    /// together.
    #[must_use]
    pub fn pause_signal(&self) -> PauseSignal { self.pause.clone() }

    /// Registers this downloader's progress subscriber, replacing any
    /// previous one. Events are per-read and per-chunk.
    pub fn subscribe_progress(&mut self) -> ProgressReceiver {
        let (sender, receiver) = progress_channel();
        self.progress = Some(sender);
        receiver
    }

    /// Download a file from the given URL
    ///
    /// This method will:
    /// 1. Acquire a lock to prevent concurrent downloads of the same URL
    /// 2. Resume from saved state if available and still valid
    /// 3. Probe the server for size and range support
    /// 4. Partition into chunks and drive them in parallel
    /// 5. Merge completed chunks into the output file and clean up
    pub async fn download(
        &self,
        request: DownloadRequest,
    ) -> Result<DownloadResult, DownloadError> {
        let start_time = Timestamp::now();

        // Acquire lock to prevent concurrent downloads of the same URL.
        // The lock is automatically released when _lock_guard is dropped.
        let lock_path = self.state.lock_path(&request.url);

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).await.context(FileWriteSnafu)?;
        }

        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .context(FileWriteSnafu)?;
        let mut lock = RwLock::new(file);
        let _lock_guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                return DownloadInProgressSnafu {
                    url: request.url.clone(),
                }
                .fail();
            }
            Err(err) => return Err(DownloadError::FileWrite { source: err }),
        };

        // Resume if a valid state exists, otherwise start a fresh download.
        if !self.config.in_memory
            && let Some(saved_state) = self.state.load(&request.url).await?
            && let Some(result) = self.resume_inner(&request, saved_state, start_time).await?
        {
            return Ok(result);
        }

        self.download_inner(&request, start_time).await
    }

    /// Clean up all temporary files and state for a URL
    pub async fn cleanup(&self, url: &str) -> Result<(), DownloadError> {
        self.state.cleanup(url).await
    }

    /// Inner download logic (after lock is acquired)
    async fn download_inner(
        &self,
        request: &DownloadRequest,
        start_time: Timestamp,
    ) -> Result<DownloadResult, DownloadError> {
        let file_info = self.file_info.fetch(&request.url).await?;
        let boundaries = self.plan_boundaries(&file_info)?;

        let state = self
            .state
            .create_state(&request.url, file_info.size, boundaries);
        if !self.config.in_memory {
            self.state.save(&state).await?;
        }

        let mut chunks = self.build_chunks(&state).await?;
        for chunk in &mut chunks {
            // A fresh download never trusts leftover part-file bytes.
            chunk.clear().await?;
        }
        self.drive_and_merge(request, state, chunks, start_time, false)
            .await
    }

    /// Inner resume logic (after lock is acquired)
    async fn resume_inner(
        &self,
        request: &DownloadRequest,
        saved_state: DownloadState,
        start_time: Timestamp,
    ) -> Result<Option<DownloadResult>, DownloadError> {
        let file_info = self.file_info.fetch(&request.url).await?;

        // Validate state matches current server state
        if !self
            .state
            .validate(&saved_state, &request.url, file_info.size)
        {
            // State is stale, clean up and fall back to a fresh download.
            self.state.cleanup(&request.url).await?;
            return Ok(None);
        }

        let mut chunks = self.build_chunks(&saved_state).await?;
        for chunk in &mut chunks {
            // The declared position must never lie ahead of persisted bytes.
            chunk.set_valid_position().await;
        }

        self.drive_and_merge(request, saved_state, chunks, start_time, true)
            .await
            .map(Some)
    }

    async fn drive_and_merge(
        &self,
        request: &DownloadRequest,
        state: DownloadState,
        chunks: Vec<Chunk>,
        start_time: Timestamp,
        resumed: bool,
    ) -> Result<DownloadResult, DownloadError> {
        let request_builder = RequestBuilder::new(self.client.clone(), &request.url, &self.config);

        let mut completed = self
            .parallel
            .download_all(
                chunks,
                &request_builder,
                &self.pause,
                &self.cancel,
                self.progress.clone(),
            )
            .await?;

        let size = ChunkMerger::merge(&request.output_path, &mut completed).await?;

        // Part files and state are no longer needed once merged.
        drop(completed);
        self.state.cleanup(&state.url).await?;

        Ok(DownloadResult {
            path: request.output_path.clone(),
            size,
            resumed,
            duration: start_time.until(Timestamp::now()).unwrap_or_default(),
        })
    }

    /// Partition the resource according to what the server offers: ranged
    /// servers with a known size get the configured chunking, everything
    /// else streams as a single chunk (with `end = start - 1` when even the
    /// size is unknown).
    fn plan_boundaries(&self, file_info: &FileInfo) -> Result<Vec<(i64, i64)>, DownloadError> {
        match file_info.size {
            Some(size) if size > 0 && file_info.supports_range => {
                let num_chunks = self.config.chunking.calculate_chunks(size);
                Ok(chunk_boundaries(size, num_chunks))
            }
            Some(size) => {
                ensure!(!self.config.range_download, RangeNotSupportedSnafu);
                #[allow(clippy::cast_possible_wrap)]
                let end = size as i64 - 1;
                Ok(vec![(0, end)])
            }
            None => {
                ensure!(!self.config.range_download, FileSizeUnknownSnafu);
                Ok(vec![(0, -1)])
            }
        }
    }

    async fn build_chunks(&self, state: &DownloadState) -> Result<Vec<Chunk>, DownloadError> {
        let mut chunks = Vec::with_capacity(state.chunks.len());
        for layout in &state.chunks {
            let storage: Box<dyn Storage> = if self.config.in_memory {
                Box::new(MemoryStorage::new())
            } else {
                Box::new(FileStorage::open(&layout.part_file).await?)
            };
            chunks.push(Chunk::new(
                layout.start,
                layout.end,
                storage,
                self.config.read_timeout_ms,
                self.config.max_try_again_on_failover,
            ));
        }
        Ok(chunks)
    }
}
