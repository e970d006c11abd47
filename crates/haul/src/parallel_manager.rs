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

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
    chunk::Chunk,
    chunk_downloader::ChunkDownloader,
    config::DownloadConfig,
    error::DownloadError,
    pause::PauseSignal,
    progress::ProgressSender,
    request::RequestBuilder,
    throttle::RateLimiter,
};

/// Result type for chunk download operations
type ChunkResult = Result<Chunk, (usize, DownloadError)>;

/// Runs one downloader task per chunk, bounded by the configured
/// concurrency. Within a chunk execution stays sequential; across chunks
/// there is no ordering guarantee.
pub struct ParallelDownloadManager {
    config:  Arc<DownloadConfig>,
    limiter: Arc<RateLimiter>,
}

impl ParallelDownloadManager {
    pub const fn new(config: Arc<DownloadConfig>, limiter: Arc<RateLimiter>) -> Self {
        Self { config, limiter }
    }

    /// Download all chunks, skipping the already-completed ones, and return
    /// them in index order for merging. The first failure wins; remaining
    /// tasks are still awaited so no storage handle is lost mid-write.
    pub async fn download_all(
        &self,
        chunks: Vec<Chunk>,
        request: &RequestBuilder,
        pause: &PauseSignal,
        cancel: &CancellationToken,
        progress: Option<ProgressSender>,
    ) -> Result<Vec<Chunk>, DownloadError> {
        if chunks.is_empty() {
            return Ok(chunks);
        }

        let handles = self.spawn_workers(chunks, request, pause, cancel, progress);
        self.collect_results(handles).await
    }

    /// Spawn worker tasks for each chunk
    fn spawn_workers(
        &self,
        chunks: Vec<Chunk>,
        request: &RequestBuilder,
        pause: &PauseSignal,
        cancel: &CancellationToken,
        progress: Option<ProgressSender>,
    ) -> Vec<tokio::task::JoinHandle<ChunkResult>> {
        let chunk_count = chunks.len();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_chunks.max(1)));

        chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let downloader = ChunkDownloader::new(
                    chunk,
                    Arc::clone(&self.config),
                    chunk_count,
                    Arc::clone(&self.limiter),
                    progress.clone(),
                );
                let request = request.clone();
                let pause = pause.clone();
                let cancel = cancel.clone();
                let semaphore = Arc::clone(&semaphore);

                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return Err((index, DownloadError::Cancelled));
                    };
                    Self::download_chunk_worker(downloader, index, &request, &pause, &cancel).await
                })
            })
            .collect()
    }

    /// Worker function that runs in each task
    async fn download_chunk_worker(
        mut downloader: ChunkDownloader,
        index: usize,
        request: &RequestBuilder,
        pause: &PauseSignal,
        cancel: &CancellationToken,
    ) -> ChunkResult {
        match downloader.download(request, pause, cancel).await {
            Ok(_) => Ok(downloader.into_chunk()),
            Err(error) => {
                tracing::warn!(chunk_index = index, %error, "chunk download failed");
                Err((index, error))
            }
        }
    }

    /// Collect results from all worker tasks
    async fn collect_results(
        &self,
        handles: Vec<tokio::task::JoinHandle<ChunkResult>>,
    ) -> Result<Vec<Chunk>, DownloadError> {
        let mut completed = Vec::with_capacity(handles.len());
        let mut first_error = None;

        for handle in handles {
            match handle.await {
                Ok(Ok(chunk)) => completed.push(chunk),
                Ok(Err((_index, error))) => {
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
                Err(join_error) => {
                    if first_error.is_none() {
                        first_error = Some(DownloadError::TaskPanic {
                            message: join_error.to_string(),
                        });
                    }
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(completed),
        }
    }
}
