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

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::Stream;
use snafu::{ResultExt, ensure};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    chunk::Chunk,
    config::DownloadConfig,
    error::{CancelledSnafu, DownloadError, FailureKind, NetworkSnafu, ResponseStatusSnafu},
    metrics::{BYTES_RECEIVED, CHUNK_RETRIES, CHUNKS_COMPLETED},
    pause::PauseSignal,
    progress::{DownloadProgress, ProgressSender},
    request::RequestBuilder,
    throttle::{RateLimiter, ThrottledStream},
};

/// Added to a chunk's read timeout on every fresh top-level attempt, ms.
const TIMEOUT_INCREMENT: u64 = 10;

/// Response statuses accepted as a usable body: OK, Created, Accepted,
/// Reset Content, Partial Content.
const ACCEPTED_STATUSES: [u16; 5] = [200, 201, 202, 205, 206];

/// Drives one chunk from its current position to completion over an
/// unreliable transport.
///
/// Retries are resumable rather than idempotent restarts: the chunk's
/// position survives across attempts and the range header is recomputed
/// from `start + position`, so a retried request never re-downloads bytes
/// that already reached storage.
pub struct ChunkDownloader {
    chunk:       Chunk,
    config:      Arc<DownloadConfig>,
    chunk_count: usize,
    limiter:     Arc<RateLimiter>,
    progress:    Option<ProgressSender>,
}

impl ChunkDownloader {
    #[must_use]
    pub fn new(
        chunk: Chunk,
        config: Arc<DownloadConfig>,
        chunk_count: usize,
        limiter: Arc<RateLimiter>,
        progress: Option<ProgressSender>,
    ) -> Self {
        Self {
            chunk,
            config,
            chunk_count,
            limiter,
            progress,
        }
    }

    #[must_use]
    pub const fn chunk(&self) -> &Chunk { &self.chunk }

    #[must_use]
    pub fn into_chunk(self) -> Chunk { self.chunk }

    /// Converges the chunk to completion, classifying every failure and
    /// retrying the recoverable ones.
    ///
    /// One loop iteration is one top-level attempt; the attempt state that
    /// matters across iterations (current timeout, remaining failover
    /// budget, position) lives in the chunk itself.
    pub async fn download(
        &mut self,
        request: &RequestBuilder,
        pause: &PauseSignal,
        cancel: &CancellationToken,
    ) -> Result<&Chunk, DownloadError> {
        loop {
            // Every re-attempt reads with more patience.
            self.chunk.escalate_timeout(TIMEOUT_INCREMENT);

            match self.download_chunk(request, pause, cancel).await {
                Ok(()) => {
                    self.chunk.flush().await?;
                    CHUNKS_COMPLETED.inc();
                    return Ok(&self.chunk);
                }
                Err(error) => match FailureKind::classify(&error) {
                    FailureKind::Cancelled => return Err(error),
                    FailureKind::TransientStall => {
                        CHUNK_RETRIES.with_label_values(&["stall"]).inc();
                        tracing::debug!(
                            chunk = %self.chunk.id(),
                            timeout_ms = self.chunk.timeout(),
                            "read stalled, re-requesting from current position"
                        );
                    }
                    FailureKind::TransientTransport => {
                        if !self.chunk.can_try_again_on_failover() {
                            tracing::warn!(
                                chunk = %self.chunk.id(),
                                failovers = self.chunk.failover_count(),
                                %error,
                                "failover budget exhausted"
                            );
                            return Err(error);
                        }
                        CHUNK_RETRIES.with_label_values(&["failover"]).inc();
                        tracing::debug!(
                            chunk = %self.chunk.id(),
                            failovers = self.chunk.failover_count(),
                            %error,
                            "transport fault, backing off before re-request"
                        );
                        self.backoff(cancel).await?;
                    }
                    FailureKind::RejectedStatus | FailureKind::Fatal => return Err(error),
                },
            }
        }
    }

    /// Waits the chunk's current timeout before the next failover attempt;
    /// cut short by cancellation.
    async fn backoff(&self, cancel: &CancellationToken) -> Result<(), DownloadError> {
        tokio::select! {
            () = cancel.cancelled() => CancelledSnafu.fail(),
            () = sleep(Duration::from_millis(self.chunk.timeout())) => Ok(()),
        }
    }

    /// A single top-level attempt: request, validate status, stream the
    /// body into storage.
    async fn download_chunk(
        &mut self,
        request: &RequestBuilder,
        pause: &PauseSignal,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        ensure!(!cancel.is_cancelled(), CancelledSnafu);

        // Idempotent no-op: a finished chunk never touches the network again.
        if self.chunk.is_download_completed().await {
            return Ok(());
        }

        let response = request.send(self.request_range()).await?;

        let status = response.status();
        ensure!(
            ACCEPTED_STATUSES.contains(&status.as_u16()),
            ResponseStatusSnafu {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown"),
            }
        );

        let block_size = usize::try_from(self.config.block_size.as_bytes()).unwrap_or(usize::MAX);
        let stream =
            ThrottledStream::new(response.bytes_stream(), Arc::clone(&self.limiter), block_size);
        self.read_stream(stream, pause, cancel).await
    }

    /// The range re-requested on this attempt, starting past every byte
    /// already stored. A sole, fresh, unconfigured chunk omits the header
    /// entirely since some servers reject ranges on plain downloads.
    fn request_range(&self) -> Option<(i64, i64)> {
        let ranged =
            self.chunk_count > 1 || self.chunk.position() > 0 || self.config.range_download;
        (self.chunk.end() > 0 && ranged)
            .then(|| (self.chunk.start() + self.chunk.position(), self.chunk.end()))
    }

    async fn read_stream<S>(
        &mut self,
        mut stream: ThrottledStream<S>,
        pause: &PauseSignal,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError>
    where
        S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
    {
        while self.chunk.can_read_more() {
            // Park here while paused; the connection stays up.
            tokio::select! {
                () = cancel.cancelled() => return CancelledSnafu.fail(),
                () = pause.wait_while_paused() => {}
            }

            let read_timeout = Duration::from_millis(self.chunk.timeout());
            // Two distinct signals: the outer token means the caller is
            // done, the elapsed inner timer means this read went dead.
            let pulled = tokio::select! {
                () = cancel.cancelled() => return CancelledSnafu.fail(),
                pulled = timeout(read_timeout, stream.next_chunk()) => pulled,
            };
            let Ok(block) = pulled else {
                return Err(DownloadError::ReadStalled {
                    chunk_id:   self.chunk.id().to_string(),
                    timeout_ms: self.chunk.timeout(),
                });
            };
            let Some(block) = block else { break };
            let piece = block.context(NetworkSnafu)?;
            if piece.is_empty() {
                break;
            }

            self.chunk.write(&piece).await?;
            self.chunk.advance(piece.len());
            self.report_progress(piece.len());
        }

        Ok(())
    }

    /// Fire-and-forget: a slow or dropped subscriber never stalls the loop.
    fn report_progress(&self, read: usize) {
        BYTES_RECEIVED.inc_by(read as u64);
        if let Some(ref sender) = self.progress {
            let _ = sender.send(DownloadProgress {
                chunk_id:            self.chunk.id().to_string(),
                total_expected:      self.chunk.length(),
                received_cumulative: self.chunk.position(),
                received_this_read:  read,
            });
        }
    }
}
