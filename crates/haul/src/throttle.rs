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
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::time::{Instant, sleep};

/// Accounting restarts once the window has drained and aged past this,
/// which bounds bursts and lets ceiling changes take effect promptly.
const WINDOW_LENGTH: Duration = Duration::from_secs(1);

/// Process-wide bandwidth ceiling shared by every chunk of a download.
///
/// The ceiling lives in an atomic so it can be raised or lowered from any
/// thread while reads are in flight; consumers look it up on every read, so
/// no restart is needed for a change to apply. A ceiling of 0 disables
/// throttling.
#[derive(Debug)]
pub struct RateLimiter {
    bytes_per_second: AtomicU64,
    window:           Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    started:  Instant,
    consumed: u64,
}

impl RateLimiter {
    #[must_use]
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second: AtomicU64::new(bytes_per_second),
            window:           Mutex::new(Window {
                started:  Instant::now(),
                consumed: 0,
            }),
        }
    }

    pub fn set_ceiling(&self, bytes_per_second: u64) {
        self.bytes_per_second.store(bytes_per_second, Ordering::Release);
    }

    #[must_use]
    pub fn ceiling(&self) -> u64 { self.bytes_per_second.load(Ordering::Acquire) }

    /// Charges `amount` bytes against the current ceiling, sleeping long
    /// enough that cumulative throughput stays under it.
    pub async fn acquire(&self, amount: u64) {
        let ceiling = self.ceiling();
        if ceiling == 0 || amount == 0 {
            return;
        }

        let wait = {
            let mut window = self.window.lock().expect("rate limiter window poisoned");
            let elapsed = window.started.elapsed();
            #[allow(clippy::cast_precision_loss)]
            let paid = Duration::from_secs_f64(window.consumed as f64 / ceiling as f64);
            if elapsed >= paid && elapsed >= WINDOW_LENGTH {
                window.started = Instant::now();
                window.consumed = 0;
            }

            window.consumed += amount;
            #[allow(clippy::cast_precision_loss)]
            let due = Duration::from_secs_f64(window.consumed as f64 / ceiling as f64);
            due.checked_sub(window.started.elapsed())
        };

        if let Some(wait) = wait
            && !wait.is_zero()
        {
            sleep(wait).await;
        }
    }
}

/// Wraps a response byte stream, yielding at most `block_size` bytes per
/// read and delaying each read to keep throughput under the limiter's
/// current ceiling.
///
/// Slicing at the stream layer keeps individual throttle sleeps
/// proportional to one block rather than to whatever frame the transport
/// delivered, so a lowered ceiling never parks a reader for an unbounded
/// stretch.
pub struct ThrottledStream<S> {
    inner:      S,
    limiter:    Arc<RateLimiter>,
    block_size: usize,
    pending:    Bytes,
}

impl<S> ThrottledStream<S> {
    #[must_use]
    pub fn new(inner: S, limiter: Arc<RateLimiter>, block_size: usize) -> Self {
        Self {
            inner,
            limiter,
            block_size: block_size.max(1),
            pending: Bytes::new(),
        }
    }
}

impl<S, E> ThrottledStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    /// Yields the next block of the underlying stream. The ceiling is
    /// consulted per call, so concurrent `set_ceiling` updates apply from
    /// the very next read.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, E>> {
        if self.pending.is_empty() {
            match self.inner.next().await {
                Some(Ok(bytes)) => self.pending = bytes,
                other => return other,
            }
            if self.pending.is_empty() {
                // Pass a zero-byte read through; the caller treats it as
                // end-of-data.
                return Some(Ok(Bytes::new()));
            }
        }

        let take = self.pending.len().min(self.block_size);
        let piece = self.pending.split_to(take);
        self.limiter.acquire(piece.len() as u64).await;
        Some(Ok(piece))
    }
}
