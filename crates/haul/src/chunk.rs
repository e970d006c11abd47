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

use std::fmt;

use uuid::Uuid;

use crate::{
    error::DownloadError,
    storage::{Storage, StorageReader},
};

/// Ownership of one contiguous byte range `[start, end]` (inclusive) of the
/// remote resource.
///
/// Offsets are signed so that `end == start - 1` can denote a zero-length
/// chunk whose real size is unknown until the stream ends. Exactly one
/// downloader task mutates a chunk at a time; the chunk itself carries no
/// network or concurrency logic.
pub struct Chunk {
    id:       String,
    start:    i64,
    end:      i64,
    position: i64,
    /// Current per-read timeout in milliseconds; escalated by the downloader
    /// on every fresh attempt.
    timeout: u64,
    failover_count: u32,
    max_try_again_on_failover: u32,
    storage: Box<dyn Storage>,
}

impl Chunk {
    #[must_use]
    pub fn new(
        start: i64,
        end: i64,
        storage: Box<dyn Storage>,
        timeout: u64,
        max_try_again_on_failover: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            start,
            end,
            position: 0,
            timeout,
            failover_count: 0,
            max_try_again_on_failover,
            storage,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str { &self.id }

    #[must_use]
    pub const fn start(&self) -> i64 { self.start }

    #[must_use]
    pub const fn end(&self) -> i64 { self.end }

    #[must_use]
    pub const fn position(&self) -> i64 { self.position }

    #[must_use]
    pub const fn timeout(&self) -> u64 { self.timeout }

    #[must_use]
    pub const fn failover_count(&self) -> u32 { self.failover_count }

    #[must_use]
    pub const fn max_try_again_on_failover(&self) -> u32 { self.max_try_again_on_failover }

    /// Derived; 0 means the real length is unknown.
    #[must_use]
    pub const fn length(&self) -> i64 { self.end - self.start + 1 }

    /// Combined check-and-consume on the failover budget: every call counts
    /// against the budget, and a `false` result is terminal for that failure
    /// class. Answers `true` exactly `max_try_again_on_failover` times.
    pub const fn can_try_again_on_failover(&mut self) -> bool {
        let allowed = self.failover_count < self.max_try_again_on_failover;
        self.failover_count = self.failover_count.saturating_add(1);
        allowed
    }

    /// Raises the per-read timeout; called once per fresh top-level attempt
    /// so slow links get progressively more patience instead of failing
    /// permanently on the first stall.
    pub const fn escalate_timeout(&mut self, increment: u64) {
        self.timeout = self.timeout.saturating_add(increment);
    }

    pub(crate) const fn advance(&mut self, read: usize) { self.position += read as i64; }

    /// More bytes remain to read: either the length is unknown, or the
    /// position has not reached it yet.
    pub(crate) const fn can_read_more(&self) -> bool {
        self.length() == 0 || self.length() - self.position > 0
    }

    pub(crate) async fn write(&mut self, bytes: &[u8]) -> Result<(), DownloadError> {
        self.storage.write(bytes).await
    }

    pub(crate) async fn reader(&mut self) -> Result<StorageReader, DownloadError> {
        self.storage.reader().await
    }

    /// Restarts the chunk from empty: position and failover budget reset,
    /// backing storage cleared.
    pub async fn clear(&mut self) -> Result<(), DownloadError> {
        self.position = 0;
        self.failover_count = 0;
        self.storage.clear().await
    }

    /// Forces buffered storage bytes to durable state; never affects the
    /// position.
    pub async fn flush(&mut self) -> Result<(), DownloadError> { self.storage.flush().await }

    /// Resynchronizes the position from the storage's actual length, so a
    /// resumed chunk never claims bytes that were not persisted.
    pub async fn set_valid_position(&mut self) {
        #[allow(clippy::cast_possible_wrap)]
        let storage_length = self.storage.length().await as i64;
        self.position = storage_length;
    }

    /// The declared position must always match the storage's actual byte
    /// count; divergence indicates a corrupted resume state.
    pub async fn is_valid_position(&self) -> bool {
        #[allow(clippy::cast_possible_wrap)]
        let storage_length = self.storage.length().await as i64;
        self.length() == 0
            || (self.position >= 0
                && self.position <= self.length()
                && self.position == storage_length)
    }

    /// All three conditions must hold together: a storage length equal to
    /// the target is not enough on its own if the position never reached
    /// `end`, which guards against stale or duplicated writes.
    pub async fn is_download_completed(&self) -> bool {
        #[allow(clippy::cast_possible_wrap)]
        let storage_length = self.storage.length().await as i64;
        let is_non_empty = storage_length > 0 && self.length() > 0;
        let is_filled = self.start + self.position >= self.end;
        let storage_matches = storage_length == self.length();

        is_non_empty && is_filled && storage_matches
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("position", &self.position)
            .field("timeout", &self.timeout)
            .field("failover_count", &self.failover_count)
            .field("max_try_again_on_failover", &self.max_try_again_on_failover)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn chunk(start: i64, end: i64) -> Chunk {
        Chunk::new(start, end, Box::new(MemoryStorage::new()), 1000, 3)
    }

    #[test]
    fn test_length_is_derived() {
        assert_eq!(chunk(0, 999).length(), 1000);
        assert_eq!(chunk(500, 999).length(), 500);
        // An end of start - 1 denotes a zero-length / unknown-length chunk.
        assert_eq!(chunk(0, -1).length(), 0);
        assert_eq!(chunk(100, 99).length(), 0);
    }

    #[test]
    fn test_ids_are_unique_and_stable() {
        let a = chunk(0, 9);
        let b = chunk(0, 9);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.id());
    }

    #[test]
    fn test_failover_budget_consumed_exactly_max_times() {
        let mut c = chunk(0, 999);
        assert!(c.can_try_again_on_failover());
        assert!(c.can_try_again_on_failover());
        assert!(c.can_try_again_on_failover());
        // Budget of 3 is spent; every further check fails forever.
        for _ in 0..10 {
            assert!(!c.can_try_again_on_failover());
        }
    }

    #[test]
    fn test_timeout_escalates_linearly() {
        let mut c = chunk(0, 999);
        assert_eq!(c.timeout(), 1000);
        for attempt in 1..=5 {
            c.escalate_timeout(10);
            assert_eq!(c.timeout(), 1000 + attempt * 10);
        }
    }

    #[tokio::test]
    async fn test_positions_track_storage() {
        let mut c = chunk(0, 9);
        assert!(c.is_valid_position().await);
        assert!(!c.is_download_completed().await);

        c.write(b"01234").await.unwrap();
        c.advance(5);
        assert_eq!(c.position(), 5);
        assert!(c.is_valid_position().await);
        assert!(c.can_read_more());
        assert!(!c.is_download_completed().await);

        c.write(b"56789").await.unwrap();
        c.advance(5);
        assert!(c.is_valid_position().await);
        assert!(!c.can_read_more());
        assert!(c.is_download_completed().await);
    }

    #[tokio::test]
    async fn test_position_diverging_from_storage_is_invalid() {
        let mut c = chunk(0, 9);
        // Position claims bytes storage never saw.
        c.advance(4);
        assert!(!c.is_valid_position().await);
    }

    #[tokio::test]
    async fn test_completion_needs_position_not_just_storage_length() {
        let mut c = chunk(0, 9);
        // Storage holds the full ten bytes but the position never advanced,
        // as after a stale or duplicated write.
        c.write(b"0123456789").await.unwrap();
        assert!(!c.is_download_completed().await);

        c.set_valid_position().await;
        assert_eq!(c.position(), 10);
        assert!(c.is_download_completed().await);
    }

    #[tokio::test]
    async fn test_clear_resets_position_budget_and_storage() {
        let mut c = chunk(0, 9);
        c.write(b"0123").await.unwrap();
        c.advance(4);
        let _ = c.can_try_again_on_failover();

        c.clear().await.unwrap();
        assert_eq!(c.position(), 0);
        assert_eq!(c.failover_count(), 0);
        assert!(c.is_valid_position().await);
    }

    #[tokio::test]
    async fn test_unknown_length_chunk_always_has_valid_position() {
        let mut c = chunk(0, -1);
        assert!(c.is_valid_position().await);
        c.write(b"whatever").await.unwrap();
        c.advance(8);
        assert!(c.is_valid_position().await);
        assert!(c.can_read_more());
        // Zero-length chunks never report completion; the stream end decides.
        assert!(!c.is_download_completed().await);
    }
}
