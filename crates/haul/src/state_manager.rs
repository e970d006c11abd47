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
#![allow(clippy::unnecessary_wraps)]

use std::path::PathBuf;

use jiff::Timestamp;
use sha2::{Digest, Sha256};
use snafu::ResultExt;
use tokio::fs;

use crate::{
    error::{DownloadError, FileReadSnafu, FileWriteSnafu},
    types::{ChunkLayout, DownloadState},
};

/// Manages download state persistence for resume support
pub struct StateManager {
    temp_dir: PathBuf,
}

impl StateManager {
    pub const fn new(temp_dir: PathBuf) -> Self { Self { temp_dir } }

    /// Create initial download state from planned chunk boundaries
    pub fn create_state(
        &self,
        url: &str,
        file_size: Option<u64>,
        boundaries: Vec<(i64, i64)>,
    ) -> DownloadState {
        let url_hash = hash_url(url);

        let chunks: Vec<ChunkLayout> = boundaries
            .into_iter()
            .enumerate()
            .map(|(index, (start, end))| ChunkLayout {
                index,
                start,
                end,
                part_file: self.temp_dir.join(format!("{url_hash}.part{index}")),
            })
            .collect();

        let now = Timestamp::now().as_second();

        DownloadState {
            url: url.to_string(),
            file_size,
            chunks,
            created_at: now,
            updated_at: now,
        }
    }

    /// Load download state from disk
    pub async fn load(&self, url: &str) -> Result<Option<DownloadState>, DownloadError> {
        let state_path = self.state_path(url);

        if !tokio::fs::try_exists(&state_path).await.unwrap_or(false) {
            return Ok(None);
        }

        let state_str = fs::read_to_string(&state_path)
            .await
            .context(FileReadSnafu)?;
        let state: DownloadState = serde_json::from_str(&state_str)
            .ok()
            .ok_or(DownloadError::StateCorrupted)?;

        Ok(Some(state))
    }

    /// Save download state to disk
    pub async fn save(&self, state: &DownloadState) -> Result<(), DownloadError> {
        let state_path = self.state_path(&state.url);

        if let Some(parent) = state_path.parent() {
            fs::create_dir_all(parent).await.context(FileWriteSnafu)?;
        }

        let state_str = serde_json::to_string_pretty(state)
            .ok()
            .ok_or(DownloadError::StateCorrupted)?;
        fs::write(&state_path, state_str)
            .await
            .context(FileWriteSnafu)?;

        Ok(())
    }

    /// Validate that state is compatible with current download attempt
    pub fn validate(&self, state: &DownloadState, url: &str, file_size: Option<u64>) -> bool {
        state.url == url && state.file_size == file_size && !state.chunks.is_empty()
    }

    /// Clean up state file, temporary chunks, and lock file
    pub async fn cleanup(&self, url: &str) -> Result<(), DownloadError> {
        let state_path = self.state_path(url);
        let _ = fs::remove_file(&state_path).await;

        // Remove lock file
        let lock_path = self.lock_path(url);
        let _ = fs::remove_file(&lock_path).await;

        // Remove temporary chunk files
        let url_hash = hash_url(url);
        let pattern = format!("{url_hash}.part");

        if let Ok(mut entries) = fs::read_dir(&self.temp_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Some(name) = entry.file_name().to_str()
                    && name.starts_with(&pattern)
                {
                    let _ = fs::remove_file(entry.path()).await;
                }
            }
        }

        Ok(())
    }

    /// Get path to state file for a URL
    fn state_path(&self, url: &str) -> PathBuf {
        let url_hash = hash_url(url);
        self.temp_dir.join(format!("{url_hash}.state.json"))
    }

    /// Get path to lock file for a URL
    pub(crate) fn lock_path(&self, url: &str) -> PathBuf {
        let url_hash = hash_url(url);
        self.temp_dir.join(format!("{url_hash}.lock"))
    }
}

/// Hash a URL to create a state file prefix
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

/// Calculate chunk boundaries for parallel download.
///
/// Ranges are inclusive on both ends; the last chunk absorbs the remainder.
#[must_use]
pub fn chunk_boundaries(file_size: u64, num_chunks: usize) -> Vec<(i64, i64)> {
    // Guard against zero chunks or zero file size
    if num_chunks == 0 || file_size == 0 {
        return Vec::new();
    }

    #[allow(clippy::cast_possible_wrap)]
    let file_size = file_size as i64;
    let num_chunks = num_chunks as i64;
    let chunk_size = file_size / num_chunks;
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let mut boundaries = Vec::with_capacity(num_chunks as usize);

    for i in 0..num_chunks {
        let start = i * chunk_size;
        let end = if i == num_chunks - 1 {
            file_size - 1 // Last chunk goes to end
        } else {
            (i + 1) * chunk_size - 1
        };
        boundaries.push((start, end));
    }

    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_boundaries() {
        let boundaries = chunk_boundaries(1000, 4);
        assert_eq!(boundaries.len(), 4);
        assert_eq!(boundaries[0], (0, 249));
        assert_eq!(boundaries[1], (250, 499));
        assert_eq!(boundaries[2], (500, 749));
        assert_eq!(boundaries[3], (750, 999));
    }

    #[test]
    fn test_chunk_boundaries_single() {
        let boundaries = chunk_boundaries(1000, 1);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0], (0, 999));
    }

    #[test]
    fn test_chunk_boundaries_remainder_goes_last() {
        let boundaries = chunk_boundaries(1003, 4);
        assert_eq!(boundaries[3], (750, 1002));
        // Every byte is covered exactly once.
        let covered: i64 = boundaries.iter().map(|(s, e)| e - s + 1).sum();
        assert_eq!(covered, 1003);
    }

    #[test]
    fn test_chunk_boundaries_empty_input() {
        assert!(chunk_boundaries(0, 4).is_empty());
        assert!(chunk_boundaries(1000, 0).is_empty());
    }

    #[test]
    fn test_hash_url() {
        let hash1 = hash_url("https://example.com/file.zip");
        let hash2 = hash_url("https://example.com/file.zip");
        let hash3 = hash_url("https://example.com/other.zip");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64); // SHA256 hex string length
    }

    #[tokio::test]
    async fn test_state_round_trip_and_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path().to_path_buf());
        let url = "https://example.com/file.bin";

        let state = manager.create_state(url, Some(1000), chunk_boundaries(1000, 3));
        assert_eq!(state.chunks.len(), 3);
        manager.save(&state).await.unwrap();

        let loaded = manager.load(url).await.unwrap().expect("state should load");
        assert_eq!(loaded.url, url);
        assert_eq!(loaded.file_size, Some(1000));
        assert_eq!(loaded.chunks.len(), 3);
        assert!(manager.validate(&loaded, url, Some(1000)));
        assert!(!manager.validate(&loaded, url, Some(2000)));
        assert!(!manager.validate(&loaded, "https://example.com/else", Some(1000)));

        manager.cleanup(url).await.unwrap();
        assert!(manager.load(url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_state_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StateManager::new(dir.path().to_path_buf());
        let url = "https://example.com/file.bin";

        fs::create_dir_all(dir.path()).await.unwrap();
        fs::write(manager.state_path(url), b"not json at all")
            .await
            .unwrap();

        assert!(matches!(
            manager.load(url).await,
            Err(DownloadError::StateCorrupted)
        ));
    }
}
