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

use std::path::PathBuf;

use bon::Builder;
use haul_base::readable_size::ReadableSize;
use jiff::SignedDuration;
use smart_default::SmartDefault;

/// Configuration for chunk calculation
#[derive(Debug, Clone, SmartDefault)]
pub struct ChunkingConfig {
    /// Minimum size of each chunk (default: 5MB)
    #[default(ReadableSize::mb(5))]
    pub min_chunk_size:        ReadableSize,
    /// Maximum number of chunks (default: 16)
    #[default = 16]
    pub max_chunks:            usize,
    /// Files smaller than this are downloaded without chunking (default: 16MB)
    #[default(ReadableSize::mb(16))]
    pub small_file_threshold:  ReadableSize,
    /// Files between small and medium thresholds use 2-4 chunks (default:
    /// 128MB)
    #[default(ReadableSize::mb(128))]
    pub medium_file_threshold: ReadableSize,
}

impl ChunkingConfig {
    /// Calculate the number of chunks for a file of the given size
    #[must_use]
    pub fn calculate_chunks(&self, file_size: u64) -> usize {
        let small_threshold = self.small_file_threshold.as_bytes();
        let medium_threshold = self.medium_file_threshold.as_bytes();
        let min_chunk = self.min_chunk_size.as_bytes();

        if file_size < small_threshold {
            // Small file: no chunking
            1
        } else if file_size < medium_threshold {
            // Medium file: 2-4 chunks
            let chunks = file_size / min_chunk;
            chunks.clamp(2, 4) as usize
        } else {
            // Large file: based on size, capped at max_chunks
            let chunks = file_size / min_chunk;
            #[allow(clippy::cast_possible_truncation)]
            let result = chunks.min(self.max_chunks as u64) as usize;
            result
        }
    }
}

/// Configuration for the downloader
#[derive(Debug, Clone, SmartDefault, Builder)]
pub struct DownloadConfig {
    /// Chunking configuration
    #[default(ChunkingConfig::default())]
    pub chunking: ChunkingConfig,

    /// Directory for part files and resume state during download
    #[default(std::env::temp_dir().join("haul"))]
    pub temp_dir: PathBuf,

    /// TCP connect timeout for outbound requests. A whole-request timeout
    /// would kill long-running chunk streams, so reads are bounded by the
    /// per-chunk read timeout instead.
    #[default(SignedDuration::from_secs(30))]
    pub connect_timeout: SignedDuration,

    /// Base per-read timeout a fresh chunk starts from, in milliseconds.
    /// Every top-level attempt on a chunk raises its own timeout from here.
    #[default = 1_000]
    pub read_timeout_ms: u64,

    /// Failover budget per chunk: how many transport faults a chunk absorbs
    /// before the fault propagates
    #[default = 8]
    pub max_try_again_on_failover: u32,

    /// Size of the read buffer a chunk fills per read (default: 64KB)
    #[default(ReadableSize::kb(64))]
    pub block_size: ReadableSize,

    /// Maximum number of chunks downloading concurrently (default: 4)
    #[default = 4]
    pub concurrent_chunks: usize,

    /// Initial bandwidth ceiling in bytes per second, 0 for unlimited.
    /// Adjustable at runtime through the downloader.
    #[default = 0]
    pub max_bytes_per_second: u64,

    /// Always issue range requests, even for fresh single-chunk downloads
    #[default = false]
    pub range_download: bool,

    /// Keep chunk bytes in memory instead of part files. No resume state is
    /// persisted in this mode since nothing outlives the process.
    #[default = false]
    pub in_memory: bool,

    /// Custom User-Agent header
    pub user_agent: Option<String>,

    /// Proxy URL applied to all requests
    pub proxy: Option<String>,

    /// Raw Cookie header value sent with every request
    pub cookies: Option<String>,

    /// Extra headers sent with every request
    #[default(_code = "Vec::new()")]
    pub headers: Vec<(String, String)>,
}
