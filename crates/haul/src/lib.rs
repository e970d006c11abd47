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

//! Resumable, parallel HTTP downloader.
//!
//! A target file is split into byte-range [`Chunk`]s; each chunk is driven
//! to completion by its own [`ChunkDownloader`], which retries transient
//! faults with an escalating read timeout while preserving the chunk's
//! position, so retried requests never re-download stored bytes. The
//! [`Downloader`] facade plans chunks, persists resume state, runs chunk
//! tasks with bounded parallelism, and merges the results.

mod chunk;
mod chunk_downloader;
mod chunk_merger;
mod config;
mod downloader;
mod error;
mod file_info;
mod metrics;
mod parallel_manager;
mod pause;
mod progress;
mod request;
pub(crate) mod state_manager;
mod storage;
mod throttle;
mod types;

pub use chunk::Chunk;
pub use chunk_downloader::ChunkDownloader;
pub use config::{ChunkingConfig, DownloadConfig};
pub use downloader::Downloader;
pub use error::{DownloadError, FailureKind};
pub use file_info::{FileInfo, FileInfoFetcher};
pub use pause::PauseSignal;
pub use progress::{DownloadProgress, ProgressReceiver, ProgressSender, progress_channel};
pub use request::RequestBuilder;
pub use state_manager::chunk_boundaries;
pub use storage::{FileStorage, MemoryStorage, Storage, StorageReader};
pub use throttle::{RateLimiter, ThrottledStream};
pub use types::{ChunkLayout, DownloadRequest, DownloadResult, DownloadState};
