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
use jiff::Span;
use serde::{Deserialize, Serialize};

/// A request to download a file
#[derive(Debug, Clone, Builder)]
pub struct DownloadRequest {
    /// URL to download from
    pub url:         String,
    /// Path where the downloaded file should be saved
    pub output_path: PathBuf,
}

/// Result of a successful download
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Path where the file was saved
    pub path:     PathBuf,
    /// Size of the downloaded file in bytes
    pub size:     u64,
    /// Whether the download continued from persisted partial progress
    pub resumed:  bool,
    /// Total duration of the download operation
    pub duration: Span,
}

/// Byte-range layout of a single chunk, as persisted for resume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkLayout {
    /// Index of this chunk (0-based)
    pub index:     usize,
    /// Start byte position (inclusive)
    pub start:     i64,
    /// End byte position (inclusive); `start - 1` for unknown length
    pub end:       i64,
    /// Path to the part file backing this chunk
    pub part_file: PathBuf,
}

/// Persistent download state for resume support
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadState {
    /// URL being downloaded
    pub url:        String,
    /// Total file size in bytes, when the server reported one
    pub file_size:  Option<u64>,
    /// Layout of each chunk
    pub chunks:     Vec<ChunkLayout>,
    /// Unix timestamp when download was created
    pub created_at: i64,
    /// Unix timestamp when state was last updated
    pub updated_at: i64,
}
