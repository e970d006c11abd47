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

use tokio::sync::mpsc;

/// Snapshot of one successful read of a chunk.
///
/// For a given chunk, events arrive in non-decreasing `received_cumulative`
/// order; no ordering holds across chunks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Id of the chunk this read belongs to.
    pub chunk_id: String,
    /// Total bytes the chunk expects, 0 when the length is unknown.
    pub total_expected: i64,
    /// Bytes received for this chunk so far, including this read.
    pub received_cumulative: i64,
    /// Bytes received by this read alone.
    pub received_this_read: usize,
}

/// Fire-and-forget sending side; an unbounded channel means a send never
/// blocks the read loop, and a dropped receiver is simply ignored.
pub type ProgressSender = mpsc::UnboundedSender<DownloadProgress>;

/// Receiving side handed to whoever renders progress.
pub type ProgressReceiver = mpsc::UnboundedReceiver<DownloadProgress>;

#[must_use]
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) { mpsc::unbounded_channel() }
