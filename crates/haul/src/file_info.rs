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

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use snafu::{ResultExt, ensure};

use crate::error::{DownloadError, FailureKind, NetworkSnafu, ResponseStatusSnafu};

/// Information about a file from HEAD request
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Content length, if the server reported one
    pub size:           Option<u64>,
    pub supports_range: bool,
}

/// Fetches file information from server
pub struct FileInfoFetcher {
    client: reqwest::Client,
}

impl FileInfoFetcher {
    pub const fn new(client: reqwest::Client) -> Self { Self { client } }

    /// Get file info from server using HEAD request, retrying transient
    /// transport faults with exponential backoff.
    pub async fn fetch(&self, url: &str) -> Result<FileInfo, DownloadError> {
        let backoff = ExponentialBuilder::default()
            .with_max_times(3)
            .with_min_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(4));

        (|| self.try_fetch(url))
            .retry(backoff)
            .when(|e| FailureKind::classify(e) == FailureKind::TransientTransport)
            .await
    }

    async fn try_fetch(&self, url: &str) -> Result<FileInfo, DownloadError> {
        let response = self.client.head(url).send().await.context(NetworkSnafu)?;

        let status = response.status();
        ensure!(
            status.is_success(),
            ResponseStatusSnafu {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown"),
            }
        );

        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let supports_range = response
            .headers()
            .get(reqwest::header::ACCEPT_RANGES)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("bytes"));

        Ok(FileInfo {
            size,
            supports_range,
        })
    }
}
