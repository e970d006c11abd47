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

use snafu::Snafu;
use strum_macros::Display;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DownloadError {
    #[snafu(display("Network error: {source}"))]
    Network { source: reqwest::Error },

    #[snafu(display("download response status was {status}: {reason}"))]
    ResponseStatus { status: u16, reason: String },

    #[snafu(display("Download was cancelled"))]
    Cancelled,

    #[snafu(display("Read of chunk {chunk_id} stalled after {timeout_ms}ms"))]
    ReadStalled { chunk_id: String, timeout_ms: u64 },

    #[snafu(display("Server does not support Range requests"))]
    RangeNotSupported,

    #[snafu(display("File write error: {source}"))]
    FileWrite { source: std::io::Error },

    #[snafu(display("File read error: {source}"))]
    FileRead { source: std::io::Error },

    #[snafu(display("Download state corrupted"))]
    StateCorrupted,

    #[snafu(display("Chunk task panicked: {message}"))]
    TaskPanic { message: String },

    #[snafu(display("Failed to get file size from server"))]
    FileSizeUnknown,

    #[snafu(display("Download already in progress for URL: {url}"))]
    DownloadInProgress { url: String },
}

/// The failure classes the retry engine acts on.
///
/// Every error raised while driving a chunk is mapped onto exactly one of
/// these kinds; the engine never inspects transport error shapes directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The caller cancelled the download. Terminal, never retried.
    Cancelled,
    /// A single read stalled past the chunk's current timeout. Retried
    /// without consuming failover budget; the re-attempt gets a larger
    /// timeout.
    TransientStall,
    /// A transport-layer fault (connection setup, socket reset mid-body,
    /// client-side timeout). Retried while the chunk's failover budget
    /// lasts.
    TransientTransport,
    /// The server answered with a status outside the accepted set. Retrying
    /// will not change a server-side rejection.
    RejectedStatus,
    /// Everything else. Propagated immediately.
    Fatal,
}

impl FailureKind {
    #[must_use]
    pub fn classify(error: &DownloadError) -> Self {
        match error {
            DownloadError::Cancelled => Self::Cancelled,
            DownloadError::ReadStalled { .. } => Self::TransientStall,
            DownloadError::Network { source } if is_transient(source) => Self::TransientTransport,
            DownloadError::ResponseStatus { .. } => Self::RejectedStatus,
            _ => Self::Fatal,
        }
    }
}

/// Transport faults worth re-requesting: connection setup failures, socket
/// resets mid-body, and client-side timeouts. Builder and redirect errors
/// are not, the same request would fail the same way.
fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_body() || error.is_request()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_cancelled() {
        assert_eq!(
            FailureKind::classify(&DownloadError::Cancelled),
            FailureKind::Cancelled
        );
    }

    #[test]
    fn test_classify_stall() {
        let error = DownloadError::ReadStalled {
            chunk_id:   "abc".to_string(),
            timeout_ms: 1010,
        };
        assert_eq!(FailureKind::classify(&error), FailureKind::TransientStall);
    }

    #[test]
    fn test_classify_rejected_status() {
        let error = DownloadError::ResponseStatus {
            status: 404,
            reason: "Not Found".to_string(),
        };
        assert_eq!(FailureKind::classify(&error), FailureKind::RejectedStatus);
    }

    #[test]
    fn test_classify_io_errors_as_fatal() {
        let error = DownloadError::FileWrite {
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(FailureKind::classify(&error), FailureKind::Fatal);
        assert_eq!(
            FailureKind::classify(&DownloadError::StateCorrupted),
            FailureKind::Fatal
        );
    }

    #[tokio::test]
    async fn test_classify_connection_refused_as_transient() {
        // Port 1 is never listening; the connect error must classify as a
        // transport fault eligible for failover.
        let source = reqwest::Client::new()
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();
        let error = DownloadError::Network { source };
        assert_eq!(
            FailureKind::classify(&error),
            FailureKind::TransientTransport
        );
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::TransientTransport.to_string(), "transient_transport");
        assert_eq!(FailureKind::RejectedStatus.to_string(), "rejected_status");
    }
}
