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
    io::Cursor,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncRead, AsyncWriteExt},
};

use crate::error::{DownloadError, FileReadSnafu, FileWriteSnafu};

/// Reader over a storage's accumulated bytes, handed to the merger.
pub type StorageReader = Box<dyn AsyncRead + Send + Unpin>;

/// Byte sink backing one chunk.
///
/// `length()` always reflects exactly the bytes accepted by `write`; a chunk
/// resynchronizes its position from it when resuming.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), DownloadError>;

    async fn length(&self) -> u64;

    async fn clear(&mut self) -> Result<(), DownloadError>;

    async fn flush(&mut self) -> Result<(), DownloadError>;

    /// Opens a fresh reader over everything written so far.
    async fn reader(&mut self) -> Result<StorageReader, DownloadError>;
}

/// Keeps a chunk's bytes in memory; used for on-the-fly downloads and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buf: Vec<u8>,
}

impl MemoryStorage {
    #[must_use]
    pub const fn new() -> Self { Self { buf: Vec::new() } }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), DownloadError> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    async fn length(&self) -> u64 { self.buf.len() as u64 }

    async fn clear(&mut self) -> Result<(), DownloadError> {
        self.buf.clear();
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DownloadError> { Ok(()) }

    async fn reader(&mut self) -> Result<StorageReader, DownloadError> {
        Ok(Box::new(Cursor::new(self.buf.clone())))
    }
}

/// Appends a chunk's bytes to a part file; reopening an existing part file
/// picks up its current length, which is what makes resume possible across
/// process restarts.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    file: File,
    len:  u64,
}

impl FileStorage {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.context(FileWriteSnafu)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context(FileWriteSnafu)?;
        let len = file.metadata().await.context(FileReadSnafu)?.len();

        Ok(Self { path, file, len })
    }

    #[must_use]
    pub fn path(&self) -> &Path { &self.path }
}

#[async_trait]
impl Storage for FileStorage {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), DownloadError> {
        self.file.write_all(bytes).await.context(FileWriteSnafu)?;
        self.len += bytes.len() as u64;
        Ok(())
    }

    async fn length(&self) -> u64 { self.len }

    async fn clear(&mut self) -> Result<(), DownloadError> {
        self.file.set_len(0).await.context(FileWriteSnafu)?;
        self.len = 0;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DownloadError> {
        self.file.flush().await.context(FileWriteSnafu)?;
        self.file.sync_all().await.context(FileWriteSnafu)?;
        Ok(())
    }

    async fn reader(&mut self) -> Result<StorageReader, DownloadError> {
        self.flush().await?;
        let file = File::open(&self.path).await.context(FileReadSnafu)?;
        Ok(Box::new(file))
    }
}
