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

use std::path::Path;

use snafu::ResultExt;
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
};

use crate::{
    chunk::Chunk,
    error::{DownloadError, FileWriteSnafu},
};

/// Handles merging downloaded chunks into a single file
pub struct ChunkMerger;

impl ChunkMerger {
    /// Stream every chunk's storage into the output file, in chunk order,
    /// and return the merged size in bytes.
    pub async fn merge(output_path: &Path, chunks: &mut [Chunk]) -> Result<u64, DownloadError> {
        // Create parent directory if needed
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).await.context(FileWriteSnafu)?;
        }

        let output_file = File::create(output_path).await.context(FileWriteSnafu)?;
        let mut writer = BufWriter::with_capacity(512 * 1024, output_file); // 512KB buffer
        let mut total_size = 0u64;

        for chunk in chunks {
            let mut reader = chunk.reader().await?;
            let copied = tokio::io::copy(&mut reader, &mut writer)
                .await
                .context(FileWriteSnafu)?;
            total_size += copied;
        }

        // Flush buffer and sync to disk
        writer.flush().await.context(FileWriteSnafu)?;
        writer.get_mut().sync_all().await.context(FileWriteSnafu)?;

        Ok(total_size)
    }
}
