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

use std::sync::LazyLock;

use prometheus::{
    IntCounter, IntCounterVec, register_int_counter, register_int_counter_vec,
};

pub const RETRY_KIND_LABEL: &str = "kind";

pub static BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "haul_bytes_received_total",
        "Total number of payload bytes written to chunk storage"
    )
    .unwrap()
});

pub static CHUNK_RETRIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "haul_chunk_retries_total",
        "Total number of chunk attempt retries by kind (stall or failover)",
        &[RETRY_KIND_LABEL]
    )
    .unwrap()
});

pub static CHUNKS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "haul_chunks_completed_total",
        "Total number of chunks driven to completion"
    )
    .unwrap()
});

pub static DOWNLOAD_PAUSED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "haul_download_paused_total",
        "Total number of times a pause signal was engaged"
    )
    .unwrap()
});

pub static DOWNLOAD_RESUMED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "haul_download_resumed_total",
        "Total number of times a pause signal was released"
    )
    .unwrap()
});
