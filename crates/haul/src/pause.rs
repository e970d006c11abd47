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
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::sync::Notify;

use crate::metrics::{DOWNLOAD_PAUSED, DOWNLOAD_RESUMED};

/// Cooperative gate a read loop awaits before each unit of work.
///
/// Pausing never drops the connection; it only parks readers at their next
/// await point until `resume` is called. Clones share one gate, so a single
/// signal can pause every chunk of a download at once.
#[derive(Clone, Debug, Default)]
pub struct PauseSignal {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    paused: AtomicBool,
    notify: Notify,
}

impl PauseSignal {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::Release);
        DOWNLOAD_PAUSED.inc();
    }

    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::Release);
        self.inner.notify.notify_waiters();
        DOWNLOAD_RESUMED.inc();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool { self.inner.paused.load(Ordering::Acquire) }

    /// Resolves immediately while unpaused, otherwise waits for `resume`.
    pub async fn wait_while_paused(&self) {
        loop {
            if !self.is_paused() {
                return;
            }
            let mut notified = pin!(self.inner.notify.notified());
            // Register before the re-check so a resume landing between the
            // two cannot be missed.
            notified.as_mut().enable();
            if !self.is_paused() {
                return;
            }
            notified.await;
        }
    }
}
