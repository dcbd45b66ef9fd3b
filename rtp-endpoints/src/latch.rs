//! One-shot broadcast latch
//!
//! Starts unset, is set at most once, and stays set. Any number of tasks can
//! wait on it; all of them wake when it fires.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use tokio::sync::watch;

/// One-shot latch
#[derive(Debug)]
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    /// Create an unset latch
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Latch { tx }
    }

    /// Fire the latch. Returns `true` only for the call that performed the transition.
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|fired| {
            if *fired {
                false
            } else {
                *fired = true;
                true
            }
        })
    }

    /// Whether the latch has fired, without waiting
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we borrow it.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}
