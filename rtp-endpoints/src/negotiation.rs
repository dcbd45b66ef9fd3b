//! Negotiation triggers
//!
//! A track swap on a sender must not silently change a negotiated
//! parameter. Each trigger compares the current codec with the incoming one
//! and rejects the swap with `RenegotiationRequired` when they differ in a
//! way the remote side would have to agree to first.
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


use crate::codec::{CodecDescriptor, MediaType};
use crate::error::{MediaError, MediaResult};

/// A single renegotiation rule
pub trait NegotiationTrigger: Send + Sync {
    /// Rule name, used in logs
    fn name(&self) -> &str;

    /// Fail with `RenegotiationRequired` if swapping `current` for `new` needs renegotiation
    fn check(&self, current: &CodecDescriptor, new: &CodecDescriptor) -> MediaResult<()>;
}

/// Audio channel count must not change
#[derive(Debug, Default, Clone, Copy)]
pub struct AudioChannelTrigger;

impl NegotiationTrigger for AudioChannelTrigger {
    fn name(&self) -> &str {
        "audio-channels"
    }

    fn check(&self, current: &CodecDescriptor, new: &CodecDescriptor) -> MediaResult<()> {
        if current.kind == MediaType::Audio && current.channels != new.channels {
            return Err(MediaError::RenegotiationRequired(format!(
                "new track has {} channels, original has {}",
                new.channels, current.channels
            )));
        }
        Ok(())
    }
}

/// Ordered set of triggers; the first failing rule wins
pub struct NegotiationTriggers {
    triggers: Vec<Box<dyn NegotiationTrigger>>,
}

impl NegotiationTriggers {
    /// No rules at all
    pub fn empty() -> Self {
        NegotiationTriggers { triggers: Vec::new() }
    }

    /// Append a rule
    pub fn with(mut self, trigger: impl NegotiationTrigger + 'static) -> Self {
        self.triggers.push(Box::new(trigger));
        self
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Run every rule in order
    pub fn check(&self, current: &CodecDescriptor, new: &CodecDescriptor) -> MediaResult<()> {
        for trigger in &self.triggers {
            if let Err(e) = trigger.check(current, new) {
                tracing::debug!(trigger = trigger.name(), error = %e, "Negotiation trigger fired");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Default for NegotiationTriggers {
    fn default() -> Self {
        NegotiationTriggers::empty().with(AudioChannelTrigger)
    }
}

impl std::fmt::Debug for NegotiationTriggers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.triggers.iter().map(|t| t.name()))
            .finish()
    }
}
