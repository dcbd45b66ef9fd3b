//! Media tracks
//!
//! A track is one logical media stream. Local tracks can feed any number of
//! senders at once; remote tracks are created by a receiver on activation and
//! belong to it for their whole lifetime.
//!
//! All bookkeeping lives behind the track's own lock. Callers never take it
//! themselves.
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
use crate::rtp_packet::{RtpHeader, RtpPacket};
use crate::rtp_receiver::MediaReceiver;
use crate::rtp_sender::MediaSender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::trace;
use uuid::Uuid;

struct ActiveSender {
    id: Uuid,
    sender: Weak<MediaSender>,
}

#[derive(Default)]
pub(crate) struct TrackState {
    receiver: Option<Weak<MediaReceiver>>,
    active_senders: Vec<ActiveSender>,
    total_sender_count: usize,
}

impl TrackState {
    fn ensure_local(&self) -> MediaResult<()> {
        if self.receiver.is_some() {
            return Err(MediaError::InvalidTrack(
                "sender can not be constructed with remote track".to_string(),
            ));
        }
        Ok(())
    }

    fn attach_sender(
        &mut self,
        id: Uuid,
        sender: &Weak<MediaSender>,
        activated: bool,
    ) -> MediaResult<()> {
        self.ensure_local()?;
        self.total_sender_count += 1;
        if activated {
            self.activate_sender(id, sender);
        }
        Ok(())
    }

    fn activate_sender(&mut self, id: Uuid, sender: &Weak<MediaSender>) {
        if !self.active_senders.iter().any(|s| s.id == id) {
            self.active_senders.push(ActiveSender {
                id,
                sender: sender.clone(),
            });
        }
    }

    fn detach_sender(&mut self, id: Uuid) {
        self.active_senders.retain(|s| s.id != id);
        self.total_sender_count = self.total_sender_count.saturating_sub(1);
    }
}

/// A logical media stream shared between endpoints
pub struct MediaTrack {
    key: Uuid,
    id: String,
    label: String,
    ssrc: u32,
    codec: CodecDescriptor,
    state: Mutex<TrackState>,
}

impl MediaTrack {
    /// Create a local track
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        ssrc: u32,
        codec: CodecDescriptor,
    ) -> Arc<Self> {
        Arc::new(MediaTrack {
            key: Uuid::new_v4(),
            id: id.into(),
            label: label.into(),
            ssrc,
            codec,
            state: Mutex::new(TrackState::default()),
        })
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, TrackState> {
        // Every critical section leaves the state consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> MediaType {
        self.codec.kind
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn codec(&self) -> &CodecDescriptor {
        &self.codec
    }

    /// Owning receiver, if this is a remote track and the receiver is still alive
    pub fn receiver(&self) -> Option<Arc<MediaReceiver>> {
        self.state().receiver.as_ref().and_then(Weak::upgrade)
    }

    /// Whether a receiver was ever bound
    pub fn is_remote(&self) -> bool {
        self.state().receiver.is_some()
    }

    /// Senders that have activated while holding this track
    pub fn active_sender_count(&self) -> usize {
        self.state().active_senders.len()
    }

    /// Ids of active senders, in activation order
    pub fn active_sender_ids(&self) -> Vec<Uuid> {
        self.state().active_senders.iter().map(|s| s.id).collect()
    }

    /// Senders currently holding this track, activated or not
    pub fn total_sender_count(&self) -> usize {
        self.state().total_sender_count
    }

    /// Bind the owning receiver. A track has at most one receiver for its lifetime.
    pub fn attach_receiver(&self, receiver: &Weak<MediaReceiver>) -> MediaResult<()> {
        let mut state = self.state();
        if state.receiver.is_some() {
            return Err(MediaError::InvalidTrack(
                "track is already bound to a receiver".to_string(),
            ));
        }
        state.receiver = Some(receiver.clone());
        Ok(())
    }

    /// Register a sender that now holds this track.
    /// If the sender has already activated it joins the active set immediately.
    pub(crate) fn attach_sender(
        &self,
        id: Uuid,
        sender: &Weak<MediaSender>,
        activated: bool,
    ) -> MediaResult<()> {
        self.state().attach_sender(id, sender, activated)
    }

    /// Add a sender to the active set
    pub(crate) fn activate_sender(&self, id: Uuid, sender: &Weak<MediaSender>) {
        self.state().activate_sender(id, sender);
    }

    /// Drop a sender from the active set and release its hold on the track.
    /// Only the sender itself calls this, after clearing its own track slot.
    pub(crate) fn detach_sender(&self, sender_id: Uuid) {
        self.state().detach_sender(sender_id);
    }

    /// Move a sender from `old` to `new` with both locks held, so no observer
    /// sees it in both active sets or in neither. Fails without side effects
    /// if `new` is a remote track.
    pub(crate) fn move_sender(
        old: &MediaTrack,
        new: &MediaTrack,
        id: Uuid,
        sender: &Weak<MediaSender>,
        activated: bool,
    ) -> MediaResult<()> {
        if old.key == new.key {
            let mut state = old.state();
            state.ensure_local()?;
            state.detach_sender(id);
            return state.attach_sender(id, sender, activated);
        }

        // lock order by key
        let (mut old_state, mut new_state) = if old.key < new.key {
            let o = old.state();
            (o, new.state())
        } else {
            let n = new.state();
            (old.state(), n)
        };

        new_state.ensure_local()?;
        old_state.detach_sender(id);
        new_state.attach_sender(id, sender, activated)
    }

    /// Read one inbound RTP packet into `buf`; remote tracks only
    pub async fn read(&self, buf: &mut [u8]) -> MediaResult<usize> {
        let receiver = {
            let state = self.state();
            match &state.receiver {
                None => {
                    return Err(MediaError::InvalidTrack(
                        "local track has no inbound media".to_string(),
                    ))
                }
                Some(weak) => weak.upgrade(),
            }
        };
        let receiver = receiver.ok_or(MediaError::ClosedPipe)?;
        receiver.read_media(buf).await
    }

    /// Read and parse one inbound RTP packet; remote tracks only
    pub async fn read_rtp(&self) -> MediaResult<RtpPacket> {
        let mtu = self
            .receiver()
            .map(|r| r.receive_mtu())
            .unwrap_or(crate::DEFAULT_RECEIVE_MTU);
        let mut buf = vec![0u8; mtu];
        let n = self.read(&mut buf).await?;
        RtpPacket::parse(&buf[..n])
    }

    /// Send one packet through every active sender; local tracks only.
    ///
    /// Fails with `ClosedPipe` if no sender holds the track. Failures of
    /// individual senders are collected and returned together.
    pub async fn write_rtp(&self, header: &RtpHeader, payload: &[u8]) -> MediaResult<()> {
        let (senders, total) = {
            let state = self.state();
            if state.receiver.is_some() {
                return Err(MediaError::InvalidTrack(
                    "track is owned by a receiver and cannot be written to".to_string(),
                ));
            }
            let senders: Vec<_> = state
                .active_senders
                .iter()
                .filter_map(|s| s.sender.upgrade())
                .collect();
            (senders, state.total_sender_count)
        };

        if total == 0 {
            return Err(MediaError::ClosedPipe);
        }

        let results = futures::future::join_all(
            senders.iter().map(|sender| sender.send_rtp(header, payload)),
        )
        .await;

        let errors: Vec<MediaError> = results.into_iter().filter_map(Result::err).collect();
        trace!(
            track_id = %self.id,
            senders = senders.len(),
            failed = errors.len(),
            "Fanned out RTP packet"
        );
        MediaError::flatten(errors)
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("ssrc", &self.ssrc)
            .field("codec", &self.codec)
            .finish()
    }
}
