//! Outbound media endpoint
//!
//! `Created(track) -> Activated -> Stopped`. The held track can be replaced
//! before and after activation but not once stopped. Activation opens the
//! inbound RTCP stream and puts the sender into its track's active set.
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


use crate::codec::SendParameters;
use crate::error::{MediaError, MediaResult, TransportResult};
use crate::latch::Latch;
use crate::media_track::MediaTrack;
use crate::negotiation::NegotiationTriggers;
use crate::rtcp::{self, RtcpPacket};
use crate::rtp_packet::RtpHeader;
use crate::transport::{ReadStream, Transport, WriteStream};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

const ENDPOINT: &str = "MediaSender";

/// Construction options for a sender
#[derive(Debug)]
pub struct SenderOptions {
    /// Rules checked by `replace_track`
    pub triggers: NegotiationTriggers,
    /// Buffer size used by `read_rtcp`
    pub receive_mtu: usize,
}

impl Default for SenderOptions {
    fn default() -> Self {
        SenderOptions {
            triggers: NegotiationTriggers::default(),
            receive_mtu: crate::DEFAULT_RECEIVE_MTU,
        }
    }
}

/// Sends one track's media and receives the remote side's RTCP about it
pub struct MediaSender {
    id: Uuid,
    transport: Arc<dyn Transport>,
    triggers: NegotiationTriggers,
    receive_mtu: usize,
    this: Weak<MediaSender>,

    /// Serializes `send`, `replace_track` and `stop`
    lifecycle: tokio::sync::Mutex<()>,
    track: Mutex<Option<Arc<MediaTrack>>>,
    rtcp_stream: OnceLock<Arc<dyn ReadStream>>,
    write_stream: OnceCell<Arc<dyn WriteStream>>,
    negotiated: AtomicBool,

    send_called: Latch,
    stop_requested: Latch,
    stop_called: Latch,
}

impl MediaSender {
    /// Create a sender for a local track
    pub fn new(track: Arc<MediaTrack>, transport: Arc<dyn Transport>) -> MediaResult<Arc<Self>> {
        Self::with_options(track, transport, SenderOptions::default())
    }

    /// Create a sender with a custom set of renegotiation rules for `replace_track`
    pub fn with_triggers(
        track: Arc<MediaTrack>,
        transport: Arc<dyn Transport>,
        triggers: NegotiationTriggers,
    ) -> MediaResult<Arc<Self>> {
        Self::with_options(
            track,
            transport,
            SenderOptions {
                triggers,
                ..SenderOptions::default()
            },
        )
    }

    /// Create a sender from explicit options.
    ///
    /// Fails with `InvalidTrack` if `track` belongs to a receiver.
    pub fn with_options(
        track: Arc<MediaTrack>,
        transport: Arc<dyn Transport>,
        options: SenderOptions,
    ) -> MediaResult<Arc<Self>> {
        let sender = Arc::new_cyclic(|this| MediaSender {
            id: Uuid::new_v4(),
            transport,
            triggers: options.triggers,
            receive_mtu: options.receive_mtu,
            this: this.clone(),
            lifecycle: tokio::sync::Mutex::new(()),
            track: Mutex::new(None),
            rtcp_stream: OnceLock::new(),
            write_stream: OnceCell::new(),
            negotiated: AtomicBool::new(false),
            send_called: Latch::new(),
            stop_requested: Latch::new(),
            stop_called: Latch::new(),
        });

        track.attach_sender(sender.id, &sender.this, false)?;
        *sender.track_slot() = Some(track);
        Ok(sender)
    }

    fn track_slot(&self) -> MutexGuard<'_, Option<Arc<MediaTrack>>> {
        self.track.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Current track; `None` once stopped
    pub fn track(&self) -> Option<Arc<MediaTrack>> {
        self.track_slot().clone()
    }

    pub fn is_negotiated(&self) -> bool {
        self.negotiated.load(Ordering::Acquire)
    }

    pub fn set_negotiated(&self) {
        self.negotiated.store(true, Ordering::Release);
    }

    pub fn is_activated(&self) -> bool {
        self.send_called.is_set()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_called.is_set()
    }

    async fn unless_stopped<T>(
        &self,
        step: impl Future<Output = TransportResult<T>>,
    ) -> MediaResult<T> {
        tokio::select! {
            biased;
            _ = self.stop_requested.wait() => Err(MediaError::AlreadyStopped(ENDPOINT)),
            result = step => Ok(result?),
        }
    }

    /// Swap the track this sender transmits.
    ///
    /// The new track must be present, of the same kind, and must not trip a
    /// negotiation trigger. On failure nothing changes.
    pub async fn replace_track(&self, new_track: Option<Arc<MediaTrack>>) -> MediaResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.stop_requested.is_set() {
            return Err(MediaError::AlreadyStopped(ENDPOINT));
        }

        let new_track = new_track
            .ok_or_else(|| MediaError::InvalidArgument("new track must not be None".to_string()))?;
        let current = self.track().ok_or(MediaError::AlreadyStopped(ENDPOINT))?;

        if new_track.kind() != current.kind() {
            return Err(MediaError::InvalidArgument(format!(
                "new track kind {} does not match original {}",
                new_track.kind(),
                current.kind()
            )));
        }

        self.triggers.check(current.codec(), new_track.codec())?;

        MediaTrack::move_sender(
            &current,
            &new_track,
            self.id,
            &self.this,
            self.send_called.is_set(),
        )?;

        debug!(
            sender_id = %self.id,
            old_track = current.id(),
            new_track = new_track.id(),
            "Sender track replaced"
        );
        *self.track_slot() = Some(new_track);
        Ok(())
    }

    /// Activate the sender: open the RTCP read stream for the sending SSRC
    /// and join the track's active set.
    pub async fn send(&self, parameters: SendParameters) -> MediaResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.send_called.is_set() {
            return Err(MediaError::AlreadyActivated("Send"));
        }
        if self.stop_requested.is_set() {
            return Err(MediaError::AlreadyStopped(ENDPOINT));
        }
        let ssrc = parameters.encodings.ssrc.ok_or_else(|| {
            MediaError::InvalidArgument("send parameters must carry an SSRC".to_string())
        })?;

        let rtcp_session = self.unless_stopped(self.transport.rtcp_session()).await?;
        let rtcp = self
            .unless_stopped(rtcp_session.open_read_stream(ssrc))
            .await?;

        let track = self.track().ok_or(MediaError::AlreadyStopped(ENDPOINT))?;
        if self.rtcp_stream.set(rtcp).is_err() {
            return Err(MediaError::AlreadyActivated("Send"));
        }
        track.activate_sender(self.id, &self.this);
        self.send_called.set();

        debug!(sender_id = %self.id, ssrc, track_id = track.id(), "Sender activated");
        Ok(())
    }

    /// Irreversibly stop the sender.
    ///
    /// Releases the track whether or not the sender ever activated. Closes
    /// the RTCP stream if it was opened and returns its close error.
    pub async fn stop(&self) -> MediaResult<()> {
        self.stop_requested.set();
        let _lifecycle = self.lifecycle.lock().await;

        if self.stop_called.is_set() {
            return Ok(());
        }

        let track = self.track_slot().take();
        if let Some(track) = &track {
            track.detach_sender(self.id);
        }
        self.stop_called.set();
        debug!(
            sender_id = %self.id,
            track_id = track.as_ref().map(|t| t.id()),
            activated = self.send_called.is_set(),
            "Sender stopped"
        );

        if self.send_called.is_set() {
            if let Some(stream) = self.rtcp_stream.get() {
                if let Err(e) = stream.close().await {
                    warn!(sender_id = %self.id, error = %e, "Failed to close RTCP stream");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// Read one inbound RTCP packet.
    ///
    /// Waits for activation; fails with `ClosedPipe` if the sender is stopped first.
    pub async fn read(&self, buf: &mut [u8]) -> MediaResult<usize> {
        tokio::select! {
            biased;
            _ = self.stop_called.wait() => Err(MediaError::ClosedPipe),
            _ = self.send_called.wait() => {
                let stream = self.rtcp_stream.get().ok_or(MediaError::ClosedPipe)?;
                Ok(stream.read(buf).await?)
            }
        }
    }

    /// Read and parse one compound RTCP packet
    pub async fn read_rtcp(&self) -> MediaResult<Vec<RtcpPacket>> {
        let mut buf = vec![0u8; self.receive_mtu];
        let n = self.read(&mut buf).await?;
        rtcp::unmarshal(&buf[..n])
    }

    /// Send one RTP packet directly on this sender.
    ///
    /// Waits for activation; fails with `AlreadyStopped` if the sender is
    /// stopped first. The write stream is opened on first use and reused.
    pub async fn send_rtp(&self, header: &RtpHeader, payload: &[u8]) -> MediaResult<usize> {
        tokio::select! {
            biased;
            _ = self.stop_called.wait() => Err(MediaError::AlreadyStopped(ENDPOINT)),
            _ = self.send_called.wait() => {
                let stream = self
                    .write_stream
                    .get_or_try_init(|| async {
                        let session = self.transport.rtp_session().await?;
                        session.open_write_stream().await
                    })
                    .await?;
                Ok(stream.write_rtp(header, payload).await?)
            }
        }
    }
}

impl Drop for MediaSender {
    fn drop(&mut self) {
        // An unstopped sender still holds its track
        let track = self
            .track
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(track) = track {
            track.detach_sender(self.id);
        }
    }
}

impl std::fmt::Debug for MediaSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSender")
            .field("id", &self.id)
            .field("track", &self.track())
            .field("negotiated", &self.is_negotiated())
            .field("activated", &self.send_called.is_set())
            .field("stopped", &self.stop_called.is_set())
            .field("triggers", &self.triggers)
            .finish()
    }
}
