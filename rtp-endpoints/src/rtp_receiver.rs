//! Inbound media endpoint
//!
//! `Created -> Activated -> Closed`. Activation happens at most once and
//! opens the RTP and RTCP read streams; `stop` is reachable from either
//! state and is idempotent.
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


use crate::codec::{MediaType, ReceiveParameters};
use crate::error::{MediaError, MediaResult, TransportResult};
use crate::latch::Latch;
use crate::media_track::MediaTrack;
use crate::rtcp::{self, RtcpPacket};
use crate::transport::{ReadStream, Transport};
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const ENDPOINT: &str = "MediaReceiver";

/// Everything activation produces, published as one unit
struct Bound {
    track: Arc<MediaTrack>,
    rtp: Arc<dyn ReadStream>,
    rtcp: Arc<dyn ReadStream>,
}

/// Receives one inbound media stream and its RTCP
pub struct MediaReceiver {
    kind: MediaType,
    transport: Arc<dyn Transport>,
    receive_mtu: usize,
    this: Weak<MediaReceiver>,

    /// Serializes `receive` and `stop`
    lifecycle: Mutex<()>,
    bound: OnceLock<Bound>,

    activated: Latch,
    stop_requested: Latch,
    closed: Latch,
}

impl MediaReceiver {
    /// Create a receiver for `kind` media on `transport`
    pub fn new(kind: MediaType, transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::with_receive_mtu(kind, transport, crate::DEFAULT_RECEIVE_MTU)
    }

    /// Create a receiver whose convenience readers use `receive_mtu`-byte buffers
    pub fn with_receive_mtu(
        kind: MediaType,
        transport: Arc<dyn Transport>,
        receive_mtu: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| MediaReceiver {
            kind,
            transport,
            receive_mtu,
            this: this.clone(),
            lifecycle: Mutex::new(()),
            bound: OnceLock::new(),
            activated: Latch::new(),
            stop_requested: Latch::new(),
            closed: Latch::new(),
        })
    }

    pub fn kind(&self) -> MediaType {
        self.kind
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub fn receive_mtu(&self) -> usize {
        self.receive_mtu
    }

    /// Bound track; `None` until activation
    pub fn track(&self) -> Option<Arc<MediaTrack>> {
        self.bound.get().map(|b| b.track.clone())
    }

    pub fn is_activated(&self) -> bool {
        self.activated.is_set()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_set()
    }

    /// Run a transport step, abandoning it if `stop` is requested meanwhile
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

    /// Activate the receiver: open the RTP and RTCP read streams and bind a track.
    ///
    /// With an explicit SSRC the matching stream is opened; otherwise the next
    /// unknown inbound stream is accepted and its SSRC learned. On any failure
    /// the receiver stays in `Created` and may be activated again.
    pub async fn receive(&self, parameters: ReceiveParameters) -> MediaResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.activated.is_set() {
            return Err(MediaError::AlreadyActivated("Receive"));
        }
        if self.stop_requested.is_set() {
            return Err(MediaError::AlreadyStopped(ENDPOINT));
        }
        if parameters.codec.kind != self.kind {
            return Err(MediaError::InvalidArgument(format!(
                "codec kind {} does not match receiver kind {}",
                parameters.codec.kind, self.kind
            )));
        }

        let rtp_session = self.unless_stopped(self.transport.rtp_session()).await?;
        let (rtp, ssrc) = match parameters.encodings.ssrc {
            Some(ssrc) => {
                let stream = self
                    .unless_stopped(rtp_session.open_read_stream(ssrc))
                    .await?;
                (stream, ssrc)
            }
            None => self.unless_stopped(rtp_session.accept_stream()).await?,
        };

        let rtcp = match self.open_rtcp(ssrc).await {
            Ok(stream) => stream,
            Err(e) => {
                release(&rtp, ssrc).await;
                return Err(e);
            }
        };

        let track = MediaTrack::new(
            format!("{}-{}", self.kind, ssrc),
            format!("remote {}", self.kind),
            ssrc,
            parameters.codec,
        );
        track.attach_receiver(&self.this)?;

        if self.bound.set(Bound { track, rtp, rtcp }).is_err() {
            return Err(MediaError::AlreadyActivated("Receive"));
        }
        self.activated.set();

        debug!(ssrc, kind = %self.kind, "Receiver activated");
        Ok(())
    }

    async fn open_rtcp(&self, ssrc: u32) -> MediaResult<Arc<dyn ReadStream>> {
        let rtcp_session = self.unless_stopped(self.transport.rtcp_session()).await?;
        self.unless_stopped(rtcp_session.open_read_stream(ssrc)).await
    }

    fn bound(&self) -> MediaResult<&Bound> {
        self.bound.get().ok_or(MediaError::ClosedPipe)
    }

    /// Read one inbound RTCP packet.
    ///
    /// Waits for activation. If the receiver is stopped first, or was already
    /// stopped, fails with `ClosedPipe`.
    pub async fn read(&self, buf: &mut [u8]) -> MediaResult<usize> {
        tokio::select! {
            biased;
            _ = self.closed.wait() => Err(MediaError::ClosedPipe),
            _ = self.activated.wait() => Ok(self.bound()?.rtcp.read(buf).await?),
        }
    }

    /// Read and parse one compound RTCP packet
    pub async fn read_rtcp(&self) -> MediaResult<Vec<RtcpPacket>> {
        let mut buf = vec![0u8; self.receive_mtu];
        let n = self.read(&mut buf).await?;
        rtcp::unmarshal(&buf[..n])
    }

    /// Read one inbound RTP packet for the bound track.
    ///
    /// Same race as `read`: stopping the receiver unblocks pending calls.
    pub(crate) async fn read_media(&self, buf: &mut [u8]) -> MediaResult<usize> {
        tokio::select! {
            biased;
            _ = self.closed.wait() => Err(MediaError::ClosedPipe),
            _ = self.activated.wait() => Ok(self.bound()?.rtp.read(buf).await?),
        }
    }

    /// Irreversibly stop the receiver.
    ///
    /// Closes the RTCP then the RTP stream if activation completed and
    /// returns the first close error. The closed state is published either way.
    pub async fn stop(&self) -> MediaResult<()> {
        self.stop_requested.set();
        let _lifecycle = self.lifecycle.lock().await;

        if self.closed.is_set() {
            return Ok(());
        }

        let mut result = Ok(());
        if self.activated.is_set() {
            if let Some(bound) = self.bound.get() {
                let rtcp = bound.rtcp.close().await;
                let rtp = bound.rtp.close().await;
                if let Err(e) = &rtcp {
                    warn!(ssrc = bound.track.ssrc(), error = %e, "Failed to close RTCP stream");
                }
                if let Err(e) = &rtp {
                    warn!(ssrc = bound.track.ssrc(), error = %e, "Failed to close RTP stream");
                }
                result = rtcp.and(rtp).map_err(MediaError::from);
            }
        }

        self.closed.set();
        debug!(kind = %self.kind, activated = self.activated.is_set(), "Receiver stopped");
        result
    }
}

/// Close a stream opened by an activation attempt that did not complete
async fn release(stream: &Arc<dyn ReadStream>, ssrc: u32) {
    if let Err(e) = stream.close().await {
        warn!(ssrc, error = %e, "Failed to release RTP stream after aborted activation");
    }
}

impl std::fmt::Debug for MediaReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaReceiver")
            .field("kind", &self.kind)
            .field("activated", &self.activated.is_set())
            .field("closed", &self.closed.is_set())
            .field("track", &self.track())
            .finish()
    }
}
