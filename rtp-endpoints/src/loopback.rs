//! In-memory loopback transport
//!
//! Two connected transports: RTP written on one side is demultiplexed by
//! SSRC on the other. Packets for an SSRC nobody has opened yet are queued
//! and the SSRC is offered to `accept_stream`. RTCP is injected explicitly
//! with `write_rtcp`. Full queues drop packets, like a datagram socket would.
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


use crate::error::{TransportError, TransportResult};
use crate::latch::Latch;
use crate::rtcp::{self, RtcpPacket};
use crate::rtp_packet::{RtpHeader, RtpPacket};
use crate::transport::{ReadStream, RtcpSession, RtpSession, Transport, WriteStream};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::trace;

struct Slot {
    tx: mpsc::Sender<Bytes>,
    rx: Option<mpsc::Receiver<Bytes>>,
}

/// Per-SSRC packet queues for one direction of one protocol
struct Demux {
    depth: usize,
    announce_unknown: bool,
    slots: Mutex<HashMap<u32, Slot>>,
    accept_tx: mpsc::UnboundedSender<u32>,
    accept_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<u32>>,
}

impl Demux {
    fn new(depth: usize, announce_unknown: bool) -> Self {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        Demux {
            depth,
            announce_unknown,
            slots: Mutex::new(HashMap::new()),
            accept_tx,
            accept_rx: tokio::sync::Mutex::new(accept_rx),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<u32, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_slot(&self) -> Slot {
        let (tx, rx) = mpsc::channel(self.depth);
        Slot { tx, rx: Some(rx) }
    }

    fn deliver(&self, ssrc: u32, packet: Bytes) {
        let mut slots = self.slots();
        let slot = slots.entry(ssrc).or_insert_with(|| {
            if self.announce_unknown {
                let _ = self.accept_tx.send(ssrc);
            }
            self.new_slot()
        });
        if slot.tx.try_send(packet).is_err() {
            trace!(ssrc, "Loopback queue full or closed, dropping packet");
        }
    }

    fn open(&self, ssrc: u32) -> TransportResult<Arc<dyn ReadStream>> {
        let mut slots = self.slots();
        let slot = slots.entry(ssrc).or_insert_with(|| self.new_slot());
        let rx = slot.rx.take().ok_or(TransportError::StreamExists(ssrc))?;
        Ok(Arc::new(LoopbackReadStream::new(rx)))
    }

    async fn accept(&self, closed: &Latch) -> TransportResult<(Arc<dyn ReadStream>, u32)> {
        let mut announced = self.accept_rx.lock().await;
        loop {
            let ssrc = tokio::select! {
                biased;
                _ = closed.wait() => return Err(TransportError::Closed),
                ssrc = announced.recv() => ssrc.ok_or(TransportError::Closed)?,
            };
            // skip SSRCs opened explicitly since they were announced
            let rx = self.slots().get_mut(&ssrc).and_then(|slot| slot.rx.take());
            if let Some(rx) = rx {
                return Ok((Arc::new(LoopbackReadStream::new(rx)), ssrc));
            }
        }
    }
}

struct LoopbackReadStream {
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    closed: Latch,
}

impl LoopbackReadStream {
    fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        LoopbackReadStream {
            rx: tokio::sync::Mutex::new(rx),
            closed: Latch::new(),
        }
    }
}

#[async_trait]
impl ReadStream for LoopbackReadStream {
    async fn read(&self, buf: &mut [u8]) -> TransportResult<usize> {
        let packet = tokio::select! {
            biased;
            _ = self.closed.wait() => return Err(TransportError::Closed),
            packet = async { self.rx.lock().await.recv().await } => {
                packet.ok_or(TransportError::Closed)?
            }
        };

        if packet.len() > buf.len() {
            return Err(TransportError::ShortBuffer {
                needed: packet.len(),
                available: buf.len(),
            });
        }
        buf[..packet.len()].copy_from_slice(&packet);
        Ok(packet.len())
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.set();
        Ok(())
    }
}

/// One side's inbound queues
struct Side {
    rtp: Demux,
    rtcp: Demux,
    closed: Latch,
}

impl Side {
    fn new(depth: usize) -> Arc<Self> {
        Arc::new(Side {
            rtp: Demux::new(depth, true),
            rtcp: Demux::new(depth, false),
            closed: Latch::new(),
        })
    }

    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.is_set() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

struct LoopbackRtpSession {
    local: Arc<Side>,
    peer: Arc<Side>,
}

#[async_trait]
impl RtpSession for LoopbackRtpSession {
    async fn open_read_stream(&self, ssrc: u32) -> TransportResult<Arc<dyn ReadStream>> {
        self.local.ensure_open()?;
        self.local.rtp.open(ssrc)
    }

    async fn accept_stream(&self) -> TransportResult<(Arc<dyn ReadStream>, u32)> {
        self.local.ensure_open()?;
        self.local.rtp.accept(&self.local.closed).await
    }

    async fn open_write_stream(&self) -> TransportResult<Arc<dyn WriteStream>> {
        self.local.ensure_open()?;
        Ok(Arc::new(LoopbackWriteStream {
            local: self.local.clone(),
            peer: self.peer.clone(),
        }))
    }
}

struct LoopbackRtcpSession {
    local: Arc<Side>,
}

#[async_trait]
impl RtcpSession for LoopbackRtcpSession {
    async fn open_read_stream(&self, ssrc: u32) -> TransportResult<Arc<dyn ReadStream>> {
        self.local.ensure_open()?;
        self.local.rtcp.open(ssrc)
    }
}

struct LoopbackWriteStream {
    local: Arc<Side>,
    peer: Arc<Side>,
}

#[async_trait]
impl WriteStream for LoopbackWriteStream {
    async fn write_rtp(&self, header: &RtpHeader, payload: &[u8]) -> TransportResult<usize> {
        self.local.ensure_open()?;
        let packet = RtpPacket::marshal(header, payload)
            .map_err(|e| TransportError::Session(e.to_string()))?;
        let len = packet.len();
        self.peer.rtp.deliver(header.ssrc, packet);
        Ok(len)
    }
}

/// One end of an in-memory transport pair
pub struct LoopbackTransport {
    local: Arc<Side>,
    peer: Arc<Side>,
}

impl LoopbackTransport {
    /// Two connected transports with `queue_depth` packets of buffering per stream
    pub fn pair(queue_depth: usize) -> (Arc<LoopbackTransport>, Arc<LoopbackTransport>) {
        let depth = queue_depth.max(1);
        let a = Side::new(depth);
        let b = Side::new(depth);
        (
            Arc::new(LoopbackTransport {
                local: a.clone(),
                peer: b.clone(),
            }),
            Arc::new(LoopbackTransport { local: b, peer: a }),
        )
    }

    /// Send a raw RTCP datagram to the peer's RTCP stream for `ssrc`
    pub fn write_rtcp(&self, ssrc: u32, datagram: Bytes) -> TransportResult<usize> {
        self.local.ensure_open()?;
        let len = datagram.len();
        self.peer.rtcp.deliver(ssrc, datagram);
        Ok(len)
    }

    /// Send a compound RTCP packet to the peer's RTCP stream for `ssrc`
    pub fn write_rtcp_packets(&self, ssrc: u32, packets: &[RtcpPacket]) -> TransportResult<usize> {
        self.write_rtcp(ssrc, rtcp::marshal(packets))
    }

    /// Fail all further session requests and pending accepts on this side
    pub fn close(&self) {
        self.local.closed.set();
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn rtp_session(&self) -> TransportResult<Arc<dyn RtpSession>> {
        self.local.ensure_open()?;
        Ok(Arc::new(LoopbackRtpSession {
            local: self.local.clone(),
            peer: self.peer.clone(),
        }))
    }

    async fn rtcp_session(&self) -> TransportResult<Arc<dyn RtcpSession>> {
        self.local.ensure_open()?;
        Ok(Arc::new(LoopbackRtcpSession {
            local: self.local.clone(),
        }))
    }
}
