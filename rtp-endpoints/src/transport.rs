//! Transport contract consumed by senders and receivers
//!
//! The secure transport underneath (ICE/DTLS or anything equivalent) hands
//! out RTP and RTCP sessions. Endpoints only ever open streams on them.
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


use crate::error::TransportResult;
use crate::rtp_packet::RtpHeader;
use async_trait::async_trait;
use std::sync::Arc;

/// Inbound packet stream for one SSRC
#[async_trait]
pub trait ReadStream: Send + Sync {
    /// Read one packet into `buf`, returning its length
    async fn read(&self, buf: &mut [u8]) -> TransportResult<usize>;

    /// Close the stream, waking any pending read
    async fn close(&self) -> TransportResult<()>;
}

/// Outbound RTP capability
#[async_trait]
pub trait WriteStream: Send + Sync {
    /// Marshal and send one packet, returning the bytes written
    async fn write_rtp(&self, header: &RtpHeader, payload: &[u8]) -> TransportResult<usize>;
}

/// RTP side of a transport
#[async_trait]
pub trait RtpSession: Send + Sync {
    /// Open the inbound stream for a known SSRC
    async fn open_read_stream(&self, ssrc: u32) -> TransportResult<Arc<dyn ReadStream>>;

    /// Wait for the next inbound stream whose SSRC has not been opened yet
    async fn accept_stream(&self) -> TransportResult<(Arc<dyn ReadStream>, u32)>;

    /// Open an outbound stream
    async fn open_write_stream(&self) -> TransportResult<Arc<dyn WriteStream>>;
}

/// RTCP side of a transport
#[async_trait]
pub trait RtcpSession: Send + Sync {
    /// Open the inbound RTCP stream for an SSRC
    async fn open_read_stream(&self, ssrc: u32) -> TransportResult<Arc<dyn ReadStream>>;
}

/// Source of RTP/RTCP sessions
#[async_trait]
pub trait Transport: Send + Sync {
    /// RTP session, failing if the transport is not ready
    async fn rtp_session(&self) -> TransportResult<Arc<dyn RtpSession>>;

    /// RTCP session, failing if the transport is not ready
    async fn rtcp_session(&self) -> TransportResult<Arc<dyn RtcpSession>>;
}
