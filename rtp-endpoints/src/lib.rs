//! RTP media endpoints
//!
//! This crate manages the lifecycle of the two ends of a media flow on top of
//! a transport that hands out RTP and RTCP sessions:
//! - `MediaReceiver`: binds a remote track to inbound RTP + RTCP streams
//! - `MediaSender`: binds a local track to outbound RTP and inbound RTCP
//! - `MediaTrack`: shared bookkeeping of which senders feed a track and
//!   which receiver owns it
//!
//! Both endpoints activate exactly once and stop exactly once. Reads issued
//! before activation wait for it; reads that lose the race against `stop`
//! fail with `ClosedPipe`.
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


pub mod codec;
pub mod error;
pub mod latch;
pub mod loopback;
pub mod media_track;
pub mod negotiation;
pub mod rtcp;
pub mod rtp_packet;
pub mod rtp_receiver;
pub mod rtp_sender;
pub mod transport;

/// Buffer size used by the convenience readers unless configured otherwise
pub const DEFAULT_RECEIVE_MTU: usize = 8192;

// Re-export main types
pub use codec::{CodecDescriptor, EncodingParameters, MediaType, ReceiveParameters, SendParameters};
pub use error::{MediaError, MediaResult, TransportError, TransportResult};
pub use latch::Latch;
pub use loopback::LoopbackTransport;
pub use media_track::MediaTrack;
pub use negotiation::{AudioChannelTrigger, NegotiationTrigger, NegotiationTriggers};
pub use rtcp::RtcpPacket;
pub use rtp_packet::{RtpHeader, RtpPacket};
pub use rtp_receiver::MediaReceiver;
pub use rtp_sender::{MediaSender, SenderOptions};
pub use transport::{ReadStream, RtcpSession, RtpSession, Transport, WriteStream};
