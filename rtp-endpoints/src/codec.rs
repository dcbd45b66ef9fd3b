//! Media kinds, codec descriptors and activation parameters
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


use std::fmt;

/// Media type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Audio stream
    Audio,
    /// Video stream
    Video,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Audio => f.write_str("audio"),
            MediaType::Video => f.write_str("video"),
        }
    }
}

/// Negotiated codec of a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    /// Audio or video
    pub kind: MediaType,
    /// Encoding name, e.g. "opus" or "VP8"
    pub name: String,
    /// RTP payload type
    pub payload_type: u8,
    /// RTP clock rate in Hz
    pub clock_rate: u32,
    /// Channel count; meaningful for audio only
    pub channels: u16,
}

impl CodecDescriptor {
    /// Audio codec
    pub fn audio(
        name: impl Into<String>,
        payload_type: u8,
        clock_rate: u32,
        channels: u16,
    ) -> Self {
        CodecDescriptor {
            kind: MediaType::Audio,
            name: name.into(),
            payload_type,
            clock_rate,
            channels,
        }
    }

    /// Video codec
    pub fn video(name: impl Into<String>, payload_type: u8, clock_rate: u32) -> Self {
        CodecDescriptor {
            kind: MediaType::Video,
            name: name.into(),
            payload_type,
            clock_rate,
            channels: 0,
        }
    }

    /// Opus, 48 kHz stereo, dynamic payload type 111
    pub fn opus() -> Self {
        Self::audio("opus", 111, 48_000, 2)
    }

    /// VP8, 90 kHz, dynamic payload type 96
    pub fn vp8() -> Self {
        Self::video("VP8", 96, 90_000)
    }
}

/// Per-encoding parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodingParameters {
    /// Synchronization source; `None` lets a receiver accept the next inbound stream
    pub ssrc: Option<u32>,
}

/// Parameters for `MediaReceiver::receive`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveParameters {
    pub encodings: EncodingParameters,
    /// Codec the bound track is created with; its kind must match the receiver's
    pub codec: CodecDescriptor,
}

impl ReceiveParameters {
    /// Receive a known SSRC
    pub fn with_ssrc(ssrc: u32, codec: CodecDescriptor) -> Self {
        ReceiveParameters {
            encodings: EncodingParameters { ssrc: Some(ssrc) },
            codec,
        }
    }

    /// Accept whichever stream arrives next
    pub fn accept(codec: CodecDescriptor) -> Self {
        ReceiveParameters {
            encodings: EncodingParameters::default(),
            codec,
        }
    }
}

/// Parameters for `MediaSender::send`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendParameters {
    pub encodings: EncodingParameters,
}

impl SendParameters {
    pub fn with_ssrc(ssrc: u32) -> Self {
        SendParameters {
            encodings: EncodingParameters { ssrc: Some(ssrc) },
        }
    }
}
