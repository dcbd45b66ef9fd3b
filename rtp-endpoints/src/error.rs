//! Error types for RTP endpoints
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


use thiserror::Error;

/// Result type for endpoint operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur on a sender, receiver or track
#[derive(Error, Debug)]
pub enum MediaError {
    /// Missing or mismatched argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Track cannot be used in the requested role
    #[error("Invalid track: {0}")]
    InvalidTrack(String),

    /// One-shot activation was already performed
    #[error("{0} has already been called")]
    AlreadyActivated(&'static str),

    /// Endpoint has been stopped
    #[error("{0} has been stopped")]
    AlreadyStopped(&'static str),

    /// Track swap would change a negotiated parameter
    #[error("Renegotiation required: {0}")]
    RenegotiationRequired(String),

    /// Read attempted after or concurrently with stop
    #[error("io: read/write on closed pipe")]
    ClosedPipe,

    /// RTP/RTCP packet could not be parsed
    #[error("RTP packet parse error: {0}")]
    RtpParse(String),

    /// Error surfaced by the transport, passed through unchanged
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Several independent operations failed
    #[error("{}", flatten_messages(.0))]
    Flattened(Vec<MediaError>),
}

fn flatten_messages(errors: &[MediaError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl MediaError {
    /// Collapse a list of errors: none is `Ok`, one is returned as-is
    pub fn flatten(mut errors: Vec<MediaError>) -> MediaResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(MediaError::Flattened(errors)),
        }
    }
}

/// Errors produced by transport sessions and streams
#[derive(Error, Debug)]
pub enum TransportError {
    /// Stream or session has been closed
    #[error("Transport stream closed")]
    Closed,

    /// A read stream for this SSRC is already open
    #[error("Read stream already open for SSRC {0}")]
    StreamExists(u32),

    /// Caller buffer cannot hold the next packet
    #[error("Buffer too short: need {needed} bytes, have {available}")]
    ShortBuffer { needed: usize, available: usize },

    /// Session-level failure
    #[error("Session error: {0}")]
    Session(String),

    /// Underlying I/O failure
    #[error("Network error: {0}")]
    Io(#[from] std::io::Error),
}
