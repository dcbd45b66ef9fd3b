//! RTP header and packet codec (RFC 3550 section 5.1)
//!
//! Only what the endpoints need on their convenience paths: the loopback
//! transport marshals outbound packets with it and remote tracks parse
//! inbound media with it. Real transports bring their own codec.
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


use crate::error::{MediaError, MediaResult};
use bytes::{BufMut, Bytes, BytesMut};

/// RTP fixed header plus CSRC list and one optional extension block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Padding flag
    pub padding: bool,
    /// Marker bit
    pub marker: bool,
    /// Payload type (7 bits)
    pub payload_type: u8,
    /// Sequence number
    pub sequence_number: u16,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
    /// Contributing sources (at most 15)
    pub csrc: Vec<u32>,
    /// Header extension as `(profile, data)`; data is padded to 32-bit words on the wire
    pub extension: Option<(u16, Bytes)>,
}

/// RTP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

const VERSION: u8 = 2;

/// CSRC count is a 4-bit field; extra entries are not encoded
const MAX_CSRC: usize = 15;

/// Extension length is a 16-bit count of 32-bit words
const MAX_EXTENSION_LEN: usize = u16::MAX as usize * 4;

fn parse_error(msg: impl Into<String>) -> MediaError {
    MediaError::RtpParse(msg.into())
}

impl RtpHeader {
    /// Fixed header size
    pub const MIN_SIZE: usize = 12;

    /// Header with the given routing fields and everything else zeroed
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        RtpHeader {
            padding: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension: None,
        }
    }

    /// Parse a header, returning it with the remaining bytes
    pub fn parse(data: &[u8]) -> MediaResult<(Self, &[u8])> {
        if data.len() < Self::MIN_SIZE {
            return Err(parse_error(format!("RTP header too short: {} bytes", data.len())));
        }

        let version = data[0] >> 6;
        if version != VERSION {
            return Err(parse_error(format!("Invalid RTP version: {}", version)));
        }
        let padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut rest = &data[Self::MIN_SIZE..];

        if rest.len() < csrc_count * 4 {
            return Err(parse_error("Incomplete CSRC list"));
        }
        let csrc = rest[..csrc_count * 4]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        rest = &rest[csrc_count * 4..];

        let extension = if has_extension {
            if rest.len() < 4 {
                return Err(parse_error("Incomplete extension header"));
            }
            let profile = u16::from_be_bytes([rest[0], rest[1]]);
            let words = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            if rest.len() < 4 + words * 4 {
                return Err(parse_error("Incomplete extension data"));
            }
            let ext = Bytes::copy_from_slice(&rest[4..4 + words * 4]);
            rest = &rest[4 + words * 4..];
            Some((profile, ext))
        } else {
            None
        };

        Ok((
            RtpHeader {
                padding,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
                extension,
            },
            rest,
        ))
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        let ext = self
            .extension
            .as_ref()
            .map(|(_, data)| 4 + data.len().div_ceil(4) * 4)
            .unwrap_or(0);
        Self::MIN_SIZE + self.encoded_csrc().len() * 4 + ext
    }

    fn encoded_csrc(&self) -> &[u32] {
        &self.csrc[..self.csrc.len().min(MAX_CSRC)]
    }

    /// Append the encoded header to `buf`.
    ///
    /// Only the first 15 CSRCs are written. Fails without touching `buf` if
    /// the extension does not fit the 16-bit length field.
    pub fn write_to(&self, buf: &mut BytesMut) -> MediaResult<()> {
        let ext_words = match &self.extension {
            Some((_, data)) if data.len() > MAX_EXTENSION_LEN => {
                return Err(parse_error(format!(
                    "RTP header extension too large: {} bytes",
                    data.len()
                )))
            }
            Some((_, data)) => data.len().div_ceil(4) as u16,
            None => 0,
        };
        let csrc = self.encoded_csrc();
        let csrc_count = csrc.len();

        let mut first = VERSION << 6 | csrc_count as u8;
        if self.padding {
            first |= 0x20;
        }
        if self.extension.is_some() {
            first |= 0x10;
        }
        buf.put_u8(first);
        buf.put_u8(u8::from(self.marker) << 7 | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for csrc in csrc {
            buf.put_u32(*csrc);
        }

        if let Some((profile, data)) = &self.extension {
            buf.put_u16(*profile);
            buf.put_u16(ext_words);
            buf.put_slice(data);
            buf.put_bytes(0, ext_words as usize * 4 - data.len());
        }
        Ok(())
    }
}

impl RtpPacket {
    /// Parse a full packet, stripping padding
    pub fn parse(data: &[u8]) -> MediaResult<Self> {
        let (header, body) = RtpHeader::parse(data)?;

        let body = if header.padding {
            let pad = *body
                .last()
                .ok_or_else(|| parse_error("Packet has padding flag but no payload"))?
                as usize;
            if pad == 0 || pad > body.len() {
                return Err(parse_error(format!("Invalid padding length: {}", pad)));
            }
            &body[..body.len() - pad]
        } else {
            body
        };

        Ok(RtpPacket {
            header,
            payload: Bytes::copy_from_slice(body),
        })
    }

    /// Encode header and payload; padding is not re-added
    pub fn marshal(header: &RtpHeader, payload: &[u8]) -> MediaResult<Bytes> {
        let mut buf = BytesMut::with_capacity(header.size() + payload.len());
        let mut header = header.clone();
        header.padding = false;
        header.write_to(&mut buf)?;
        buf.put_slice(payload);
        Ok(buf.freeze())
    }
}
