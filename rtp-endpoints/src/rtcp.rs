//! RTCP compound packet handling (RFC 3550 section 6)
//!
//! Backs the `read_rtcp` convenience readers on senders and receivers.
//! Report and BYE packets are decoded; every other type is kept opaque.
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

const VERSION: u8 = 2;
const HEADER_SIZE: usize = 4;
const REPORT_BLOCK_SIZE: usize = 24;

/// Sender Report packet type
pub const PT_SENDER_REPORT: u8 = 200;
/// Receiver Report packet type
pub const PT_RECEIVER_REPORT: u8 = 201;
/// Goodbye packet type
pub const PT_GOODBYE: u8 = 203;

/// Reception report block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceptionReport {
    pub ssrc: u32,
    pub fraction_lost: u8,
    /// 24-bit signed on the wire
    pub cumulative_packets_lost: i32,
    pub extended_sequence_number: u32,
    pub jitter: u32,
    pub last_sr_timestamp: u32,
    pub delay_since_last_sr: u32,
}

/// Sender Report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_timestamp: u64,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub reports: Vec<ReceptionReport>,
}

/// Receiver Report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub reports: Vec<ReceptionReport>,
}

/// BYE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goodbye {
    pub sources: Vec<u32>,
    pub reason: Option<String>,
}

/// One packet of a compound RTCP datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    Goodbye(Goodbye),
    /// Any other packet type, body kept as received (without the 4-byte header)
    Other { packet_type: u8, count: u8, body: Bytes },
}

fn parse_error(msg: impl Into<String>) -> MediaError {
    MediaError::RtpParse(msg.into())
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Parse a compound RTCP datagram
pub fn unmarshal(mut data: &[u8]) -> MediaResult<Vec<RtcpPacket>> {
    if data.is_empty() {
        return Err(parse_error("Empty RTCP datagram"));
    }

    let mut packets = Vec::new();
    while !data.is_empty() {
        if data.len() < HEADER_SIZE {
            return Err(parse_error("RTCP header too short"));
        }
        let version = data[0] >> 6;
        if version != VERSION {
            return Err(parse_error(format!("Invalid RTCP version: {}", version)));
        }
        let padding = data[0] & 0x20 != 0;
        let count = data[0] & 0x1F;
        let packet_type = data[1];
        let size = (u16::from_be_bytes([data[2], data[3]]) as usize + 1) * 4;
        if data.len() < size {
            return Err(parse_error(format!(
                "RTCP packet truncated: header says {} bytes, {} available",
                size,
                data.len()
            )));
        }

        let mut body = &data[HEADER_SIZE..size];
        if padding {
            let pad = body.last().copied().unwrap_or(0) as usize;
            if pad == 0 || pad > body.len() {
                return Err(parse_error(format!("Invalid RTCP padding: {}", pad)));
            }
            body = &body[..body.len() - pad];
        }

        packets.push(parse_packet(packet_type, count, body)?);
        data = &data[size..];
    }

    Ok(packets)
}

fn parse_packet(packet_type: u8, count: u8, body: &[u8]) -> MediaResult<RtcpPacket> {
    match packet_type {
        PT_SENDER_REPORT => {
            if body.len() < 24 + count as usize * REPORT_BLOCK_SIZE {
                return Err(parse_error("Sender report too short"));
            }
            Ok(RtcpPacket::SenderReport(SenderReport {
                ssrc: be_u32(&body[0..]),
                ntp_timestamp: (be_u32(&body[4..]) as u64) << 32 | be_u32(&body[8..]) as u64,
                rtp_timestamp: be_u32(&body[12..]),
                packet_count: be_u32(&body[16..]),
                octet_count: be_u32(&body[20..]),
                reports: parse_report_blocks(&body[24..], count),
            }))
        }
        PT_RECEIVER_REPORT => {
            if body.len() < 4 + count as usize * REPORT_BLOCK_SIZE {
                return Err(parse_error("Receiver report too short"));
            }
            Ok(RtcpPacket::ReceiverReport(ReceiverReport {
                ssrc: be_u32(body),
                reports: parse_report_blocks(&body[4..], count),
            }))
        }
        PT_GOODBYE => {
            let sources_len = count as usize * 4;
            if body.len() < sources_len {
                return Err(parse_error("BYE too short"));
            }
            let sources = body[..sources_len].chunks_exact(4).map(be_u32).collect();
            let reason = body.get(sources_len).and_then(|&len| {
                body.get(sources_len + 1..sources_len + 1 + len as usize)
                    .map(|r| String::from_utf8_lossy(r).into_owned())
            });
            Ok(RtcpPacket::Goodbye(Goodbye { sources, reason }))
        }
        _ => Ok(RtcpPacket::Other {
            packet_type,
            count,
            body: Bytes::copy_from_slice(body),
        }),
    }
}

fn parse_report_blocks(data: &[u8], count: u8) -> Vec<ReceptionReport> {
    data.chunks_exact(REPORT_BLOCK_SIZE)
        .take(count as usize)
        .map(|b| {
            // sign-extend the 24-bit loss counter
            let lost = i32::from_be_bytes([b[5], b[6], b[7], 0]) >> 8;
            ReceptionReport {
                ssrc: be_u32(b),
                fraction_lost: b[4],
                cumulative_packets_lost: lost,
                extended_sequence_number: be_u32(&b[8..]),
                jitter: be_u32(&b[12..]),
                last_sr_timestamp: be_u32(&b[16..]),
                delay_since_last_sr: be_u32(&b[20..]),
            }
        })
        .collect()
}

fn put_header(buf: &mut BytesMut, count: u8, packet_type: u8, body_len: usize) {
    buf.put_u8(VERSION << 6 | (count & 0x1F));
    buf.put_u8(packet_type);
    buf.put_u16(((HEADER_SIZE + body_len) / 4 - 1) as u16);
}

fn put_report_blocks(buf: &mut BytesMut, reports: &[ReceptionReport]) {
    for r in reports.iter().take(31) {
        buf.put_u32(r.ssrc);
        buf.put_u8(r.fraction_lost);
        buf.put_slice(&r.cumulative_packets_lost.to_be_bytes()[1..]);
        buf.put_u32(r.extended_sequence_number);
        buf.put_u32(r.jitter);
        buf.put_u32(r.last_sr_timestamp);
        buf.put_u32(r.delay_since_last_sr);
    }
}

impl RtcpPacket {
    /// Encode this packet; opaque packets are re-emitted with their original body
    pub fn marshal(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            RtcpPacket::SenderReport(sr) => {
                let n = sr.reports.len().min(31);
                put_header(&mut buf, n as u8, PT_SENDER_REPORT, 24 + n * REPORT_BLOCK_SIZE);
                buf.put_u32(sr.ssrc);
                buf.put_u64(sr.ntp_timestamp);
                buf.put_u32(sr.rtp_timestamp);
                buf.put_u32(sr.packet_count);
                buf.put_u32(sr.octet_count);
                put_report_blocks(&mut buf, &sr.reports);
            }
            RtcpPacket::ReceiverReport(rr) => {
                let n = rr.reports.len().min(31);
                put_header(&mut buf, n as u8, PT_RECEIVER_REPORT, 4 + n * REPORT_BLOCK_SIZE);
                buf.put_u32(rr.ssrc);
                put_report_blocks(&mut buf, &rr.reports);
            }
            RtcpPacket::Goodbye(bye) => {
                let n = bye.sources.len().min(31);
                let reason = bye.reason.as_deref().unwrap_or("").as_bytes();
                let reason = &reason[..reason.len().min(255)];
                let reason_len = if reason.is_empty() { 0 } else { 1 + reason.len() };
                let body_len = (n * 4 + reason_len).div_ceil(4) * 4;
                put_header(&mut buf, n as u8, PT_GOODBYE, body_len);
                for ssrc in &bye.sources[..n] {
                    buf.put_u32(*ssrc);
                }
                if !reason.is_empty() {
                    buf.put_u8(reason.len() as u8);
                    buf.put_slice(reason);
                }
                buf.put_bytes(0, body_len - n * 4 - reason_len);
            }
            RtcpPacket::Other { packet_type, count, body } => {
                let body_len = body.len().div_ceil(4) * 4;
                put_header(&mut buf, *count, *packet_type, body_len);
                buf.put_slice(body);
                buf.put_bytes(0, body_len - body.len());
            }
        }
        buf.freeze()
    }
}

/// Encode several packets into one compound datagram
pub fn marshal(packets: &[RtcpPacket]) -> Bytes {
    let mut buf = BytesMut::new();
    for packet in packets {
        buf.put_slice(&packet.marshal());
    }
    buf.freeze()
}
