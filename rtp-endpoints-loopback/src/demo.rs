//! One pass of media over an in-memory transport pair

use anyhow::{Context, Result};
use bytes::Bytes;
use mediaflow_config::EndpointConfig;
use rtp_endpoints::rtcp::{ReceiverReport, ReceptionReport, RtcpPacket};
use rtp_endpoints::{
    CodecDescriptor, LoopbackTransport, MediaReceiver, MediaSender, MediaTrack, MediaType,
    NegotiationTriggers, ReceiveParameters, RtpHeader, SendParameters, SenderOptions,
};
use tracing::{info, warn};

/// Opus at 48 kHz, 20 ms frames
const SAMPLES_PER_FRAME: u32 = 960;

/// What the demo observed
#[derive(Debug, Default)]
pub struct DemoReport {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub rtcp_packets: usize,
}

pub struct LoopbackDemo {
    config: EndpointConfig,
}

impl LoopbackDemo {
    pub fn new(config: EndpointConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> Result<DemoReport> {
        let ssrc = self.config.demo_ssrc;
        let (near, far) = LoopbackTransport::pair(self.config.loopback_queue_depth);

        let track = MediaTrack::new(
            "loopback-audio",
            "loopback microphone",
            ssrc,
            CodecDescriptor::opus(),
        );
        let sender = MediaSender::with_options(
            track.clone(),
            near.clone(),
            SenderOptions {
                triggers: NegotiationTriggers::default(),
                receive_mtu: self.config.receive_mtu,
            },
        )
        .context("Failed to create sender")?;
        let receiver = MediaReceiver::with_receive_mtu(
            MediaType::Audio,
            far.clone(),
            self.config.receive_mtu,
        );

        sender
            .send(SendParameters::with_ssrc(ssrc))
            .await
            .context("Failed to activate sender")?;
        receiver
            .receive(ReceiveParameters::with_ssrc(ssrc, CodecDescriptor::opus()))
            .await
            .context("Failed to activate receiver")?;
        sender.set_negotiated();

        let remote_track = receiver
            .track()
            .context("Receiver activated without a track")?;
        info!(
            sender_id = %sender.id(),
            ssrc,
            remote_track = remote_track.id(),
            "Endpoints activated"
        );

        // One packet in flight at a time, so the loopback queue never overflows
        let mut report = DemoReport::default();
        for seq in 0..self.config.demo_packet_count {
            let header = RtpHeader::new(
                track.codec().payload_type,
                seq as u16,
                seq.wrapping_mul(SAMPLES_PER_FRAME),
                ssrc,
            );
            let payload = Bytes::from(format!("frame {seq}"));
            track
                .write_rtp(&header, &payload)
                .await
                .context("Failed to write RTP")?;
            report.packets_sent += 1;

            let packet = remote_track
                .read_rtp()
                .await
                .context("Failed to read RTP")?;
            report.packets_received += 1;
            info!(
                seq = packet.header.sequence_number,
                timestamp = packet.header.timestamp,
                bytes = packet.payload.len(),
                "Received RTP packet"
            );
        }

        // Feedback from the receiving side about the sender's stream
        let feedback = RtcpPacket::ReceiverReport(ReceiverReport {
            ssrc: ssrc.wrapping_add(1),
            reports: vec![ReceptionReport {
                ssrc,
                fraction_lost: 0,
                cumulative_packets_lost: 0,
                extended_sequence_number: report.packets_received,
                jitter: 0,
                last_sr_timestamp: 0,
                delay_since_last_sr: 0,
            }],
        });
        far.write_rtcp_packets(ssrc, &[feedback])
            .context("Failed to inject RTCP")?;
        let packets = sender.read_rtcp().await.context("Failed to read RTCP")?;
        report.rtcp_packets = packets.len();
        info!(packets = packets.len(), "Sender received RTCP");

        if let Err(e) = sender.stop().await {
            warn!(error = %e, "Sender stop reported an error");
        }
        if let Err(e) = receiver.stop().await {
            warn!(error = %e, "Receiver stop reported an error");
        }

        Ok(report)
    }
}
