//! MediaSender integration tests

mod common;

use common::{header, ScriptedTransport, DEADLINE, SETTLE};
use rtp_endpoints::rtcp::{ReceptionReport, RtcpPacket, SenderReport};
use rtp_endpoints::{
    CodecDescriptor, LoopbackTransport, MediaError, MediaReceiver, MediaSender, MediaTrack,
    MediaType, NegotiationTriggers, ReceiveParameters, SendParameters, SenderOptions,
    TransportError,
};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn stereo_track(id: &str, ssrc: u32) -> Arc<MediaTrack> {
    MediaTrack::new(id, id, ssrc, CodecDescriptor::opus())
}

fn mono_track(id: &str, ssrc: u32) -> Arc<MediaTrack> {
    MediaTrack::new(id, id, ssrc, CodecDescriptor::audio("opus", 111, 48000, 1))
}

fn video_track(id: &str, ssrc: u32) -> Arc<MediaTrack> {
    MediaTrack::new(id, id, ssrc, CodecDescriptor::vp8())
}

#[tokio::test]
async fn test_new_sender_holds_track_inactive() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let track = stereo_track("mic", 1);
    let sender = MediaSender::new(track.clone(), local).unwrap();

    assert!(Arc::ptr_eq(&sender.track().unwrap(), &track));
    assert!(!sender.is_activated());
    assert!(!sender.is_negotiated());
    assert_eq!(track.total_sender_count(), 1);
    assert_eq!(track.active_sender_count(), 0);

    sender.set_negotiated();
    assert!(sender.is_negotiated());
}

#[tokio::test]
async fn test_send_activates_once() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let track = stereo_track("mic", 1);
    let sender = MediaSender::new(track.clone(), local).unwrap();

    sender.send(SendParameters::with_ssrc(1)).await.unwrap();
    assert!(sender.is_activated());
    assert_eq!(track.active_sender_ids(), vec![sender.id()]);

    let err = sender.send(SendParameters::with_ssrc(1)).await.unwrap_err();
    assert!(matches!(err, MediaError::AlreadyActivated(_)));
    assert_eq!(track.active_sender_count(), 1);
    assert_eq!(track.total_sender_count(), 1);
}

#[tokio::test]
async fn test_send_requires_ssrc() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let sender = MediaSender::new(stereo_track("mic", 1), local).unwrap();

    let err = sender.send(SendParameters::default()).await.unwrap_err();
    assert!(matches!(err, MediaError::InvalidArgument(_)));
    assert!(!sender.is_activated());
}

#[tokio::test]
async fn test_failed_send_can_retry() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let transport = ScriptedTransport::wrap(local);
    transport.script.failing_rtcp_opens.store(1, Ordering::SeqCst);
    let track = stereo_track("mic", 1);
    let sender = MediaSender::new(track.clone(), transport).unwrap();

    let err = sender.send(SendParameters::with_ssrc(1)).await.unwrap_err();
    assert!(matches!(err, MediaError::Transport(TransportError::Session(_))));
    assert!(!sender.is_activated());
    assert_eq!(track.active_sender_count(), 0);

    sender.send(SendParameters::with_ssrc(1)).await.unwrap();
    assert_eq!(track.active_sender_count(), 1);
}

#[tokio::test]
async fn test_two_senders_on_one_track() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let track = stereo_track("mic", 1);
    let first = MediaSender::new(track.clone(), local.clone()).unwrap();
    let second = MediaSender::new(track.clone(), local).unwrap();

    first.send(SendParameters::with_ssrc(1)).await.unwrap();
    second.send(SendParameters::with_ssrc(2)).await.unwrap();

    assert_eq!(track.active_sender_count(), 2);
    assert_eq!(track.total_sender_count(), 2);

    first.stop().await.unwrap();
    assert_eq!(track.active_sender_ids(), vec![second.id()]);
    assert_eq!(track.total_sender_count(), 1);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let transport = ScriptedTransport::wrap(local);
    let track = stereo_track("mic", 1);
    let sender = MediaSender::new(track.clone(), transport.clone()).unwrap();
    sender.send(SendParameters::with_ssrc(1)).await.unwrap();

    sender.stop().await.unwrap();
    sender.stop().await.unwrap();

    assert!(sender.is_stopped());
    assert!(sender.track().is_none());
    assert_eq!(track.active_sender_count(), 0);
    assert_eq!(track.total_sender_count(), 0);
    assert_eq!(transport.closes(), 1);
}

#[tokio::test]
async fn test_stop_before_send_releases_track() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let transport = ScriptedTransport::wrap(local);
    let track = stereo_track("mic", 1);
    let sender = MediaSender::new(track.clone(), transport.clone()).unwrap();

    sender.stop().await.unwrap();
    assert_eq!(track.total_sender_count(), 0);
    assert_eq!(transport.closes(), 0);

    let err = sender.send(SendParameters::with_ssrc(1)).await.unwrap_err();
    assert!(matches!(err, MediaError::AlreadyStopped(_)));
}

#[tokio::test]
async fn test_stop_surfaces_close_error() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let transport = ScriptedTransport::wrap(local);
    let sender = MediaSender::new(stereo_track("mic", 1), transport.clone()).unwrap();
    sender.send(SendParameters::with_ssrc(1)).await.unwrap();
    transport.script.close_error.store(true, Ordering::SeqCst);

    let err = sender.stop().await.unwrap_err();
    assert!(matches!(err, MediaError::Transport(TransportError::Session(_))));
    assert!(sender.is_stopped());
    sender.stop().await.unwrap();
}

#[tokio::test]
async fn test_operations_after_stop() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let sender = MediaSender::new(stereo_track("mic", 1), local).unwrap();
    sender.send(SendParameters::with_ssrc(1)).await.unwrap();
    sender.stop().await.unwrap();

    let mut buf = [0u8; 32];
    assert!(matches!(sender.read(&mut buf).await, Err(MediaError::ClosedPipe)));
    assert!(matches!(
        sender.send_rtp(&header(1, 1), b"x").await,
        Err(MediaError::AlreadyStopped(_))
    ));
    assert!(matches!(
        sender.replace_track(Some(stereo_track("other", 2))).await,
        Err(MediaError::AlreadyStopped(_))
    ));
}

#[tokio::test]
async fn test_stop_unblocks_pending_read() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let sender = MediaSender::new(stereo_track("mic", 1), local).unwrap();

    let reader = {
        let sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 32];
            sender.read(&mut buf).await
        })
    };
    tokio::time::sleep(SETTLE).await;
    assert!(!reader.is_finished());

    sender.stop().await.unwrap();
    let result = timeout(DEADLINE, reader).await.unwrap().unwrap();
    assert!(matches!(result, Err(MediaError::ClosedPipe)));
}

#[tokio::test]
async fn test_read_rtcp_after_send() {
    let (local, remote) = LoopbackTransport::pair(16);
    let sender = MediaSender::new(stereo_track("mic", 42), local).unwrap();
    sender.send(SendParameters::with_ssrc(42)).await.unwrap();

    let report = RtcpPacket::SenderReport(SenderReport {
        ssrc: 9,
        ntp_timestamp: 1 << 32,
        rtp_timestamp: 960,
        packet_count: 3,
        octet_count: 300,
        reports: vec![ReceptionReport {
            ssrc: 42,
            fraction_lost: 0,
            cumulative_packets_lost: 0,
            extended_sequence_number: 3,
            jitter: 0,
            last_sr_timestamp: 0,
            delay_since_last_sr: 0,
        }],
    });
    remote.write_rtcp_packets(42, &[report.clone()]).unwrap();

    let packets = timeout(DEADLINE, sender.read_rtcp()).await.unwrap().unwrap();
    assert_eq!(packets, vec![report]);
}

#[tokio::test]
async fn test_replace_track_moves_active_membership() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let t1 = stereo_track("t1", 1);
    let t2 = stereo_track("t2", 2);
    let sender = MediaSender::new(t1.clone(), local).unwrap();
    sender.send(SendParameters::with_ssrc(1)).await.unwrap();

    sender.replace_track(Some(t2.clone())).await.unwrap();

    assert!(Arc::ptr_eq(&sender.track().unwrap(), &t2));
    assert_eq!(t1.active_sender_count(), 0);
    assert_eq!(t1.total_sender_count(), 0);
    assert_eq!(t2.active_sender_ids(), vec![sender.id()]);
    assert_eq!(t2.total_sender_count(), 1);
}

#[tokio::test]
async fn test_replace_track_before_send() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let t1 = stereo_track("t1", 1);
    let t2 = stereo_track("t2", 2);
    let sender = MediaSender::new(t1.clone(), local).unwrap();

    sender.replace_track(Some(t2.clone())).await.unwrap();
    assert_eq!(t1.total_sender_count(), 0);
    assert_eq!(t2.total_sender_count(), 1);
    assert_eq!(t2.active_sender_count(), 0);

    sender.send(SendParameters::with_ssrc(2)).await.unwrap();
    assert_eq!(t2.active_sender_ids(), vec![sender.id()]);
}

#[tokio::test]
async fn test_replace_with_same_track() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let track = stereo_track("t1", 1);
    let sender = MediaSender::new(track.clone(), local).unwrap();
    sender.send(SendParameters::with_ssrc(1)).await.unwrap();

    sender.replace_track(Some(track.clone())).await.unwrap();
    assert_eq!(track.active_sender_count(), 1);
    assert_eq!(track.total_sender_count(), 1);
}

#[tokio::test]
async fn test_channel_change_requires_renegotiation() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let stereo = stereo_track("t1", 1);
    let mono = mono_track("t2", 2);
    let sender = MediaSender::new(stereo.clone(), local).unwrap();
    sender.send(SendParameters::with_ssrc(1)).await.unwrap();

    let err = sender.replace_track(Some(mono.clone())).await.unwrap_err();
    assert!(matches!(err, MediaError::RenegotiationRequired(_)));
    assert!(Arc::ptr_eq(&sender.track().unwrap(), &stereo));
    assert_eq!(stereo.active_sender_count(), 1);
    assert_eq!(mono.total_sender_count(), 0);
}

#[tokio::test]
async fn test_channel_change_allowed_without_triggers() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let mono = mono_track("t2", 2);
    let sender =
        MediaSender::with_triggers(stereo_track("t1", 1), local, NegotiationTriggers::empty())
            .unwrap();

    sender.replace_track(Some(mono.clone())).await.unwrap();
    assert!(Arc::ptr_eq(&sender.track().unwrap(), &mono));
}

#[tokio::test]
async fn test_replace_track_rejects_invalid_arguments() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let track = stereo_track("t1", 1);
    let sender = MediaSender::new(track.clone(), local).unwrap();

    let err = sender.replace_track(None).await.unwrap_err();
    assert!(matches!(err, MediaError::InvalidArgument(_)));

    let video = video_track("cam", 3);
    let err = sender.replace_track(Some(video.clone())).await.unwrap_err();
    assert!(matches!(err, MediaError::InvalidArgument(_)));

    assert!(Arc::ptr_eq(&sender.track().unwrap(), &track));
    assert_eq!(video.total_sender_count(), 0);
}

#[tokio::test]
async fn test_dropped_sender_releases_track() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let track = stereo_track("mic", 1);
    let sender = MediaSender::new(track.clone(), local).unwrap();
    sender.send(SendParameters::with_ssrc(1)).await.unwrap();
    assert_eq!(track.active_sender_count(), 1);

    drop(sender);
    assert_eq!(track.active_sender_count(), 0);
    assert_eq!(track.total_sender_count(), 0);
}

#[tokio::test]
async fn test_send_rtp_waits_for_activation() {
    let (local, remote) = LoopbackTransport::pair(16);
    let sender = MediaSender::new(stereo_track("mic", 7), local).unwrap();
    let receiver = MediaReceiver::new(MediaType::Audio, remote);
    receiver
        .receive(ReceiveParameters::with_ssrc(7, CodecDescriptor::opus()))
        .await
        .unwrap();

    let writer = {
        let sender = sender.clone();
        tokio::spawn(async move { sender.send_rtp(&header(7, 1), b"early").await })
    };
    tokio::time::sleep(SETTLE).await;
    assert!(!writer.is_finished());

    sender.send(SendParameters::with_ssrc(7)).await.unwrap();
    timeout(DEADLINE, writer).await.unwrap().unwrap().unwrap();

    let packet = timeout(DEADLINE, receiver.track().unwrap().read_rtp())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&packet.payload[..], b"early");
}

#[tokio::test]
async fn test_track_write_reaches_receiver() {
    let (local, remote) = LoopbackTransport::pair(64);
    let track = stereo_track("mic", 12345);
    let sender = MediaSender::new(track.clone(), local).unwrap();
    sender.send(SendParameters::with_ssrc(12345)).await.unwrap();

    let receiver = MediaReceiver::new(MediaType::Audio, remote);
    receiver
        .receive(ReceiveParameters::with_ssrc(12345, CodecDescriptor::opus()))
        .await
        .unwrap();
    let remote_track = receiver.track().unwrap();

    for seq in 1..=5u16 {
        track
            .write_rtp(&header(12345, seq), &[seq as u8; 20])
            .await
            .unwrap();
    }
    for seq in 1..=5u16 {
        let packet = timeout(DEADLINE, remote_track.read_rtp()).await.unwrap().unwrap();
        assert_eq!(packet.header.sequence_number, seq);
        assert_eq!(packet.header.ssrc, 12345);
        assert_eq!(&packet.payload[..], &[seq as u8; 20]);
    }
}

#[tokio::test]
async fn test_track_write_collects_sender_errors() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let track = stereo_track("mic", 1);
    let sender = MediaSender::new(track.clone(), local.clone()).unwrap();
    sender.send(SendParameters::with_ssrc(1)).await.unwrap();

    local.close();
    let err = track.write_rtp(&header(1, 1), b"x").await.unwrap_err();
    assert!(matches!(err, MediaError::Transport(TransportError::Closed)));
}

#[tokio::test]
async fn test_track_write_with_only_inactive_senders_is_noop() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let track = stereo_track("mic", 1);
    let _sender = MediaSender::new(track.clone(), local).unwrap();

    track.write_rtp(&header(1, 1), b"x").await.unwrap();
}

#[tokio::test]
async fn test_custom_receive_mtu() {
    let (local, remote) = LoopbackTransport::pair(16);
    let sender = MediaSender::with_options(
        stereo_track("mic", 5),
        local,
        SenderOptions {
            receive_mtu: 4,
            ..SenderOptions::default()
        },
    )
    .unwrap();
    sender.send(SendParameters::with_ssrc(5)).await.unwrap();

    let report = RtcpPacket::ReceiverReport(rtp_endpoints::rtcp::ReceiverReport {
        ssrc: 1,
        reports: vec![],
    });
    remote.write_rtcp_packets(5, &[report]).unwrap();

    let err = timeout(DEADLINE, sender.read_rtcp()).await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        MediaError::Transport(TransportError::ShortBuffer { available: 4, .. })
    ));
}

fn ids(senders: &[Arc<MediaSender>]) -> HashSet<uuid::Uuid> {
    senders.iter().map(|s| s.id()).collect()
}

#[tokio::test]
async fn test_stopping_one_sender_keeps_the_other_fed() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let track = stereo_track("mic", 1);
    let first = MediaSender::new(track.clone(), local.clone()).unwrap();
    let second = MediaSender::new(track.clone(), local).unwrap();
    first.send(SendParameters::with_ssrc(1)).await.unwrap();
    second.send(SendParameters::with_ssrc(2)).await.unwrap();

    first.stop().await.unwrap();
    first.stop().await.unwrap();
    drop(first);

    assert_eq!(track.active_sender_ids(), vec![second.id()]);
    assert_eq!(track.total_sender_count(), 1);
    track.write_rtp(&header(1, 1), b"still flowing").await.unwrap();
}

#[tokio::test]
async fn test_stop_interrupts_pending_send() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let transport = ScriptedTransport::wrap(local);
    transport.script.stall_rtcp_opens.store(true, Ordering::SeqCst);
    let track = stereo_track("mic", 1);
    let sender = MediaSender::new(track.clone(), transport.clone()).unwrap();

    let activation = {
        let sender = sender.clone();
        tokio::spawn(async move { sender.send(SendParameters::with_ssrc(1)).await })
    };
    tokio::time::sleep(SETTLE).await;
    assert!(!activation.is_finished());

    timeout(DEADLINE, sender.stop()).await.unwrap().unwrap();

    let result = timeout(DEADLINE, activation).await.unwrap().unwrap();
    assert!(matches!(result, Err(MediaError::AlreadyStopped(_))));
    assert!(!sender.is_activated());
    assert!(sender.is_stopped());
    assert_eq!(track.active_sender_count(), 0);
    assert_eq!(track.total_sender_count(), 0);
    assert_eq!(transport.closes(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposing_replacements_keep_both_tracks_consistent() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let a = stereo_track("a", 1);
    let b = stereo_track("b", 2);

    let mut on_a = Vec::new();
    let mut on_b = Vec::new();
    for i in 0..8u32 {
        let start = if i % 2 == 0 { &a } else { &b };
        let sender = MediaSender::new(start.clone(), local.clone()).unwrap();
        sender.send(SendParameters::with_ssrc(100 + i)).await.unwrap();
        if i % 2 == 0 {
            on_a.push(sender);
        } else {
            on_b.push(sender);
        }
    }

    let mut tasks = Vec::new();
    for (senders, here, there) in [(&on_a, &a, &b), (&on_b, &b, &a)] {
        for sender in senders {
            let sender = sender.clone();
            let (mut here, mut there) = (here.clone(), there.clone());
            tasks.push(tokio::spawn(async move {
                // an even number of hops ends on the starting track
                for _ in 0..50 {
                    sender.replace_track(Some(there.clone())).await.unwrap();
                    std::mem::swap(&mut here, &mut there);
                }
            }));
        }
    }
    for task in tasks {
        timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    }

    let active_a: HashSet<_> = a.active_sender_ids().into_iter().collect();
    let active_b: HashSet<_> = b.active_sender_ids().into_iter().collect();
    assert_eq!(active_a, ids(&on_a));
    assert_eq!(active_b, ids(&on_b));
    assert_eq!(a.active_sender_count(), 4);
    assert_eq!(b.active_sender_count(), 4);
    assert_eq!(a.total_sender_count(), 4);
    assert_eq!(b.total_sender_count(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_send_replace_and_stop_across_senders() {
    let (local, _remote) = LoopbackTransport::pair(16);
    let a = stereo_track("a", 1);
    let b = stereo_track("b", 2);

    let senders: Vec<_> = (0..16)
        .map(|_| MediaSender::new(a.clone(), local.clone()).unwrap())
        .collect();

    let mut tasks = Vec::new();
    for (i, sender) in senders.iter().enumerate() {
        let ssrc = 200 + i as u32;
        let s = sender.clone();
        tasks.push(tokio::spawn(async move {
            let _ = s.send(SendParameters::with_ssrc(ssrc)).await;
        }));
        let s = sender.clone();
        let target = b.clone();
        tasks.push(tokio::spawn(async move {
            let _ = s.replace_track(Some(target)).await;
        }));
        if i % 2 == 0 {
            let s = sender.clone();
            tasks.push(tokio::spawn(async move {
                s.stop().await.unwrap();
            }));
        }
    }
    for task in tasks {
        timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
    }

    let (stopped, running): (Vec<_>, Vec<_>) = senders
        .iter()
        .cloned()
        .enumerate()
        .partition(|(i, _)| i % 2 == 0);
    let stopped: Vec<_> = stopped.into_iter().map(|(_, s)| s).collect();
    let running: Vec<_> = running.into_iter().map(|(_, s)| s).collect();

    for sender in &stopped {
        assert!(sender.is_stopped());
        assert!(sender.track().is_none());
    }
    for sender in &running {
        assert!(sender.is_activated());
        assert!(Arc::ptr_eq(&sender.track().unwrap(), &b));
    }

    assert_eq!(a.active_sender_count(), 0);
    assert_eq!(a.total_sender_count(), 0);
    let active_b: HashSet<_> = b.active_sender_ids().into_iter().collect();
    assert_eq!(active_b, ids(&running));
    assert_eq!(b.total_sender_count(), running.len());
}
