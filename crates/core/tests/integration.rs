//! End-to-end session behavior over an in-memory transport and a manual clock.

mod common;

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use common::{Harness, SSRC, config, h264_clip, receiver_report};
use psrtp::media::rtp::RtpFields;
use psrtp::rtcp::report::{RtcpPacket, parse_compound};
use psrtp::{
    Endpoints, H264FileSource, ManualClock, PlaybackState, PsFileSession, SessionConfig, SessionManager, StreamError,
    Streamer, StreamerConfig, TickOutcome, UdpTransport,
};

#[test]
fn single_frame_one_packet_one_report() {
    let mut h = Harness::new(&h264_clip(1, 1, 200));
    h.session.play();

    assert_eq!(h.session.tick().unwrap(), TickOutcome::FrameSent);

    let packets = h.transport.rtp_packets();
    assert_eq!(packets.len(), 1);
    assert!(packets[0].len() <= 1434);
    let fields = RtpFields::parse(&packets[0]).unwrap();
    assert!(fields.marker);
    assert_eq!(fields.pt, 96);
    assert_eq!(fields.ssrc, SSRC);
    assert_eq!(fields.sequence, SSRC as u16);
    assert_eq!(fields.timestamp, 0);

    let ps = &h.transport.ps_buffers()[0];
    assert_eq!(&ps[..4], &[0x00, 0x00, 0x01, 0xBA]);

    let reports = h.transport.rtcp_packets();
    assert_eq!(reports.len(), 1);
    let parsed = parse_compound(&reports[0]).unwrap();
    let RtcpPacket::SenderReport { ssrc, info, .. } = &parsed[0] else {
        panic!("expected SR first, got {:?}", parsed[0]);
    };
    assert_eq!(*ssrc, SSRC);
    assert_eq!(info.packet_count, 1);
    assert!(matches!(parsed[1], RtcpPacket::SourceDescription { .. }));
    assert_eq!(h.transport.inner.lock().rtcp[0].1.port(), 5005);
    assert_eq!(h.transport.inner.lock().rtp[0].1.port(), 5004);

    let stats = h.session.stats();
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.packets_sent, 1);
    assert_eq!(stats.rtcp_reports, 1);
    assert_eq!(stats.mux_buffers_allocated, 1);
    assert_eq!(stats.mux_buffers_released, 1);
    assert_eq!(stats.packet_checkouts, 1);

    h.advance(40);
    assert_eq!(h.session.tick().unwrap(), TickOutcome::EndOfStream);
}

#[test]
fn idle_until_played() {
    let mut h = Harness::new(&h264_clip(5, 5, 100));
    assert_eq!(h.session.state(), PlaybackState::Stopped);
    assert_eq!(h.session.tick().unwrap(), TickOutcome::Idle);
    assert!(h.transport.rtp_packets().is_empty());
    assert!(!h.session.poll_rtcp().unwrap());
}

#[test]
fn frames_paced_at_forty_ms() {
    let mut h = Harness::new(&h264_clip(20, 5, 100));
    h.session.play();

    let mut sent_at = Vec::new();
    for step in 0..=40u64 {
        if h.session.tick().unwrap() == TickOutcome::FrameSent {
            sent_at.push(step * 10);
        }
        h.advance(10);
    }
    assert_eq!(sent_at, vec![0, 40, 80, 120, 160, 200, 240, 280, 320, 360, 400]);

    let ts = h.transport.frame_timestamps();
    let expected: Vec<u32> = sent_at.iter().map(|ms| (ms * 90) as u32).collect();
    assert_eq!(ts, expected);
}

#[test]
fn speed_divides_interval_only() {
    let mut h = Harness::new(&h264_clip(20, 5, 100));
    h.session.set_speed(2.0).unwrap();
    h.session.play();

    let mut sent = 0;
    for _ in 0..=10 {
        if h.session.tick().unwrap() == TickOutcome::FrameSent {
            sent += 1;
        }
        h.advance(10);
    }
    // 0, 20, 40, 60, 80, 100 ms
    assert_eq!(sent, 6);
    // timestamps still follow the wall clock
    assert_eq!(h.transport.frame_timestamps()[1], 20 * 90);
}

#[test]
fn invalid_speeds_rejected() {
    let mut h = Harness::new(&h264_clip(1, 1, 10));
    for speed in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(h.session.set_speed(speed), Err(StreamError::InvalidSpeed(_))));
    }
    assert_eq!(h.session.speed(), 1.0);
}

#[test]
fn seek_keeps_timestamps_increasing() {
    let mut h = Harness::new(&h264_clip(50, 10, 100));
    h.session.play();
    for _ in 0..3 {
        assert_eq!(h.session.tick().unwrap(), TickOutcome::FrameSent);
        h.advance(40);
    }

    h.session.seek(1_000).unwrap();
    // keyframes every 400 ms of file time
    assert_eq!(h.session.position(), 800);

    assert_eq!(h.session.tick().unwrap(), TickOutcome::FrameSent);
    let ts = h.transport.frame_timestamps();
    assert_eq!(ts, vec![0, 3600, 7200, 10800]);
    assert_eq!(h.session.position(), 800);

    h.advance(40);
    h.session.tick().unwrap();
    assert_eq!(h.session.position(), 840);
}

#[test]
fn seek_back_to_start_keeps_timestamps_increasing() {
    let mut h = Harness::new(&h264_clip(20, 5, 100));
    h.session.play();
    for _ in 0..5 {
        assert_eq!(h.session.tick().unwrap(), TickOutcome::FrameSent);
        h.advance(40);
    }
    assert_eq!(h.session.position(), 160);
    let before = *h.transport.frame_timestamps().last().unwrap();

    h.session.seek(0).unwrap();
    assert_eq!(h.session.position(), 0);
    for _ in 0..5 {
        assert_eq!(h.session.tick().unwrap(), TickOutcome::FrameSent);
        h.advance(40);
    }

    let ts = h.transport.frame_timestamps();
    assert_eq!(ts.len(), 10);
    assert!(ts[5..].iter().all(|&t| t > before));
    assert!(ts.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(ts[5], 200 * 90);
    assert_eq!(h.session.position(), 160);
}

#[test]
fn seek_errors() {
    let mut h = Harness::new(&h264_clip(10, 5, 100));
    assert_eq!(h.session.duration().unwrap(), 400);
    assert!(matches!(
        h.session.seek(401),
        Err(StreamError::SeekOutOfRange {
            position: 401,
            duration: 400
        })
    ));

    let mut empty = Harness::new(&[]);
    assert!(matches!(empty.session.duration(), Err(StreamError::DurationUnknown)));
    assert!(matches!(empty.session.seek(0), Err(StreamError::DurationUnknown)));
    empty.session.play();
    assert_eq!(empty.session.tick().unwrap(), TickOutcome::EndOfStream);
}

#[test]
fn pause_then_resume_sends_immediately() {
    let mut h = Harness::new(&h264_clip(10, 5, 100));
    h.session.play();
    assert_eq!(h.session.tick().unwrap(), TickOutcome::FrameSent);

    h.session.pause();
    for _ in 0..5 {
        h.advance(1_000);
        assert_eq!(h.session.tick().unwrap(), TickOutcome::Idle);
    }

    h.session.play();
    assert_eq!(h.session.tick().unwrap(), TickOutcome::FrameSent);
    assert_eq!(h.transport.frame_timestamps(), vec![0, 5_000 * 90]);
}

#[test]
fn rtcp_cadence_follows_interval() {
    let duration_ms = 60_000u64;
    let frames = (duration_ms / 40 + 10) as usize;
    let mut h = Harness::new(&h264_clip(frames, 25, 16));
    h.session.play();

    let mut elapsed = 0;
    while elapsed <= duration_ms {
        h.session.tick().unwrap();
        h.advance(40);
        elapsed += 40;
    }

    let reports = h.transport.rtcp_packets().len() as i64;
    let expected = (duration_ms / 5_000) as i64;
    assert!((reports - expected).abs() <= 1, "{reports} reports, expected about {expected}");
    assert_eq!(h.session.stats().rtcp_reports as i64, reports);
}

#[test]
fn report_sent_during_pause() {
    let mut h = Harness::new(&h264_clip(10, 5, 100));
    h.session.play();
    h.session.tick().unwrap();
    h.session.pause();

    h.advance(1_000);
    assert!(!h.session.poll_rtcp().unwrap());
    h.advance(4_000);
    assert!(h.session.poll_rtcp().unwrap());
    assert_eq!(h.transport.rtcp_packets().len(), 2);
}

#[test]
fn large_frame_fragmented_to_capacity() {
    let mut h = Harness::with_config(
        &h264_clip(1, 1, 5_000),
        SessionConfig {
            packet_capacity: 500,
            ..config()
        },
    );
    h.session.play();
    h.session.tick().unwrap();

    let fields = h.transport.rtp_fields();
    assert!(fields.len() > 5);
    assert!(h.transport.rtp_packets().iter().all(|p| p.len() <= 500));
    assert_eq!(fields.iter().filter(|f| f.marker).count(), 1);
    assert!(fields.last().unwrap().marker);
    assert!(fields.iter().all(|f| f.timestamp == fields[0].timestamp));
    for pair in fields.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence.wrapping_add(1));
    }
    assert_eq!(h.session.stats().packet_checkouts, fields.len() as u64);
    assert_eq!(h.session.stats().mux_buffers_released, 1);
}

#[test]
fn rtp_info_tracks_packer() {
    let mut h = Harness::new(&h264_clip(10, 5, 100));
    h.session.play();
    for _ in 0..3 {
        h.session.tick().unwrap();
        h.advance(40);
    }
    let info = h.session.rtp_info();
    assert_eq!(info.sequence, (SSRC as u16).wrapping_add(3));
    assert_eq!(info.rtp_timestamp, 80 * 90);
    assert_eq!(info.position, 80);
    assert_eq!(
        h.session.sdp_media(),
        "m=video 0 RTP/AVP 96\r\na=rtpmap:96 MP2P/90000\r\n"
    );
}

#[test]
fn transport_error_surfaces_and_frees_buffer() {
    let mut h = Harness::new(&h264_clip(10, 5, 100));
    h.session.play();
    h.transport.inner.lock().fail_rtp = true;
    assert!(matches!(h.session.tick(), Err(StreamError::Io(_))));
    let stats = h.session.stats();
    assert_eq!(stats.mux_buffers_allocated, stats.mux_buffers_released);

    h.transport.inner.lock().fail_rtp = false;
    assert_eq!(h.session.tick().unwrap(), TickOutcome::FrameSent);
}

#[test]
#[should_panic(expected = "short RTP write")]
fn short_write_is_fatal() {
    let mut h = Harness::new(&h264_clip(1, 1, 100));
    h.transport.inner.lock().short_write = true;
    h.session.play();
    let _ = h.session.tick();
}

#[test]
fn receiver_feedback_recorded() {
    let mut h = Harness::new(&h264_clip(10, 5, 100));
    h.session.play();
    h.session.tick().unwrap();

    {
        let mut inner = h.transport.inner.lock();
        inner.feedback.push_back(receiver_report(0xAAAA, SSRC, 12, 42));
        inner.feedback.push_back(vec![0xDE, 0xAD]);
    }
    assert_eq!(h.session.service_feedback().unwrap(), 2);
    let feedback = h.session.feedback().unwrap();
    assert_eq!(feedback.reporter, 0xAAAA);
    assert_eq!(feedback.fraction_lost, 12);
    assert_eq!(feedback.highest_sequence, 42);
    assert_eq!(h.session.service_feedback().unwrap(), 0);
}

fn managed_session(manager: &SessionManager, frames: usize, clock: &ManualClock) -> psrtp::SharedSession {
    let transport = common::Recorder::default();
    let mut session = PsFileSession::new(
        Box::new(H264FileSource::from_bytes(&h264_clip(frames, 5, 50), Duration::from_millis(40))),
        Box::new(transport),
        common::endpoints(),
        Arc::new(clock.clone()),
        config(),
    );
    session.play();
    manager.create(session).1
}

#[test]
fn streamer_stops_finished_sessions() {
    let manager = SessionManager::new();
    let clock = ManualClock::new(0);
    let shared = managed_session(&manager, 2, &clock);
    let streamer = Streamer::new(manager.clone(), StreamerConfig::default());

    assert_eq!(streamer.run_once(), 1);
    clock.advance(Duration::from_millis(40));
    assert_eq!(streamer.run_once(), 1);
    clock.advance(Duration::from_millis(40));
    assert_eq!(streamer.run_once(), 0);
    assert_eq!(shared.lock().state(), PlaybackState::Stopped);
}

#[test]
fn streamer_loops_when_asked() {
    let manager = SessionManager::new();
    let clock = ManualClock::new(0);
    let shared = managed_session(&manager, 2, &clock);
    let streamer = Streamer::new(
        manager,
        StreamerConfig {
            loop_playback: true,
            ..StreamerConfig::default()
        },
    );

    for _ in 0..6 {
        streamer.run_once();
        clock.advance(Duration::from_millis(40));
    }
    let session = shared.lock();
    assert_eq!(session.state(), PlaybackState::Playing);
    assert!(session.stats().frames_sent >= 4);
}

#[test]
fn streamer_thread_start_stop() {
    let manager = SessionManager::new();
    let clock = ManualClock::new(0);
    let shared = managed_session(&manager, 3, &clock);
    let mut streamer = Streamer::new(manager, StreamerConfig::default());

    streamer.start().unwrap();
    assert!(matches!(streamer.start(), Err(StreamError::AlreadyRunning)));
    assert!(streamer.is_running());

    let mut waited = 0;
    while shared.lock().stats().frames_sent == 0 && waited < 200 {
        std::thread::sleep(Duration::from_millis(5));
        waited += 1;
    }
    streamer.stop();
    assert!(!streamer.is_running());
    assert_eq!(shared.lock().stats().frames_sent, 1);
}

#[test]
fn udp_loopback_delivers_rtp_and_rtcp() {
    let localhost = Ipv4Addr::LOCALHOST;
    let rtp_peer = UdpSocket::bind((localhost, 0)).unwrap();
    let rtcp_peer = UdpSocket::bind((localhost, 0)).unwrap();
    rtp_peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    rtcp_peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    let clock = ManualClock::new(0);
    let mut session = PsFileSession::new(
        Box::new(H264FileSource::from_bytes(&h264_clip(3, 3, 300), Duration::from_millis(40))),
        Box::new(UdpTransport::bind_to(localhost.into()).unwrap()),
        Endpoints::new(rtp_peer.local_addr().unwrap(), rtcp_peer.local_addr().unwrap()),
        Arc::new(clock.clone()),
        config(),
    );
    session.play();
    assert_eq!(session.tick().unwrap(), TickOutcome::FrameSent);

    let mut buf = [0u8; 2048];
    let n = rtp_peer.recv(&mut buf).unwrap();
    let fields = RtpFields::parse(&buf[..n]).unwrap();
    assert_eq!(fields.ssrc, SSRC);
    assert!(fields.marker);
    assert_eq!(&buf[12..16], &[0x00, 0x00, 0x01, 0xBA]);

    let n = rtcp_peer.recv(&mut buf).unwrap();
    assert_eq!(buf[1], 200);
    assert!(parse_compound(&buf[..n]).is_ok());
}
