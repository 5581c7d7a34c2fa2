#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use psrtp::media::rtp::RtpFields;
use psrtp::{Channel, Endpoints, H264FileSource, ManualClock, PsFileSession, SessionConfig, TransportSink};

pub const SSRC: u32 = 0x5053_0001;

/// What a [`Recorder`] saw, plus knobs to make it misbehave.
#[derive(Default)]
pub struct Recorded {
    pub rtp: Vec<(Vec<u8>, SocketAddr)>,
    pub rtcp: Vec<(Vec<u8>, SocketAddr)>,
    pub feedback: VecDeque<Vec<u8>>,
    pub fail_rtp: bool,
    pub short_write: bool,
}

/// In-memory transport; clones share one record.
#[derive(Clone, Default)]
pub struct Recorder {
    pub inner: Arc<Mutex<Recorded>>,
}

impl Recorder {
    pub fn rtp_packets(&self) -> Vec<Vec<u8>> {
        self.inner.lock().rtp.iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn rtcp_packets(&self) -> Vec<Vec<u8>> {
        self.inner.lock().rtcp.iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn rtp_fields(&self) -> Vec<RtpFields> {
        self.rtp_packets()
            .iter()
            .map(|p| RtpFields::parse(p).expect("valid RTP packet"))
            .collect()
    }

    /// RTP timestamp of every frame (one per marker packet).
    pub fn frame_timestamps(&self) -> Vec<u32> {
        self.rtp_fields()
            .iter()
            .filter(|f| f.marker)
            .map(|f| f.timestamp)
            .collect()
    }

    /// PS buffers reassembled from RTP payloads.
    pub fn ps_buffers(&self) -> Vec<Vec<u8>> {
        let mut buffers = Vec::new();
        let mut current = Vec::new();
        for packet in self.rtp_packets() {
            let fields = RtpFields::parse(&packet).expect("valid RTP packet");
            current.extend_from_slice(&packet[fields.header_len..]);
            if fields.marker {
                buffers.push(std::mem::take(&mut current));
            }
        }
        buffers
    }
}

impl TransportSink for Recorder {
    fn send(&mut self, channel: Channel, payload: &[u8], dest: SocketAddr) -> psrtp::Result<usize> {
        let mut inner = self.inner.lock();
        match channel {
            Channel::Rtp => {
                if inner.fail_rtp {
                    return Err(std::io::Error::other("network unreachable").into());
                }
                inner.rtp.push((payload.to_vec(), dest));
                if inner.short_write {
                    return Ok(payload.len() - 1);
                }
            }
            Channel::Rtcp => inner.rtcp.push((payload.to_vec(), dest)),
        }
        Ok(payload.len())
    }

    fn recv_feedback(&mut self, buf: &mut [u8]) -> psrtp::Result<Option<usize>> {
        let Some(msg) = self.inner.lock().feedback.pop_front() else {
            return Ok(None);
        };
        buf[..msg.len()].copy_from_slice(&msg);
        Ok(Some(msg.len()))
    }
}

/// Annex B clip: a keyframe every `gop` frames, each frame `size` bytes.
pub fn h264_clip(frames: usize, gop: usize, size: usize) -> Vec<u8> {
    h264_clip_sized(&vec![size; frames], gop)
}

pub fn h264_clip_sized(sizes: &[usize], gop: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for (i, &size) in sizes.iter().enumerate() {
        let header: &[u8] = if i % gop == 0 {
            &[0, 0, 0, 1, 0x65, 0x88]
        } else {
            &[0, 0, 0, 1, 0x41, 0x9a]
        };
        data.extend_from_slice(header);
        data.resize(data.len() + size.saturating_sub(header.len()).max(1), 0xAB);
    }
    data
}

pub fn endpoints() -> Endpoints {
    Endpoints::new(
        "127.0.0.1:5004".parse().unwrap(),
        "127.0.0.1:5005".parse().unwrap(),
    )
}

pub fn config() -> SessionConfig {
    SessionConfig {
        ssrc: Some(SSRC),
        rtcp_randomize: false,
        cname: "test".to_string(),
        name: "clip.h264".to_string(),
        ..SessionConfig::default()
    }
}

pub struct Harness {
    pub session: PsFileSession,
    pub transport: Recorder,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(clip: &[u8]) -> Self {
        Self::with_config(clip, config())
    }

    pub fn with_config(clip: &[u8], config: SessionConfig) -> Self {
        let transport = Recorder::default();
        let clock = ManualClock::new(1_000);
        let source = H264FileSource::from_bytes(clip, config.frame_interval);
        let session = PsFileSession::new(
            Box::new(source),
            Box::new(transport.clone()),
            endpoints(),
            Arc::new(clock.clone()),
            config,
        );
        Self {
            session,
            transport,
            clock,
        }
    }

    pub fn advance(&self, ms: u64) {
        self.clock.advance(Duration::from_millis(ms));
    }
}

/// Receiver report from `reporter` about `source`.
pub fn receiver_report(reporter: u32, source: u32, fraction_lost: u8, highest_seq: u32) -> Vec<u8> {
    let mut rr = vec![0x81, 201, 0x00, 0x07];
    rr.extend_from_slice(&reporter.to_be_bytes());
    rr.extend_from_slice(&source.to_be_bytes());
    rr.push(fraction_lost);
    rr.extend_from_slice(&[0, 0, 1]);
    rr.extend_from_slice(&highest_seq.to_be_bytes());
    rr.extend_from_slice(&7u32.to_be_bytes());
    rr.extend_from_slice(&[0u8; 8]);
    rr
}
