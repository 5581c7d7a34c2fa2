//! File-backed PS-over-RTP streaming session.
//!
//! A [`PsFileSession`] owns everything one client needs: the frame source,
//! the PS muxer, the RTP packer, the RTP/RTCP bookkeeping and the single
//! packet buffer. Each [`tick`](PsFileSession::tick) pulls at most one frame
//! through the whole chain synchronously:
//!
//! ```text
//! FrameSource ──Frame──► PsMuxer ──MuxedBuffer──► RtpPsPacker ──PacketLease──► TransportSink
//!                                                                 └─► RtpSession::on_send
//! ```
//!
//! ## Playback state (driven by the caller)
//!
//! ```text
//! new()   -> Stopped
//! play()  -> Playing
//! pause() -> Paused
//! stop()  -> Stopped
//! ```
//!
//! Timestamps come from the wall clock, not from the file: the first frame
//! sent latches `ps_clock`, and every later frame is stamped with the time
//! elapsed since then. Seeking and pausing leave `ps_clock` alone, so
//! timestamps keep increasing across both.

pub mod endpoints;
pub mod manager;

use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;

pub use endpoints::Endpoints;
pub use manager::{SessionManager, SharedSession};

use crate::clock::Clock;
use crate::error::{Result, StreamError};
use crate::media::packer::{DEFAULT_PACKET_CAPACITY, PacketBuffer, PacketLease, RtpPacketSink, RtpPsPacker};
use crate::media::ps::{MuxedBuffer, PsMuxer, PsOutput};
use crate::media::{CLOCK_RATE_90KHZ, PAYLOAD_TYPE_MP2P, StreamKind};
use crate::rtcp::{ReceiverFeedback, RtpSession};
use crate::sdp;
use crate::source::FrameSource;
use crate::transport::{Channel, TransportSink};

/// Largest RTCP datagram the session writes or reads.
const RTCP_BUFFER_SIZE: usize = 1500;

/// Upper bound on feedback datagrams drained per [`PsFileSession::service_feedback`].
const MAX_FEEDBACK_PER_POLL: usize = 32;

/// Session parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest RTP packet, header included.
    pub packet_capacity: usize,
    pub payload_type: u8,
    pub clock_rate: u32,
    /// Nominal time between frames at speed 1.
    pub frame_interval: Duration,
    /// Session bandwidth in octets per second, used for the RTCP interval.
    pub session_bandwidth: u32,
    /// Randomize the RTCP interval around its deterministic value.
    pub rtcp_randomize: bool,
    /// Fixed SSRC; a random one is drawn when `None`.
    pub ssrc: Option<u32>,
    /// SDES CNAME item.
    pub cname: String,
    /// SDES NAME item.
    pub name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            packet_capacity: DEFAULT_PACKET_CAPACITY,
            payload_type: PAYLOAD_TYPE_MP2P,
            clock_rate: CLOCK_RATE_90KHZ,
            frame_interval: Duration::from_millis(40),
            session_bandwidth: 4 * 1024,
            rtcp_randomize: true,
            ssrc: None,
            cname: "ps-rtp".to_string(),
            name: String::new(),
        }
    }
}

/// Playback state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Result of one [`PsFileSession::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not playing; nothing done.
    Idle,
    /// Playing, but the next frame is not due yet.
    NotYet,
    /// The source has no more frames.
    EndOfStream,
    /// One frame went out.
    FrameSent,
}

/// Values for an RTSP `RTP-Info` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpInfo {
    /// Current file position in milliseconds.
    pub position: u64,
    /// Sequence number of the next packet.
    pub sequence: u16,
    /// Timestamp of the last packet sent.
    pub rtp_timestamp: u32,
}

/// Counters kept by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_sent: u64,
    pub packets_sent: u64,
    pub rtcp_reports: u64,
    pub mux_buffers_allocated: u64,
    pub mux_buffers_released: u64,
    pub packet_checkouts: u64,
}

/// Clock readings in milliseconds; `None` until first set.
#[derive(Debug, Clone, Copy, Default)]
struct Timing {
    ps_clock: Option<u64>,
    rtp_last_send: Option<u64>,
    rtcp_last_send: Option<u64>,
    /// Interval drawn after the last report.
    rtcp_interval: Duration,
}

/// Everything downstream of the muxer.
struct Pipeline {
    packer: RtpPsPacker,
    rtp: RtpSession,
    buffer: PacketBuffer,
    transport: Box<dyn TransportSink>,
    endpoints: Endpoints,
    stats: SessionStats,
}

/// Streams one media file to one client as MPEG-2 PS over RTP.
pub struct PsFileSession {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    source: Box<dyn FrameSource>,
    muxer: PsMuxer,
    stream_id: u8,
    pipeline: Pipeline,
    state: PlaybackState,
    speed: f64,
    timing: Timing,
    rtcp_buf: Vec<u8>,
}

impl std::fmt::Debug for PsFileSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PsFileSession")
            .field("ssrc", &self.ssrc())
            .field("state", &self.state)
            .field("speed", &self.speed)
            .field("endpoints", &self.pipeline.endpoints)
            .field("stats", &self.pipeline.stats)
            .finish_non_exhaustive()
    }
}

impl PsFileSession {
    /// Create a stopped session. A random SSRC is drawn unless the config fixes one.
    pub fn new(
        source: Box<dyn FrameSource>,
        transport: Box<dyn TransportSink>,
        endpoints: Endpoints,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let ssrc = config.ssrc.unwrap_or_else(|| rand::rng().random::<u32>());
        let kind = source.stream_kind();

        let mut muxer = PsMuxer::new();
        let stream_id = muxer.add_stream(kind);

        let packer = RtpPsPacker::new(ssrc, config.payload_type, config.clock_rate, config.packet_capacity);
        let rtp = RtpSession::new(ssrc, config.clock_rate, config.session_bandwidth)
            .with_description(config.cname.clone(), config.name.clone())
            .with_randomized_interval(config.rtcp_randomize);

        tracing::debug!(
            ssrc,
            ?kind,
            rtp = %endpoints.rtp,
            rtcp = %endpoints.rtcp,
            capacity = config.packet_capacity,
            "PS file session created"
        );

        Self {
            pipeline: Pipeline {
                packer,
                rtp,
                buffer: PacketBuffer::new(config.packet_capacity),
                transport,
                endpoints,
                stats: SessionStats::default(),
            },
            config,
            clock,
            source,
            muxer,
            stream_id,
            state: PlaybackState::Stopped,
            speed: 1.0,
            timing: Timing::default(),
            rtcp_buf: vec![0u8; RTCP_BUFFER_SIZE],
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            tracing::debug!(ssrc = self.ssrc(), old_state = ?self.state, new_state = ?state, "state transition");
            self.state = state;
        }
    }

    /// Start or resume sending. Resuming after a pause sends the next frame at once.
    pub fn play(&mut self) {
        self.set_state(PlaybackState::Playing);
    }

    /// Hold sending; RTCP reports keep going out through [`poll_rtcp`](Self::poll_rtcp).
    pub fn pause(&mut self) {
        self.set_state(PlaybackState::Paused);
    }

    /// Stop the session; [`tick`](Self::tick) and [`poll_rtcp`](Self::poll_rtcp) do nothing until the next `play`.
    pub fn stop(&mut self) {
        self.set_state(PlaybackState::Stopped);
    }

    /// Reposition the source. Timestamps are unaffected.
    pub fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.source.seek(position_ms)?;
        tracing::debug!(ssrc = self.ssrc(), position_ms, landed_ms = self.source.position(), "seek");
        Ok(())
    }

    /// Change the pacing speed. Must be finite and positive.
    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(StreamError::InvalidSpeed(speed));
        }
        tracing::debug!(ssrc = self.ssrc(), old_speed = self.speed, new_speed = speed, "speed changed");
        self.speed = speed;
        Ok(())
    }

    /// Current playback state.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Pacing speed multiplier, 1.0 by default.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// File time in milliseconds of the last frame sent, or of the seek target.
    pub fn position(&self) -> u64 {
        self.source.position()
    }

    /// Length of the file in milliseconds.
    pub fn duration(&self) -> Result<u64> {
        self.source.duration()
    }

    /// SSRC stamped on every RTP and RTCP packet.
    pub fn ssrc(&self) -> u32 {
        self.pipeline.packer.ssrc()
    }

    /// Destination addresses for RTP and RTCP.
    pub fn endpoints(&self) -> Endpoints {
        self.pipeline.endpoints
    }

    /// Elementary stream carried in the PS.
    pub fn stream_kind(&self) -> StreamKind {
        self.source.stream_kind()
    }

    /// Position, next sequence number and last timestamp for `RTP-Info`.
    pub fn rtp_info(&self) -> RtpInfo {
        let (sequence, rtp_timestamp) = self.pipeline.packer.info();
        RtpInfo {
            position: self.position(),
            sequence,
            rtp_timestamp,
        }
    }

    /// SDP media section for this session's payload.
    pub fn sdp_media(&self) -> String {
        sdp::sdp_media(self.config.payload_type)
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            packet_checkouts: self.pipeline.buffer.checkouts(),
            ..self.pipeline.stats
        }
    }

    /// Latest RTCP receiver report about this stream.
    pub fn feedback(&self) -> Option<ReceiverFeedback> {
        self.pipeline.rtp.feedback()
    }

    /// Pacing interval in milliseconds at the current speed.
    fn frame_due_ms(&self) -> f64 {
        self.config.frame_interval.as_micros() as f64 / 1000.0 / self.speed
    }

    /// Send the next frame if it is due, then an RTCP report if that is due.
    ///
    /// # Panics
    ///
    /// If the transport accepts fewer bytes than a datagram holds.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        if self.state != PlaybackState::Playing {
            return Ok(TickOutcome::Idle);
        }

        let now = self.clock.now_ms();
        if let Some(last) = self.timing.rtp_last_send
            && (now.saturating_sub(last) as f64) < self.frame_due_ms()
        {
            return Ok(TickOutcome::NotYet);
        }

        let Some(frame) = self.source.next_frame() else {
            tracing::debug!(ssrc = self.pipeline.packer.ssrc(), "end of stream");
            return Ok(TickOutcome::EndOfStream);
        };

        let ps_clock = *self.timing.ps_clock.get_or_insert(now);
        let elapsed_ms = now.saturating_sub(ps_clock);
        let ts = elapsed_ms * self.config.clock_rate as u64 / 1000;

        let mut out = MuxOutput {
            pipeline: &mut self.pipeline,
            time_ms: elapsed_ms,
            now_ms: now,
        };
        self.muxer.write(self.stream_id, ts, ts, frame.data, &mut out)?;

        self.timing.rtp_last_send = Some(now);
        self.pipeline.stats.frames_sent += 1;
        tracing::trace!(
            ssrc = self.pipeline.packer.ssrc(),
            file_dts = frame.dts,
            keyframe = frame.keyframe,
            bytes = frame.data.len(),
            ts,
            "frame sent"
        );

        self.send_rtcp_if_due(now)?;
        Ok(TickOutcome::FrameSent)
    }

    /// Send an RTCP report if one is due. Does nothing while stopped.
    pub fn poll_rtcp(&mut self) -> Result<bool> {
        if self.state == PlaybackState::Stopped {
            return Ok(false);
        }
        let now = self.clock.now_ms();
        self.send_rtcp_if_due(now)
    }

    fn send_rtcp_if_due(&mut self, now: u64) -> Result<bool> {
        if let Some(last) = self.timing.rtcp_last_send
            && Duration::from_millis(now.saturating_sub(last)) < self.timing.rtcp_interval
        {
            return Ok(false);
        }

        let ntp = self.clock.ntp_now();
        let p = &mut self.pipeline;
        let len = p.rtp.build_report(&mut self.rtcp_buf, ntp, now)?;
        let sent = p.transport.send(Channel::Rtcp, &self.rtcp_buf[..len], p.endpoints.rtcp)?;
        assert_eq!(sent, len, "short RTCP write: {sent} of {len} bytes");

        p.stats.rtcp_reports += 1;
        self.timing.rtcp_last_send = Some(now);
        self.timing.rtcp_interval = p.rtp.rtcp_interval();
        tracing::trace!(
            ssrc = p.rtp.ssrc(),
            bytes = len,
            next_in = ?self.timing.rtcp_interval,
            "RTCP report sent"
        );
        Ok(true)
    }

    /// Feed pending RTCP datagrams from the transport to the RTP session.
    ///
    /// Returns how many were read.
    pub fn service_feedback(&mut self) -> Result<usize> {
        let mut buf = [0u8; RTCP_BUFFER_SIZE];
        let now = self.clock.now_ms();
        let mut count = 0;
        while count < MAX_FEEDBACK_PER_POLL {
            let Some(n) = self.pipeline.transport.recv_feedback(&mut buf)? else {
                break;
            };
            self.pipeline.rtp.on_receive_report(&buf[..n], now);
            count += 1;
        }
        Ok(count)
    }
}

/// Muxer output: hands each muxed buffer straight to the packer.
struct MuxOutput<'a> {
    pipeline: &'a mut Pipeline,
    time_ms: u64,
    now_ms: u64,
}

impl PsOutput for MuxOutput<'_> {
    fn allocate(&mut self, size: usize) -> MuxedBuffer {
        self.pipeline.stats.mux_buffers_allocated += 1;
        MuxedBuffer::with_capacity(size)
    }

    fn consume(&mut self, _kind: StreamKind, buffer: MuxedBuffer) -> Result<()> {
        let Pipeline {
            packer,
            rtp,
            buffer: packet_buffer,
            transport,
            endpoints,
            stats,
        } = &mut *self.pipeline;
        let mut sink = PacketSink {
            buffer: packet_buffer,
            transport,
            rtp,
            dest: endpoints.rtp,
            now_ms: self.now_ms,
            packets_sent: &mut stats.packets_sent,
        };
        let result = packer.input(buffer.as_bytes(), self.time_ms, &mut sink);
        self.release(buffer);
        result
    }

    fn release(&mut self, buffer: MuxedBuffer) {
        self.pipeline.stats.mux_buffers_released += 1;
        drop(buffer);
    }
}

/// Packer output: sends each packet over the RTP channel.
struct PacketSink<'a> {
    buffer: &'a mut PacketBuffer,
    transport: &'a mut Box<dyn TransportSink>,
    rtp: &'a mut RtpSession,
    dest: std::net::SocketAddr,
    now_ms: u64,
    packets_sent: &'a mut u64,
}

impl RtpPacketSink for PacketSink<'_> {
    fn alloc(&mut self, size: usize) -> PacketLease {
        self.buffer.checkout(size)
    }

    fn packet_ready(&mut self, packet: &PacketLease, _time_ms: u64) -> Result<()> {
        let bytes = packet.as_bytes();
        let sent = self.transport.send(Channel::Rtp, bytes, self.dest)?;
        assert_eq!(sent, bytes.len(), "short RTP write: {sent} of {} bytes", bytes.len());
        self.rtp.on_send(bytes, self.now_ms);
        *self.packets_sent += 1;
        Ok(())
    }

    fn free(&mut self, packet: PacketLease) {
        self.buffer.checkin(packet);
    }
}
