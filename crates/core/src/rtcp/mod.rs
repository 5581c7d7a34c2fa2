//! RTP/RTCP session bookkeeping for a single sender.
//!
//! [`RtpSession`] watches every RTP packet that leaves the session, decides
//! when the next RTCP report is due, writes SR + SDES compound reports and
//! digests the receiver's RR feedback.

pub mod interval;
pub mod report;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use interval::{IntervalInput, RTCP_BANDWIDTH_FRACTION};
use report::{ReportBlock, RtcpPacket, SDES_CNAME, SDES_NAME, SENDER_REPORT_SIZE, SenderInfo};

use crate::clock::NtpTimestamp;
use crate::error::{Result, StreamError};
use crate::media::rtp::RtpFields;

/// UDP + IPv4 header bytes counted into the average RTCP size.
const LOWER_LAYER_OVERHEAD: usize = 28;

/// Starting value of the average compound RTCP size.
const INITIAL_AVG_RTCP_SIZE: f64 = 128.0;

/// Remote sources silent for this many deterministic intervals are dropped.
const MEMBER_TIMEOUT_INTERVALS: f64 = 5.0;

/// Most remote sources tracked at once; new SSRCs beyond it are not counted.
pub const MAX_REMOTE_MEMBERS: usize = 64;

/// Latest reception report about our stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverFeedback {
    /// SSRC of the receiver that sent the report.
    pub reporter: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: i32,
    pub highest_sequence: u32,
    pub jitter: u32,
}

impl ReceiverFeedback {
    fn new(reporter: u32, block: &ReportBlock) -> Self {
        Self {
            reporter,
            fraction_lost: block.fraction_lost,
            cumulative_lost: block.cumulative_lost,
            highest_sequence: block.highest_sequence,
            jitter: block.jitter,
        }
    }
}

/// Sender-side RTP/RTCP state.
#[derive(Debug)]
pub struct RtpSession {
    ssrc: u32,
    clock_rate: u32,
    cname: String,
    name: String,

    packets_sent: u32,
    octets_sent: u32,
    last_sequence: Option<u16>,
    last_rtp_timestamp: u32,
    last_rtp_send_ms: Option<u64>,

    rtcp_bandwidth: f64,
    avg_rtcp_size: f64,
    initial: bool,
    randomize: bool,
    /// Packet count at the previous two reports, newest first.
    report_marks: [u32; 2],
    /// Remote SSRC to the time it was last heard, in milliseconds.
    remote_sources: HashMap<u32, u64>,

    feedback: Option<ReceiverFeedback>,
    reports_sent: u64,
}

impl RtpSession {
    /// `session_bandwidth` is in octets per second; RTCP gets 5% of it.
    pub fn new(ssrc: u32, clock_rate: u32, session_bandwidth: u32) -> Self {
        Self {
            ssrc,
            clock_rate,
            cname: String::new(),
            name: String::new(),
            packets_sent: 0,
            octets_sent: 0,
            last_sequence: None,
            last_rtp_timestamp: 0,
            last_rtp_send_ms: None,
            rtcp_bandwidth: session_bandwidth as f64 * RTCP_BANDWIDTH_FRACTION,
            avg_rtcp_size: INITIAL_AVG_RTCP_SIZE,
            initial: true,
            randomize: false,
            report_marks: [0; 2],
            remote_sources: HashMap::new(),
            feedback: None,
            reports_sent: 0,
        }
    }

    /// Set the SDES CNAME and NAME items.
    pub fn with_description(mut self, cname: impl Into<String>, name: impl Into<String>) -> Self {
        self.cname = cname.into();
        self.name = name.into();
        self
    }

    /// Enable the randomized interval of RFC 3550 §6.3.1.
    pub fn with_randomized_interval(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    /// Our synchronization source.
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// RTP packets recorded by [`on_send`](Self::on_send).
    pub fn packets_sent(&self) -> u32 {
        self.packets_sent
    }

    /// Payload octets sent, RTP headers excluded.
    pub fn octets_sent(&self) -> u32 {
        self.octets_sent
    }

    /// Sequence number of the last packet sent.
    pub fn last_sequence(&self) -> Option<u16> {
        self.last_sequence
    }

    /// Compound reports built so far.
    pub fn reports_sent(&self) -> u64 {
        self.reports_sent
    }

    /// Latest report block a receiver sent about our SSRC.
    pub fn feedback(&self) -> Option<ReceiverFeedback> {
        self.feedback
    }

    /// Session members: ourselves plus every remote SSRC heard from and not
    /// yet timed out.
    pub fn members(&self) -> u32 {
        1 + self.remote_sources.len() as u32
    }

    /// Record a transmitted RTP packet.
    pub fn on_send(&mut self, packet: &[u8], now_ms: u64) {
        let Some(fields) = RtpFields::parse(packet) else {
            tracing::warn!(len = packet.len(), "ignoring malformed outgoing RTP packet");
            return;
        };
        self.packets_sent = self.packets_sent.wrapping_add(1);
        self.octets_sent = self
            .octets_sent
            .wrapping_add((packet.len() - fields.header_len) as u32);
        self.last_sequence = Some(fields.sequence);
        self.last_rtp_timestamp = fields.timestamp;
        self.last_rtp_send_ms = Some(now_ms);
    }

    fn we_sent(&self) -> bool {
        // data sent during either of the last two report intervals
        self.packets_sent != self.report_marks[0] || self.report_marks[0] != self.report_marks[1]
    }

    fn interval_input(&self) -> IntervalInput {
        let we_sent = self.we_sent();
        IntervalInput {
            members: self.members(),
            senders: we_sent as u32,
            rtcp_bandwidth: self.rtcp_bandwidth,
            we_sent,
            avg_rtcp_size: self.avg_rtcp_size,
            initial: self.initial,
        }
    }

    /// Time to wait after a report before sending the next one.
    pub fn rtcp_interval(&self) -> Duration {
        self.interval_input().interval(self.randomize)
    }

    /// Size of the compound report [`build_report`](Self::build_report) writes.
    pub fn report_size(&self) -> usize {
        SENDER_REPORT_SIZE + report::sdes_size(&self.sdes_items())
    }

    fn sdes_items(&self) -> [(u8, &str); 2] {
        [(SDES_CNAME, self.cname.as_str()), (SDES_NAME, self.name.as_str())]
    }

    /// RTP timestamp of the last packet, advanced by the time since it was sent.
    fn extrapolated_timestamp(&self, now_ms: u64) -> u32 {
        match self.last_rtp_send_ms {
            Some(sent) => {
                let elapsed = now_ms.saturating_sub(sent);
                let ticks = elapsed * self.clock_rate as u64 / 1000;
                self.last_rtp_timestamp.wrapping_add(ticks as u32)
            }
            None => self.last_rtp_timestamp,
        }
    }

    /// Write an SR + SDES compound report into `buf` and return its length.
    ///
    /// Remote sources that timed out are dropped first.
    pub fn build_report(&mut self, buf: &mut [u8], ntp: NtpTimestamp, now_ms: u64) -> Result<usize> {
        self.expire_members(now_ms);
        let required = self.report_size();
        if buf.len() < required {
            return Err(StreamError::BufferTooSmall {
                required,
                available: buf.len(),
            });
        }

        let info = SenderInfo {
            ssrc: self.ssrc,
            ntp,
            rtp_timestamp: self.extrapolated_timestamp(now_ms),
            packet_count: self.packets_sent,
            octet_count: self.octets_sent,
        };
        let mut len = report::write_sender_report(buf, &info)?;
        len += report::write_sdes(&mut buf[len..], self.ssrc, &self.sdes_items())?;

        self.update_avg_size(len);
        self.initial = false;
        self.report_marks = [self.packets_sent, self.report_marks[0]];
        self.reports_sent += 1;

        tracing::trace!(
            ssrc = self.ssrc,
            packets = self.packets_sent,
            octets = self.octets_sent,
            rtp_ts = info.rtp_timestamp,
            len,
            "RTCP sender report built"
        );
        Ok(len)
    }

    fn update_avg_size(&mut self, packet_len: usize) {
        let size = (packet_len + LOWER_LAYER_OVERHEAD) as f64;
        self.avg_rtcp_size += (size - self.avg_rtcp_size) / 16.0;
    }

    /// Digest an incoming compound RTCP datagram received at `now_ms`.
    ///
    /// Malformed input is logged and dropped.
    pub fn on_receive_report(&mut self, msg: &[u8], now_ms: u64) {
        let packets = match report::parse_compound(msg) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(len = msg.len(), error = %e, "ignoring RTCP datagram");
                return;
            }
        };
        self.update_avg_size(msg.len());

        let own = self.ssrc;
        for packet in packets {
            match packet {
                RtcpPacket::ReceiverReport { ssrc, blocks }
                | RtcpPacket::SenderReport { ssrc, blocks, .. } => {
                    self.note_source(ssrc, now_ms);
                    for block in blocks.iter().filter(|b| b.ssrc == own) {
                        let feedback = ReceiverFeedback::new(ssrc, block);
                        tracing::debug!(
                            reporter = ssrc,
                            fraction_lost = feedback.fraction_lost,
                            cumulative_lost = feedback.cumulative_lost,
                            highest_seq = feedback.highest_sequence,
                            jitter = feedback.jitter,
                            "receiver report"
                        );
                        self.feedback = Some(feedback);
                    }
                }
                RtcpPacket::SourceDescription { ssrcs } => {
                    for ssrc in ssrcs {
                        self.note_source(ssrc, now_ms);
                    }
                }
                RtcpPacket::Bye { ssrcs } => {
                    for ssrc in ssrcs {
                        tracing::info!(ssrc, "RTCP BYE");
                        self.remote_sources.remove(&ssrc);
                    }
                }
                RtcpPacket::Other { packet_type } => {
                    tracing::trace!(packet_type, "skipping RTCP packet");
                }
            }
        }
    }

    fn note_source(&mut self, ssrc: u32, now_ms: u64) {
        if ssrc == self.ssrc {
            return;
        }
        let full = self.remote_sources.len() >= MAX_REMOTE_MEMBERS;
        match self.remote_sources.entry(ssrc) {
            Entry::Occupied(mut heard) => {
                heard.insert(now_ms);
            }
            Entry::Vacant(_) if full => tracing::debug!(ssrc, "member table full, not tracking source"),
            Entry::Vacant(slot) => {
                slot.insert(now_ms);
            }
        }
    }

    /// Drop remote sources not heard from within five deterministic
    /// intervals (RFC 3550 §6.3.5).
    fn expire_members(&mut self, now_ms: u64) {
        if self.remote_sources.is_empty() {
            return;
        }
        let timeout = self.interval_input().deterministic() * MEMBER_TIMEOUT_INTERVALS;
        let timeout_ms = (timeout * 1000.0) as u64;
        let before = self.remote_sources.len();
        self.remote_sources
            .retain(|_, heard| now_ms.saturating_sub(*heard) < timeout_ms);
        let expired = before - self.remote_sources.len();
        if expired > 0 {
            tracing::debug!(
                expired,
                remaining = self.remote_sources.len(),
                timeout_ms,
                "RTCP members timed out"
            );
        }
    }
}
