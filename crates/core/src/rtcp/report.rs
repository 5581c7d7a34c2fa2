//! RTCP wire format (RFC 3550 §6.4–6.6): SR and SDES writing, compound
//! packet parsing for receiver feedback.

use crate::clock::NtpTimestamp;
use crate::error::{Result, StreamError};

pub const PT_SR: u8 = 200;
pub const PT_RR: u8 = 201;
pub const PT_SDES: u8 = 202;
pub const PT_BYE: u8 = 203;

pub const SDES_CNAME: u8 = 1;
pub const SDES_NAME: u8 = 2;

/// SR without report blocks: header, SSRC and the 20-byte sender info.
pub const SENDER_REPORT_SIZE: usize = 28;

const REPORT_BLOCK_SIZE: usize = 24;

/// Sender info section of an SR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderInfo {
    pub ssrc: u32,
    pub ntp: NtpTimestamp,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

/// Reception report block (RFC 3550 §6.4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    /// Signed 24-bit cumulative loss.
    pub cumulative_lost: i32,
    pub highest_sequence: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

impl ReportBlock {
    fn parse(b: &[u8]) -> Self {
        let lost = ((b[5] as i32) << 16) | ((b[6] as i32) << 8) | b[7] as i32;
        // sign-extend 24 bits
        let cumulative_lost = (lost << 8) >> 8;
        Self {
            ssrc: be_u32(&b[0..4]),
            fraction_lost: b[4],
            cumulative_lost,
            highest_sequence: be_u32(&b[8..12]),
            jitter: be_u32(&b[12..16]),
            last_sr: be_u32(&b[16..20]),
            delay_since_last_sr: be_u32(&b[20..24]),
        }
    }
}

/// One packet of a compound RTCP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtcpPacket {
    SenderReport {
        ssrc: u32,
        info: SenderInfo,
        blocks: Vec<ReportBlock>,
    },
    ReceiverReport {
        ssrc: u32,
        blocks: Vec<ReportBlock>,
    },
    SourceDescription {
        ssrcs: Vec<u32>,
    },
    Bye {
        ssrcs: Vec<u32>,
    },
    Other {
        packet_type: u8,
    },
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn write_header(buf: &mut [u8], count: u8, packet_type: u8, total_len: usize) {
    buf[0] = (2 << 6) | (count & 0x1f);
    buf[1] = packet_type;
    let words = (total_len / 4 - 1) as u16;
    buf[2..4].copy_from_slice(&words.to_be_bytes());
}

fn ensure(buf: &[u8], required: usize) -> Result<()> {
    if buf.len() < required {
        return Err(StreamError::BufferTooSmall {
            required,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Write an SR with no report blocks. Returns the bytes written.
pub fn write_sender_report(buf: &mut [u8], info: &SenderInfo) -> Result<usize> {
    ensure(buf, SENDER_REPORT_SIZE)?;
    write_header(buf, 0, PT_SR, SENDER_REPORT_SIZE);
    buf[4..8].copy_from_slice(&info.ssrc.to_be_bytes());
    buf[8..12].copy_from_slice(&info.ntp.seconds.to_be_bytes());
    buf[12..16].copy_from_slice(&info.ntp.fraction.to_be_bytes());
    buf[16..20].copy_from_slice(&info.rtp_timestamp.to_be_bytes());
    buf[20..24].copy_from_slice(&info.packet_count.to_be_bytes());
    buf[24..28].copy_from_slice(&info.octet_count.to_be_bytes());
    Ok(SENDER_REPORT_SIZE)
}

/// Size of a one-chunk SDES packet carrying `items`.
pub fn sdes_size(items: &[(u8, &str)]) -> usize {
    let items_len: usize = items
        .iter()
        .map(|(_, value)| 2 + value.len().min(255))
        .sum();
    // header + SSRC + items + terminating null, padded to a word
    (8 + items_len + 1).div_ceil(4) * 4
}

/// Write a one-chunk SDES packet. Item values longer than 255 bytes are cut.
pub fn write_sdes(buf: &mut [u8], ssrc: u32, items: &[(u8, &str)]) -> Result<usize> {
    let total = sdes_size(items);
    ensure(buf, total)?;
    write_header(buf, 1, PT_SDES, total);
    buf[4..8].copy_from_slice(&ssrc.to_be_bytes());

    let mut at = 8;
    for (kind, value) in items {
        let value = &value.as_bytes()[..value.len().min(255)];
        buf[at] = *kind;
        buf[at + 1] = value.len() as u8;
        buf[at + 2..at + 2 + value.len()].copy_from_slice(value);
        at += 2 + value.len();
    }
    // null terminator plus padding
    buf[at..total].fill(0);
    Ok(total)
}

/// Split a compound RTCP datagram into its packets.
///
/// The whole datagram is rejected if any packet header is invalid or a
/// length field overruns the datagram.
pub fn parse_compound(msg: &[u8]) -> Result<Vec<RtcpPacket>> {
    if msg.len() < 4 {
        return Err(StreamError::MalformedRtcp("datagram shorter than a header"));
    }

    let mut packets = Vec::new();
    let mut offset = 0usize;
    while offset < msg.len() {
        let rest = &msg[offset..];
        if rest.len() < 4 {
            return Err(StreamError::MalformedRtcp("trailing bytes after last packet"));
        }
        if rest[0] >> 6 != 2 {
            return Err(StreamError::MalformedRtcp("unsupported version"));
        }
        let count = (rest[0] & 0x1f) as usize;
        let packet_type = rest[1];
        let len = (u16::from_be_bytes([rest[2], rest[3]]) as usize + 1) * 4;
        if len > rest.len() {
            return Err(StreamError::MalformedRtcp("length exceeds datagram"));
        }
        let body = &rest[4..len];

        let packet = match packet_type {
            PT_SR => {
                if body.len() < 24 + count * REPORT_BLOCK_SIZE {
                    return Err(StreamError::MalformedRtcp("short sender report"));
                }
                let ssrc = be_u32(&body[0..4]);
                let info = SenderInfo {
                    ssrc,
                    ntp: NtpTimestamp {
                        seconds: be_u32(&body[4..8]),
                        fraction: be_u32(&body[8..12]),
                    },
                    rtp_timestamp: be_u32(&body[12..16]),
                    packet_count: be_u32(&body[16..20]),
                    octet_count: be_u32(&body[20..24]),
                };
                RtcpPacket::SenderReport {
                    ssrc,
                    info,
                    blocks: parse_blocks(&body[24..], count),
                }
            }
            PT_RR => {
                if body.len() < 4 + count * REPORT_BLOCK_SIZE {
                    return Err(StreamError::MalformedRtcp("short receiver report"));
                }
                RtcpPacket::ReceiverReport {
                    ssrc: be_u32(&body[0..4]),
                    blocks: parse_blocks(&body[4..], count),
                }
            }
            PT_SDES => RtcpPacket::SourceDescription {
                ssrcs: sdes_ssrcs(body, count)?,
            },
            PT_BYE => {
                if body.len() < count * 4 {
                    return Err(StreamError::MalformedRtcp("short BYE"));
                }
                RtcpPacket::Bye {
                    ssrcs: body
                        .chunks_exact(4)
                        .take(count)
                        .map(be_u32)
                        .collect(),
                }
            }
            other => RtcpPacket::Other { packet_type: other },
        };
        packets.push(packet);
        offset += len;
    }
    Ok(packets)
}

fn parse_blocks(body: &[u8], count: usize) -> Vec<ReportBlock> {
    body.chunks_exact(REPORT_BLOCK_SIZE)
        .take(count)
        .map(ReportBlock::parse)
        .collect()
}

/// SSRC of every SDES chunk; item contents are skipped.
fn sdes_ssrcs(body: &[u8], count: usize) -> Result<Vec<u32>> {
    let mut ssrcs = Vec::with_capacity(count);
    let mut at = 0usize;
    for _ in 0..count {
        if at + 4 > body.len() {
            return Err(StreamError::MalformedRtcp("short SDES chunk"));
        }
        ssrcs.push(be_u32(&body[at..at + 4]));
        at += 4;
        loop {
            match body.get(at) {
                None => return Err(StreamError::MalformedRtcp("unterminated SDES chunk")),
                Some(0) => break,
                Some(_) => {
                    let len = *body
                        .get(at + 1)
                        .ok_or(StreamError::MalformedRtcp("truncated SDES item"))?
                        as usize;
                    at += 2 + len;
                }
            }
        }
        // skip the null and pad to the next word
        at = (at + 1).div_ceil(4) * 4;
    }
    Ok(ssrcs)
}
