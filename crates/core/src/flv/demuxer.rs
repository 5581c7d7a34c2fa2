use std::fmt;

use super::reader::{FlvTag, TAG_AUDIO, TAG_VIDEO};
use crate::error::{FlvErrorKind, Result};
use crate::media::h264::{NAL_IDR, NAL_SPS};

const SOUND_FORMAT_AAC: u8 = 10;
const CODEC_AVC: u8 = 7;

const PACKET_SEQUENCE_HEADER: u8 = 0;
const PACKET_RAW: u8 = 1;

const FRAME_TYPE_KEY: u8 = 1;

const ADTS_HEADER_SIZE: usize = 7;
const ADTS_MAX_FRAME: usize = (1 << 13) - 1;

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Elementary stream a demuxed packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlvPacketKind {
    /// AAC with ADTS framing.
    Aac,
    /// H.264 in Annex B form.
    Avc,
}

impl fmt::Display for FlvPacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aac => write!(f, "A"),
            Self::Avc => write!(f, "V"),
        }
    }
}

/// A demuxed frame. The bytes are only valid for the duration of the callback.
#[derive(Debug, Clone, Copy)]
pub struct FlvPacket<'a> {
    pub kind: FlvPacketKind,
    pub data: &'a [u8],
    pub pts: u32,
    pub dts: u32,
    pub keyframe: bool,
}

/// Receiver of demuxed packets.
pub trait FlvPacketSink {
    fn on_packet(&mut self, packet: FlvPacket<'_>) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct AvcConfig {
    nal_length_size: usize,
    sps: Vec<Vec<u8>>,
    pps: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
struct AacConfig {
    object_type: u8,
    sampling_index: u8,
    channels: u8,
}

/// FLV tag demuxer for AAC audio and AVC video.
///
/// Sequence headers are kept per instance; raw frames are rewritten into
/// ADTS and Annex B and passed to the sink.
#[derive(Debug, Default)]
pub struct FlvDemuxer {
    avc: Option<AvcConfig>,
    aac: Option<AacConfig>,
    scratch: Vec<u8>,
}

impl FlvDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Demux one tag. Script tags and unsupported codecs are skipped.
    pub fn input(&mut self, tag: &FlvTag, sink: &mut dyn FlvPacketSink) -> Result<()> {
        match tag.tag_type {
            TAG_AUDIO => self.audio(tag, sink),
            TAG_VIDEO => self.video(tag, sink),
            _ => Ok(()),
        }
    }

    fn audio(&mut self, tag: &FlvTag, sink: &mut dyn FlvPacketSink) -> Result<()> {
        let data = &tag.data;
        let Some(&flags) = data.first() else {
            return Err(FlvErrorKind::TruncatedTag.into());
        };
        if flags >> 4 != SOUND_FORMAT_AAC {
            tracing::trace!(format = flags >> 4, "skipping non-AAC audio tag");
            return Ok(());
        }
        if data.len() < 2 {
            return Err(FlvErrorKind::TruncatedTag.into());
        }

        let body = &data[2..];
        match data[1] {
            PACKET_SEQUENCE_HEADER => {
                if body.len() < 2 {
                    return Err(FlvErrorKind::InvalidAacConfig.into());
                }
                let config = AacConfig {
                    object_type: body[0] >> 3,
                    sampling_index: ((body[0] & 0x07) << 1) | (body[1] >> 7),
                    channels: (body[1] >> 3) & 0x0f,
                };
                tracing::debug!(
                    object_type = config.object_type,
                    sampling_index = config.sampling_index,
                    channels = config.channels,
                    "AAC sequence header"
                );
                self.aac = Some(config);
                Ok(())
            }
            PACKET_RAW => {
                let config = self.aac.ok_or(FlvErrorKind::MissingAacConfig)?;
                let frame_len = ADTS_HEADER_SIZE + body.len();
                if frame_len > ADTS_MAX_FRAME {
                    return Err(FlvErrorKind::InvalidAacConfig.into());
                }
                self.scratch.clear();
                self.scratch.extend_from_slice(&adts_header(&config, frame_len));
                self.scratch.extend_from_slice(body);
                sink.on_packet(FlvPacket {
                    kind: FlvPacketKind::Aac,
                    data: &self.scratch,
                    pts: tag.timestamp,
                    dts: tag.timestamp,
                    keyframe: true,
                })
            }
            _ => Ok(()),
        }
    }

    fn video(&mut self, tag: &FlvTag, sink: &mut dyn FlvPacketSink) -> Result<()> {
        let data = &tag.data;
        let Some(&flags) = data.first() else {
            return Err(FlvErrorKind::TruncatedTag.into());
        };
        if flags & 0x0f != CODEC_AVC {
            tracing::trace!(codec = flags & 0x0f, "skipping non-AVC video tag");
            return Ok(());
        }
        if data.len() < 5 {
            return Err(FlvErrorKind::TruncatedTag.into());
        }

        let keyframe = flags >> 4 == FRAME_TYPE_KEY;
        // signed 24-bit composition time offset
        let cts = (i32::from_be_bytes([data[2], data[3], data[4], 0])) >> 8;
        let body = &data[5..];

        match data[1] {
            PACKET_SEQUENCE_HEADER => {
                let config = parse_avc_config(body)?;
                tracing::debug!(
                    nal_length_size = config.nal_length_size,
                    sps = config.sps.len(),
                    pps = config.pps.len(),
                    "AVC sequence header"
                );
                self.avc = Some(config);
                Ok(())
            }
            PACKET_RAW => {
                let config = self.avc.as_ref().ok_or(FlvErrorKind::InvalidAvcConfig)?;
                self.scratch.clear();
                to_annex_b(config, body, keyframe, &mut self.scratch)?;
                if self.scratch.is_empty() {
                    return Ok(());
                }
                sink.on_packet(FlvPacket {
                    kind: FlvPacketKind::Avc,
                    data: &self.scratch,
                    pts: tag.timestamp.wrapping_add_signed(cts),
                    dts: tag.timestamp,
                    keyframe,
                })
            }
            // end of sequence
            _ => Ok(()),
        }
    }
}

fn adts_header(config: &AacConfig, frame_len: usize) -> [u8; ADTS_HEADER_SIZE] {
    let profile = config.object_type.saturating_sub(1) & 0x03;
    let len = frame_len as u16;
    [
        0xFF,
        // MPEG-4, layer 0, no CRC
        0xF1,
        (profile << 6) | ((config.sampling_index & 0x0f) << 2) | ((config.channels >> 2) & 0x01),
        ((config.channels & 0x03) << 6) | ((len >> 11) & 0x03) as u8,
        ((len >> 3) & 0xFF) as u8,
        (((len & 0x07) << 5) as u8) | 0x1F,
        0xFC,
    ]
}

/// ADTS `aac_frame_length`, header included.
pub fn adts_frame_length(frame: &[u8]) -> Option<usize> {
    if frame.len() < ADTS_HEADER_SIZE || frame[0] != 0xFF || frame[1] & 0xF0 != 0xF0 {
        return None;
    }
    Some((((frame[3] & 0x03) as usize) << 11) | ((frame[4] as usize) << 3) | ((frame[5] >> 5) as usize))
}

/// Parse an AVCDecoderConfigurationRecord (ISO/IEC 14496-15 §5.2.4.1).
fn parse_avc_config(body: &[u8]) -> Result<AvcConfig> {
    let invalid = || FlvErrorKind::InvalidAvcConfig;
    if body.len() < 6 || body[0] != 1 {
        return Err(invalid().into());
    }

    let mut config = AvcConfig {
        nal_length_size: (body[4] & 0x03) as usize + 1,
        ..AvcConfig::default()
    };
    let mut at = 5;
    let sps_count = (body[at] & 0x1f) as usize;
    at += 1;
    for _ in 0..sps_count {
        config.sps.push(read_parameter_set(body, &mut at).ok_or_else(invalid)?);
    }
    let pps_count = *body.get(at).ok_or_else(invalid)? as usize;
    at += 1;
    for _ in 0..pps_count {
        config.pps.push(read_parameter_set(body, &mut at).ok_or_else(invalid)?);
    }
    Ok(config)
}

fn read_parameter_set(body: &[u8], at: &mut usize) -> Option<Vec<u8>> {
    let len = u16::from_be_bytes([*body.get(*at)?, *body.get(*at + 1)?]) as usize;
    let set = body.get(*at + 2..*at + 2 + len)?.to_vec();
    *at += 2 + len;
    Some(set)
}

/// Rewrite length-prefixed NAL units into `out` with start codes.
///
/// Keyframes that carry no SPS of their own get the stored SPS/PPS first.
fn to_annex_b(config: &AvcConfig, body: &[u8], keyframe: bool, out: &mut Vec<u8>) -> Result<()> {
    let size = config.nal_length_size;
    let mut nals = Vec::new();
    let mut at = 0usize;
    while at < body.len() {
        if at + size > body.len() {
            return Err(FlvErrorKind::InvalidNalLength.into());
        }
        let len = body[at..at + size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        at += size;
        let nal = body
            .get(at..at + len)
            .ok_or(FlvErrorKind::InvalidNalLength)?;
        at += len;
        if !nal.is_empty() {
            nals.push(nal);
        }
    }

    let has_sps = nals.iter().any(|n| n[0] & 0x1f == NAL_SPS);
    let has_idr = nals.iter().any(|n| n[0] & 0x1f == NAL_IDR);
    if (keyframe || has_idr) && !has_sps {
        for set in &config.sps {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(set);
        }
        for set in &config.pps {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(set);
        }
    }
    for nal in nals {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(nal);
    }
    Ok(())
}
