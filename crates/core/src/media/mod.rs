//! Media plumbing: PS multiplexing and RTP packetization.
//!
//! ## Pipeline
//!
//! ```text
//! Annex B frame ──► PsMuxer ──MuxedBuffer──► RtpPsPacker ──PacketLease──► transport
//!                   (ps.rs)                  (packer.rs)
//! ```
//!
//! Each hop moves ownership of its buffer to the next one through a narrow
//! trait ([`ps::PsOutput`], [`packer::RtpPacketSink`]) so the session can
//! sit between the stages without the stages knowing about each other.
//!
//! ## Payload format
//!
//! The whole program stream rides in RTP with payload type 96 and a 90 kHz
//! clock, advertised in SDP as `MP2P/90000`. Every fragment of one muxed
//! buffer carries the same timestamp; the marker bit closes the buffer.

pub mod h264;
pub mod packer;
pub mod ps;
pub mod rtp;

/// Dynamic payload type conventionally used for MPEG-2 PS.
pub const PAYLOAD_TYPE_MP2P: u8 = 96;

/// 90 kHz media clock shared by PS timestamps and RTP.
pub const CLOCK_RATE_90KHZ: u32 = 90_000;

/// Elementary stream carried inside the program stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// H.264/AVC Annex B video.
    H264,
    /// AAC with ADTS framing.
    Aac,
}

impl StreamKind {
    /// ISO/IEC 13818-1 `stream_type` for the program stream map.
    pub fn stream_type(&self) -> u8 {
        match self {
            StreamKind::H264 => 0x1B,
            StreamKind::Aac => 0x0F,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, StreamKind::H264)
    }
}
