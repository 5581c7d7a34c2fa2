//! MPEG-2 Program Stream multiplexer (ISO/IEC 13818-1 §2.5).
//!
//! Every [`PsMuxer::write`] call produces exactly one [`MuxedBuffer`]:
//!
//! ```text
//! pack header (00 00 01 BA, SCR = DTS)
//! [system header (00 00 01 BB) + program stream map (00 00 01 BC)]
//! PES (00 00 01 E0/C0, PTS/DTS) [+ continuation PES ...]
//! ```
//!
//! The system header and map are repeated on the first write and on every
//! video keyframe so a receiver can join mid-stream.
//!
//! The buffer is handed over through [`PsOutput`]: the muxer allocates it,
//! fills it, and moves it into [`PsOutput::consume`]. From that point the
//! receiver owns it and must pass it to [`PsOutput::release`].

use super::StreamKind;
use super::h264;
use crate::error::{Result, StreamError};

const PACK_START: [u8; 4] = [0x00, 0x00, 0x01, 0xBA];
const SYSTEM_HEADER_START: [u8; 4] = [0x00, 0x00, 0x01, 0xBB];
const PSM_START: [u8; 4] = [0x00, 0x00, 0x01, 0xBC];

const PACK_HEADER_SIZE: usize = 14;
/// Largest PES payload that keeps `PES_packet_length` within 16 bits with a
/// full PTS+DTS header.
const MAX_PES_PAYLOAD: usize = 0xFFFF - 3 - 10;

/// `program_mux_rate` in units of 50 bytes/s (10 Mbit/s).
const DEFAULT_MUX_RATE: u32 = 25_000;

const PTS_MASK: u64 = (1 << 33) - 1;

/// Heap buffer produced by the muxer and owned by whoever holds it.
///
/// The type is move-only: handing it to [`PsOutput::consume`] gives up the
/// muxer's access, and [`PsOutput::release`] consumes it for good.
#[derive(Debug)]
pub struct MuxedBuffer {
    data: Vec<u8>,
}

impl MuxedBuffer {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            data: Vec::with_capacity(size),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    fn put(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

/// Receiver of muxed output: the allocate/consume/release triple.
pub trait PsOutput {
    /// Provide an empty buffer able to hold `size` bytes.
    fn allocate(&mut self, size: usize) -> MuxedBuffer;

    /// Take ownership of a filled buffer. Called synchronously from inside
    /// [`PsMuxer::write`].
    fn consume(&mut self, kind: StreamKind, buffer: MuxedBuffer) -> Result<()>;

    /// Give a buffer back once its bytes are no longer needed.
    fn release(&mut self, buffer: MuxedBuffer) {
        drop(buffer);
    }
}

#[derive(Debug, Clone, Copy)]
struct PsStream {
    kind: StreamKind,
    stream_id: u8,
}

/// Program stream writer for one program with a handful of elementary streams.
#[derive(Debug)]
pub struct PsMuxer {
    streams: Vec<PsStream>,
    mux_rate: u32,
    psm_version: u8,
    headers_sent: bool,
}

impl PsMuxer {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            mux_rate: DEFAULT_MUX_RATE,
            psm_version: 0,
            headers_sent: false,
        }
    }

    /// Register an elementary stream and return its PES stream id.
    ///
    /// Video streams are numbered from `0xE0`, audio streams from `0xC0`.
    pub fn add_stream(&mut self, kind: StreamKind) -> u8 {
        let base = if kind.is_video() { 0xE0 } else { 0xC0 };
        let same_class = self
            .streams
            .iter()
            .filter(|s| s.kind.is_video() == kind.is_video())
            .count() as u8;
        let stream_id = base + same_class;
        self.streams.push(PsStream { kind, stream_id });
        // Receivers must notice the new map.
        self.psm_version = (self.psm_version + 1) & 0x1f;
        self.headers_sent = false;
        tracing::debug!(?kind, stream_id = format_args!("{:#04X}", stream_id), "PS stream added");
        stream_id
    }

    /// Mux one frame and hand the resulting buffer to `out`.
    ///
    /// `pts` and `dts` are 90 kHz values; they are truncated to 33 bits.
    pub fn write(
        &mut self,
        stream_id: u8,
        pts: u64,
        dts: u64,
        data: &[u8],
        out: &mut dyn PsOutput,
    ) -> Result<()> {
        let stream = *self
            .streams
            .iter()
            .find(|s| s.stream_id == stream_id)
            .ok_or(StreamError::UnknownStream(stream_id))?;

        let pts = pts & PTS_MASK;
        let dts = dts & PTS_MASK;
        let with_headers = !self.headers_sent || is_random_access(stream.kind, data);

        let mut size = PACK_HEADER_SIZE;
        if with_headers {
            size += self.system_header_size() + self.psm_size();
        }
        size += pes_size(data.len(), pts != dts);

        let mut buffer = out.allocate(size);
        self.write_pack_header(&mut buffer, dts);
        if with_headers {
            self.write_system_header(&mut buffer);
            self.write_psm(&mut buffer);
            self.headers_sent = true;
        }
        write_pes(&mut buffer, stream.stream_id, pts, dts, data);

        tracing::trace!(
            stream_id = format_args!("{:#04X}", stream_id),
            pts,
            dts,
            frame_bytes = data.len(),
            ps_bytes = buffer.len(),
            with_headers,
            "frame muxed"
        );

        out.consume(stream.kind, buffer)
    }

    fn write_pack_header(&self, buf: &mut MuxedBuffer, scr_base: u64) {
        let scr_ext: u64 = 0;
        let rate = self.mux_rate;
        let mut header = [0u8; PACK_HEADER_SIZE];
        header[0..4].copy_from_slice(&PACK_START);
        // '01' + SCR[32..30] + marker + SCR[29..28]
        header[4] = 0x44 | (((scr_base >> 27) & 0x38) as u8) | (((scr_base >> 28) & 0x03) as u8);
        header[5] = ((scr_base >> 20) & 0xFF) as u8;
        header[6] = 0x04 | (((scr_base >> 12) & 0xF8) as u8) | (((scr_base >> 13) & 0x03) as u8);
        header[7] = ((scr_base >> 5) & 0xFF) as u8;
        header[8] = 0x04 | (((scr_base << 3) & 0xF8) as u8) | (((scr_ext >> 7) & 0x03) as u8);
        header[9] = (((scr_ext << 1) & 0xFE) as u8) | 0x01;
        header[10] = ((rate >> 14) & 0xFF) as u8;
        header[11] = ((rate >> 6) & 0xFF) as u8;
        header[12] = (((rate << 2) & 0xFC) as u8) | 0x03;
        // reserved + pack_stuffing_length = 0
        header[13] = 0xF8;
        buf.put(&header);
    }

    fn system_header_size(&self) -> usize {
        12 + 3 * self.streams.len()
    }

    fn write_system_header(&self, buf: &mut MuxedBuffer) {
        let audio_bound = self.streams.iter().filter(|s| !s.kind.is_video()).count() as u8;
        let video_bound = self.streams.iter().filter(|s| s.kind.is_video()).count() as u8;
        let rate = self.mux_rate;
        let header_length = (6 + 3 * self.streams.len()) as u16;

        let mut header = Vec::with_capacity(self.system_header_size());
        header.extend_from_slice(&SYSTEM_HEADER_START);
        header.extend_from_slice(&header_length.to_be_bytes());
        header.push(0x80 | ((rate >> 15) & 0x7F) as u8);
        header.push(((rate >> 7) & 0xFF) as u8);
        header.push((((rate & 0x7F) << 1) as u8) | 0x01);
        // audio_bound + fixed_flag = 0 + CSPS_flag = 0
        header.push((audio_bound & 0x3F) << 2);
        // audio lock + video lock + marker + video_bound
        header.push(0xE0 | (video_bound & 0x1F));
        // packet_rate_restriction_flag = 0 + reserved
        header.push(0x7F);
        for stream in &self.streams {
            header.push(stream.stream_id);
            if stream.kind.is_video() {
                // P-STD buffer: scale 1024 bytes, bound 400 -> 400 KiB
                header.push(0xE0 | (400u16 >> 8) as u8);
                header.push((400u16 & 0xFF) as u8);
            } else {
                // scale 128 bytes, bound 32 -> 4 KiB
                header.push(0xC0);
                header.push(32);
            }
        }
        buf.put(&header);
    }

    fn psm_size(&self) -> usize {
        16 + 4 * self.streams.len()
    }

    fn write_psm(&self, buf: &mut MuxedBuffer) {
        let es_map_length = (4 * self.streams.len()) as u16;
        let psm_length = 10 + es_map_length;

        let mut psm = Vec::with_capacity(self.psm_size());
        psm.extend_from_slice(&PSM_START);
        psm.extend_from_slice(&psm_length.to_be_bytes());
        // current_next_indicator + reserved + version
        psm.push(0xE0 | self.psm_version);
        // reserved + marker
        psm.push(0xFF);
        // program_stream_info_length
        psm.extend_from_slice(&[0x00, 0x00]);
        psm.extend_from_slice(&es_map_length.to_be_bytes());
        for stream in &self.streams {
            psm.push(stream.kind.stream_type());
            psm.push(stream.stream_id);
            // elementary_stream_info_length
            psm.extend_from_slice(&[0x00, 0x00]);
        }
        let crc = crc32_mpeg2(&psm);
        psm.extend_from_slice(&crc.to_be_bytes());
        buf.put(&psm);
    }
}

impl Default for PsMuxer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_random_access(kind: StreamKind, data: &[u8]) -> bool {
    match kind {
        StreamKind::H264 => h264::is_keyframe(data),
        StreamKind::Aac => false,
    }
}

fn pes_header_data_len(first: bool, with_dts: bool) -> usize {
    match (first, with_dts) {
        (true, true) => 10,
        (true, false) => 5,
        (false, _) => 0,
    }
}

fn pes_size(payload: usize, with_dts: bool) -> usize {
    let chunks = payload.div_ceil(MAX_PES_PAYLOAD).max(1);
    let headers = 9 * chunks + pes_header_data_len(true, with_dts);
    headers + payload
}

fn write_pes(buf: &mut MuxedBuffer, stream_id: u8, pts: u64, dts: u64, data: &[u8]) {
    let with_dts = pts != dts;
    let mut offset = 0usize;
    let mut first = true;

    loop {
        let chunk = &data[offset..data.len().min(offset + MAX_PES_PAYLOAD)];
        let header_data_len = pes_header_data_len(first, with_dts);
        let pes_packet_length = (3 + header_data_len + chunk.len()) as u16;

        let mut header = Vec::with_capacity(9 + header_data_len);
        header.extend_from_slice(&[0x00, 0x00, 0x01, stream_id]);
        header.extend_from_slice(&pes_packet_length.to_be_bytes());
        // '10' + no scrambling; data_alignment_indicator on the first PES
        header.push(if first { 0x84 } else { 0x80 });
        let flags = match (first, with_dts) {
            (true, true) => 0xC0,
            (true, false) => 0x80,
            (false, _) => 0x00,
        };
        header.push(flags);
        header.push(header_data_len as u8);
        if first {
            if with_dts {
                header.extend_from_slice(&encode_timestamp(pts, 0x03));
                header.extend_from_slice(&encode_timestamp(dts, 0x01));
            } else {
                header.extend_from_slice(&encode_timestamp(pts, 0x02));
            }
        }
        buf.put(&header);
        buf.put(chunk);

        offset += chunk.len();
        first = false;
        if offset >= data.len() {
            break;
        }
    }
}

/// Encode a 33-bit timestamp for a PES header.
///
/// Format: prefix(4) + ts[32..30](3) + 1 + ts[29..15](15) + 1 + ts[14..0](15) + 1
pub(crate) fn encode_timestamp(ts: u64, prefix: u8) -> [u8; 5] {
    let mut bytes = [0u8; 5];
    bytes[0] = (prefix << 4) | ((((ts >> 30) & 0x07) as u8) << 1) | 0x01;
    bytes[1] = ((ts >> 22) & 0xFF) as u8;
    bytes[2] = ((((ts >> 15) & 0x7F) << 1) as u8) | 0x01;
    bytes[3] = ((ts >> 7) & 0xFF) as u8;
    bytes[4] = (((ts & 0x7F) << 1) as u8) | 0x01;
    bytes
}

/// Inverse of [`encode_timestamp`].
pub(crate) fn decode_timestamp(bytes: &[u8]) -> u64 {
    (((bytes[0] as u64 >> 1) & 0x07) << 30)
        | ((bytes[1] as u64) << 22)
        | (((bytes[2] as u64) >> 1) << 15)
        | ((bytes[3] as u64) << 7)
        | ((bytes[4] as u64) >> 1)
}

/// CRC-32/MPEG-2: polynomial 0x04C11DB7, init all ones, no reflection.
pub(crate) fn crc32_mpeg2(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}
