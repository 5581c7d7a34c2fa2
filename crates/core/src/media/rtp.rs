/// Size of the RTP fixed header with no CSRCs (RFC 3550 §5.1).
pub const RTP_HEADER_SIZE: usize = 12;

/// RTP fixed header state for one outgoing stream.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The timestamp is set once per muxed PS buffer, so every fragment of a
/// buffer shares it. No padding, extension or CSRCs are ever written.
#[derive(Debug)]
pub struct RtpHeader {
    pub pt: u8,
    pub ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32, initial_sequence: u16) -> Self {
        tracing::debug!(pt, ssrc = format_args!("{:#010X}", ssrc), initial_sequence, "RTP stream header");
        Self {
            pt,
            ssrc,
            sequence: initial_sequence,
            timestamp: 0,
        }
    }

    /// Sequence number of the next packet.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: u32) {
        self.timestamp = timestamp;
    }

    /// Write the 12-byte header into the front of `out` and step the
    /// sequence number. `marker` flags the last fragment of a PS buffer.
    ///
    /// # Panics
    ///
    /// If `out` is shorter than [`RTP_HEADER_SIZE`].
    pub fn write_to(&mut self, out: &mut [u8], marker: bool) {
        let out = &mut out[..RTP_HEADER_SIZE];
        out[0] = 0x80;
        out[1] = (u8::from(marker) << 7) | (self.pt & 0x7f);
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        self.sequence = self.sequence.wrapping_add(1);
    }
}

/// Fields read back from a serialized RTP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpFields {
    pub marker: bool,
    pub pt: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    /// Header length including CSRC list.
    pub header_len: usize,
}

impl RtpFields {
    /// Parse the fixed header of an RTP packet. Returns `None` for anything
    /// shorter than its header or not version 2.
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() < RTP_HEADER_SIZE || packet[0] >> 6 != 2 {
            return None;
        }
        let csrc_count = (packet[0] & 0x0f) as usize;
        let header_len = RTP_HEADER_SIZE + 4 * csrc_count;
        if packet.len() < header_len {
            return None;
        }
        Some(Self {
            marker: packet[1] & 0x80 != 0,
            pt: packet[1] & 0x7f,
            sequence: u16::from_be_bytes([packet[2], packet[3]]),
            timestamp: u32::from_be_bytes([packet[4], packet[5], packet[6], packet[7]]),
            ssrc: u32::from_be_bytes([packet[8], packet[9], packet[10], packet[11]]),
            header_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(header: &mut RtpHeader, marker: bool) -> [u8; RTP_HEADER_SIZE] {
        let mut buf = [0u8; RTP_HEADER_SIZE];
        header.write_to(&mut buf, marker);
        buf
    }

    #[test]
    fn marker_only_when_asked() {
        let mut h = RtpHeader::new(96, 0xAABBCCDD, 0);
        let first = written(&mut h, false);
        let last = written(&mut h, true);
        assert_eq!(first[0] >> 6, 2);
        assert_eq!(first[1], 96);
        assert_eq!(last[1], 0x80 | 96);
    }

    #[test]
    fn sequence_wraps() {
        let mut h = RtpHeader::new(96, 1, u16::MAX);
        let buf = written(&mut h, false);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), u16::MAX);
        assert_eq!(h.sequence(), 0);
    }

    #[test]
    fn fragments_share_timestamp() {
        let mut h = RtpHeader::new(96, 0x11223344, 700);
        h.set_timestamp(90_000);
        let a = RtpFields::parse(&written(&mut h, false)).unwrap();
        let b = RtpFields::parse(&written(&mut h, true)).unwrap();
        assert_eq!(a.timestamp, 90_000);
        assert_eq!(b.timestamp, 90_000);
        assert_eq!(a.sequence, 700);
        assert_eq!(b.sequence, 701);
        assert!(b.marker && !a.marker);
        assert_eq!(b.ssrc, 0x11223344);
        assert_eq!(b.header_len, 12);
    }

    #[test]
    fn header_longer_than_packet() {
        assert!(RtpFields::parse(&[0x80, 96, 0]).is_none());
        // version 1
        let mut buf = written(&mut RtpHeader::new(96, 1, 0), false);
        buf[0] = 0x40;
        assert!(RtpFields::parse(&buf).is_none());
        // CSRC count 2 with no CSRCs following
        buf[0] = 0x82;
        assert!(RtpFields::parse(&buf).is_none());
    }
}
