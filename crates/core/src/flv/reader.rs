use std::io::{self, Read};

use crate::error::{FlvErrorKind, Result};

pub const TAG_AUDIO: u8 = 8;
pub const TAG_VIDEO: u8 = 9;
pub const TAG_SCRIPT: u8 = 18;

const FILE_HEADER_SIZE: usize = 9;
const TAG_HEADER_SIZE: usize = 11;

/// Fields of the 9-byte FLV file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvHeader {
    pub version: u8,
    pub has_audio: bool,
    pub has_video: bool,
}

/// One FLV tag with its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlvTag {
    pub tag_type: u8,
    /// Milliseconds, extended to 32 bits with the `TimestampExtended` byte.
    pub timestamp: u32,
    pub data: Vec<u8>,
}

/// Reads FLV tags from a byte stream.
#[derive(Debug)]
pub struct FlvReader<R> {
    inner: R,
    header: FlvHeader,
    tags: u64,
}

/// Fill `buf` as far as the stream allows and report how much was read.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<R: Read> FlvReader<R> {
    /// Validate the file header and position the reader on the first tag.
    pub fn new(mut inner: R) -> Result<Self> {
        let mut header = [0u8; FILE_HEADER_SIZE];
        if read_up_to(&mut inner, &mut header)? < FILE_HEADER_SIZE || &header[0..3] != b"FLV" {
            return Err(FlvErrorKind::InvalidHeader.into());
        }
        let data_offset = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
        if data_offset < FILE_HEADER_SIZE {
            return Err(FlvErrorKind::InvalidHeader.into());
        }

        // Skip any header extension, then PreviousTagSize0.
        let skip = (data_offset - FILE_HEADER_SIZE + 4) as u64;
        if io::copy(&mut (&mut inner).take(skip), &mut io::sink())? < skip {
            return Err(FlvErrorKind::InvalidHeader.into());
        }

        let header = FlvHeader {
            version: header[3],
            has_audio: header[4] & 0x04 != 0,
            has_video: header[4] & 0x01 != 0,
        };
        tracing::debug!(?header, "FLV header");
        Ok(Self {
            inner,
            header,
            tags: 0,
        })
    }

    pub fn header(&self) -> FlvHeader {
        self.header
    }

    /// Number of tags read so far.
    pub fn tags_read(&self) -> u64 {
        self.tags
    }

    /// Read the next tag. A clean or truncated end of file yields `Ok(None)`.
    pub fn next_tag(&mut self) -> Result<Option<FlvTag>> {
        let mut header = [0u8; TAG_HEADER_SIZE];
        match read_up_to(&mut self.inner, &mut header)? {
            0 => return Ok(None),
            TAG_HEADER_SIZE => {}
            n => {
                tracing::warn!(bytes = n, tag = self.tags, "truncated FLV tag header");
                return Ok(None);
            }
        }

        let tag_type = header[0] & 0x1f;
        let size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
        let timestamp = u32::from_be_bytes([header[7], header[4], header[5], header[6]]);

        let mut data = vec![0u8; size];
        let got = read_up_to(&mut self.inner, &mut data)?;
        if got < size {
            tracing::warn!(expected = size, got, tag = self.tags, "truncated FLV tag body");
            return Ok(None);
        }

        // PreviousTagSize may be missing after the last tag.
        let mut previous = [0u8; 4];
        read_up_to(&mut self.inner, &mut previous)?;

        self.tags += 1;
        Ok(Some(FlvTag {
            tag_type,
            timestamp,
            data,
        }))
    }
}

impl<R: Read> Iterator for FlvReader<R> {
    type Item = Result<FlvTag>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_tag().transpose()
    }
}

/// Serialize a tag the way it appears on disk, PreviousTagSize included.
#[cfg(test)]
pub(crate) fn encode_tag(tag_type: u8, timestamp: u32, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(TAG_HEADER_SIZE + data.len() + 4);
    out.push(tag_type);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(&timestamp.to_be_bytes()[1..]);
    out.push((timestamp >> 24) as u8);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(data);
    out.extend_from_slice(&((TAG_HEADER_SIZE + data.len()) as u32).to_be_bytes());
    out
}

#[cfg(test)]
pub(crate) fn file_header() -> Vec<u8> {
    vec![b'F', b'L', b'V', 1, 0x05, 0, 0, 0, 9, 0, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;

    #[test]
    fn reads_tags_in_order() {
        let mut file = file_header();
        file.extend(encode_tag(TAG_SCRIPT, 0, b"meta"));
        file.extend(encode_tag(TAG_VIDEO, 0x0100_0002, &[0x17, 0x01]));

        let mut reader = FlvReader::new(file.as_slice()).unwrap();
        assert!(reader.header().has_audio && reader.header().has_video);

        let script = reader.next_tag().unwrap().unwrap();
        assert_eq!(script.tag_type, TAG_SCRIPT);
        assert_eq!(script.data, b"meta");

        let video = reader.next_tag().unwrap().unwrap();
        assert_eq!(video.tag_type, TAG_VIDEO);
        assert_eq!(video.timestamp, 0x0100_0002);
        assert!(reader.next_tag().unwrap().is_none());
        assert_eq!(reader.tags_read(), 2);
    }

    #[test]
    fn truncated_tag_ends_stream() {
        let mut file = file_header();
        file.extend(encode_tag(TAG_AUDIO, 5, &[0xAF, 0x01, 1, 2]));
        let mut cut = encode_tag(TAG_AUDIO, 10, &[0xAF, 0x01, 1, 2, 3, 4]);
        cut.truncate(14);
        file.extend(cut);

        let tags: Vec<FlvTag> = FlvReader::new(file.as_slice())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].timestamp, 5);
    }

    #[test]
    fn header_offset_past_end_rejected() {
        // data offset of 4 GiB in a file that ends after the header
        let file = b"FLV\x01\x05\xFF\xFF\xFF\xFF\x00\x00\x00\x00";
        let err = FlvReader::new(&file[..]).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Flv {
                kind: FlvErrorKind::InvalidHeader
            }
        ));
    }

    #[test]
    fn header_extension_skipped() {
        let mut file = b"FLV\x01\x05\x00\x00\x00\x0C".to_vec();
        file.extend_from_slice(&[0xEE; 3]);
        file.extend_from_slice(&[0; 4]);
        file.extend(encode_tag(TAG_VIDEO, 7, &[0x17, 0x01]));
        let mut reader = FlvReader::new(file.as_slice()).unwrap();
        assert_eq!(reader.next_tag().unwrap().unwrap().timestamp, 7);
    }

    #[test]
    fn bad_signature_rejected() {
        let err = FlvReader::new(&b"FLX\x01\x05\x00\x00\x00\x09\x00\x00\x00\x00"[..]).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Flv {
                kind: FlvErrorKind::InvalidHeader
            }
        ));
        assert!(FlvReader::new(&b"FL"[..]).is_err());
    }
}
