use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use super::{Frame, FrameIndex, FrameSource};
use crate::error::Result;
use crate::flv::{FlvDemuxer, FlvPacket, FlvPacketKind, FlvPacketSink, FlvReader};
use crate::media::StreamKind;

/// H.264 video track of an FLV file.
///
/// Frames carry the FLV tag timestamps. Audio is dropped. A truncated or
/// malformed tag ends the stream at the last good frame.
#[derive(Debug)]
pub struct FlvFileSource {
    index: FrameIndex,
}

struct Indexer<'a> {
    index: &'a mut FrameIndex,
}

impl FlvPacketSink for Indexer<'_> {
    fn on_packet(&mut self, packet: FlvPacket<'_>) -> Result<()> {
        if packet.kind == FlvPacketKind::Avc {
            self.index
                .push(packet.data, packet.dts, packet.pts, packet.keyframe);
        }
        Ok(())
    }
}

impl FlvFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = Self::from_reader(BufReader::new(File::open(path)?))?;
        tracing::info!(
            path = %path.display(),
            frames = source.index.len(),
            "FLV file loaded"
        );
        Ok(source)
    }

    /// Demux every video frame of `reader`. Only a bad file header is an error.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = FlvReader::new(reader)?;
        let mut demuxer = FlvDemuxer::new();
        let mut index = FrameIndex::default();

        loop {
            let tag = match reader.next_tag() {
                Ok(Some(tag)) => tag,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "FLV read failed, ending stream");
                    break;
                }
            };
            if let Err(e) = demuxer.input(&tag, &mut Indexer { index: &mut index }) {
                tracing::warn!(
                    error = %e,
                    timestamp = tag.timestamp,
                    "malformed FLV tag, ending stream"
                );
                break;
            }
        }

        index.tail_ms = match index.frames.as_slice() {
            [.., prev, last] => last.dts.saturating_sub(prev.dts) as u64,
            _ => 0,
        };
        Ok(Self { index })
    }

    pub fn frame_count(&self) -> usize {
        self.index.len()
    }
}

impl FrameSource for FlvFileSource {
    fn next_frame(&mut self) -> Option<Frame<'_>> {
        self.index.next_frame()
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.index.seek(position_ms)
    }

    fn duration(&self) -> Result<u64> {
        self.index.duration()
    }

    fn position(&self) -> u64 {
        self.index.position
    }

    fn stream_kind(&self) -> StreamKind {
        StreamKind::H264
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flv::demuxer::tests::{avc_frame, avc_sequence_header};
    use crate::flv::reader::{TAG_AUDIO, TAG_VIDEO, encode_tag, file_header};

    fn clip() -> Vec<u8> {
        let mut file = file_header();
        file.extend(encode_tag(TAG_VIDEO, 0, &avc_sequence_header()));
        file.extend(encode_tag(TAG_AUDIO, 0, &[0xAF, 0x00, 0x12, 0x10]));
        for i in 0..6u32 {
            let key = i % 3 == 0;
            let nal: &[u8] = if key { &[0x65, 0x88] } else { &[0x41, 0x9a] };
            file.extend(encode_tag(TAG_VIDEO, i * 40, &avc_frame(key, 0, &[nal])));
            file.extend(encode_tag(TAG_AUDIO, i * 40 + 5, &[0xAF, 0x01, 1, 2]));
        }
        file
    }

    #[test]
    fn video_frames_indexed_with_tag_times() {
        let mut source = FlvFileSource::from_reader(clip().as_slice()).unwrap();
        assert_eq!(source.frame_count(), 6);
        assert_eq!(source.duration().unwrap(), 240);

        let first = source.next_frame().unwrap();
        assert!(first.keyframe);
        assert_eq!(&first.data[..5], &[0, 0, 0, 1, 0x67]);

        source.seek(200).unwrap();
        assert_eq!(source.next_frame().unwrap().dts, 120);
    }

    #[test]
    fn corrupt_tag_keeps_earlier_frames() {
        let mut file = clip();
        // NAL length pointing past the tag
        let mut bad = avc_frame(false, 0, &[&[0x41]]);
        bad[8] = 0x7F;
        file.extend(encode_tag(TAG_VIDEO, 240, &bad));
        file.extend(encode_tag(TAG_VIDEO, 280, &avc_frame(false, 0, &[&[0x41]])));

        let source = FlvFileSource::from_reader(file.as_slice()).unwrap();
        assert_eq!(source.frame_count(), 6);
    }

    #[test]
    fn not_flv_is_error() {
        assert!(FlvFileSource::from_reader(&b"RIFF....WAVE"[..]).is_err());
    }
}
