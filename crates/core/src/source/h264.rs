use std::path::Path;
use std::time::Duration;

use super::{Frame, FrameIndex, FrameSource};
use crate::error::Result;
use crate::media::StreamKind;
use crate::media::h264;

/// Raw H.264 Annex B file played at a fixed frame rate.
///
/// The file is split into access units on load; frame `i` has
/// `dts = pts = i * frame_interval`.
#[derive(Debug)]
pub struct H264FileSource {
    index: FrameIndex,
}

impl H264FileSource {
    pub fn open(path: impl AsRef<Path>, frame_interval: Duration) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let source = Self::from_bytes(&data, frame_interval);
        tracing::info!(
            path = %path.display(),
            bytes = data.len(),
            frames = source.index.len(),
            "H.264 file loaded"
        );
        Ok(source)
    }

    /// Index an in-memory Annex B stream. Data without start codes yields an
    /// empty source.
    pub fn from_bytes(data: &[u8], frame_interval: Duration) -> Self {
        let interval = frame_interval.as_millis() as u64;
        let mut index = FrameIndex {
            tail_ms: interval,
            ..FrameIndex::default()
        };
        for (i, unit) in h264::split_access_units(data).into_iter().enumerate() {
            let bytes = &data[unit];
            let time = (i as u64 * interval) as u32;
            index.push(bytes, time, time, h264::is_keyframe(bytes));
        }
        Self { index }
    }

    pub fn frame_count(&self) -> usize {
        self.index.len()
    }
}

impl FrameSource for H264FileSource {
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
