//! File-backed frame sources.
//!
//! A [`FrameSource`] hands out one encoded frame at a time. Both sources here
//! load the container up front and index its frames, so seeking is an index
//! lookup and [`next_frame`](FrameSource::next_frame) borrows straight from
//! the loaded bytes.

pub mod flv;
pub mod h264;

use std::ops::Range;

pub use flv::FlvFileSource;
pub use h264::H264FileSource;

use crate::error::{Result, StreamError};
use crate::media::StreamKind;

/// One encoded frame, borrowed from its source until the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Decode time in milliseconds.
    pub dts: u32,
    /// Presentation time in milliseconds.
    pub pts: u32,
    pub data: &'a [u8],
    pub keyframe: bool,
}

/// Sequential reader over a media file.
pub trait FrameSource: Send {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Option<Frame<'_>>;

    /// Move the cursor to the last keyframe at or before `position_ms`.
    fn seek(&mut self, position_ms: u64) -> Result<()>;

    /// Total duration in milliseconds.
    fn duration(&self) -> Result<u64>;

    /// Time of the last frame returned, or of the seek target.
    fn position(&self) -> u64;

    fn stream_kind(&self) -> StreamKind;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexedFrame {
    range: Range<usize>,
    dts: u32,
    pts: u32,
    keyframe: bool,
}

/// Frames of a fully loaded file plus a read cursor.
#[derive(Debug, Default)]
struct FrameIndex {
    data: Vec<u8>,
    frames: Vec<IndexedFrame>,
    /// Time one frame occupies past the last dts.
    tail_ms: u64,
    cursor: usize,
    position: u64,
}

impl FrameIndex {
    fn push(&mut self, bytes: &[u8], dts: u32, pts: u32, keyframe: bool) {
        let start = self.data.len();
        self.data.extend_from_slice(bytes);
        self.frames.push(IndexedFrame {
            range: start..self.data.len(),
            dts,
            pts,
            keyframe,
        });
    }

    fn len(&self) -> usize {
        self.frames.len()
    }

    fn next_frame(&mut self) -> Option<Frame<'_>> {
        let frame = self.frames.get(self.cursor)?;
        self.cursor += 1;
        self.position = frame.dts as u64;
        Some(Frame {
            dts: frame.dts,
            pts: frame.pts,
            data: &self.data[frame.range.clone()],
            keyframe: frame.keyframe,
        })
    }

    fn duration(&self) -> Result<u64> {
        let last = self.frames.last().ok_or(StreamError::DurationUnknown)?;
        Ok(last.dts as u64 + self.tail_ms)
    }

    fn seek(&mut self, position_ms: u64) -> Result<()> {
        let duration = self.duration()?;
        if position_ms > duration {
            return Err(StreamError::SeekOutOfRange {
                position: position_ms,
                duration,
            });
        }

        let target = self
            .frames
            .iter()
            .enumerate()
            .take_while(|(_, f)| f.dts as u64 <= position_ms)
            .filter(|(_, f)| f.keyframe)
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0);

        self.cursor = target;
        self.position = self.frames[target].dts as u64;
        tracing::debug!(
            requested_ms = position_ms,
            keyframe_ms = self.position,
            frame = target,
            "source seek"
        );
        Ok(())
    }
}
