//! FLV input: tag reader, AAC/AVC demuxer and an elementary stream writer.
//!
//! ```text
//! FlvReader ──FlvTag──► FlvDemuxer ──FlvPacket──► FlvPacketSink
//!                                               (ElementaryStreamWriter,
//!                                                FlvFileSource indexer)
//! ```

pub mod demuxer;
pub mod reader;
pub mod writer;

use std::io::Read;

pub use demuxer::{FlvDemuxer, FlvPacket, FlvPacketKind, FlvPacketSink};
pub use reader::{FlvHeader, FlvReader, FlvTag};
pub use writer::ElementaryStreamWriter;

use crate::error::Result;

/// Run every tag of `reader` through a fresh demuxer into `sink`.
///
/// Returns the number of tags read.
pub fn demux_all<R: Read>(reader: &mut FlvReader<R>, sink: &mut dyn FlvPacketSink) -> Result<u64> {
    let mut demuxer = FlvDemuxer::new();
    while let Some(tag) = reader.next_tag()? {
        demuxer.input(&tag, sink)?;
    }
    Ok(reader.tags_read())
}
