use std::io::Write;

use super::demuxer::{FlvPacket, FlvPacketKind, FlvPacketSink, adts_frame_length};
use crate::error::Result;

/// `HH:MM:SS.mmm` for a millisecond timestamp.
pub fn format_timestamp(ms: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        ms / 3_600_000,
        (ms / 60_000) % 60,
        (ms / 1000) % 60,
        ms % 1000
    )
}

#[derive(Debug, Default, Clone, Copy)]
struct LastTimes {
    pts: u32,
    dts: u32,
}

impl LastTimes {
    /// Differences against the previous packet, then remember this one.
    fn diff(&mut self, pts: u32, dts: u32) -> (i32, i32) {
        let diff = (pts.wrapping_sub(self.pts) as i32, dts.wrapping_sub(self.dts) as i32);
        self.pts = pts;
        self.dts = dts;
        diff
    }
}

/// Writes demuxed AAC and H.264 to two byte sinks, logging each packet.
#[derive(Debug)]
pub struct ElementaryStreamWriter<A, V> {
    audio: A,
    video: V,
    last_audio: LastTimes,
    last_video: LastTimes,
    audio_frames: u64,
    video_frames: u64,
}

impl<A: Write, V: Write> ElementaryStreamWriter<A, V> {
    pub fn new(audio: A, video: V) -> Self {
        Self {
            audio,
            video,
            last_audio: LastTimes::default(),
            last_video: LastTimes::default(),
            audio_frames: 0,
            video_frames: 0,
        }
    }

    pub fn audio_frames(&self) -> u64 {
        self.audio_frames
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames
    }

    /// Flush both writers and hand them back.
    pub fn finish(mut self) -> Result<(A, V)> {
        self.audio.flush()?;
        self.video.flush()?;
        Ok((self.audio, self.video))
    }
}

impl<A: Write, V: Write> FlvPacketSink for ElementaryStreamWriter<A, V> {
    fn on_packet(&mut self, packet: FlvPacket<'_>) -> Result<()> {
        let (pts_diff, dts_diff) = match packet.kind {
            FlvPacketKind::Aac => self.last_audio.diff(packet.pts, packet.dts),
            FlvPacketKind::Avc => self.last_video.diff(packet.pts, packet.dts),
        };
        tracing::info!(
            "[{}] pts: {}, dts: {}, diff: {:03}/{:03}",
            packet.kind,
            format_timestamp(packet.pts),
            format_timestamp(packet.dts),
            pts_diff,
            dts_diff
        );

        match packet.kind {
            FlvPacketKind::Aac => {
                let declared = adts_frame_length(packet.data);
                if declared != Some(packet.data.len()) {
                    tracing::warn!(
                        ?declared,
                        actual = packet.data.len(),
                        "ADTS length mismatch"
                    );
                }
                self.audio.write_all(packet.data)?;
                self.audio_frames += 1;
            }
            FlvPacketKind::Avc => {
                self.video.write_all(packet.data)?;
                self.video_frames += 1;
            }
        }
        Ok(())
    }
}
