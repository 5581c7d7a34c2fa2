//! H.264 Annex B byte-stream helpers.
//!
//! The PS muxer carries Annex B access units unchanged, so nothing here
//! rewrites NAL units. These helpers only locate them, to split a file
//! into frames and to spot keyframes.

use std::ops::Range;

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const NAL_AUD: u8 = 9;

/// Location of one NAL unit inside an Annex B buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalLocation {
    /// Offset of the start code preceding the NAL.
    pub start_code: usize,
    /// Offset of the NAL header byte.
    pub payload: usize,
    /// One past the last NAL byte.
    pub end: usize,
}

impl NalLocation {
    pub fn nal_type(&self, data: &[u8]) -> u8 {
        data[self.payload] & 0x1f
    }

    pub fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.payload..self.end]
    }
}

/// Locate NAL units in an Annex B bitstream.
///
/// Recognizes both 4-byte `00 00 00 01` and 3-byte `00 00 01` start codes.
/// The start code length is tracked per NAL so boundaries stay correct when
/// both forms appear in one stream. Empty NALs are dropped.
pub fn locate_nal_units(data: &[u8]) -> Vec<NalLocation> {
    let mut i = 0usize;
    // (start_code_offset, nal_payload_offset)
    let mut starts: Vec<(usize, usize)> = Vec::new();

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
            starts.push((i, i + 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut nals = Vec::with_capacity(starts.len());
    for (idx, &(start_code, payload)) in starts.iter().enumerate() {
        let end = match starts.get(idx + 1) {
            Some(&(next_start_code, _)) => next_start_code,
            None => data.len(),
        };
        if payload < end {
            nals.push(NalLocation {
                start_code,
                payload,
                end,
            });
        }
    }
    nals
}

/// Extract NAL unit payloads (without start codes) from an Annex B bitstream.
pub fn extract_nal_units(data: &[u8]) -> Vec<&[u8]> {
    locate_nal_units(data)
        .iter()
        .map(|nal| nal.bytes(data))
        .collect()
}

fn is_vcl(nal_type: u8) -> bool {
    (NAL_SLICE..=NAL_IDR).contains(&nal_type)
}

/// `first_mb_in_slice` is `ue(v)` coded right after the NAL header, so it is
/// zero exactly when the first bit of the slice header is set.
fn starts_new_picture(nal: &[u8]) -> bool {
    nal.len() > 1 && nal[1] & 0x80 != 0
}

/// Split an Annex B stream into access units.
///
/// A new access unit begins at an access unit delimiter, at SEI/SPS/PPS (or
/// the reserved 14..=18 prefix types) following a slice, or at a slice with
/// `first_mb_in_slice == 0` following a slice. Each returned range starts at
/// the start code of the unit's first NAL, so the slices can be handed to the
/// muxer as self-contained Annex B frames.
pub fn split_access_units(data: &[u8]) -> Vec<Range<usize>> {
    let nals = locate_nal_units(data);
    let mut units = Vec::new();
    let mut unit_start: Option<usize> = None;
    let mut seen_vcl = false;

    for nal in &nals {
        let nal_type = nal.nal_type(data);
        let boundary = match nal_type {
            NAL_AUD => true,
            NAL_SEI | NAL_SPS | NAL_PPS | 14..=18 => seen_vcl,
            t if is_vcl(t) => seen_vcl && starts_new_picture(nal.bytes(data)),
            _ => false,
        };

        if boundary {
            if let Some(start) = unit_start.take() {
                units.push(start..nal.start_code);
            }
            seen_vcl = false;
        }
        if unit_start.is_none() {
            unit_start = Some(nal.start_code);
        }
        if is_vcl(nal_type) {
            seen_vcl = true;
        }
    }

    if let (Some(start), Some(last)) = (unit_start, nals.last()) {
        units.push(start..last.end);
    }
    units
}

/// Whether the Annex B access unit contains an IDR slice.
pub fn is_keyframe(access_unit: &[u8]) -> bool {
    locate_nal_units(access_unit)
        .iter()
        .any(|nal| nal.nal_type(access_unit) == NAL_IDR)
}
