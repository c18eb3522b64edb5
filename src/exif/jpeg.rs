//! JPEG APP1 segment splicing.

use thiserror::Error;

use super::encode::{EXIF_HEADER, MAX_APP1_PAYLOAD};

const SOI: [u8; 2] = [0xFF, 0xD8];
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;
const SOS: u8 = 0xDA;
const EOI: u8 = 0xD9;

#[derive(Debug, Error, PartialEq)]
pub enum JpegError {
    #[error("not a JPEG file (missing SOI marker)")]
    NotJpeg,
    #[error("truncated JPEG segment at offset {0}")]
    Truncated(usize),
    #[error("EXIF payload of {0} bytes does not fit in an APP1 segment")]
    PayloadTooLarge(usize),
}

/// A marker segment before the scan data.
struct Segment<'a> {
    marker: u8,
    /// Full segment bytes including the marker.
    raw: &'a [u8],
}

impl Segment<'_> {
    fn is_exif(&self) -> bool {
        self.marker == APP1 && self.raw.get(4..).is_some_and(|p| p.starts_with(EXIF_HEADER))
    }
}

/// Split a JPEG into its header segments and the remainder (SOS onward).
fn split_segments(jpeg: &[u8]) -> Result<(Vec<Segment<'_>>, &[u8]), JpegError> {
    if !jpeg.starts_with(&SOI) {
        return Err(JpegError::NotJpeg);
    }

    let mut segments = Vec::new();
    let mut pos = 2;
    loop {
        if pos + 2 > jpeg.len() {
            return Err(JpegError::Truncated(pos));
        }
        if jpeg[pos] != 0xFF {
            return Err(JpegError::Truncated(pos));
        }
        let marker = jpeg[pos + 1];
        // Fill bytes.
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == SOS || marker == EOI {
            return Ok((segments, &jpeg[pos..]));
        }
        // Standalone markers carry no length.
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            segments.push(Segment {
                marker,
                raw: &jpeg[pos..pos + 2],
            });
            pos += 2;
            continue;
        }
        if pos + 4 > jpeg.len() {
            return Err(JpegError::Truncated(pos));
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let end = pos + 2 + len;
        if len < 2 || end > jpeg.len() {
            return Err(JpegError::Truncated(pos));
        }
        segments.push(Segment {
            marker,
            raw: &jpeg[pos..end],
        });
        pos = end;
    }
}

/// Replace any existing EXIF APP1 segment with `exif` (an `Exif\0\0`
/// payload). The new segment goes right after SOI, or after a leading JFIF
/// APP0 segment.
pub fn insert_exif(jpeg: &[u8], exif: &[u8]) -> Result<Vec<u8>, JpegError> {
    if exif.len() > MAX_APP1_PAYLOAD {
        return Err(JpegError::PayloadTooLarge(exif.len()));
    }
    let (segments, rest) = split_segments(jpeg)?;

    let mut out = Vec::with_capacity(jpeg.len() + exif.len() + 4);
    out.extend_from_slice(&SOI);

    let mut kept = segments.iter().filter(|s| !s.is_exif()).peekable();
    if let Some(first) = kept.peek() {
        if first.marker == APP0 {
            out.extend_from_slice(first.raw);
            kept.next();
        }
    }

    out.extend_from_slice(&[0xFF, APP1]);
    out.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(exif);

    for segment in kept {
        out.extend_from_slice(segment.raw);
    }
    out.extend_from_slice(rest);
    Ok(out)
}

/// The `Exif\0\0` payload of the first EXIF APP1 segment, if any.
pub fn find_exif(jpeg: &[u8]) -> Option<&[u8]> {
    let (segments, _) = split_segments(jpeg).ok()?;
    segments
        .into_iter()
        .find(|s| s.is_exif())
        .map(|s| &s.raw[4..])
}

pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&SOI)
}
