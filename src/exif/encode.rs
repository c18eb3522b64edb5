//! EXIF block assembly.
//!
//! Collects tags for IFD0, the Exif sub-IFD and the GPS sub-IFD, then lets
//! `kamadak-exif`'s writer lay out a little-endian TIFF structure. The result
//! is prefixed with `Exif\0\0` so it can go straight into a JPEG APP1 segment.

use std::io::Cursor;

use ::exif::experimental::Writer;
use ::exif::{Context, Field, In, Rational, Tag, Value};
use thiserror::Error;

pub const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Largest payload an APP1 segment can carry (length field minus itself).
pub const MAX_APP1_PAYLOAD: usize = 65_533;

#[derive(Debug, Error)]
pub enum ExifError {
    #[error("{tag}: ASCII value contains non-ASCII or NUL characters")]
    NonAscii { tag: Tag },
    #[error("{tag}: invalid value {value}")]
    InvalidValue { tag: Tag, value: String },
    #[error("encoded block is {size} bytes, APP1 limit is 65533")]
    TooLarge { size: usize },
    #[error("TIFF writer: {0}")]
    Writer(#[from] ::exif::Error),
}

/// Tags of one primary image, in insertion order.
#[derive(Debug, Default)]
pub struct ExifBlock {
    fields: Vec<Field>,
}

impl ExifBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a tag, replacing any earlier value.
    pub fn set(&mut self, tag: Tag, value: Value) {
        self.fields.retain(|f| f.tag != tag);
        self.fields.push(Field {
            tag,
            ifd_num: In::PRIMARY,
            value,
        });
    }

    /// Set an ASCII tag. The writer adds the terminating NUL.
    pub fn set_ascii(&mut self, tag: Tag, text: &str) -> Result<(), ExifError> {
        if !text.is_ascii() || text.contains('\0') {
            return Err(ExifError::NonAscii { tag });
        }
        self.set(tag, Value::Ascii(vec![text.as_bytes().to_vec()]));
        Ok(())
    }

    pub fn set_rationals(&mut self, tag: Tag, values: &[(u32, u32)]) -> Result<(), ExifError> {
        if let Some((num, den)) = values.iter().find(|(_, den)| *den == 0) {
            return Err(ExifError::InvalidValue {
                tag,
                value: format!("{}/{}", num, den),
            });
        }
        let values = values.iter().copied().map(Rational::from).collect();
        self.set(tag, Value::Rational(values));
        Ok(())
    }

    pub fn get(&self, tag: Tag) -> Option<&Value> {
        self.fields.iter().find(|f| f.tag == tag).map(|f| &f.value)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.get(tag).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Entry counts of IFD0, the Exif IFD and the GPS IFD.
    pub fn ifd_sizes(&self) -> (usize, usize, usize) {
        self.fields
            .iter()
            .fold((0, 0, 0), |(ifd0, exif, gps), f| match f.tag.context() {
                Context::Exif => (ifd0, exif + 1, gps),
                Context::Gps => (ifd0, exif, gps + 1),
                _ => (ifd0 + 1, exif, gps),
            })
    }

    /// Serialize to an APP1 payload (`Exif\0\0` + TIFF).
    pub fn encode(&self) -> Result<Vec<u8>, ExifError> {
        let mut writer = Writer::new();
        for field in &self.fields {
            writer.push_field(field);
        }

        let mut tiff = Cursor::new(Vec::new());
        writer.write(&mut tiff, true)?;
        let tiff = tiff.into_inner();

        let size = EXIF_HEADER.len() + tiff.len();
        if size > MAX_APP1_PAYLOAD {
            return Err(ExifError::TooLarge { size });
        }
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(EXIF_HEADER);
        out.extend_from_slice(&tiff);
        Ok(out)
    }
}
