//! Positional metadata synthesis.
//!
//! Turns a sparse upstream [`ImageRecord`] into GPS/EXIF tags. Only the
//! original (non-computed) position, altitude and bearing are written as
//! tags; computed values end up in the free-text annotation at most.

pub mod coords;
pub mod encode;
pub mod jpeg;

use chrono::{Datelike, NaiveDateTime, Timelike};
use thiserror::Error;
use tracing::warn;

use crate::models::{Coordinates, ImageRecord};
use ::exif::{Tag, Value};
use coords::{
    format_offset, infer_offset_from_longitude, latitude_ref, local_to_utc, longitude_ref, Dms,
};
use encode::{ExifBlock, ExifError};

pub use jpeg::{find_exif, insert_exif, JpegError};

const SOFTWARE: &str = concat!("seqacquire ", env!("CARGO_PKG_VERSION"));

/// Sensor width assumed when deriving a focal length from relative camera
/// parameters (35 mm equivalent).
const ASSUMED_SENSOR_WIDTH_MM: f64 = 36.0;

const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("image {image_id} has no geometry")]
    MissingGeometry { image_id: String },
    #[error("failed to encode EXIF for image {image_id}: {source}")]
    Encode {
        image_id: String,
        #[source]
        source: ExifError,
    },
}

/// Everything that goes into one image's EXIF block.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionalMetadata {
    pub position: Coordinates,
    pub altitude: Option<f64>,
    pub bearing: Option<f64>,
    /// Local capture time.
    pub local_time: NaiveDateTime,
    /// Inferred UTC offset in whole hours.
    pub offset_hours: i32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub focal_length: Option<f64>,
    pub iso: Option<f64>,
    pub exposure_time: Option<f64>,
    pub f_number: Option<f64>,
    pub annotation: Option<String>,
}

impl PositionalMetadata {
    /// Build from a record whose pixel dimensions are already filled in.
    /// `now` stands in for a missing capture time.
    pub fn from_record(record: &ImageRecord, position: Coordinates, now: NaiveDateTime) -> Self {
        let focal_length = record.focal_length.filter(|f| *f > 0.0).or_else(|| {
            record
                .camera_parameters
                .as_ref()
                .and_then(|p| p.first())
                .filter(|f| **f > 0.0)
                .map(|f| f * ASSUMED_SENSOR_WIDTH_MM)
        });

        Self {
            position,
            altitude: record.altitude.filter(|a| a.is_finite()),
            bearing: record.compass_angle.filter(|b| b.is_finite()),
            local_time: record.captured_local().unwrap_or(now),
            offset_hours: infer_offset_from_longitude(position.longitude),
            width: record.width,
            height: record.height,
            make: non_empty(record.camera_make.as_deref()),
            model: non_empty(record.camera_model.as_deref()),
            focal_length,
            iso: record.iso.filter(|i| *i > 0.0),
            exposure_time: record.exposure_time.filter(|e| *e > 0.0),
            f_number: record.aperture.filter(|a| *a > 0.0),
            annotation: annotation(record),
        }
    }

    pub fn utc_time(&self) -> NaiveDateTime {
        local_to_utc(self.local_time, self.offset_hours)
    }

    /// Landscape images are stored upright, everything else is assumed to be
    /// rotated a quarter turn.
    pub fn orientation(&self) -> Option<u16> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > h => Some(1),
            (Some(_), Some(_)) => Some(6),
            _ => None,
        }
    }

    pub fn to_block(&self) -> Result<ExifBlock, ExifError> {
        let mut block = ExifBlock::new();
        let local = self.local_time.format(EXIF_DATE_FORMAT).to_string();
        let offset = format_offset(self.offset_hours);

        // IFD0
        if let Some(make) = &self.make {
            block.set_ascii(Tag::Make, make)?;
        }
        if let Some(model) = &self.model {
            block.set_ascii(Tag::Model, model)?;
        }
        if let Some(orientation) = self.orientation() {
            block.set(Tag::Orientation, Value::Short(vec![orientation]));
        }
        block.set_rationals(Tag::XResolution, &[(72, 1)])?;
        block.set_rationals(Tag::YResolution, &[(72, 1)])?;
        block.set(Tag::ResolutionUnit, Value::Short(vec![2]));
        block.set_ascii(Tag::Software, SOFTWARE)?;
        block.set_ascii(Tag::DateTime, &local)?;

        // Exif IFD
        block.set(Tag::ExifVersion, Value::Undefined(b"0231".to_vec(), 0));
        block.set_ascii(Tag::DateTimeOriginal, &local)?;
        block.set_ascii(Tag::DateTimeDigitized, &local)?;
        block.set_ascii(Tag::OffsetTime, &offset)?;
        block.set_ascii(Tag::OffsetTimeOriginal, &offset)?;
        block.set_ascii(Tag::OffsetTimeDigitized, &offset)?;
        block.set_ascii(
            Tag::SubSecTimeOriginal,
            &format!("{:03}", self.local_time.nanosecond() / 1_000_000 % 1000),
        )?;
        if let Some(exposure) = self.exposure_time {
            block.set_rationals(
                Tag::ExposureTime,
                &[rational(Tag::ExposureTime, exposure, 1_000_000)?],
            )?;
        }
        if let Some(f_number) = self.f_number {
            block.set_rationals(Tag::FNumber, &[rational(Tag::FNumber, f_number, 100)?])?;
        }
        if let Some(iso) = self.iso {
            let iso = iso.round().clamp(1.0, u16::MAX as f64) as u16;
            block.set(Tag::PhotographicSensitivity, Value::Short(vec![iso]));
        }
        if let Some(focal) = self.focal_length {
            block.set_rationals(Tag::FocalLength, &[rational(Tag::FocalLength, focal, 100)?])?;
        }
        if let Some(width) = self.width {
            block.set(Tag::PixelXDimension, Value::Long(vec![width]));
        }
        if let Some(height) = self.height {
            block.set(Tag::PixelYDimension, Value::Long(vec![height]));
        }
        if let Some(text) = &self.annotation {
            block.set(Tag::UserComment, Value::Undefined(user_comment(text), 0));
        }

        // GPS IFD
        let Coordinates {
            latitude,
            longitude,
        } = self.position;
        check_range(Tag::GPSLatitude, latitude, 90.0)?;
        check_range(Tag::GPSLongitude, longitude, 180.0)?;

        block.set(Tag::GPSVersionID, Value::Byte(vec![2, 3, 0, 0]));
        block.set_ascii(Tag::GPSLatitudeRef, latitude_ref(latitude))?;
        block.set_rationals(Tag::GPSLatitude, &Dms::from_degrees(latitude).to_rationals())?;
        block.set_ascii(Tag::GPSLongitudeRef, longitude_ref(longitude))?;
        block.set_rationals(
            Tag::GPSLongitude,
            &Dms::from_degrees(longitude).to_rationals(),
        )?;
        if let Some(altitude) = self.altitude {
            block.set(Tag::GPSAltitudeRef, Value::Byte(vec![0]));
            block.set_rationals(
                Tag::GPSAltitude,
                &[rational(Tag::GPSAltitude, altitude.max(0.0), 100)?],
            )?;
        }
        if let Some(bearing) = self.bearing {
            let bearing = bearing.rem_euclid(360.0);
            block.set_ascii(Tag::GPSImgDirectionRef, "T")?;
            block.set_rationals(
                Tag::GPSImgDirection,
                &[((bearing * 100.0).trunc() as u32, 100)],
            )?;
        }

        let utc = self.utc_time();
        block.set_rationals(
            Tag::GPSTimeStamp,
            &[(utc.hour(), 1), (utc.minute(), 1), (utc.second(), 1)],
        )?;
        block.set_ascii(
            Tag::GPSDateStamp,
            &format!("{:04}:{:02}:{:02}", utc.year(), utc.month(), utc.day()),
        )?;
        block.set_ascii(Tag::GPSMapDatum, "WGS-84")?;

        Ok(block)
    }
}

/// Build and encode the EXIF block for one image.
pub fn synthesize(record: &ImageRecord, now: NaiveDateTime) -> Result<Vec<u8>, SynthesisError> {
    let position = record
        .position()
        .ok_or_else(|| SynthesisError::MissingGeometry {
            image_id: record.id.clone(),
        })?;

    let metadata = PositionalMetadata::from_record(record, position, now);
    let fail = |source: ExifError, block: Option<&ExifBlock>| {
        let sizes = block
            .map(|b| {
                let (ifd0, exif, gps) = b.ifd_sizes();
                format!("ifd0={} exif={} gps={}", ifd0, exif, gps)
            })
            .unwrap_or_else(|| "block not built".to_string());
        warn!(
            "EXIF encoding failed for image {} at ({:.6}, {:.6}) [{}]: {}",
            record.id, position.latitude, position.longitude, sizes, source
        );
        SynthesisError::Encode {
            image_id: record.id.clone(),
            source,
        }
    };

    let block = metadata.to_block().map_err(|e| fail(e, None))?;
    block.encode().map_err(|e| fail(e, Some(&block)))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Fixed-point rational with the given denominator.
fn rational(tag: Tag, value: f64, denominator: u32) -> Result<(u32, u32), ExifError> {
    let scaled = (value * denominator as f64).round();
    if !scaled.is_finite() || scaled < 0.0 || scaled > u32::MAX as f64 {
        return Err(ExifError::InvalidValue {
            tag,
            value: value.to_string(),
        });
    }
    Ok((scaled as u32, denominator))
}

fn check_range(tag: Tag, value: f64, limit: f64) -> Result<(), ExifError> {
    if value.is_finite() && value.abs() <= limit {
        Ok(())
    } else {
        Err(ExifError::InvalidValue {
            tag,
            value: value.to_string(),
        })
    }
}

/// Free-text summary of the fields that have no standard tag.
fn annotation(record: &ImageRecord) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(username) = record.creator_username() {
        parts.push(format!("creator={}", username));
    }
    if let Some(camera_type) = non_empty(record.camera_type.as_deref()) {
        parts.push(format!("camera_type={}", camera_type));
    }
    if let Some(mesh) = &record.mesh {
        parts.push(format!("mesh={}", mesh.id));
    }
    if let Some(cluster) = &record.sfm_cluster {
        parts.push(format!("sfm_cluster={}", cluster.id));
    }
    if let Some([_, cx, cy, ..]) = record.camera_parameters.as_deref() {
        parts.push(format!("principal_point={},{}", cx, cy));
    }
    if let Some(scale) = record.atomic_scale {
        parts.push(format!("atomic_scale={}", scale));
    }
    parts.push(format!("image={}", record.id));
    if let Some(sequence) = &record.sequence {
        parts.push(format!("sequence={}", sequence));
    }
    if let Some(computed) = record
        .computed_geometry
        .as_ref()
        .and_then(|g| g.lat_lon())
    {
        parts.push(format!(
            "computed_position={:.7},{:.7}",
            computed.latitude, computed.longitude
        ));
    }

    Some(parts.join("; "))
}

/// UserComment payload: 8-byte character code followed by the text.
fn user_comment(text: &str) -> Vec<u8> {
    if text.is_ascii() {
        let mut out = b"ASCII\0\0\0".to_vec();
        out.extend_from_slice(text.as_bytes());
        out
    } else {
        let mut out = b"UNICODE\0".to_vec();
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }
}
