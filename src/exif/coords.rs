//! Coordinate and time conversions for positional tags.

use chrono::{Duration, FixedOffset, NaiveDateTime};

/// Unsigned rational as stored in EXIF `RATIONAL` fields.
pub type Rational = (u32, u32);

/// Degrees/minutes/seconds with seconds in fixed point (hundredths).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dms {
    pub degrees: u32,
    pub minutes: u32,
    /// Seconds × 100, truncated.
    pub centiseconds: u32,
}

impl Dms {
    /// Convert the magnitude of a decimal degree value. The sign is carried
    /// separately by the hemisphere reference.
    pub fn from_degrees(value: f64) -> Self {
        let abs = value.abs();
        let degrees = abs.trunc();
        let minutes = ((abs - degrees) * 60.0).trunc();
        let seconds = ((abs - degrees - minutes / 60.0) * 3600.0).max(0.0);

        Self {
            degrees: degrees as u32,
            minutes: minutes as u32,
            centiseconds: (seconds * 100.0).trunc() as u32,
        }
    }

    /// Unsigned decimal degrees represented by this value.
    pub fn to_degrees(&self) -> f64 {
        self.degrees as f64
            + self.minutes as f64 / 60.0
            + self.centiseconds as f64 / 100.0 / 3600.0
    }

    pub fn to_rationals(&self) -> [Rational; 3] {
        [
            (self.degrees, 1),
            (self.minutes, 1),
            (self.centiseconds, 100),
        ]
    }
}

pub fn latitude_ref(latitude: f64) -> &'static str {
    if latitude >= 0.0 {
        "N"
    } else {
        "S"
    }
}

pub fn longitude_ref(longitude: f64) -> &'static str {
    if longitude >= 0.0 {
        "E"
    } else {
        "W"
    }
}

/// Approximate UTC offset in whole hours from longitude: `round(lon / 15)`.
///
/// This is solar time, not civil time. It is off by one or more hours across
/// much of the world (China spans five solar zones on one clock, Spain runs an
/// hour ahead of its meridian, and half-hour zones like India are rounded).
/// The API only exposes coordinates, so this is the best available guess.
pub fn infer_offset_from_longitude(longitude: f64) -> i32 {
    if !longitude.is_finite() {
        return 0;
    }
    (longitude / 15.0).round().clamp(-12.0, 14.0) as i32
}

/// Shift a local timestamp to UTC given a whole-hour offset.
pub fn local_to_utc(local: NaiveDateTime, offset_hours: i32) -> NaiveDateTime {
    local - Duration::hours(offset_hours as i64)
}

/// `+HH:MM` rendering used by the `OffsetTime*` tags.
pub fn format_offset(offset_hours: i32) -> String {
    FixedOffset::east_opt(offset_hours * 3600)
        .map(|o| o.to_string())
        .unwrap_or_else(|| "+00:00".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const TOLERANCE: f64 = 1.0 / 360_000.0 + 1e-9;

    fn assert_round_trip(value: f64) {
        let dms = Dms::from_degrees(value);
        let back = dms.to_degrees();
        assert!(
            (back - value.abs()).abs() <= TOLERANCE,
            "{} -> {:?} -> {}",
            value,
            dms,
            back
        );
        assert!(dms.minutes < 60, "{:?}", dms);
    }

    #[test]
    fn test_dms_known_value() {
        // 40 + 33/64 degrees is exact in binary: 40° 30' 56.25"
        let dms = Dms::from_degrees(40.515625);
        assert_eq!(dms.degrees, 40);
        assert_eq!(dms.minutes, 30);
        assert_eq!(dms.centiseconds, 5625);
        assert_eq!(dms.to_rationals(), [(40, 1), (30, 1), (5625, 100)]);
    }

    #[test]
    fn test_dms_negative_uses_magnitude() {
        assert_eq!(Dms::from_degrees(-33.5), Dms::from_degrees(33.5));
        assert_eq!(latitude_ref(-33.5), "S");
        assert_eq!(longitude_ref(-70.0), "W");
        assert_eq!(latitude_ref(0.0), "N");
        assert_eq!(longitude_ref(0.0), "E");
    }

    #[test]
    fn test_dms_round_trip_latitude_range() {
        let mut value = -90.0;
        while value <= 90.0 {
            assert_round_trip(value);
            value += 0.123_457;
        }
        assert_round_trip(90.0);
        assert_round_trip(-90.0);
    }

    #[test]
    fn test_dms_round_trip_longitude_range() {
        let mut value = -180.0;
        while value <= 180.0 {
            assert_round_trip(value);
            value += 0.271_828_1;
        }
        assert_round_trip(180.0);
        assert_round_trip(179.999_999_9);
    }

    #[test]
    fn test_offset_inference() {
        assert_eq!(infer_offset_from_longitude(121.5), 8);
        assert_eq!(infer_offset_from_longitude(-74.0), -5);
        assert_eq!(infer_offset_from_longitude(0.0), 0);
        assert_eq!(infer_offset_from_longitude(7.4), 0);
        assert_eq!(infer_offset_from_longitude(180.0), 12);
        assert_eq!(infer_offset_from_longitude(-180.0), -12);
        assert_eq!(infer_offset_from_longitude(f64::NAN), 0);
    }

    #[test]
    fn test_utc_is_local_minus_offset_for_all_offsets() {
        let local = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(3, 15, 42)
            .unwrap();
        for offset in -12..=14 {
            let utc = local_to_utc(local, offset);
            assert_eq!(local - utc, Duration::hours(offset as i64));
        }
        // Crossing midnight moves the GPS date back.
        let utc = local_to_utc(local, 8);
        assert_eq!(utc.format("%Y:%m:%d %H:%M:%S").to_string(), "2023:12:31 19:15:42");
    }

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(8), "+08:00");
        assert_eq!(format_offset(-5), "-05:00");
        assert_eq!(format_offset(0), "+00:00");
    }
}
