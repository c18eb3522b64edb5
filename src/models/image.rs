//! Image records returned by the imagery API.
//!
//! Upstream metadata is sparse: almost every field is optional, and several
//! come in an original and a computed (platform-refined) flavour. Only the
//! original values are authoritative for the positional tags we write.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// GeoJSON point as returned by the API (`coordinates` is `[lon, lat]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type", default = "default_geometry_type")]
    pub kind: String,
    pub coordinates: Vec<f64>,
}

fn default_geometry_type() -> String {
    "Point".to_string()
}

impl Geometry {
    pub fn point(longitude: f64, latitude: f64) -> Self {
        Self {
            kind: default_geometry_type(),
            coordinates: vec![longitude, latitude],
        }
    }

    /// The point as (latitude, longitude), if both ordinates are present.
    pub fn lat_lon(&self) -> Option<Coordinates> {
        match self.coordinates.as_slice() {
            [lon, lat, ..] if lat.is_finite() && lon.is_finite() => Some(Coordinates {
                latitude: *lat,
                longitude: *lon,
            }),
            _ => None,
        }
    }
}

/// A signed latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Reference to a nested upstream entity that only carries an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

/// The user who uploaded an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
}

/// Full per-image metadata record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub sequence: Option<String>,
    /// Capture time in epoch milliseconds, local time encoded as if UTC.
    #[serde(default)]
    pub captured_at: Option<i64>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub computed_geometry: Option<Geometry>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub computed_altitude: Option<f64>,
    #[serde(default)]
    pub compass_angle: Option<f64>,
    #[serde(default)]
    pub computed_compass_angle: Option<f64>,
    #[serde(default)]
    pub camera_type: Option<String>,
    #[serde(default, rename = "make")]
    pub camera_make: Option<String>,
    #[serde(default, rename = "model")]
    pub camera_model: Option<String>,
    #[serde(default)]
    pub focal_length: Option<f64>,
    #[serde(default)]
    pub iso: Option<f64>,
    #[serde(default)]
    pub exposure_time: Option<f64>,
    #[serde(default)]
    pub aperture: Option<f64>,
    /// Relative focal length, principal point x, principal point y.
    #[serde(default)]
    pub camera_parameters: Option<Vec<f64>>,
    #[serde(default)]
    pub atomic_scale: Option<f64>,
    #[serde(default)]
    pub mesh: Option<EntityRef>,
    #[serde(default)]
    pub sfm_cluster: Option<EntityRef>,
    #[serde(default)]
    pub creator: Option<Creator>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub thumb_original_url: Option<String>,
}

impl ImageRecord {
    /// Fields requested from the per-image endpoint.
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "sequence",
        "captured_at",
        "geometry",
        "computed_geometry",
        "altitude",
        "computed_altitude",
        "compass_angle",
        "computed_compass_angle",
        "camera_type",
        "make",
        "model",
        "focal_length",
        "iso",
        "exposure_time",
        "aperture",
        "camera_parameters",
        "atomic_scale",
        "mesh",
        "sfm_cluster",
        "creator",
        "width",
        "height",
        "thumb_original_url",
    ];

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Authoritative position for positional tags. Never falls back to the
    /// computed geometry.
    pub fn position(&self) -> Option<Coordinates> {
        self.geometry.as_ref().and_then(Geometry::lat_lon)
    }

    /// Capture time as a naive local timestamp.
    pub fn captured_local(&self) -> Option<NaiveDateTime> {
        self.captured_at.and_then(millis_to_naive)
    }

    pub fn creator_username(&self) -> Option<&str> {
        self.creator.as_ref().and_then(|c| c.username.as_deref())
    }

    /// Record the real pixel dimensions of the downloaded payload.
    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = Some(width);
        self.height = Some(height);
    }
}

/// Slim record returned by the discovery listing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ListedImage {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub sequence: Option<String>,
    #[serde(default)]
    pub creator: Option<Creator>,
    #[serde(default)]
    pub captured_at: Option<Timestamp>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub camera_type: Option<String>,
}

impl ListedImage {
    /// Fields requested from the listing endpoint.
    pub const FIELDS: &'static [&'static str] = &[
        "id",
        "sequence",
        "creator",
        "created_at",
        "camera_type",
        "captured_at",
    ];

    /// Timestamp used for date bucketing: capture time, then creation time.
    pub fn timestamp_millis(&self) -> Option<i64> {
        self.captured_at
            .as_ref()
            .and_then(Timestamp::as_millis)
            .or_else(|| self.created_at.as_ref().and_then(Timestamp::as_millis))
    }

    /// Case-insensitive substring match against the camera type.
    /// A record without a camera type never matches.
    pub fn matches_camera_type(&self, filter: &str) -> bool {
        self.camera_type
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains(&filter.to_lowercase()))
    }
}

/// Entry of the `image_ids` listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageId {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

/// One object detection attached to an image.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Detection {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    /// Detected object class, e.g. `object--traffic-light`.
    #[serde(default)]
    pub value: Option<String>,
}

impl Detection {
    /// Fields requested from the detections endpoint.
    pub const FIELDS: &'static [&'static str] = &["id", "value"];
}

/// Distinct object classes, sorted. Unlabelled detections show as `unknown`.
pub fn detection_types(detections: &[Detection]) -> Vec<&str> {
    let types: BTreeSet<&str> = detections
        .iter()
        .map(|d| d.value.as_deref().unwrap_or("unknown"))
        .collect();
    types.into_iter().collect()
}

/// Upstream timestamps are usually epoch milliseconds but some endpoints
/// return RFC 3339 text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Millis(i64),
    Float(f64),
    Text(String),
}

impl Timestamp {
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Timestamp::Millis(ms) => Some(*ms),
            Timestamp::Float(ms) if ms.is_finite() => Some(*ms as i64),
            Timestamp::Float(_) => None,
            Timestamp::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.naive_local().and_utc().timestamp_millis()),
        }
    }
}

/// Convert epoch milliseconds to a naive timestamp without timezone correction.
pub fn millis_to_naive(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}

/// `YYYYMMDD` date key for epoch milliseconds.
///
/// The value already holds local capture time, so its calendar date is read
/// as if UTC. The host's timezone is never applied.
pub fn date_key(millis: i64) -> Option<String> {
    millis_to_naive(millis).map(|dt| dt.format("%Y%m%d").to_string())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        UInt(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::UInt(n) => n.to_string(),
    })
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "string_or_number")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}
