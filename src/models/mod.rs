//! Data models for seqacquire.

mod image;
mod listing;

pub use image::{
    date_key, detection_types, millis_to_naive, Coordinates, Creator, Detection, EntityRef,
    Geometry, ImageId, ImageRecord, ListedImage, Timestamp,
};
pub use listing::{Page, Paging};
