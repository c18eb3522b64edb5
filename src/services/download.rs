//! Sequence download service.
//!
//! Lists a sequence's images and, one image at a time, fetches metadata,
//! downloads the payload, embeds positional EXIF and writes the result.
//! Separated from UI concerns - emits events for progress tracking.

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use image::codecs::jpeg::JpegEncoder;
use image::ImageReader;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::{ApiClient, ApiError, RetryPolicy};
use crate::crawler::list_sequence_images;
use crate::exif::{self, jpeg, SynthesisError};
use crate::models::{detection_types, ImageRecord};

/// Quality used when a non-JPEG payload has to be encoded without an
/// explicit quality.
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Events emitted while a sequence downloads.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Image ids were listed.
    Listed { sequence_id: String, total: usize },
    /// Processing of one image started (0-based index).
    Started { index: usize, image_id: String },
    /// Image written to disk.
    Saved {
        image_id: String,
        path: PathBuf,
        with_exif: bool,
    },
    /// Image could not be saved, or was saved without EXIF after an
    /// encoding failure.
    Failed {
        image_id: String,
        kind: FailureKind,
        error: String,
    },
}

/// Stage at which a per-image failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Metadata,
    Download,
    Save,
    Exif,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Metadata => "metadata",
            FailureKind::Download => "download",
            FailureKind::Save => "save",
            FailureKind::Exif => "exif",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub image_id: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Tally for one sequence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub sequence_id: String,
    pub listed: usize,
    pub saved: usize,
    pub saved_with_exif: usize,
    pub saved_without_exif: usize,
    /// Object detections reported for the saved images.
    pub detections: usize,
    pub failures: Vec<ItemFailure>,
    pub output_dir: Option<PathBuf>,
}

impl RunSummary {
    fn new(sequence_id: &str) -> Self {
        Self {
            sequence_id: sequence_id.to_string(),
            ..Default::default()
        }
    }

    /// Images that were not written at all.
    pub fn failed(&self) -> usize {
        self.listed.saturating_sub(self.saved)
    }

    /// A run succeeds when it saved at least one image, or there was
    /// nothing to save.
    pub fn is_success(&self) -> bool {
        self.saved > 0 || self.listed == 0
    }

    /// Human-readable tally with per-item detail.
    pub fn report(&self) -> String {
        let mut out = format!(
            "Sequence {}: {} listed, {} saved ({} with EXIF, {} without), {} failed\n",
            self.sequence_id,
            self.listed,
            self.saved,
            self.saved_with_exif,
            self.saved_without_exif,
            self.failed()
        );
        if self.detections > 0 {
            out.push_str(&format!("Detected objects: {}\n", self.detections));
        }
        if let Some(dir) = &self.output_dir {
            out.push_str(&format!("Output directory: {}\n", dir.display()));
        }
        for failure in &self.failures {
            out.push_str(&format!(
                "  [{}] {}: {}\n",
                failure.kind, failure.image_id, failure.message
            ));
        }
        out
    }

    fn fail(&mut self, image_id: &str, kind: FailureKind, message: String) -> DownloadEvent {
        self.failures.push(ItemFailure {
            image_id: image_id.to_string(),
            kind,
            message: message.clone(),
        });
        DownloadEvent::Failed {
            image_id: image_id.to_string(),
            kind,
            error: message,
        }
    }
}

/// Configuration for the download service.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub download_dir: PathBuf,
    pub image_delay: Duration,
    pub retry: RetryPolicy,
    /// JPEG quality `1..=100`; `None` keeps original JPEG bytes.
    pub quality: Option<u8>,
}

/// Downloads whole sequences, one image at a time.
pub struct SequenceDownloader {
    client: ApiClient,
    config: DownloadConfig,
}

impl SequenceDownloader {
    pub fn new(client: ApiClient, config: DownloadConfig) -> Self {
        Self { client, config }
    }

    /// Download every image of a sequence.
    ///
    /// Only a failure to list the sequence is returned as an error; per-image
    /// failures end up in the summary.
    pub async fn download_sequence(
        &self,
        sequence_id: &str,
        event_tx: mpsc::Sender<DownloadEvent>,
    ) -> Result<RunSummary, ApiError> {
        info!("Starting download of sequence {}", sequence_id);
        let image_ids = list_sequence_images(&self.client, sequence_id).await?;

        let mut summary = RunSummary::new(sequence_id);
        summary.listed = image_ids.len();
        let _ = event_tx
            .send(DownloadEvent::Listed {
                sequence_id: sequence_id.to_string(),
                total: image_ids.len(),
            })
            .await;

        for (index, image_id) in image_ids.iter().enumerate() {
            let _ = event_tx
                .send(DownloadEvent::Started {
                    index,
                    image_id: image_id.clone(),
                })
                .await;

            for event in self.process_image(sequence_id, image_id, &mut summary).await {
                let _ = event_tx.send(event).await;
            }

            if index + 1 < image_ids.len() && !self.config.image_delay.is_zero() {
                tokio::time::sleep(self.config.image_delay).await;
            }
        }

        info!(
            "Sequence {} finished: {} of {} images saved",
            sequence_id, summary.saved, summary.listed
        );
        Ok(summary)
    }

    /// Best-effort lookup of the objects detected in an image. Failures are
    /// logged and never fail the image. Returns the number of detections.
    async fn log_detections(&self, image_id: &str) -> usize {
        match self.client.fetch_detections(image_id).await {
            Ok(detections) if detections.is_empty() => {
                debug!("No detections for image {}", image_id);
                0
            }
            Ok(detections) => {
                info!(
                    "Detected {} objects in image {}: {}",
                    detections.len(),
                    image_id,
                    detection_types(&detections).join(", ")
                );
                detections.len()
            }
            Err(e) => {
                warn!("Failed to get detection data for image {}: {}", image_id, e);
                0
            }
        }
    }

    async fn process_image(
        &self,
        sequence_id: &str,
        image_id: &str,
        summary: &mut RunSummary,
    ) -> Vec<DownloadEvent> {
        let mut events = Vec::new();

        let mut record = match self.client.fetch_image(image_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to fetch metadata for image {}: {}", image_id, e);
                events.push(summary.fail(image_id, FailureKind::Metadata, e.to_string()));
                return events;
            }
        };

        let detections = self.log_detections(image_id).await;

        let Some(url) = record.thumb_original_url.clone() else {
            let e = ApiError::MissingField {
                image_id: image_id.to_string(),
                field: "thumb_original_url",
            };
            warn!("{}", e);
            events.push(summary.fail(image_id, FailureKind::Metadata, e.to_string()));
            return events;
        };

        let payload = match self.client.download_with_retry(&url, &self.config.retry).await {
            Ok(bytes) => bytes,
            Err(e) => {
                events.push(summary.fail(image_id, FailureKind::Download, e.to_string()));
                return events;
            }
        };

        match probe_dimensions(&payload) {
            Ok((width, height)) => record.set_dimensions(width, height),
            Err(e) => {
                warn!("Image {} payload is not a readable image: {}", image_id, e);
                events.push(summary.fail(
                    image_id,
                    FailureKind::Download,
                    format!("unreadable image payload: {}", e),
                ));
                return events;
            }
        }

        let now = Local::now().naive_local();
        let exif_block = match exif::synthesize(&record, now) {
            Ok(block) => Some(block),
            Err(SynthesisError::MissingGeometry { .. }) => {
                warn!("Image {} has no geometry - saving without GPS data", image_id);
                None
            }
            Err(e) => {
                events.push(summary.fail(image_id, FailureKind::Exif, e.to_string()));
                None
            }
        };

        let jpeg_bytes = match encode_output(payload, self.config.quality) {
            Ok(bytes) => bytes,
            Err(e) => {
                events.push(summary.fail(
                    image_id,
                    FailureKind::Save,
                    format!("failed to encode JPEG: {}", e),
                ));
                return events;
            }
        };

        let (bytes, with_exif) = match exif_block {
            Some(block) => match jpeg::insert_exif(&jpeg_bytes, &block) {
                Ok(annotated) => (annotated, true),
                Err(e) => {
                    events.push(summary.fail(image_id, FailureKind::Exif, e.to_string()));
                    (jpeg_bytes, false)
                }
            },
            None => (jpeg_bytes, false),
        };

        let local = record.captured_local().unwrap_or(now);
        let dir = match &summary.output_dir {
            Some(dir) => dir.clone(),
            None => sequence_dir(&self.config.download_dir, local, sequence_id),
        };
        let path = match save_image(&dir, local, image_id, &bytes) {
            Ok(path) => path,
            Err(e) => {
                warn!("Failed to save image {}: {}", image_id, e);
                events.push(summary.fail(image_id, FailureKind::Save, e.to_string()));
                return events;
            }
        };

        if summary.output_dir.is_none() {
            info!("Saving sequence {} to {}", sequence_id, dir.display());
            summary.output_dir = Some(dir);
        }
        summary.saved += 1;
        summary.detections += detections;
        if with_exif {
            summary.saved_with_exif += 1;
        } else {
            summary.saved_without_exif += 1;
        }
        debug!("Saved image {} to {}", image_id, path.display());

        events.push(DownloadEvent::Saved {
            image_id: image_id.to_string(),
            path,
            with_exif,
        });
        events
    }
}

/// Pixel dimensions of an encoded image, read from its header.
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), image::ImageError> {
    Ok(ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?)
}

/// JPEG bytes to write. Without a quality, JPEG payloads pass through
/// untouched; anything else is decoded and re-encoded.
pub fn encode_output(payload: Vec<u8>, quality: Option<u8>) -> Result<Vec<u8>, image::ImageError> {
    if quality.is_none() && jpeg::is_jpeg(&payload) {
        return Ok(payload);
    }

    let quality = quality.unwrap_or(DEFAULT_JPEG_QUALITY).clamp(1, 100);
    let decoded = image::load_from_memory(&payload)?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&decoded.to_rgb8())?;
    Ok(out)
}

/// `<download_dir>/<YYYYmmdd_HHMMSS>_<first 8 chars of sequence>`.
pub fn sequence_dir(download_dir: &Path, local: NaiveDateTime, sequence_id: &str) -> PathBuf {
    let prefix: String = sequence_id.chars().take(8).collect();
    download_dir.join(format!("{}_{}", local.format(TIMESTAMP_FORMAT), prefix))
}

/// `<YYYYmmdd_HHMMSS>_<millis>.jpg`.
pub fn image_file_name(local: NaiveDateTime) -> String {
    format!(
        "{}_{:03}.jpg",
        local.format(TIMESTAMP_FORMAT),
        local.nanosecond() / 1_000_000 % 1000
    )
}

/// Write an image into `dir`, appending the image id when the timestamped
/// name is already taken.
fn save_image(
    dir: &Path,
    local: NaiveDateTime,
    image_id: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let mut path = dir.join(image_file_name(local));
    if path.exists() {
        let name = image_file_name(local);
        let stem = name.trim_end_matches(".jpg");
        path = dir.join(format!("{}_{}.jpg", stem, image_id));
    }
    std::fs::write(&path, bytes)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::{ImageFormat, RgbImage};
    use tempfile::tempdir;

    fn local() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_milli_opt(3, 15, 42, 7)
            .unwrap()
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::new(width, height)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode_image(&RgbImage::new(width, height))
            .unwrap();
        out
    }

    #[test]
    fn test_output_names() {
        let dir = sequence_dir(Path::new("downloads"), local(), "abcdefghijkl");
        assert_eq!(dir, PathBuf::from("downloads/20240101_031542_abcdefgh"));
        assert_eq!(image_file_name(local()), "20240101_031542_007.jpg");

        let short = sequence_dir(Path::new("d"), local(), "abc");
        assert_eq!(short, PathBuf::from("d/20240101_031542_abc"));
    }

    #[test]
    fn test_name_collision_appends_image_id() {
        let dir = tempdir().unwrap();
        let first = save_image(dir.path(), local(), "111", b"a").unwrap();
        let second = save_image(dir.path(), local(), "222", b"b").unwrap();
        assert_eq!(first.file_name().unwrap(), "20240101_031542_007.jpg");
        assert_eq!(second.file_name().unwrap(), "20240101_031542_007_222.jpg");
        assert_eq!(std::fs::read(&first).unwrap(), b"a");
    }

    #[test]
    fn test_original_jpeg_kept_without_quality() {
        let original = jpeg_bytes(8, 4);
        assert_eq!(encode_output(original.clone(), None).unwrap(), original);
    }

    #[test]
    fn test_quality_reencodes() {
        let original = jpeg_bytes(8, 4);
        let out = encode_output(original.clone(), Some(20)).unwrap();
        assert!(jpeg::is_jpeg(&out));
        assert_eq!(probe_dimensions(&out).unwrap(), (8, 4));
    }

    #[test]
    fn test_png_payload_becomes_jpeg() {
        let out = encode_output(png_bytes(6, 10), None).unwrap();
        assert!(jpeg::is_jpeg(&out));
        assert_eq!(probe_dimensions(&out).unwrap(), (6, 10));
    }

    #[test]
    fn test_probe_rejects_garbage() {
        assert!(probe_dimensions(b"not an image").is_err());
    }

    #[test]
    fn test_summary_report() {
        let mut summary = RunSummary::new("seq1");
        summary.listed = 3;
        summary.saved = 2;
        summary.saved_with_exif = 1;
        summary.saved_without_exif = 1;
        summary.detections = 5;
        summary.fail("42", FailureKind::Download, "HTTP 500".into());

        assert_eq!(summary.failed(), 1);
        assert!(summary.is_success());
        let report = summary.report();
        assert!(report.starts_with(
            "Sequence seq1: 3 listed, 2 saved (1 with EXIF, 1 without), 1 failed\n"
        ));
        assert!(report.contains("Detected objects: 5\n"));
        assert!(report.contains("  [download] 42: HTTP 500\n"));
    }

    #[test]
    fn test_summary_with_nothing_saved_fails() {
        let mut summary = RunSummary::new("seq1");
        assert!(summary.is_success());
        summary.listed = 2;
        assert!(!summary.is_success());
    }
}
