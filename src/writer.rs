//! Append-only discovery output file.
//!
//! Layout:
//!
//! ```text
//! # Found Sequences (Search in progress...)
//! # Search User: walker
//! # Search Time: 2024-05-01 10:00:00
//! # Max Pages: All
//! # Camera Type Filter: All
//! # Filter Type: all
//!
//! # 20240101
//! seqB
//! seqA
//!
//! # Total: 2 sequences, 40 images, 1 pages
//! ```
//!
//! Each bucket is written and synced as it closes; earlier content is never
//! touched again. The file doubles as batch input since `#` lines and blank
//! lines are ignored there.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::debug;

use crate::crawler::{BucketSink, CrawlOutcome, SequenceBucket};

/// Search parameters recorded at the top of the file.
#[derive(Debug, Clone)]
pub struct RunHeader {
    pub username: String,
    pub started_at: NaiveDateTime,
    pub max_pages: Option<u32>,
    pub camera_type: Option<String>,
    /// Name of the filter preset (`all`, `360`, `regular`).
    pub filter_name: String,
}

impl RunHeader {
    fn render(&self) -> String {
        format!(
            "# Found Sequences (Search in progress...)\n\
             # Search User: {}\n\
             # Search Time: {}\n\
             # Max Pages: {}\n\
             # Camera Type Filter: {}\n\
             # Filter Type: {}\n\n",
            self.username,
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.max_pages
                .map(|p| p.to_string())
                .unwrap_or_else(|| "All".to_string()),
            self.camera_type.as_deref().unwrap_or("All"),
            self.filter_name,
        )
    }
}

pub struct SequenceWriter {
    file: File,
    path: PathBuf,
    buckets: usize,
}

impl SequenceWriter {
    /// Create (or truncate) the output file and write the header.
    pub fn create(path: &Path, header: &RunHeader) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(header.render().as_bytes())?;
        file.sync_data()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            buckets: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn buckets_written(&self) -> usize {
        self.buckets
    }

    /// Append one date block and sync it to disk.
    pub fn append_bucket(&mut self, bucket: &SequenceBucket) -> io::Result<()> {
        let mut block = format!("# {}\n", bucket.date);
        for id in bucket.sorted_sequences() {
            block.push_str(id);
            block.push('\n');
        }
        block.push('\n');

        self.file.write_all(block.as_bytes())?;
        self.file.sync_data()?;
        self.buckets += 1;
        debug!(
            "Wrote bucket {} ({} sequences) to {}",
            bucket.date,
            bucket.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Append the totals line and close the file.
    pub fn finish(mut self, outcome: &CrawlOutcome) -> io::Result<PathBuf> {
        let mut trailer = format!(
            "# Total: {} sequences, {} images, {} pages",
            outcome.sequence_count(),
            outcome.images_matched,
            outcome.pages
        );
        if let Some(reason) = &outcome.aborted {
            trailer.push_str(&format!(" (stopped early: {})", reason.replace('\n', " ")));
        }
        trailer.push('\n');

        self.file.write_all(trailer.as_bytes())?;
        self.file.sync_data()?;
        Ok(self.path)
    }
}

impl BucketSink for SequenceWriter {
    fn flush(&mut self, bucket: &SequenceBucket) -> io::Result<()> {
        self.append_bucket(bucket)
    }
}

/// Default output file name for a user.
pub fn default_output_path(username: &str) -> PathBuf {
    PathBuf::from(format!("sequences_{}.txt", username))
}
