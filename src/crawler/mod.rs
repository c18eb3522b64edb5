//! Cursor-paginated discovery.
//!
//! Pages are fetched one at a time and never accumulated; per-record state is
//! limited to the sequence map and the open date bucket.

mod bucket;

pub use bucket::{sort_by_latest, BucketState, SequenceBucket, SequenceStats};

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::client::{ApiClient, ApiError};
use crate::models::{date_key, ImageId, ListedImage, Page};

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("failed to persist bucket {date}: {source}")]
    Sink {
        date: String,
        #[source]
        source: std::io::Error,
    },
}

/// Receives buckets as they close.
pub trait BucketSink {
    fn flush(&mut self, bucket: &SequenceBucket) -> std::io::Result<()>;
}

impl BucketSink for Vec<SequenceBucket> {
    fn flush(&mut self, bucket: &SequenceBucket) -> std::io::Result<()> {
        self.push(bucket.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    /// Stop after this many pages.
    pub max_pages: Option<u32>,
    /// Case-insensitive substring matched against `camera_type`.
    pub camera_type: Option<String>,
    pub page_size: u32,
    pub page_delay: Duration,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_pages: None,
            camera_type: None,
            page_size: 100,
            page_delay: Duration::from_millis(500),
        }
    }
}

/// What a discovery crawl found.
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    /// Sequence id → image count and latest timestamp.
    pub sequences: HashMap<String, SequenceStats>,
    pub pages: u32,
    pub images_seen: u64,
    pub images_matched: u64,
    pub buckets_flushed: u32,
    /// Set when a page fetch ended the crawl early.
    pub aborted: Option<String>,
}

impl CrawlOutcome {
    pub fn sequence_count(&self) -> usize {
        self.sequences.len()
    }

    /// The `n` most recent sequences by latest timestamp.
    pub fn most_recent(&self, n: usize) -> Vec<(&str, SequenceStats)> {
        let mut sorted = sort_by_latest(&self.sequences);
        sorted.truncate(n);
        sorted
    }

    /// Count one matching image. Returns true for a newly seen sequence.
    fn record_sequence(&mut self, sequence: &str, timestamp: Option<i64>) -> bool {
        let is_new = !self.sequences.contains_key(sequence);
        self.sequences
            .entry(sequence.to_string())
            .or_default()
            .observe(timestamp);
        is_new
    }
}

/// Discover all sequences uploaded by `username`, flushing a date bucket to
/// `sink` each time the capture date changes.
///
/// A failed page fetch ends the crawl; buckets already flushed stay flushed
/// and the open bucket is flushed before returning. Only sink failures are
/// returned as errors.
pub async fn crawl_user_sequences<S: BucketSink>(
    client: &ApiClient,
    username: &str,
    options: &CrawlOptions,
    sink: &mut S,
) -> Result<CrawlOutcome, CrawlError> {
    let mut url = Some(client.user_images_url(username, options.page_size)?);
    let mut outcome = CrawlOutcome::default();
    let mut state = BucketState::Empty;

    info!("Starting search for all sequences of user {}", username);
    if let Some(filter) = &options.camera_type {
        info!("Filtering for camera type: {}", filter);
    }

    while let Some(page_url) = url.take() {
        if options.max_pages.is_some_and(|max| outcome.pages >= max) {
            info!("Reached page limit of {}", outcome.pages);
            break;
        }
        let page_number = outcome.pages + 1;
        debug!("Fetching page {}: {}", page_number, page_url);

        let page: Page<ListedImage> = match client.fetch_page(&page_url).await {
            Ok(page) => page,
            Err(e) => {
                if e.is_rate_limited() {
                    error!("Rate limited on page {} - stopping discovery", page_number);
                } else {
                    error!("Error fetching page {}: {}", page_number, e);
                }
                outcome.aborted = Some(e.to_string());
                break;
            }
        };
        outcome.pages = page_number;

        let mut new_sequences = 0;
        for image in &page.data {
            outcome.images_seen += 1;
            if let Some(filter) = &options.camera_type {
                if !image.matches_camera_type(filter) {
                    continue;
                }
            }
            outcome.images_matched += 1;

            let Some(sequence) = image.sequence.as_deref().filter(|s| !s.is_empty()) else {
                continue;
            };
            let timestamp = image.timestamp_millis();
            if outcome.record_sequence(sequence, timestamp) {
                new_sequences += 1;
            }

            let Some((ts, date)) = timestamp.and_then(|ts| date_key(ts).map(|d| (ts, d))) else {
                continue;
            };
            let (next, closed) = state.observe(&date, sequence, ts);
            state = next;
            if let Some(bucket) = closed {
                flush(sink, &bucket, &mut outcome)?;
            }
        }

        info!("Page {}: found {} images", page_number, page.data.len());
        if new_sequences > 0 {
            info!(
                "Found {} new sequences in page {}",
                new_sequences, page_number
            );
        }

        match page.next_url() {
            Some(next) => {
                url = Some(next.to_string());
                let more_allowed = options.max_pages.map_or(true, |max| outcome.pages < max);
                if more_allowed && !options.page_delay.is_zero() {
                    tokio::time::sleep(options.page_delay).await;
                }
            }
            None => info!("Reached the last page"),
        }
    }

    if let Some(bucket) = state.finish() {
        flush(sink, &bucket, &mut outcome)?;
    }

    if let Some(reason) = &outcome.aborted {
        warn!(
            "Search stopped after {} pages with {} sequences: {}",
            outcome.pages,
            outcome.sequence_count(),
            reason
        );
    } else {
        info!(
            "Search completed: {} images, {} sequences",
            outcome.images_matched,
            outcome.sequence_count()
        );
    }

    Ok(outcome)
}

fn flush<S: BucketSink>(
    sink: &mut S,
    bucket: &SequenceBucket,
    outcome: &mut CrawlOutcome,
) -> Result<(), CrawlError> {
    debug!(
        "Flushing bucket {} with {} sequences",
        bucket.date,
        bucket.len()
    );
    sink.flush(bucket).map_err(|source| CrawlError::Sink {
        date: bucket.date.clone(),
        source,
    })?;
    outcome.buckets_flushed += 1;
    Ok(())
}

/// List-mode walk: collect every entry of a cursor listing, starting at
/// `url` and following `paging.next` until it runs out.
pub async fn collect_pages<T: DeserializeOwned>(
    client: &ApiClient,
    url: String,
) -> Result<Vec<T>, ApiError> {
    let mut items = Vec::new();
    let mut next = Some(url);
    while let Some(page_url) = next.take() {
        let page: Page<T> = client.fetch_page(&page_url).await?;
        next = page.next_url().map(str::to_string);
        items.extend(page.data);
    }
    Ok(items)
}

/// Image ids of one sequence, in listing order.
pub async fn list_sequence_images(
    client: &ApiClient,
    sequence_id: &str,
) -> Result<Vec<String>, ApiError> {
    let url = client.sequence_images_url(sequence_id)?;
    let ids: Vec<ImageId> = collect_pages(client, url).await?;
    info!("Sequence {} lists {} images", sequence_id, ids.len());
    Ok(ids.into_iter().map(|i| i.id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sequence_tracks_latest() {
        let mut outcome = CrawlOutcome::default();
        assert!(outcome.record_sequence("a", None));
        assert!(!outcome.record_sequence("a", Some(5)));
        assert!(!outcome.record_sequence("a", Some(3)));
        assert!(outcome.record_sequence("b", Some(9)));
        assert_eq!(outcome.sequences["a"].latest, Some(5));
        assert_eq!(outcome.sequences["a"].images, 3);
        assert_eq!(outcome.sequence_count(), 2);

        let top = outcome.most_recent(1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, "b");
        assert_eq!(top[0].1.images, 1);
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<SequenceBucket> = Vec::new();
        let mut outcome = CrawlOutcome::default();
        flush(&mut sink, &SequenceBucket::new("20240101"), &mut outcome).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(outcome.buckets_flushed, 1);
    }
}
