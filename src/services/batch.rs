//! Batch download over a sequence-list file.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

use super::download::RunSummary;

/// Sequence ids from list-file text: one per line, blank lines and `#`
/// comments skipped, duplicates dropped (first occurrence wins).
pub fn parse_sequence_list(text: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if !ids.iter().any(|id| id == line) {
            ids.push(line.to_string());
        }
    }
    ids
}

pub fn read_sequence_file(path: &Path) -> std::io::Result<Vec<String>> {
    Ok(parse_sequence_list(&std::fs::read_to_string(path)?))
}

/// Result of a batch run.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub successful: Vec<RunSummary>,
    /// Sequence id and the reason it failed.
    pub failed: Vec<(String, String)>,
}

impl BatchResult {
    pub fn total(&self) -> usize {
        self.successful.len() + self.failed.len()
    }
}

/// Run `download` for each sequence in order, waiting `delay` between
/// sequences. A failing sequence is recorded and the batch moves on.
pub async fn run_batch<F, Fut>(
    sequence_ids: &[String],
    delay: Duration,
    mut download: F,
) -> BatchResult
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = anyhow::Result<RunSummary>>,
{
    let mut result = BatchResult::default();

    for (i, sequence_id) in sequence_ids.iter().enumerate() {
        info!(
            "Batch {}/{}: sequence {}",
            i + 1,
            sequence_ids.len(),
            sequence_id
        );

        match download(sequence_id.clone()).await {
            Ok(summary) if summary.is_success() => result.successful.push(summary),
            Ok(summary) => {
                error!("Sequence {} saved no images", sequence_id);
                result.failed.push((
                    sequence_id.clone(),
                    format!("no images saved ({} listed)", summary.listed),
                ));
            }
            Err(e) => {
                error!("Sequence {} failed: {:#}", sequence_id, e);
                result.failed.push((sequence_id.clone(), format!("{:#}", e)));
            }
        }

        if i + 1 < sequence_ids.len() && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    result
}
