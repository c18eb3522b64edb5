//! Single-sequence download command.

use chrono::Local;
use console::style;
use tokio::sync::mpsc;
use tracing::instrument::WithSubscriber;

use crate::cli::progress::show_download_progress;
use crate::client::ApiClient;
use crate::config::Settings;
use crate::logging::{run_log_path, RunLog};
use crate::services::{DownloadConfig, DownloadEvent, RunSummary, SequenceDownloader};

/// Download one sequence.
pub async fn cmd_download(
    settings: &Settings,
    sequence_id: &str,
    quality: Option<u8>,
    verbose: bool,
) -> anyhow::Result<()> {
    let sequence_id = sequence_id.trim();
    if sequence_id.is_empty() {
        anyhow::bail!("Sequence ID cannot be empty");
    }

    let client = ApiClient::new(settings)?;
    let summary = download_sequence(settings, &client, sequence_id, quality, verbose).await?;
    print_summary(&summary);

    if !summary.is_success() {
        anyhow::bail!("No images of sequence {} were saved", sequence_id);
    }
    Ok(())
}

/// Run the downloader for one sequence with a progress bar and a per-run
/// log file.
pub(super) async fn download_sequence(
    settings: &Settings,
    client: &ApiClient,
    sequence_id: &str,
    quality: Option<u8>,
    verbose: bool,
) -> anyhow::Result<RunSummary> {
    let log = RunLog::create(run_log_path(
        &settings.log_dir,
        sequence_id,
        Local::now().naive_local(),
    ))?;

    let downloader = SequenceDownloader::new(
        client.clone(),
        DownloadConfig {
            download_dir: settings.download_dir.clone(),
            image_delay: settings.image_delay(),
            retry: settings.retry_policy(),
            quality,
        },
    );

    println!(
        "{} Downloading sequence {}",
        style("→").cyan(),
        sequence_id
    );

    let (event_tx, event_rx) = mpsc::channel::<DownloadEvent>(100);
    let (result, ()) = tokio::join!(
        downloader
            .download_sequence(sequence_id, event_tx)
            .with_subscriber(log.subscriber(verbose)),
        show_download_progress(event_rx),
    );

    match result {
        Ok(summary) => {
            log.append(&summary.report())?;
            println!(
                "  {} Log written to {}",
                style("→").dim(),
                log.path().display()
            );
            Ok(summary)
        }
        Err(e) => {
            log.append(&format!("Sequence {} failed: {}\n", sequence_id, e))?;
            Err(e.into())
        }
    }
}

pub(super) fn print_summary(summary: &RunSummary) {
    println!(
        "{} Saved {}/{} images ({} with GPS data, {} without)",
        if summary.is_success() {
            style("✓").green()
        } else {
            style("✗").red()
        },
        summary.saved,
        summary.listed,
        summary.saved_with_exif,
        summary.saved_without_exif
    );
    if let Some(dir) = &summary.output_dir {
        println!("  {} {}", style("→").dim(), dir.display());
    }
    if summary.detections > 0 {
        println!(
            "  {} {} objects detected",
            style("→").dim(),
            summary.detections
        );
    }
    if !summary.failures.is_empty() {
        println!(
            "  {} {} problems (see log for details)",
            style("!").yellow(),
            summary.failures.len()
        );
    }
}
