//! Progress display for sequence downloads.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::services::DownloadEvent;

/// Drive a progress bar from download events until the sender is dropped.
pub async fn show_download_progress(mut event_rx: mpsc::Receiver<DownloadEvent>) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░"),
    );

    while let Some(event) = event_rx.recv().await {
        match event {
            DownloadEvent::Listed { sequence_id, total } => {
                bar.set_length(total as u64);
                bar.set_message(format!("Sequence {}", sequence_id));
            }
            DownloadEvent::Started { index, image_id } => {
                bar.set_position(index as u64);
                bar.set_message(format!("Image {}", image_id));
            }
            DownloadEvent::Saved {
                with_exif: false,
                image_id,
                ..
            } => {
                bar.println(format!(
                    "{} Image {} saved without GPS data",
                    style("!").yellow(),
                    image_id
                ));
            }
            DownloadEvent::Saved { .. } => {}
            DownloadEvent::Failed {
                image_id,
                kind,
                error,
            } => {
                bar.println(format!(
                    "{} Image {} ({}): {}",
                    style("✗").red(),
                    image_id,
                    kind,
                    error
                ));
            }
        }
    }

    bar.finish_and_clear();
}
