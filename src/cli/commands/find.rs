//! Sequence discovery command.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use console::style;
use indicatif::ProgressBar;

use super::FilterPreset;
use crate::client::ApiClient;
use crate::config::Settings;
use crate::crawler::{crawl_user_sequences, CrawlOptions};
use crate::models::millis_to_naive;
use crate::writer::{default_output_path, RunHeader, SequenceWriter};

/// Find all sequences of a user and write them to a date-grouped file.
pub async fn cmd_find(
    settings: &Settings,
    username: &str,
    max_pages: Option<u32>,
    filter: FilterPreset,
    camera_type: Option<String>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let username = username.trim();
    if username.is_empty() {
        anyhow::bail!("Username cannot be empty");
    }

    let camera_type = camera_type
        .filter(|c| !c.trim().is_empty())
        .or_else(|| filter.camera_type().map(str::to_string));
    let client = ApiClient::new(settings)?;

    println!(
        "{} Searching for sequences of user '{}'",
        style("→").cyan(),
        username
    );
    if let Some(max) = max_pages {
        println!("  {} Maximum {} pages", style("→").dim(), max);
    }
    if let Some(ref camera) = camera_type {
        println!("  {} Filtering for camera type: {}", style("→").dim(), camera);
    }

    let output_path = output.unwrap_or_else(|| default_output_path(username));
    let header = RunHeader {
        username: username.to_string(),
        started_at: Local::now().naive_local(),
        max_pages,
        camera_type: camera_type.clone(),
        filter_name: filter.name().to_string(),
    };
    let mut writer = SequenceWriter::create(&output_path, &header)?;
    println!(
        "{} Output file prepared: {}",
        style("✓").green(),
        output_path.display()
    );

    let options = CrawlOptions {
        max_pages,
        camera_type,
        page_size: settings.page_size,
        page_delay: settings.page_delay(),
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_message("Crawling listing pages...");
    spinner.enable_steady_tick(Duration::from_millis(120));
    let outcome = crawl_user_sequences(&client, username, &options, &mut writer).await;
    spinner.finish_and_clear();
    let outcome = outcome?;

    let output_path = writer.finish(&outcome)?;

    if let Some(ref reason) = outcome.aborted {
        println!(
            "{} Search stopped early after {} pages: {}",
            style("!").yellow(),
            outcome.pages,
            reason
        );
    }

    if outcome.sequences.is_empty() {
        println!("{} No sequences found", style("!").yellow());
        return Ok(());
    }

    println!();
    println!(
        "{} Found {} sequences ({} images on {} pages, {} date blocks)",
        style("✓").green(),
        outcome.sequence_count(),
        outcome.images_matched,
        outcome.pages,
        outcome.buckets_flushed
    );

    let mut all: Vec<&String> = outcome.sequences.keys().collect();
    all.sort();
    for (i, id) in all.iter().enumerate() {
        println!("{:4}. {}", i + 1, id);
    }

    println!();
    println!("{}", style("Most recent sequences:").bold());
    for (i, (id, stats)) in outcome.most_recent(10).into_iter().enumerate() {
        let when = stats
            .latest
            .and_then(millis_to_naive)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "{:4}. {}  {}  ({} images)",
            i + 1,
            id,
            style(when).dim(),
            stats.images
        );
    }

    println!();
    println!(
        "{} Sequences saved to {}",
        style("✓").green(),
        output_path.display()
    );
    println!(
        "  {} Download them with: seqa batch {}",
        style("→").dim(),
        output_path.display()
    );

    Ok(())
}
