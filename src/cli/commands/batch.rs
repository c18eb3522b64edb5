//! Batch download command.

use std::io::{self, Write};
use std::path::Path;

use console::style;

use super::download::{download_sequence, print_summary};
use crate::client::ApiClient;
use crate::config::Settings;
use crate::services::{read_sequence_file, run_batch};

/// Download every sequence listed in `file`.
pub async fn cmd_batch(
    settings: &Settings,
    file: &Path,
    quality: Option<u8>,
    confirm: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let sequence_ids = read_sequence_file(file)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", file.display(), e))?;

    if sequence_ids.is_empty() {
        println!(
            "{} No sequence IDs found in {}",
            style("!").yellow(),
            file.display()
        );
        return Ok(());
    }

    println!(
        "{} {} sequences to download from {}",
        style("→").cyan(),
        sequence_ids.len(),
        file.display()
    );
    if let Some(q) = quality {
        println!("  JPEG quality: {}", q);
    }

    // Confirm
    if !confirm {
        print!("\nProceed? [y/N] ");
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{} Cancelled", style("!").yellow());
            return Ok(());
        }
    }

    let client = ApiClient::new(settings)?;
    let result = run_batch(&sequence_ids, settings.sequence_delay(), |id| {
        let client = &client;
        async move {
            let summary = download_sequence(settings, client, &id, quality, verbose).await?;
            print_summary(&summary);
            Ok(summary)
        }
    })
    .await;

    println!();
    println!(
        "{} Batch complete: {} successful, {} failed",
        style("✓").green(),
        result.successful.len(),
        result.failed.len()
    );
    for (id, reason) in &result.failed {
        println!("  {} {}: {}", style("✗").red(), id, reason);
    }

    Ok(())
}
