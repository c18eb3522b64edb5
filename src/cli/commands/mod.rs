//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod batch;
mod download;
mod find;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "seqa")]
#[command(about = "Street-level imagery sequence discovery and GPS/EXIF-annotated download")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Camera type presets for discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum FilterPreset {
    /// Every image
    #[default]
    All,
    /// Spherical (360°) cameras only
    #[value(name = "360")]
    Spherical,
    /// Perspective (regular) cameras only
    Regular,
}

impl FilterPreset {
    pub fn camera_type(self) -> Option<&'static str> {
        match self {
            FilterPreset::All => None,
            FilterPreset::Spherical => Some("spherical"),
            FilterPreset::Regular => Some("perspective"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FilterPreset::All => "all",
            FilterPreset::Spherical => "360",
            FilterPreset::Regular => "regular",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Find all sequences uploaded by a user, grouped by capture date
    Find {
        /// Username to search for
        username: String,
        /// Maximum number of listing pages to fetch
        #[arg(short = 'p', long)]
        max_pages: Option<u32>,
        /// Camera type preset (360=spherical, regular=perspective)
        #[arg(short, long, value_enum, default_value = "all")]
        filter: FilterPreset,
        /// Custom camera type substring (overrides --filter)
        #[arg(long)]
        camera_type: Option<String>,
        /// Output file (default: sequences_<username>.txt)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download every image of one sequence with embedded GPS/EXIF
    Download {
        /// Sequence ID
        sequence_id: String,
        /// Re-encode with this JPEG quality (1-100); original bytes are kept if omitted
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: Option<u8>,
    },

    /// Download every sequence listed in a file (one ID per line, # comments allowed)
    Batch {
        /// Sequence list file
        file: PathBuf,
        /// Re-encode with this JPEG quality (1-100)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: Option<u8>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
    };
    let (settings, _config) = load_settings_with_options(options)?;

    // Credentials are checked before any network activity.
    settings.require_access_token()?;

    match cli.command {
        Commands::Find {
            username,
            max_pages,
            filter,
            camera_type,
            output,
        } => {
            find::cmd_find(
                &settings,
                &username,
                max_pages,
                filter,
                camera_type,
                output,
            )
            .await
        }
        Commands::Download {
            sequence_id,
            quality,
        } => download::cmd_download(&settings, &sequence_id, quality, cli.verbose).await,
        Commands::Batch { file, quality, yes } => {
            batch::cmd_batch(&settings, &file, quality, yes, cli.verbose).await
        }
    }
}
