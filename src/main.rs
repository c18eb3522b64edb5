//! seqa - command-line entry point for seqacquire.

use seqacquire::{cli, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    logging::init(cli::is_verbose());

    // Run CLI
    cli::run().await
}
