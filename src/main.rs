//! Overlay updater entry point
//!
//! Parses the command line, runs the command and prints failures with a
//! suggestion. Every command first completes any update deferred by a
//! previous run.

use anyhow::Result;
use clap::Parser;
use overlay_updater::cli;
use overlay_updater::core::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
