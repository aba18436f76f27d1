pub mod cli;
pub mod config;
pub mod error;
pub mod sync;

use anyhow::Result;

/// Library entrypoint for the `synctools` binary; returns the exit code.
pub async fn run(cli: cli::Cli) -> Result<i32> {
    cli::execute(cli).await
}
