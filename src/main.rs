use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use synctools::cli::{Cli, EXIT_ERROR};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match synctools::run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "Error:".red().bold());
            EXIT_ERROR
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(EXIT_ERROR as u8))
}
