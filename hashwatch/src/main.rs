//! hashwatch - Main entry point
//!
//! Runs one integrity scan and reports the changes since the previous run.

use anyhow::{Context, Result};
use clap::Parser;
use hashwatch::{config::Config, utils, ScanExecutor};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the scan report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref()).with_context(|| match &args.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting hashwatch v{}", env!("CARGO_PKG_VERSION"));

    let mut executor = ScanExecutor::new(config.scan);
    let report = match executor.run() {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Scan failed: {:#}", anyhow::Error::from(e));
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        tracing::info!("{}", report.summary());
    }

    Ok(ExitCode::SUCCESS)
}
