mod app;
mod cli;
mod config;
mod error;
mod logging;
mod output;

use std::process;

use clap::Parser;
use colored::*;
use tracing::{error, warn};

use crate::{
    cli::Args,
    config::{AppConfig, Overrides},
    error::Result,
    logging::Verbosity,
};

#[tokio::main]
async fn main() {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let code = match run(&args).await {
        Ok(code) => code,
        Err(e) => {
            error!("Application error: {}", e);
            if args.json {
                let error_json = serde_json::json!({
                    "status": "error",
                    "message": e.to_string(),
                });
                println!("{}", error_json);
            } else {
                eprintln!("{} {}", "Error:".red().bold(), e);
            }
            app::exit_code::FAILURE
        }
    };
    process::exit(code);
}

async fn run(args: &Args) -> Result<i32> {
    let overrides = Overrides {
        target_timestamp: args.target_timestamp,
        tolerance: args.tolerance,
        rpc: args.rpc.clone(),
        backup_rpc: args.backup_rpc.clone(),
    };
    let config = AppConfig::load(args.config.as_deref(), overrides)?;

    let _guard = logging::init_logging(
        &config.log_dir,
        Verbosity::from_flags(args.verbose, args.quiet),
    )?;
    if let Err(e) = logging::cleanup_old_logs(&config.log_dir).await {
        warn!("Failed to clean up old log files: {}", e);
    }
    tracing::debug!(?config, "Configuration loaded");

    app::execute(args, config).await
}
