//! hoprelay binary.
//!
//! Runs every service declared in the configuration file until SIGINT or
//! SIGTERM.

use std::process::ExitCode;

use clap::Parser;
use hoprelay_service::cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match hoprelay_service::cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
