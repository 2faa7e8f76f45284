// sentinel-audit: command-line front end for the audit store
// Diagnostics go to stderr; stdout carries only command output.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use sentinel_audit::cli::{dispatch, Cli};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match dispatch(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
