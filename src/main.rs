//! tct-setup: coordination server and operator CLI for a laser TCT setup.
//!
//! This is the main entry point for the `tct-setup` CLI. It parses arguments,
//! installs the log subscriber, dispatches to the appropriate command handler,
//! and handles errors with proper exit codes.

use std::process::ExitCode;
use tct_setup::cli::Cli;
use tct_setup::{commands, exit_codes};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    match commands::dispatch(cli.command) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);

            ExitCode::from(err.exit_code() as u8)
        }
    }
}
