//! CLI argument parsing for tct-setup.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{ArgAction, Parser, Subcommand};

/// tct-setup: shared access to a laser TCT measurement setup.
///
/// One server process owns the instruments; scan and control scripts
/// connect to it and coordinate through four named resource locks:
/// - bias: the high-voltage bias supply
/// - signal_acquisition: oscilloscope or digitizer
/// - tct: stages and laser
/// - temperature: Peltier cooling
#[derive(Parser, Debug)]
#[command(name = "tct-setup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for tct-setup.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the setup server.
    ///
    /// Builds the configured instruments and serves them to every
    /// process on this host until terminated.
    Serve(ServeArgs),

    /// Show a snapshot of the setup.
    ///
    /// Connects to the running server and prints stage, laser, bias,
    /// environment and cooling readings plus the held resource locks.
    Status(StatusArgs),

    /// Lock management commands.
    ///
    /// List or clear the named resource locks.
    Lock(LockCommand),

    /// Print the effective configuration as YAML.
    Config,
}

/// Arguments for the `serve` command.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen on this address instead of the configured one.
    #[arg(long)]
    pub address: Option<String>,

    /// Serve the plain setup without named resource locks.
    #[arg(long)]
    pub no_named_locks: bool,
}

/// Arguments for the `status` command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Connect to this address instead of the configured one.
    #[arg(long)]
    pub address: Option<String>,
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// List all held locks.
    ///
    /// Shows holder, reentrancy depth, process and age of each lock.
    List,

    /// Clear a specific lock.
    ///
    /// Requires --force flag to prevent accidental clearing.
    Clear(LockClearArgs),
}

/// Arguments for the `lock clear` command.
#[derive(Parser, Debug)]
pub struct LockClearArgs {
    /// Lock to clear: bias, signal_acquisition, tct or temperature.
    pub name: String,

    /// Force clearing the lock (required for safety).
    #[arg(long)]
    pub force: bool,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_serve_defaults() {
        let cli = Cli::try_parse_from(["tct-setup", "serve"]).unwrap();
        if let Command::Serve(args) = cli.command {
            assert!(args.address.is_none());
            assert!(!args.no_named_locks);
        } else {
            panic!("Expected Serve command");
        }
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn parse_serve_full() {
        let cli = Cli::try_parse_from([
            "tct-setup",
            "serve",
            "--address",
            "0.0.0.0:6000",
            "--no-named-locks",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        if let Command::Serve(args) = cli.command {
            assert_eq!(args.address.as_deref(), Some("0.0.0.0:6000"));
            assert!(args.no_named_locks);
        } else {
            panic!("Expected Serve command");
        }
    }

    #[test]
    fn parse_status() {
        let cli = Cli::try_parse_from(["tct-setup", "-v", "status"]).unwrap();
        assert!(matches!(cli.command, Command::Status(_)));
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn parse_lock_list() {
        let cli = Cli::try_parse_from(["tct-setup", "lock", "list"]).unwrap();
        if let Command::Lock(lock_cmd) = cli.command {
            assert!(matches!(lock_cmd.action, LockAction::List));
        } else {
            panic!("Expected Lock command");
        }
    }

    #[test]
    fn parse_lock_clear() {
        let cli = Cli::try_parse_from(["tct-setup", "lock", "clear", "bias", "--force"]).unwrap();
        if let Command::Lock(lock_cmd) = cli.command {
            if let LockAction::Clear(args) = lock_cmd.action {
                assert_eq!(args.name, "bias");
                assert!(args.force);
            } else {
                panic!("Expected Clear action");
            }
        } else {
            panic!("Expected Lock command");
        }
    }

    #[test]
    fn parse_lock_clear_requires_name() {
        assert!(Cli::try_parse_from(["tct-setup", "lock", "clear"]).is_err());
    }

    #[test]
    fn parse_config() {
        let cli = Cli::try_parse_from(["tct-setup", "config"]).unwrap();
        assert!(matches!(cli.command, Command::Config));
    }
}
