//! Command implementations for tct-setup.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations. Every command resolves the shared context and config
//! first so that all processes agree on the lock directory.

mod serve;
mod status;

use crate::cli::{Command, LockAction, LockClearArgs, LockCommand};
use crate::config::Config;
use crate::context::SetupContext;
use crate::error::{Result, SetupError};
use crate::events::{self, Event, EventAction};
use crate::locks;
use serde_json::json;

/// Dispatch a command to its implementation.
pub fn dispatch(command: Command) -> Result<()> {
    let (ctx, config) = SetupContext::resolve()?.load_config()?;

    match command {
        Command::Serve(args) => serve::cmd_serve(&ctx, &config, args),
        Command::Status(args) => status::cmd_status(&ctx, &config, args),
        Command::Lock(lock_cmd) => dispatch_lock(&ctx, &config, lock_cmd),
        Command::Config => cmd_config(&config),
    }
}

/// Dispatch lock subcommands.
fn dispatch_lock(ctx: &SetupContext, config: &Config, lock_cmd: LockCommand) -> Result<()> {
    match lock_cmd.action {
        LockAction::List => cmd_lock_list(ctx, config),
        LockAction::Clear(args) => cmd_lock_clear(ctx, config, args),
    }
}

fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn cmd_lock_list(ctx: &SetupContext, config: &Config) -> Result<()> {
    let locks = locks::list_locks(&ctx.lock_dir, config.lock_stale_minutes)?;

    if locks.is_empty() {
        println!("No held locks.");
        return Ok(());
    }

    println!("Held locks ({}):", locks.len());
    println!();

    for lock in &locks {
        println!("  {}:", lock.name);
        println!("    Holder:     {}", lock.state.holder);
        println!("    Depth:      {}", lock.state.count);
        println!("    PID:        {}", lock.state.pid);
        println!("    Host:       {}", lock.state.host);
        println!("    Acquired:   {}", lock.state.acquired_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("    Age:        {}", lock.state.age_string());
        if lock.is_stale {
            println!("    Status:     STALE (exceeds {} min threshold)", config.lock_stale_minutes);
        }
        println!("    Path:       {}", lock.path.display());
        println!();
    }

    let stale_count = locks.iter().filter(|l| l.is_stale).count();
    if stale_count > 0 {
        println!(
            "Note: {} lock(s) are stale. Use `tct-setup lock clear <name> --force` to clear.",
            stale_count
        );
    }

    Ok(())
}

fn cmd_lock_clear(ctx: &SetupContext, config: &Config, args: LockClearArgs) -> Result<()> {
    if !args.force {
        return Err(SetupError::InvalidInput(format!(
            "refusing to clear lock without --force flag.\n\n\
             Clearing a lock while its holder is still running lets two processes drive the same hardware.\n\
             Only clear locks if you are certain the holder has exited.\n\n\
             To clear the lock, run:\n  tct-setup lock clear {} --force",
            args.name
        )));
    }

    let cleared = locks::clear_lock(&ctx.lock_dir, &args.name, config.lock_stale_minutes)?;

    if config.audit_log {
        let event = Event::new(EventAction::Clear)
            .with_lock(cleared.name.clone())
            .with_details(json!({
                "holder": cleared.state.holder,
                "count": cleared.state.count,
                "pid": cleared.state.pid,
                "host": cleared.state.host,
                "age_minutes": cleared.state.age().num_minutes(),
                "was_stale": cleared.is_stale,
                "force": args.force
            }));
        events::record(&ctx.events_path(), &event);
    }

    println!("Cleared lock: {}", cleared.name);
    println!();
    println!("Lock details:");
    println!("  Holder:     {}", cleared.state.holder);
    println!("  Depth:      {}", cleared.state.count);
    println!("  PID:        {}", cleared.state.pid);
    println!("  Host:       {}", cleared.state.host);
    println!("  Acquired:   {}", cleared.state.acquired_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Age:        {}", cleared.state.age_string());
    if cleared.is_stale {
        println!("  Status:     was STALE");
    }
    println!("  Path:       {}", cleared.path.display());

    Ok(())
}
