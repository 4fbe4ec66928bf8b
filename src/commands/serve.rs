//! Implementation of the `tct-setup serve` command.

use crate::cli::ServeArgs;
use crate::config::Config;
use crate::context::SetupContext;
use crate::error::Result;
use crate::remote::SetupServer;
use crate::setup::{NamedLockSetup, SetupApi, TctSetup};
use std::sync::Arc;

/// Execute the `tct-setup serve` command.
///
/// Blocks for the lifetime of the server.
pub fn cmd_serve(ctx: &SetupContext, config: &Config, args: ServeArgs) -> Result<()> {
    let (server, named_locks) = build_server(ctx, config, &args)?;

    println!("Serving TCT setup on {}", server.local_addr()?);
    if named_locks {
        println!("  Named locks: {}", ctx.lock_dir.display());
    } else {
        println!("  Named locks: disabled");
    }
    if config.audit_log {
        println!("  Audit log:   {}", ctx.events_path().display());
    }

    server.serve()
}

/// Build the façade and bind the server; also reports whether named locks are on.
pub(crate) fn build_server(
    ctx: &SetupContext,
    config: &Config,
    args: &ServeArgs,
) -> Result<(SetupServer, bool)> {
    let mut config = config.clone();
    if let Some(address) = &args.address {
        config.address = address.clone();
        config.validate()?;
    }
    let named_locks = config.named_locks && !args.no_named_locks;

    let api: Arc<dyn SetupApi> = if named_locks {
        Arc::new(NamedLockSetup::from_config(ctx, &config))
    } else {
        Arc::new(TctSetup::from_config(&config.instruments))
    };

    let mut server = SetupServer::bind(config.socket_addr()?, api, config.auth_token.clone())?;
    if config.audit_log {
        server = server.with_audit_log(ctx.events_path());
    }
    Ok((server, named_locks))
}
