//! Implementation of the `tct-setup status` command.
//!
//! Reads every instrument through the running server and lists the state
//! of the four resource locks.

use crate::cli::StatusArgs;
use crate::config::Config;
use crate::context::SetupContext;
use crate::error::{Result, SetupError};
use crate::locks::{self, LockInfo, ResourceGroup};
use crate::remote::RemoteSetup;
use crate::setup::SetupApi;
use std::fmt::Write;

/// Execute the `tct-setup status` command.
pub fn cmd_status(ctx: &SetupContext, config: &Config, args: StatusArgs) -> Result<()> {
    let address = args.address.as_deref().unwrap_or(&config.address);
    let setup = RemoteSetup::connect(address, &config.auth_token, config.call_timeout())?;
    let held = locks::list_locks(&ctx.lock_dir, config.lock_stale_minutes)?;

    println!("TCT Setup Status ({})", address);
    println!("================");
    println!();
    print!("{}", render_instruments(&setup)?);
    println!();
    print!("{}", render_locks(&held));

    let stale_count = held.iter().filter(|l| l.is_stale).count();
    if stale_count > 0 {
        println!();
        println!(
            "Note: {} lock(s) are stale. Use `tct-setup lock clear <name> --force` once the holder is known to be gone.",
            stale_count
        );
    }
    Ok(())
}

/// `None` for operations the deployed setup does not provide.
fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SetupError::Unsupported(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn reading(value: f64, unit: &str) -> String {
    if value.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:.3} {}", value, unit)
    }
}

fn scientific(value: f64, unit: &str) -> String {
    if value.is_nan() {
        "n/a".to_string()
    } else {
        format!("{:.3e} {}", value, unit)
    }
}

fn status_word<T: std::fmt::Display>(status: Option<T>) -> String {
    status.map(|s| s.to_string()).unwrap_or_else(|| "n/a".to_string())
}

/// Snapshot of every instrument, one line per subsystem.
pub(crate) fn render_instruments(api: &impl SetupApi) -> Result<String> {
    let mut out = String::new();

    match optional(api.stage_position())? {
        Some(p) => {
            let _ = writeln!(
                out,
                "Stage:        x={:.4}  y={:.4}  z={:.4}",
                p.x, p.y, p.z
            );
            let _ = writeln!(
                out,
                "Laser:        {}, DAC {}, {}",
                api.laser_status()?,
                api.laser_dac()?,
                reading(api.laser_frequency()?, "Hz")
            );
        }
        None => {
            let _ = writeln!(out, "Stage:        not configured");
            let _ = writeln!(out, "Laser:        not configured");
        }
    }

    let _ = writeln!(
        out,
        "Bias:         {}, {} (compliance {}), output {}",
        reading(api.measure_bias_voltage()?, "V"),
        scientific(api.measure_bias_current()?, "A"),
        scientific(api.current_compliance()?, "A"),
        status_word(api.bias_output_status()?)
    );

    let _ = writeln!(
        out,
        "Environment:  {}, {}",
        reading(api.measure_temperature()?, "°C"),
        reading(api.measure_humidity()?, "%RH")
    );

    let _ = writeln!(
        out,
        "Peltier:      set {} / {}, measured {} / {}, output {}",
        reading(api.peltier_voltage_setpoint()?, "V"),
        reading(api.peltier_current_setpoint()?, "A"),
        reading(api.measure_peltier_voltage()?, "V"),
        reading(api.measure_peltier_current()?, "A"),
        status_word(api.peltier_status()?)
    );

    Ok(out)
}

/// One line per resource group, held or free.
pub(crate) fn render_locks(held: &[LockInfo]) -> String {
    let mut out = String::from("Resource locks:\n");
    for group in ResourceGroup::ALL {
        match held.iter().find(|l| l.group == Some(group)) {
            Some(lock) => {
                let _ = writeln!(
                    out,
                    "  {:20} held by {} (depth {}, pid {} on {}, {}){}",
                    group.as_str(),
                    lock.state.holder,
                    lock.state.count,
                    lock.state.pid,
                    lock.state.host,
                    lock.state.age_string(),
                    if lock.is_stale { " [STALE]" } else { "" }
                );
            }
            None => {
                let _ = writeln!(out, "  {:20} free", group.as_str());
            }
        }
    }
    out
}
