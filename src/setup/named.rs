//! The façade coordinated through named resource group locks.

use super::api::SetupApi;
use super::facade::TctSetup;
use crate::config::Config;
use crate::context::SetupContext;
use crate::error::{Result, SetupError};
use crate::instruments::{OutputStatus, StagePosition, Waveform};
use crate::locks::{ResourceGroup, ResourceLockSet};

/// [`TctSetup`] plus one named lock per resource group.
///
/// Every state-changing operation names its caller and runs inside the
/// named lock of its resource group. The lock is reentrant, so a script
/// that already holds the group (through a `hold_*` scope) passes straight
/// through, while any other identity waits until the group is released.
/// Reads and measurements do not take the named lock.
pub struct NamedLockSetup {
    setup: TctSetup,
    locks: ResourceLockSet,
}

impl NamedLockSetup {
    pub fn new(setup: TctSetup, locks: ResourceLockSet) -> Self {
        Self { setup, locks }
    }

    /// Simulated instruments from `config`, locks in the context's lock directory.
    pub fn from_config(ctx: &SetupContext, config: &Config) -> Self {
        Self::new(
            TctSetup::from_config(&config.instruments),
            ResourceLockSet::from_config(ctx, config),
        )
    }

    pub fn setup(&self) -> &TctSetup {
        &self.setup
    }

    pub fn locks(&self) -> &ResourceLockSet {
        &self.locks
    }

    /// Run `f` while `who` holds `group`.
    fn exclusive<T>(
        &self,
        group: ResourceGroup,
        operation: &str,
        who: Option<&str>,
        f: impl FnOnce(&TctSetup) -> Result<T>,
    ) -> Result<T> {
        let who = who.ok_or_else(|| SetupError::IdentityRequired(operation.to_string()))?;
        let guard = self.locks.get(group).hold(who)?;
        let result = f(&self.setup);
        let released = guard.release();
        result.and_then(|value| released.map(|()| value))
    }
}

impl SetupApi for NamedLockSetup {
    fn move_to(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        who: Option<&str>,
    ) -> Result<()> {
        self.exclusive(ResourceGroup::Tct, "move_to", who, |s| s.move_to(x, y, z))
    }

    fn stage_position(&self) -> Result<StagePosition> {
        self.setup.stage_position()
    }

    fn laser_status(&self) -> Result<OutputStatus> {
        self.setup.laser_status()
    }

    fn set_laser_status(&self, status: OutputStatus, who: Option<&str>) -> Result<()> {
        self.exclusive(ResourceGroup::Tct, "set_laser_status", who, |s| {
            s.set_laser_status(status)
        })
    }

    fn laser_dac(&self) -> Result<u16> {
        self.setup.laser_dac()
    }

    fn set_laser_dac(&self, dac: u16, who: Option<&str>) -> Result<()> {
        self.exclusive(ResourceGroup::Tct, "set_laser_dac", who, |s| s.set_laser_dac(dac))
    }

    fn laser_frequency(&self) -> Result<f64> {
        self.setup.laser_frequency()
    }

    fn set_laser_frequency(&self, hz: f64, who: Option<&str>) -> Result<()> {
        self.exclusive(ResourceGroup::Tct, "set_laser_frequency", who, |s| {
            s.set_laser_frequency(hz)
        })
    }

    fn measure_bias_voltage(&self) -> Result<f64> {
        self.setup.measure_bias_voltage()
    }

    fn set_bias_voltage(&self, volts: f64, who: Option<&str>) -> Result<()> {
        self.exclusive(ResourceGroup::Bias, "set_bias_voltage", who, |s| {
            s.set_bias_voltage(volts)
        })
    }

    fn measure_bias_current(&self) -> Result<f64> {
        self.setup.measure_bias_current()
    }

    fn current_compliance(&self) -> Result<f64> {
        self.setup.current_compliance()
    }

    fn set_current_compliance(&self, amperes: f64, who: Option<&str>) -> Result<()> {
        self.exclusive(ResourceGroup::Bias, "set_current_compliance", who, |s| {
            s.set_current_compliance(amperes)
        })
    }

    fn bias_output_status(&self) -> Result<Option<OutputStatus>> {
        self.setup.bias_output_status()
    }

    fn set_bias_output_status(&self, status: OutputStatus, who: Option<&str>) -> Result<()> {
        self.exclusive(ResourceGroup::Bias, "set_bias_output_status", who, |s| {
            s.set_bias_output_status(status)
        })
    }

    fn configure_for_two_pulses(&self, who: Option<&str>) -> Result<()> {
        self.exclusive(
            ResourceGroup::SignalAcquisition,
            "configure_for_two_pulses",
            who,
            |s| s.configure_for_two_pulses(),
        )
    }

    fn configure_sequence_acquisition(&self, n: u32, who: Option<&str>) -> Result<()> {
        self.exclusive(
            ResourceGroup::SignalAcquisition,
            "configure_sequence_acquisition",
            who,
            |s| s.configure_sequence_acquisition(n),
        )
    }

    fn wait_for_trigger(&self) -> Result<()> {
        self.setup.wait_for_trigger()
    }

    fn get_waveform(&self, channel: u8) -> Result<Vec<Waveform>> {
        self.setup.get_waveform(channel)
    }

    fn set_vdiv(&self, channel: u8, volts_per_div: f64, who: Option<&str>) -> Result<()> {
        self.exclusive(ResourceGroup::SignalAcquisition, "set_vdiv", who, |s| {
            s.set_vdiv(channel, volts_per_div)
        })
    }

    fn measure_temperature(&self) -> Result<f64> {
        Ok(self.setup.measure_temperature())
    }

    fn measure_humidity(&self) -> Result<f64> {
        Ok(self.setup.measure_humidity())
    }

    fn peltier_voltage_setpoint(&self) -> Result<f64> {
        self.setup.peltier_voltage_setpoint()
    }

    fn set_peltier_voltage(&self, volts: f64, who: Option<&str>) -> Result<()> {
        self.exclusive(ResourceGroup::Temperature, "set_peltier_voltage", who, |s| {
            s.set_peltier_voltage(volts)
        })
    }

    fn peltier_current_setpoint(&self) -> Result<f64> {
        self.setup.peltier_current_setpoint()
    }

    fn set_peltier_current(&self, amperes: f64, who: Option<&str>) -> Result<()> {
        self.exclusive(ResourceGroup::Temperature, "set_peltier_current", who, |s| {
            s.set_peltier_current(amperes)
        })
    }

    fn measure_peltier_voltage(&self) -> Result<f64> {
        self.setup.measure_peltier_voltage()
    }

    fn measure_peltier_current(&self) -> Result<f64> {
        self.setup.measure_peltier_current()
    }

    fn peltier_status(&self) -> Result<Option<OutputStatus>> {
        self.setup.peltier_status()
    }

    fn set_peltier_status(&self, status: OutputStatus, who: Option<&str>) -> Result<()> {
        self.exclusive(ResourceGroup::Temperature, "set_peltier_status", who, |s| {
            s.set_peltier_status(status)
        })
    }

    fn acquire(&self, group: ResourceGroup, who: &str) -> Result<()> {
        self.locks.get(group).acquire(who)
    }

    fn release(&self, group: ResourceGroup, who: &str) -> Result<()> {
        self.locks.get(group).release(who)
    }
}
