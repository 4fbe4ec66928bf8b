//! The operation interface shared by local and remote setups.

use super::facade::TctSetup;
use crate::error::{Result, SetupError};
use crate::instruments::{OutputStatus, StagePosition, Waveform};
use crate::locks::ResourceGroup;

/// Every operation of the setup façade.
///
/// Setters that change the state of a resource group take the caller
/// identity as `who`. Implementations that coordinate with named locks
/// require it; the plain façade ignores it. [`Identified`](super::Identified)
/// fills it in so scripts state their identity once.
pub trait SetupApi: Send + Sync {
    fn move_to(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        who: Option<&str>,
    ) -> Result<()>;
    fn stage_position(&self) -> Result<StagePosition>;

    fn laser_status(&self) -> Result<OutputStatus>;
    fn set_laser_status(&self, status: OutputStatus, who: Option<&str>) -> Result<()>;
    fn laser_dac(&self) -> Result<u16>;
    fn set_laser_dac(&self, dac: u16, who: Option<&str>) -> Result<()>;
    fn laser_frequency(&self) -> Result<f64>;
    fn set_laser_frequency(&self, hz: f64, who: Option<&str>) -> Result<()>;

    fn measure_bias_voltage(&self) -> Result<f64>;
    fn set_bias_voltage(&self, volts: f64, who: Option<&str>) -> Result<()>;
    fn measure_bias_current(&self) -> Result<f64>;
    fn current_compliance(&self) -> Result<f64>;
    fn set_current_compliance(&self, amperes: f64, who: Option<&str>) -> Result<()>;
    fn bias_output_status(&self) -> Result<Option<OutputStatus>>;
    fn set_bias_output_status(&self, status: OutputStatus, who: Option<&str>) -> Result<()>;

    fn configure_for_two_pulses(&self, who: Option<&str>) -> Result<()>;
    fn configure_sequence_acquisition(&self, n: u32, who: Option<&str>) -> Result<()>;
    fn wait_for_trigger(&self) -> Result<()>;
    fn get_waveform(&self, channel: u8) -> Result<Vec<Waveform>>;
    fn set_vdiv(&self, channel: u8, volts_per_div: f64, who: Option<&str>) -> Result<()>;

    fn measure_temperature(&self) -> Result<f64>;
    fn measure_humidity(&self) -> Result<f64>;

    fn peltier_voltage_setpoint(&self) -> Result<f64>;
    fn set_peltier_voltage(&self, volts: f64, who: Option<&str>) -> Result<()>;
    fn peltier_current_setpoint(&self) -> Result<f64>;
    fn set_peltier_current(&self, amperes: f64, who: Option<&str>) -> Result<()>;
    fn measure_peltier_voltage(&self) -> Result<f64>;
    fn measure_peltier_current(&self) -> Result<f64>;
    fn peltier_status(&self) -> Result<Option<OutputStatus>>;
    fn set_peltier_status(&self, status: OutputStatus, who: Option<&str>) -> Result<()>;

    /// Take the named lock of `group` for `who`, waiting as long as needed.
    fn acquire(&self, group: ResourceGroup, who: &str) -> Result<()>;

    /// Undo one [`acquire`](SetupApi::acquire).
    fn release(&self, group: ResourceGroup, who: &str) -> Result<()>;

    /// Hold `group` for `who` until the returned guard is dropped.
    fn hold(&self, group: ResourceGroup, who: &str) -> Result<Hold<'_, Self>>
    where
        Self: Sized,
    {
        Hold::acquire(self, group, who)
    }

    fn hold_control_of_bias(&self, who: &str) -> Result<Hold<'_, Self>>
    where
        Self: Sized,
    {
        self.hold(ResourceGroup::Bias, who)
    }

    fn hold_signal_acquisition(&self, who: &str) -> Result<Hold<'_, Self>>
    where
        Self: Sized,
    {
        self.hold(ResourceGroup::SignalAcquisition, who)
    }

    fn hold_tct_control(&self, who: &str) -> Result<Hold<'_, Self>>
    where
        Self: Sized,
    {
        self.hold(ResourceGroup::Tct, who)
    }

    fn hold_temperature_control(&self, who: &str) -> Result<Hold<'_, Self>>
    where
        Self: Sized,
    {
        self.hold(ResourceGroup::Temperature, who)
    }
}

/// Scoped hold on a resource group.
///
/// Releases the group on drop, including during unwinding, so an error in
/// the protected sequence never leaves the group locked. A failed release
/// during drop is logged as a warning.
#[must_use = "the resource group is released as soon as the hold is dropped"]
pub struct Hold<'a, A: SetupApi + ?Sized> {
    api: &'a A,
    group: ResourceGroup,
    who: String,
    released: bool,
}

impl<'a, A: SetupApi + ?Sized> Hold<'a, A> {
    /// Acquire `group` on `api` and return the guard.
    pub fn acquire(api: &'a A, group: ResourceGroup, who: &str) -> Result<Self> {
        api.acquire(group, who)?;
        Ok(Self {
            api,
            group,
            who: who.to_string(),
            released: false,
        })
    }

    pub fn group(&self) -> ResourceGroup {
        self.group
    }

    pub fn who(&self) -> &str {
        &self.who
    }

    /// Release now, surfacing any error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.api.release(self.group, &self.who)
    }
}

impl<A: SetupApi + ?Sized> Drop for Hold<'_, A> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.api.release(self.group, &self.who)
        {
            tracing::warn!(group = %self.group, who = %self.who, "failed to release resource group: {}", e);
        }
    }
}

fn named_locks_unavailable() -> SetupError {
    SetupError::Unsupported("named locks are not deployed on this setup".to_string())
}

/// The plain façade: identities are accepted and ignored, and there are no
/// named locks to acquire.
impl SetupApi for TctSetup {
    fn move_to(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        _who: Option<&str>,
    ) -> Result<()> {
        TctSetup::move_to(self, x, y, z)
    }

    fn stage_position(&self) -> Result<StagePosition> {
        TctSetup::stage_position(self)
    }

    fn laser_status(&self) -> Result<OutputStatus> {
        TctSetup::laser_status(self)
    }

    fn set_laser_status(&self, status: OutputStatus, _who: Option<&str>) -> Result<()> {
        TctSetup::set_laser_status(self, status)
    }

    fn laser_dac(&self) -> Result<u16> {
        TctSetup::laser_dac(self)
    }

    fn set_laser_dac(&self, dac: u16, _who: Option<&str>) -> Result<()> {
        TctSetup::set_laser_dac(self, dac)
    }

    fn laser_frequency(&self) -> Result<f64> {
        TctSetup::laser_frequency(self)
    }

    fn set_laser_frequency(&self, hz: f64, _who: Option<&str>) -> Result<()> {
        TctSetup::set_laser_frequency(self, hz)
    }

    fn measure_bias_voltage(&self) -> Result<f64> {
        TctSetup::measure_bias_voltage(self)
    }

    fn set_bias_voltage(&self, volts: f64, _who: Option<&str>) -> Result<()> {
        TctSetup::set_bias_voltage(self, volts)
    }

    fn measure_bias_current(&self) -> Result<f64> {
        TctSetup::measure_bias_current(self)
    }

    fn current_compliance(&self) -> Result<f64> {
        TctSetup::current_compliance(self)
    }

    fn set_current_compliance(&self, amperes: f64, _who: Option<&str>) -> Result<()> {
        TctSetup::set_current_compliance(self, amperes)
    }

    fn bias_output_status(&self) -> Result<Option<OutputStatus>> {
        TctSetup::bias_output_status(self)
    }

    fn set_bias_output_status(&self, status: OutputStatus, _who: Option<&str>) -> Result<()> {
        TctSetup::set_bias_output_status(self, status)
    }

    fn configure_for_two_pulses(&self, _who: Option<&str>) -> Result<()> {
        TctSetup::configure_for_two_pulses(self)
    }

    fn configure_sequence_acquisition(&self, n: u32, _who: Option<&str>) -> Result<()> {
        TctSetup::configure_sequence_acquisition(self, n)
    }

    fn wait_for_trigger(&self) -> Result<()> {
        TctSetup::wait_for_trigger(self)
    }

    fn get_waveform(&self, channel: u8) -> Result<Vec<Waveform>> {
        TctSetup::get_waveform(self, channel)
    }

    fn set_vdiv(&self, channel: u8, volts_per_div: f64, _who: Option<&str>) -> Result<()> {
        TctSetup::set_vdiv(self, channel, volts_per_div)
    }

    fn measure_temperature(&self) -> Result<f64> {
        Ok(TctSetup::measure_temperature(self))
    }

    fn measure_humidity(&self) -> Result<f64> {
        Ok(TctSetup::measure_humidity(self))
    }

    fn peltier_voltage_setpoint(&self) -> Result<f64> {
        TctSetup::peltier_voltage_setpoint(self)
    }

    fn set_peltier_voltage(&self, volts: f64, _who: Option<&str>) -> Result<()> {
        TctSetup::set_peltier_voltage(self, volts)
    }

    fn peltier_current_setpoint(&self) -> Result<f64> {
        TctSetup::peltier_current_setpoint(self)
    }

    fn set_peltier_current(&self, amperes: f64, _who: Option<&str>) -> Result<()> {
        TctSetup::set_peltier_current(self, amperes)
    }

    fn measure_peltier_voltage(&self) -> Result<f64> {
        TctSetup::measure_peltier_voltage(self)
    }

    fn measure_peltier_current(&self) -> Result<f64> {
        TctSetup::measure_peltier_current(self)
    }

    fn peltier_status(&self) -> Result<Option<OutputStatus>> {
        TctSetup::peltier_status(self)
    }

    fn set_peltier_status(&self, status: OutputStatus, _who: Option<&str>) -> Result<()> {
        TctSetup::set_peltier_status(self, status)
    }

    fn acquire(&self, _group: ResourceGroup, _who: &str) -> Result<()> {
        Err(named_locks_unavailable())
    }

    fn release(&self, _group: ResourceGroup, _who: &str) -> Result<()> {
        Err(named_locks_unavailable())
    }
}
