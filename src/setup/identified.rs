//! Caller-identity wrapper.

use super::api::{Hold, SetupApi};
use crate::error::Result;
use crate::instruments::{OutputStatus, StagePosition, Waveform};
use crate::locks::ResourceGroup;

/// A setup bound to one caller identity.
///
/// Exposes every [`SetupApi`] operation without the `who` parameter; the
/// wrapped identity is passed to each operation that takes one. Works the
/// same over a plain [`TctSetup`](super::TctSetup), a
/// [`NamedLockSetup`](super::NamedLockSetup) or a remote proxy.
///
/// ```ignore
/// let setup = connect_to_setup(&config, &process_identity())?;
/// let _bias = setup.hold_control_of_bias()?;
/// setup.set_bias_output_status(OutputStatus::On)?;
/// setup.set_bias_voltage(-150.0)?;
/// ```
pub struct Identified<A> {
    inner: A,
    who: String,
}

impl<A: SetupApi> Identified<A> {
    pub fn new(inner: A, who: impl Into<String>) -> Self {
        Self {
            inner,
            who: who.into(),
        }
    }

    pub fn who(&self) -> &str {
        &self.who
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    pub fn into_inner(self) -> A {
        self.inner
    }

    fn me(&self) -> Option<&str> {
        Some(&self.who)
    }

    pub fn move_to(&self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Result<()> {
        self.inner.move_to(x, y, z, self.me())
    }

    pub fn stage_position(&self) -> Result<StagePosition> {
        self.inner.stage_position()
    }

    pub fn laser_status(&self) -> Result<OutputStatus> {
        self.inner.laser_status()
    }

    pub fn set_laser_status(&self, status: OutputStatus) -> Result<()> {
        self.inner.set_laser_status(status, self.me())
    }

    pub fn laser_dac(&self) -> Result<u16> {
        self.inner.laser_dac()
    }

    pub fn set_laser_dac(&self, dac: u16) -> Result<()> {
        self.inner.set_laser_dac(dac, self.me())
    }

    pub fn laser_frequency(&self) -> Result<f64> {
        self.inner.laser_frequency()
    }

    pub fn set_laser_frequency(&self, hz: f64) -> Result<()> {
        self.inner.set_laser_frequency(hz, self.me())
    }

    pub fn measure_bias_voltage(&self) -> Result<f64> {
        self.inner.measure_bias_voltage()
    }

    pub fn set_bias_voltage(&self, volts: f64) -> Result<()> {
        self.inner.set_bias_voltage(volts, self.me())
    }

    pub fn measure_bias_current(&self) -> Result<f64> {
        self.inner.measure_bias_current()
    }

    pub fn current_compliance(&self) -> Result<f64> {
        self.inner.current_compliance()
    }

    pub fn set_current_compliance(&self, amperes: f64) -> Result<()> {
        self.inner.set_current_compliance(amperes, self.me())
    }

    pub fn bias_output_status(&self) -> Result<Option<OutputStatus>> {
        self.inner.bias_output_status()
    }

    pub fn set_bias_output_status(&self, status: OutputStatus) -> Result<()> {
        self.inner.set_bias_output_status(status, self.me())
    }

    pub fn configure_for_two_pulses(&self) -> Result<()> {
        self.inner.configure_for_two_pulses(self.me())
    }

    pub fn configure_sequence_acquisition(&self, n: u32) -> Result<()> {
        self.inner.configure_sequence_acquisition(n, self.me())
    }

    pub fn wait_for_trigger(&self) -> Result<()> {
        self.inner.wait_for_trigger()
    }

    pub fn get_waveform(&self, channel: u8) -> Result<Vec<Waveform>> {
        self.inner.get_waveform(channel)
    }

    pub fn set_vdiv(&self, channel: u8, volts_per_div: f64) -> Result<()> {
        self.inner.set_vdiv(channel, volts_per_div, self.me())
    }

    pub fn measure_temperature(&self) -> Result<f64> {
        self.inner.measure_temperature()
    }

    pub fn measure_humidity(&self) -> Result<f64> {
        self.inner.measure_humidity()
    }

    pub fn peltier_voltage_setpoint(&self) -> Result<f64> {
        self.inner.peltier_voltage_setpoint()
    }

    pub fn set_peltier_voltage(&self, volts: f64) -> Result<()> {
        self.inner.set_peltier_voltage(volts, self.me())
    }

    pub fn peltier_current_setpoint(&self) -> Result<f64> {
        self.inner.peltier_current_setpoint()
    }

    pub fn set_peltier_current(&self, amperes: f64) -> Result<()> {
        self.inner.set_peltier_current(amperes, self.me())
    }

    pub fn measure_peltier_voltage(&self) -> Result<f64> {
        self.inner.measure_peltier_voltage()
    }

    pub fn measure_peltier_current(&self) -> Result<f64> {
        self.inner.measure_peltier_current()
    }

    pub fn peltier_status(&self) -> Result<Option<OutputStatus>> {
        self.inner.peltier_status()
    }

    pub fn set_peltier_status(&self, status: OutputStatus) -> Result<()> {
        self.inner.set_peltier_status(status, self.me())
    }

    pub fn acquire(&self, group: ResourceGroup) -> Result<()> {
        self.inner.acquire(group, &self.who)
    }

    pub fn release(&self, group: ResourceGroup) -> Result<()> {
        self.inner.release(group, &self.who)
    }

    pub fn hold(&self, group: ResourceGroup) -> Result<Hold<'_, A>> {
        Hold::acquire(&self.inner, group, &self.who)
    }

    pub fn hold_control_of_bias(&self) -> Result<Hold<'_, A>> {
        self.hold(ResourceGroup::Bias)
    }

    pub fn hold_signal_acquisition(&self) -> Result<Hold<'_, A>> {
        self.hold(ResourceGroup::SignalAcquisition)
    }

    pub fn hold_tct_control(&self) -> Result<Hold<'_, A>> {
        self.hold(ResourceGroup::Tct)
    }

    pub fn hold_temperature_control(&self) -> Result<Hold<'_, A>> {
        self.hold(ResourceGroup::Temperature)
    }
}
