//! The setup façade: one object owning every instrument driver.

use super::backends::{AcquisitionBackend, BiasBackend};
use crate::config::{AcquisitionKind, BiasKind, InstrumentsConfig};
use crate::error::{Result, SetupError};
use crate::instruments::simulated::{
    SimulatedBiasSupply, SimulatedDigitizer, SimulatedEnvironmentSensor, SimulatedPeltier,
    SimulatedScope, SimulatedTct,
};
use crate::instruments::{
    EnvironmentSensor, OutputStatus, PeltierSupply, StagePosition, TctDriver, Waveform,
};
use parking_lot::Mutex;
use std::time::Duration;

/// Highest laser DAC setting.
pub const MAX_LASER_DAC: u16 = 1023;

/// Hardware access for the whole setup.
///
/// Every instrument sits behind its own local mutex, held for the duration
/// of each call, so concurrent callers in this process never interleave
/// commands to the same instrument. These locks only cover single calls;
/// ownership of a resource group across a sequence of calls is the job of
/// [`NamedLockSetup`](super::NamedLockSetup).
pub struct TctSetup {
    tct: Option<Mutex<Box<dyn TctDriver>>>,
    bias: Mutex<BiasBackend>,
    acquisition: Mutex<AcquisitionBackend>,
    trigger_timeout: Duration,
    bias_voltage_limit: f64,
    environment: Option<Mutex<Box<dyn EnvironmentSensor>>>,
    peltier: Option<Mutex<Box<dyn PeltierSupply>>>,
}

impl Default for TctSetup {
    fn default() -> Self {
        Self::new()
    }
}

impl TctSetup {
    /// A setup with no instruments at all.
    pub fn new() -> Self {
        Self {
            tct: None,
            bias: Mutex::new(BiasBackend::None),
            acquisition: Mutex::new(AcquisitionBackend::None),
            trigger_timeout: AcquisitionKind::None.default_trigger_timeout(),
            bias_voltage_limit: f64::INFINITY,
            environment: None,
            peltier: None,
        }
    }

    pub fn with_tct(mut self, driver: impl TctDriver + 'static) -> Self {
        self.tct = Some(Mutex::new(Box::new(driver)));
        self
    }

    pub fn with_bias(mut self, backend: BiasBackend) -> Self {
        self.bias = Mutex::new(backend);
        self
    }

    /// Reject bias setpoints whose magnitude exceeds `volts`.
    pub fn with_bias_voltage_limit(mut self, volts: f64) -> Self {
        self.bias_voltage_limit = volts;
        self
    }

    /// Also resets the trigger timeout to the backend's default.
    pub fn with_acquisition(mut self, backend: AcquisitionBackend) -> Self {
        self.trigger_timeout = backend.kind().default_trigger_timeout();
        self.acquisition = Mutex::new(backend);
        self
    }

    pub fn with_trigger_timeout(mut self, timeout: Duration) -> Self {
        self.trigger_timeout = timeout;
        self
    }

    pub fn with_environment_sensor(mut self, sensor: impl EnvironmentSensor + 'static) -> Self {
        self.environment = Some(Mutex::new(Box::new(sensor)));
        self
    }

    pub fn with_peltier(mut self, supply: impl PeltierSupply + 'static) -> Self {
        self.peltier = Some(Mutex::new(Box::new(supply)));
        self
    }

    /// Build the setup with simulated drivers for every configured instrument.
    pub fn from_config(instruments: &InstrumentsConfig) -> Self {
        let mut setup = Self::new();

        if instruments.tct {
            setup = setup.with_tct(SimulatedTct::new());
        }

        setup = setup.with_bias(match instruments.bias {
            BiasKind::None => BiasBackend::None,
            BiasKind::Keithley => BiasBackend::keithley(SimulatedBiasSupply::new()),
            BiasKind::Caen => BiasBackend::caen(
                SimulatedBiasSupply::new(),
                instruments.bias_ramp_timeout(),
                instruments.bias_output_settle(),
            ),
        });
        setup = setup.with_bias_voltage_limit(instruments.bias_voltage_limit);

        setup = setup
            .with_acquisition(match instruments.acquisition {
                AcquisitionKind::None => AcquisitionBackend::None,
                AcquisitionKind::Oscilloscope => {
                    AcquisitionBackend::oscilloscope(SimulatedScope::oscilloscope())
                }
                AcquisitionKind::Drs4 => AcquisitionBackend::drs4(SimulatedScope::drs4()),
                AcquisitionKind::Digitizer => {
                    AcquisitionBackend::digitizer(SimulatedDigitizer::new())
                }
            })
            .with_trigger_timeout(instruments.trigger_timeout());

        if instruments.environment_sensor {
            setup = setup.with_environment_sensor(SimulatedEnvironmentSensor::default());
        }
        if instruments.peltier {
            setup = setup.with_peltier(SimulatedPeltier::new());
        }

        tracing::info!(
            tct = instruments.tct,
            bias = ?instruments.bias,
            acquisition = ?instruments.acquisition,
            environment_sensor = instruments.environment_sensor,
            peltier = instruments.peltier,
            "simulated instruments ready"
        );
        setup
    }

    pub fn trigger_timeout(&self) -> Duration {
        self.trigger_timeout
    }

    fn tct(&self) -> Result<&Mutex<Box<dyn TctDriver>>> {
        self.tct.as_ref().ok_or_else(|| {
            SetupError::Unsupported("no stages or laser configured".to_string())
        })
    }

    // Stages ---------------------------------------------------------------

    /// Move the stages; axes given as `None` stay where they are.
    pub fn move_to(&self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Result<()> {
        for (axis, value) in [("x", x), ("y", y), ("z", z)] {
            if let Some(value) = value {
                require_finite(value, axis)?;
            }
        }
        self.tct()?.lock().move_to(x, y, z)
    }

    pub fn stage_position(&self) -> Result<StagePosition> {
        self.tct()?.lock().position()
    }

    // Laser ----------------------------------------------------------------

    pub fn laser_status(&self) -> Result<OutputStatus> {
        self.tct()?.lock().laser_status()
    }

    pub fn set_laser_status(&self, status: OutputStatus) -> Result<()> {
        self.tct()?.lock().set_laser_status(status)
    }

    pub fn laser_dac(&self) -> Result<u16> {
        self.tct()?.lock().laser_dac()
    }

    /// DAC setting of the laser intensity, `0..=1023`.
    pub fn set_laser_dac(&self, dac: u16) -> Result<()> {
        if dac > MAX_LASER_DAC {
            return Err(SetupError::InvalidInput(format!(
                "laser DAC must be in 0..={}, got {}",
                MAX_LASER_DAC, dac
            )));
        }
        self.tct()?.lock().set_laser_dac(dac)
    }

    pub fn laser_frequency(&self) -> Result<f64> {
        self.tct()?.lock().laser_frequency()
    }

    pub fn set_laser_frequency(&self, hz: f64) -> Result<()> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(SetupError::InvalidInput(format!(
                "laser frequency must be a positive number of Hz, got {}",
                hz
            )));
        }
        self.tct()?.lock().set_laser_frequency(hz)
    }

    // Bias -----------------------------------------------------------------

    /// NaN when no bias supply is configured.
    pub fn measure_bias_voltage(&self) -> Result<f64> {
        self.bias.lock().measure_voltage()
    }

    /// A ramping supply blocks until the ramp completes.
    pub fn set_bias_voltage(&self, volts: f64) -> Result<()> {
        require_finite(volts, "bias voltage")?;
        if volts.abs() > self.bias_voltage_limit {
            return Err(SetupError::InvalidInput(format!(
                "bias voltage {} V exceeds the limit of {} V",
                volts, self.bias_voltage_limit
            )));
        }
        self.bias.lock().set_voltage(volts)
    }

    pub fn measure_bias_current(&self) -> Result<f64> {
        self.bias.lock().measure_current()
    }

    pub fn current_compliance(&self) -> Result<f64> {
        self.bias.lock().current_compliance()
    }

    pub fn set_current_compliance(&self, amperes: f64) -> Result<()> {
        require_finite(amperes, "current compliance")?;
        self.bias.lock().set_current_compliance(amperes)
    }

    pub fn bias_output_status(&self) -> Result<Option<OutputStatus>> {
        self.bias.lock().output_status()
    }

    /// A ramping supply blocks for its settle time after switching.
    pub fn set_bias_output_status(&self, status: OutputStatus) -> Result<()> {
        self.bias.lock().set_output_status(status)
    }

    // Signal acquisition ---------------------------------------------------

    /// Set up horizontal scale and trigger to record both laser pulses.
    pub fn configure_for_two_pulses(&self) -> Result<()> {
        self.acquisition.lock().configure_for_two_pulses()
    }

    /// Record `n` sub-triggers per trigger; 1 restores real-time sampling.
    pub fn configure_sequence_acquisition(&self, n: u32) -> Result<()> {
        if n == 0 {
            return Err(SetupError::InvalidInput(
                "number of sequences per trigger must be > 0".to_string(),
            ));
        }
        self.acquisition.lock().configure_sequence_acquisition(n)
    }

    /// Block until the acquisition system triggers.
    ///
    /// Expiry of the trigger timeout is a [`SetupError::HardwareTimeout`].
    pub fn wait_for_trigger(&self) -> Result<()> {
        self.acquisition.lock().wait_for_trigger(self.trigger_timeout)
    }

    /// Waveforms of the last trigger on `channel`, one per sub-trigger.
    pub fn get_waveform(&self, channel: u8) -> Result<Vec<Waveform>> {
        self.acquisition.lock().waveforms(channel)
    }

    pub fn set_vdiv(&self, channel: u8, volts_per_div: f64) -> Result<()> {
        if !volts_per_div.is_finite() || volts_per_div <= 0.0 {
            return Err(SetupError::InvalidInput(format!(
                "volts per division must be > 0, got {}",
                volts_per_div
            )));
        }
        self.acquisition.lock().set_vdiv(channel, volts_per_div)
    }

    // Environment ----------------------------------------------------------

    /// Degrees Celsius, or NaN if the sensor is absent or fails.
    pub fn measure_temperature(&self) -> f64 {
        self.read_environment("temperature", |s| s.temperature())
    }

    /// Relative humidity in percent, or NaN if the sensor is absent or fails.
    pub fn measure_humidity(&self) -> f64 {
        self.read_environment("humidity", |s| s.humidity())
    }

    fn read_environment(
        &self,
        what: &str,
        read: impl FnOnce(&mut dyn EnvironmentSensor) -> Result<f64>,
    ) -> f64 {
        let Some(sensor) = &self.environment else {
            tracing::warn!("no environment sensor configured; cannot measure {}", what);
            return f64::NAN;
        };
        match read(&mut **sensor.lock()) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("cannot measure {}: {}", what, e);
                f64::NAN
            }
        }
    }

    // Peltier --------------------------------------------------------------

    fn peltier_read<T>(
        &self,
        what: &str,
        absent: T,
        read: impl FnOnce(&mut dyn PeltierSupply) -> Result<T>,
    ) -> Result<T> {
        match &self.peltier {
            Some(supply) => read(&mut **supply.lock()),
            None => {
                tracing::warn!("no Peltier supply configured; cannot read {}", what);
                Ok(absent)
            }
        }
    }

    fn peltier_write(
        &self,
        what: &str,
        write: impl FnOnce(&mut dyn PeltierSupply) -> Result<()>,
    ) -> Result<()> {
        match &self.peltier {
            Some(supply) => write(&mut **supply.lock()),
            None => {
                tracing::warn!("no Peltier supply configured; cannot set {}", what);
                Ok(())
            }
        }
    }

    pub fn peltier_voltage_setpoint(&self) -> Result<f64> {
        self.peltier_read("voltage setpoint", f64::NAN, |s| s.voltage_setpoint())
    }

    pub fn set_peltier_voltage(&self, volts: f64) -> Result<()> {
        require_finite(volts, "Peltier voltage")?;
        self.peltier_write("voltage", |s| s.set_voltage(volts))
    }

    pub fn peltier_current_setpoint(&self) -> Result<f64> {
        self.peltier_read("current setpoint", f64::NAN, |s| s.current_setpoint())
    }

    pub fn set_peltier_current(&self, amperes: f64) -> Result<()> {
        require_finite(amperes, "Peltier current")?;
        self.peltier_write("current", |s| s.set_current(amperes))
    }

    pub fn measure_peltier_voltage(&self) -> Result<f64> {
        self.peltier_read("voltage", f64::NAN, |s| s.measure_voltage())
    }

    pub fn measure_peltier_current(&self) -> Result<f64> {
        self.peltier_read("current", f64::NAN, |s| s.measure_current())
    }

    pub fn peltier_status(&self) -> Result<Option<OutputStatus>> {
        self.peltier_read("output status", None, |s| s.output_status().map(Some))
    }

    pub fn set_peltier_status(&self, status: OutputStatus) -> Result<()> {
        self.peltier_write("output status", |s| s.set_output_status(status))
    }
}

fn require_finite(value: f64, what: &str) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SetupError::InvalidInput(format!(
            "{} must be a finite number, got {}",
            what, value
        )))
    }
}
