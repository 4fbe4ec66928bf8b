//! Instrument selection types for the setup configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which kind of high-voltage bias supply drives the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BiasKind {
    /// No bias supply connected.
    None,
    /// Source-measure unit with a directly settable voltage.
    Keithley,
    /// Desktop HV supply that ramps to the requested voltage (default).
    #[default]
    Caen,
}

/// Which signal acquisition system records the waveforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionKind {
    /// No acquisition system connected.
    None,
    /// Oscilloscope with segmented (sequence) memory.
    Oscilloscope,
    /// DRS4 evaluation board.
    Drs4,
    /// Switched-capacitor digitizer with event buffer (default).
    #[default]
    Digitizer,
}

impl AcquisitionKind {
    /// How long a single trigger wait may block before it is a hardware fault.
    pub fn default_trigger_timeout(&self) -> Duration {
        match self {
            AcquisitionKind::Digitizer => Duration::from_secs(11),
            AcquisitionKind::None | AcquisitionKind::Oscilloscope | AcquisitionKind::Drs4 => {
                Duration::from_secs(5)
            }
        }
    }
}

/// Which instruments are present in this deployment.
///
/// The bundled drivers are simulated; vendor drivers plug in through the
/// traits in [`crate::instruments`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// Motorized stages and pulsed laser.
    pub tct: bool,

    /// Bias supply type.
    pub bias: BiasKind,

    /// Acquisition system type.
    pub acquisition: AcquisitionKind,

    /// Temperature and humidity sensor.
    pub environment_sensor: bool,

    /// DC supply for the Peltier cells.
    pub peltier: bool,

    /// Settle time after toggling the output of a ramping bias supply.
    pub bias_output_settle_ms: u64,

    /// Maximum time a ramping bias supply may take to reach its setpoint.
    pub bias_ramp_timeout_secs: u64,

    /// Largest bias magnitude in volts a client may request.
    pub bias_voltage_limit: f64,

    /// Override of the per-backend trigger timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_timeout_ms: Option<u64>,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            tct: true,
            bias: BiasKind::default(),
            acquisition: AcquisitionKind::default(),
            environment_sensor: true,
            peltier: false,
            bias_output_settle_ms: 1000,
            bias_ramp_timeout_secs: 66,
            bias_voltage_limit: 1000.0,
            trigger_timeout_ms: None,
        }
    }
}

impl InstrumentsConfig {
    /// Trigger timeout for the configured acquisition system.
    pub fn trigger_timeout(&self) -> Duration {
        self.trigger_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.acquisition.default_trigger_timeout())
    }

    /// Settle time after toggling bias output.
    pub fn bias_output_settle(&self) -> Duration {
        Duration::from_millis(self.bias_output_settle_ms)
    }

    /// Ramp timeout for ramping bias supplies.
    pub fn bias_ramp_timeout(&self) -> Duration {
        Duration::from_secs(self.bias_ramp_timeout_secs)
    }
}
