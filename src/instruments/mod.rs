//! Instrument driver interfaces.
//!
//! The setup façade is the only caller of these traits. Vendor command
//! protocols live behind them; this crate ships simulated implementations
//! (see [`simulated`]) used by the server when no hardware is attached and
//! by the tests.
//!
//! All methods are blocking and take `&mut self`: the façade serializes
//! calls to each instrument with its own local lock.

pub mod simulated;


use crate::error::{Result, SetupError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// On/off state of an output (laser, bias, Peltier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    On,
    Off,
}

impl OutputStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStatus::On => "on",
            OutputStatus::Off => "off",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, OutputStatus::On)
    }
}

impl From<bool> for OutputStatus {
    fn from(on: bool) -> Self {
        if on { OutputStatus::On } else { OutputStatus::Off }
    }
}

impl std::fmt::Display for OutputStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputStatus {
    type Err = SetupError;

    /// Accepts `on` or `off` in any case.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(OutputStatus::On),
            "off" => Ok(OutputStatus::Off),
            _ => Err(SetupError::InvalidInput(format!(
                "status must be 'on' or 'off', got '{}'",
                s
            ))),
        }
    }
}

/// Stage coordinates in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StagePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One acquired waveform: sample times in seconds and amplitudes in volts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    pub time: Vec<f64>,
    pub amplitude: Vec<f64>,
}

impl Waveform {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Keep only the samples whose index passes `keep`.
    pub fn retain_samples(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.time.retain(|_| flags.next().copied().unwrap_or(false));
        let mut flags = keep.iter();
        self.amplitude.retain(|_| flags.next().copied().unwrap_or(false));
    }
}

/// One digitizer event: a waveform for every enabled channel.
pub type DigitizerEvent = BTreeMap<u8, Waveform>;

/// Motorized stages and the pulsed laser, driven through one controller.
pub trait TctDriver: Send {
    /// Move the given axes; `None` leaves an axis where it is.
    fn move_to(&mut self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Result<()>;
    fn position(&mut self) -> Result<StagePosition>;

    fn laser_status(&mut self) -> Result<OutputStatus>;
    fn set_laser_status(&mut self, status: OutputStatus) -> Result<()>;
    fn laser_dac(&mut self) -> Result<u16>;
    fn set_laser_dac(&mut self, dac: u16) -> Result<()>;
    fn laser_frequency(&mut self) -> Result<f64>;
    fn set_laser_frequency(&mut self, hz: f64) -> Result<()>;
}

/// High-voltage source biasing the detector.
pub trait BiasSupply: Send {
    fn measure_voltage(&mut self) -> Result<f64>;
    fn set_voltage(&mut self, volts: f64) -> Result<()>;

    /// Change the voltage gradually, failing with
    /// [`SetupError::HardwareTimeout`] if the target is not reached in time.
    fn ramp_voltage(&mut self, volts: f64, timeout: Duration) -> Result<()>;

    fn measure_current(&mut self) -> Result<f64>;
    fn current_compliance(&mut self) -> Result<f64>;
    fn set_current_compliance(&mut self, amperes: f64) -> Result<()>;
    fn output_status(&mut self) -> Result<OutputStatus>;
    fn set_output_status(&mut self, status: OutputStatus) -> Result<()>;
}

/// Oscilloscope-like acquisition: waveforms are fetched one channel at a time.
pub trait ScopeDriver: Send {
    fn configure_for_two_pulses(&mut self) -> Result<()>;

    /// Number of segments recorded per trigger; 1 means real-time sampling.
    fn set_segments(&mut self, n: u32) -> Result<()>;

    /// Block until the next trigger or fail with
    /// [`SetupError::HardwareTimeout`].
    fn wait_for_trigger(&mut self, timeout: Duration) -> Result<()>;

    /// Waveforms of the last trigger on `channel`, one per segment.
    fn read_waveforms(&mut self, channel: u8) -> Result<Vec<Waveform>>;

    fn set_vdiv(&mut self, channel: u8, volts_per_div: f64) -> Result<()>;
}

/// Block-transfer digitizer: one readout returns every channel of every event.
pub trait DigitizerDriver: Send {
    fn configure_for_two_pulses(&mut self) -> Result<()>;
    fn set_events_per_block(&mut self, n: u32) -> Result<()>;

    /// Run the acquisition until the event memory is full.
    fn wait_for_memory_full(&mut self, timeout: Duration) -> Result<()>;

    fn read_events(&mut self) -> Result<Vec<DigitizerEvent>>;
}

/// Temperature and humidity sensor.
pub trait EnvironmentSensor: Send {
    /// Degrees Celsius.
    fn temperature(&mut self) -> Result<f64>;
    /// Relative humidity in percent.
    fn humidity(&mut self) -> Result<f64>;
}

/// DC supply powering the Peltier cells.
pub trait PeltierSupply: Send {
    fn voltage_setpoint(&mut self) -> Result<f64>;
    fn set_voltage(&mut self, volts: f64) -> Result<()>;
    fn current_setpoint(&mut self) -> Result<f64>;
    fn set_current(&mut self, amperes: f64) -> Result<()>;
    fn measure_voltage(&mut self) -> Result<f64>;
    fn measure_current(&mut self) -> Result<f64>;
    fn output_status(&mut self) -> Result<OutputStatus>;
    fn set_output_status(&mut self, status: OutputStatus) -> Result<()>;
}
