//! Simulated instruments.
//!
//! Stand-ins for the lab hardware with deterministic behavior: stage moves
//! and voltage ramps complete immediately, triggers arrive after a fixed
//! period (or never), and waveforms are synthetic laser pulses. They are
//! used by `tct-setup serve` when configured and by the test suites.

use super::{
    BiasSupply, DigitizerDriver, DigitizerEvent, EnvironmentSensor, OutputStatus, PeltierSupply,
    ScopeDriver, StagePosition, TctDriver, Waveform,
};
use crate::error::{Result, SetupError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Default time between simulated laser triggers.
pub const DEFAULT_TRIGGER_PERIOD: Duration = Duration::from_millis(1);

/// Delay of the first pulse within the acquisition window, in seconds.
const FIRST_PULSE_AT: f64 = 50e-9;
/// Delay of the second pulse when configured for two pulses.
const SECOND_PULSE_AT: f64 = 100e-9;
const PULSE_WIDTH: f64 = 2e-9;
const PULSE_AMPLITUDE: f64 = -0.1;

/// Sleep for the trigger period, or for the whole timeout and fail.
fn simulate_trigger(period: Option<Duration>, timeout: Duration, what: &str) -> Result<()> {
    match period {
        Some(period) if period <= timeout => {
            thread::sleep(period);
            Ok(())
        }
        _ => {
            thread::sleep(timeout);
            Err(SetupError::HardwareTimeout(format!(
                "{} did not trigger within {:?}",
                what, timeout
            )))
        }
    }
}

/// Synthetic detector signal: Gaussian pulses on a small deterministic ripple.
fn synth_waveform(samples: usize, dt: f64, pulses: &[f64], channel: u8, segment: u64) -> Waveform {
    let scale = 1.0 / (1.0 + channel as f64);
    let time: Vec<f64> = (0..samples).map(|i| i as f64 * dt).collect();
    let amplitude = time
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let signal: f64 = pulses
                .iter()
                .map(|t0| {
                    let u = (t - t0) / PULSE_WIDTH;
                    PULSE_AMPLITUDE * scale * (-0.5 * u * u).exp()
                })
                .sum();
            signal + 1e-3 * (i as f64 * 0.37 + segment as f64).sin()
        })
        .collect();
    Waveform { time, amplitude }
}

fn pulse_times(two_pulses: bool) -> Vec<f64> {
    if two_pulses {
        vec![FIRST_PULSE_AT, SECOND_PULSE_AT]
    } else {
        vec![FIRST_PULSE_AT]
    }
}

fn ensure_finite(value: f64, what: &str) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SetupError::Instrument(format!("{} rejected non-finite value {}", what, value)))
    }
}

/// Stages and laser.
#[derive(Debug, Clone)]
pub struct SimulatedTct {
    position: StagePosition,
    laser_status: OutputStatus,
    laser_dac: u16,
    laser_frequency: f64,
}

impl SimulatedTct {
    pub fn new() -> Self {
        Self {
            position: StagePosition { x: 0.0, y: 0.0, z: 0.0 },
            laser_status: OutputStatus::Off,
            laser_dac: 0,
            laser_frequency: 1000.0,
        }
    }
}

impl Default for SimulatedTct {
    fn default() -> Self {
        Self::new()
    }
}

impl TctDriver for SimulatedTct {
    fn move_to(&mut self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Result<()> {
        for v in [x, y, z].into_iter().flatten() {
            ensure_finite(v, "stage")?;
        }
        if let Some(x) = x {
            self.position.x = x;
        }
        if let Some(y) = y {
            self.position.y = y;
        }
        if let Some(z) = z {
            self.position.z = z;
        }
        Ok(())
    }

    fn position(&mut self) -> Result<StagePosition> {
        Ok(self.position)
    }

    fn laser_status(&mut self) -> Result<OutputStatus> {
        Ok(self.laser_status)
    }

    fn set_laser_status(&mut self, status: OutputStatus) -> Result<()> {
        self.laser_status = status;
        Ok(())
    }

    fn laser_dac(&mut self) -> Result<u16> {
        Ok(self.laser_dac)
    }

    fn set_laser_dac(&mut self, dac: u16) -> Result<()> {
        self.laser_dac = dac;
        Ok(())
    }

    fn laser_frequency(&mut self) -> Result<f64> {
        Ok(self.laser_frequency)
    }

    fn set_laser_frequency(&mut self, hz: f64) -> Result<()> {
        self.laser_frequency = hz;
        Ok(())
    }
}

/// Bias source feeding a resistive load.
#[derive(Debug, Clone)]
pub struct SimulatedBiasSupply {
    voltage: f64,
    compliance: f64,
    output: OutputStatus,
    load_ohms: f64,
    ramp_rate: f64,
}

impl SimulatedBiasSupply {
    pub fn new() -> Self {
        Self {
            voltage: 0.0,
            compliance: 10e-6,
            output: OutputStatus::Off,
            load_ohms: 100e6,
            ramp_rate: 10.0,
        }
    }

    /// Ramp speed in volts per second, used to decide ramp timeouts.
    pub fn with_ramp_rate(mut self, volts_per_second: f64) -> Self {
        self.ramp_rate = volts_per_second;
        self
    }
}

impl Default for SimulatedBiasSupply {
    fn default() -> Self {
        Self::new()
    }
}

impl BiasSupply for SimulatedBiasSupply {
    fn measure_voltage(&mut self) -> Result<f64> {
        Ok(if self.output.is_on() { self.voltage } else { 0.0 })
    }

    fn set_voltage(&mut self, volts: f64) -> Result<()> {
        ensure_finite(volts, "bias supply")?;
        self.voltage = volts;
        Ok(())
    }

    fn ramp_voltage(&mut self, volts: f64, timeout: Duration) -> Result<()> {
        ensure_finite(volts, "bias supply")?;
        let needed = (volts - self.voltage).abs() / self.ramp_rate;
        if needed > timeout.as_secs_f64() {
            // Got as far as the timeout allowed.
            let reached = self.ramp_rate * timeout.as_secs_f64();
            self.voltage += reached.copysign(volts - self.voltage);
            return Err(SetupError::HardwareTimeout(format!(
                "bias ramp to {} V did not finish within {:?}",
                volts, timeout
            )));
        }
        self.voltage = volts;
        Ok(())
    }

    fn measure_current(&mut self) -> Result<f64> {
        if !self.output.is_on() {
            return Ok(0.0);
        }
        let current = self.voltage / self.load_ohms;
        Ok(current.clamp(-self.compliance, self.compliance))
    }

    fn current_compliance(&mut self) -> Result<f64> {
        Ok(self.compliance)
    }

    fn set_current_compliance(&mut self, amperes: f64) -> Result<()> {
        ensure_finite(amperes, "bias supply")?;
        self.compliance = amperes.abs();
        Ok(())
    }

    fn output_status(&mut self) -> Result<OutputStatus> {
        Ok(self.output)
    }

    fn set_output_status(&mut self, status: OutputStatus) -> Result<()> {
        self.output = status;
        Ok(())
    }
}

/// Oscilloscope or DRS4 evaluation board.
#[derive(Debug, Clone)]
pub struct SimulatedScope {
    name: &'static str,
    samples: usize,
    dt: f64,
    segments: u32,
    two_pulses: bool,
    trigger_period: Option<Duration>,
    triggers: u64,
    vdiv: [f64; 4],
}

impl SimulatedScope {
    /// 2000 samples over a 200 ns window.
    pub fn oscilloscope() -> Self {
        Self::new("oscilloscope", 2000, 0.1e-9)
    }

    /// 1024 samples at 5 GS/s.
    pub fn drs4() -> Self {
        Self::new("DRS4 board", 1024, 0.2e-9)
    }

    fn new(name: &'static str, samples: usize, dt: f64) -> Self {
        Self {
            name,
            samples,
            dt,
            segments: 1,
            two_pulses: false,
            trigger_period: Some(DEFAULT_TRIGGER_PERIOD),
            triggers: 0,
            vdiv: [0.05; 4],
        }
    }

    /// Never trigger, so every wait runs into its timeout.
    pub fn never_triggers(mut self) -> Self {
        self.trigger_period = None;
        self
    }

    pub fn vdiv(&self, channel: u8) -> Option<f64> {
        self.vdiv.get(channel as usize).copied()
    }
}

impl ScopeDriver for SimulatedScope {
    fn configure_for_two_pulses(&mut self) -> Result<()> {
        self.two_pulses = true;
        Ok(())
    }

    fn set_segments(&mut self, n: u32) -> Result<()> {
        self.segments = n;
        Ok(())
    }

    fn wait_for_trigger(&mut self, timeout: Duration) -> Result<()> {
        simulate_trigger(self.trigger_period, timeout, self.name)?;
        self.triggers += 1;
        Ok(())
    }

    fn read_waveforms(&mut self, channel: u8) -> Result<Vec<Waveform>> {
        if self.triggers == 0 {
            return Err(SetupError::Instrument(format!(
                "{} has no acquisition to read yet",
                self.name
            )));
        }
        if channel as usize >= self.vdiv.len() {
            return Err(SetupError::Instrument(format!(
                "{} has no channel {}",
                self.name, channel
            )));
        }
        let pulses = pulse_times(self.two_pulses);
        Ok((0..self.segments as u64)
            .map(|segment| {
                synth_waveform(self.samples, self.dt, &pulses, channel, self.triggers + segment)
            })
            .collect())
    }

    fn set_vdiv(&mut self, channel: u8, volts_per_div: f64) -> Result<()> {
        let slot = self.vdiv.get_mut(channel as usize).ok_or_else(|| {
            SetupError::Instrument(format!("{} has no channel {}", self.name, channel))
        })?;
        *slot = volts_per_div;
        Ok(())
    }
}

/// Block-transfer digitizer with two channels, 1024 samples at 5 GS/s.
#[derive(Debug, Clone)]
pub struct SimulatedDigitizer {
    events_per_block: u32,
    two_pulses: bool,
    trigger_period: Option<Duration>,
    blocks: u64,
    readouts: Arc<AtomicUsize>,
}

impl SimulatedDigitizer {
    const CHANNELS: [u8; 2] = [0, 1];
    const RECORD_LENGTH: usize = 1024;
    const DT: f64 = 0.2e-9;

    pub fn new() -> Self {
        Self {
            events_per_block: 1,
            two_pulses: false,
            trigger_period: Some(DEFAULT_TRIGGER_PERIOD),
            blocks: 0,
            readouts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Never fill the memory, so every wait runs into its timeout.
    pub fn never_triggers(mut self) -> Self {
        self.trigger_period = None;
        self
    }

    /// Shared counter of block readouts performed so far.
    pub fn readout_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.readouts)
    }
}

impl Default for SimulatedDigitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitizerDriver for SimulatedDigitizer {
    fn configure_for_two_pulses(&mut self) -> Result<()> {
        self.two_pulses = true;
        self.events_per_block = 1;
        Ok(())
    }

    fn set_events_per_block(&mut self, n: u32) -> Result<()> {
        self.events_per_block = n;
        Ok(())
    }

    fn wait_for_memory_full(&mut self, timeout: Duration) -> Result<()> {
        simulate_trigger(self.trigger_period, timeout, "digitizer")?;
        self.blocks += 1;
        Ok(())
    }

    fn read_events(&mut self) -> Result<Vec<DigitizerEvent>> {
        if self.blocks == 0 {
            return Err(SetupError::Instrument(
                "digitizer has no acquisition to read yet".to_string(),
            ));
        }
        self.readouts.fetch_add(1, Ordering::SeqCst);
        let pulses = pulse_times(self.two_pulses);
        Ok((0..self.events_per_block as u64)
            .map(|event| {
                Self::CHANNELS
                    .iter()
                    .map(|&ch| {
                        let waveform = synth_waveform(
                            Self::RECORD_LENGTH,
                            Self::DT,
                            &pulses,
                            ch,
                            self.blocks + event,
                        );
                        (ch, waveform)
                    })
                    .collect::<DigitizerEvent>()
            })
            .collect())
    }
}

/// Temperature and humidity sensor with fixed readings.
#[derive(Debug, Clone)]
pub struct SimulatedEnvironmentSensor {
    temperature: f64,
    humidity: f64,
    failing: bool,
}

impl SimulatedEnvironmentSensor {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
            failing: false,
        }
    }

    /// A sensor whose every read fails, as when it is unplugged.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    fn read(&self, value: f64) -> Result<f64> {
        if self.failing {
            return Err(SetupError::Instrument(
                "environment sensor not responding".to_string(),
            ));
        }
        Ok(value)
    }
}

impl Default for SimulatedEnvironmentSensor {
    fn default() -> Self {
        Self::new(-20.0, 5.0)
    }
}

impl EnvironmentSensor for SimulatedEnvironmentSensor {
    fn temperature(&mut self) -> Result<f64> {
        self.read(self.temperature)
    }

    fn humidity(&mut self) -> Result<f64> {
        self.read(self.humidity)
    }
}

/// Peltier supply driving a fixed resistance, current-limited.
#[derive(Debug, Clone)]
pub struct SimulatedPeltier {
    voltage: f64,
    current: f64,
    output: OutputStatus,
    load_ohms: f64,
}

impl SimulatedPeltier {
    pub fn new() -> Self {
        Self {
            voltage: 0.0,
            current: 0.0,
            output: OutputStatus::Off,
            load_ohms: 2.0,
        }
    }
}

impl Default for SimulatedPeltier {
    fn default() -> Self {
        Self::new()
    }
}

impl PeltierSupply for SimulatedPeltier {
    fn voltage_setpoint(&mut self) -> Result<f64> {
        Ok(self.voltage)
    }

    fn set_voltage(&mut self, volts: f64) -> Result<()> {
        ensure_finite(volts, "Peltier supply")?;
        self.voltage = volts;
        Ok(())
    }

    fn current_setpoint(&mut self) -> Result<f64> {
        Ok(self.current)
    }

    fn set_current(&mut self, amperes: f64) -> Result<()> {
        ensure_finite(amperes, "Peltier supply")?;
        self.current = amperes;
        Ok(())
    }

    fn measure_voltage(&mut self) -> Result<f64> {
        if !self.output.is_on() {
            return Ok(0.0);
        }
        // Current limited: the supply drops its voltage.
        Ok(self.voltage.min(self.current * self.load_ohms))
    }

    fn measure_current(&mut self) -> Result<f64> {
        if !self.output.is_on() {
            return Ok(0.0);
        }
        Ok((self.voltage / self.load_ohms).min(self.current))
    }

    fn output_status(&mut self) -> Result<OutputStatus> {
        Ok(self.output)
    }

    fn set_output_status(&mut self, status: OutputStatus) -> Result<()> {
        self.output = status;
        Ok(())
    }
}
