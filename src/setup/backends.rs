//! Backend variants for the bias supply and the acquisition system.
//!
//! Exactly one backend of each kind is active; it is chosen when the façade
//! is built and never queried again.

use crate::config::AcquisitionKind;
use crate::error::{Result, SetupError};
use crate::instruments::{
    BiasSupply, DigitizerDriver, DigitizerEvent, OutputStatus, ScopeDriver, Waveform,
};
use std::thread;
use std::time::Duration;

/// Digitizer samples later than this in the acquisition window are dropped;
/// the end of the window carries readout artefacts.
pub const DIGITIZER_WINDOW_END: f64 = 140e-9;

/// The configured high-voltage bias supply, if any.
pub enum BiasBackend {
    /// No bias supply: reads give NaN and writes are ignored, both with a warning.
    None,
    /// Source-measure unit whose voltage is set directly.
    Keithley(Box<dyn BiasSupply>),
    /// Supply that ramps to each new voltage and needs time to settle after
    /// its output is switched.
    Caen {
        supply: Box<dyn BiasSupply>,
        ramp_timeout: Duration,
        output_settle: Duration,
    },
}

impl BiasBackend {
    pub fn keithley(supply: impl BiasSupply + 'static) -> Self {
        BiasBackend::Keithley(Box::new(supply))
    }

    pub fn caen(
        supply: impl BiasSupply + 'static,
        ramp_timeout: Duration,
        output_settle: Duration,
    ) -> Self {
        BiasBackend::Caen {
            supply: Box::new(supply),
            ramp_timeout,
            output_settle,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BiasBackend::None => "none",
            BiasBackend::Keithley(_) => "keithley",
            BiasBackend::Caen { .. } => "caen",
        }
    }

    fn supply(&mut self) -> Option<&mut Box<dyn BiasSupply>> {
        match self {
            BiasBackend::None => None,
            BiasBackend::Keithley(supply) | BiasBackend::Caen { supply, .. } => Some(supply),
        }
    }

    fn read(
        &mut self,
        what: &str,
        f: impl FnOnce(&mut dyn BiasSupply) -> Result<f64>,
    ) -> Result<f64> {
        match self.supply() {
            Some(supply) => f(supply.as_mut()),
            None => {
                tracing::warn!("no bias supply configured; cannot {}", what);
                Ok(f64::NAN)
            }
        }
    }

    fn write(
        &mut self,
        what: &str,
        f: impl FnOnce(&mut dyn BiasSupply) -> Result<()>,
    ) -> Result<()> {
        match self.supply() {
            Some(supply) => f(supply.as_mut()),
            None => {
                tracing::warn!("no bias supply configured; cannot {}", what);
                Ok(())
            }
        }
    }

    pub fn measure_voltage(&mut self) -> Result<f64> {
        self.read("measure bias voltage", |s| s.measure_voltage())
    }

    pub fn set_voltage(&mut self, volts: f64) -> Result<()> {
        if let BiasBackend::Caen {
            supply,
            ramp_timeout,
            ..
        } = self
        {
            return supply.ramp_voltage(volts, *ramp_timeout);
        }
        self.write("set bias voltage", |s| s.set_voltage(volts))
    }

    pub fn measure_current(&mut self) -> Result<f64> {
        self.read("measure bias current", |s| s.measure_current())
    }

    pub fn current_compliance(&mut self) -> Result<f64> {
        self.read("read current compliance", |s| s.current_compliance())
    }

    pub fn set_current_compliance(&mut self, amperes: f64) -> Result<()> {
        self.write("set current compliance", |s| s.set_current_compliance(amperes))
    }

    /// `None` when no supply is configured.
    pub fn output_status(&mut self) -> Result<Option<OutputStatus>> {
        match self.supply() {
            Some(supply) => supply.output_status().map(Some),
            None => {
                tracing::warn!("no bias supply configured; cannot read bias output status");
                Ok(None)
            }
        }
    }

    pub fn set_output_status(&mut self, status: OutputStatus) -> Result<()> {
        if let BiasBackend::Caen {
            supply,
            output_settle,
            ..
        } = self
        {
            supply.set_output_status(status)?;
            thread::sleep(*output_settle);
            return Ok(());
        }
        self.write("set bias output status", |s| s.set_output_status(status))
    }
}

/// Digitizer plus the readout of its last trigger.
///
/// One readout returns every channel, so it is cached and served channel by
/// channel until the next trigger.
pub struct DigitizerBackend {
    driver: Box<dyn DigitizerDriver>,
    latest: Option<Vec<DigitizerEvent>>,
}

impl DigitizerBackend {
    pub fn new(driver: impl DigitizerDriver + 'static) -> Self {
        Self {
            driver: Box::new(driver),
            latest: None,
        }
    }

    fn wait_for_trigger(&mut self, timeout: Duration) -> Result<()> {
        self.latest = None;
        self.driver.wait_for_memory_full(timeout)
    }

    fn waveforms(&mut self, channel: u8) -> Result<Vec<Waveform>> {
        if self.latest.is_none() {
            self.latest = Some(self.driver.read_events()?);
        }
        let events = self.latest.as_deref().unwrap_or_default();

        let mut waveforms = events
            .iter()
            .map(|event| {
                event.get(&channel).cloned().ok_or_else(|| {
                    SetupError::InvalidInput(format!("digitizer has no channel {}", channel))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // All events share the first event's time axis.
        if let Some(first) = waveforms.first() {
            let keep: Vec<bool> = first
                .time
                .iter()
                .map(|&t| t <= DIGITIZER_WINDOW_END)
                .collect();
            for waveform in &mut waveforms {
                waveform.retain_samples(&keep);
            }
        }
        Ok(waveforms)
    }
}

/// The configured signal acquisition system, if any.
pub enum AcquisitionBackend {
    /// Every acquisition operation fails with [`SetupError::Unsupported`].
    None,
    Oscilloscope(Box<dyn ScopeDriver>),
    Drs4(Box<dyn ScopeDriver>),
    Digitizer(DigitizerBackend),
}

impl AcquisitionBackend {
    pub fn oscilloscope(driver: impl ScopeDriver + 'static) -> Self {
        AcquisitionBackend::Oscilloscope(Box::new(driver))
    }

    pub fn drs4(driver: impl ScopeDriver + 'static) -> Self {
        AcquisitionBackend::Drs4(Box::new(driver))
    }

    pub fn digitizer(driver: impl DigitizerDriver + 'static) -> Self {
        AcquisitionBackend::Digitizer(DigitizerBackend::new(driver))
    }

    pub fn kind(&self) -> AcquisitionKind {
        match self {
            AcquisitionBackend::None => AcquisitionKind::None,
            AcquisitionBackend::Oscilloscope(_) => AcquisitionKind::Oscilloscope,
            AcquisitionBackend::Drs4(_) => AcquisitionKind::Drs4,
            AcquisitionBackend::Digitizer(_) => AcquisitionKind::Digitizer,
        }
    }

    fn missing() -> SetupError {
        SetupError::Unsupported("no signal acquisition system configured".to_string())
    }

    pub fn configure_for_two_pulses(&mut self) -> Result<()> {
        match self {
            AcquisitionBackend::None => Err(Self::missing()),
            AcquisitionBackend::Oscilloscope(scope) | AcquisitionBackend::Drs4(scope) => {
                scope.configure_for_two_pulses()
            }
            AcquisitionBackend::Digitizer(digitizer) => {
                digitizer.driver.configure_for_two_pulses()
            }
        }
    }

    pub fn configure_sequence_acquisition(&mut self, n: u32) -> Result<()> {
        match self {
            AcquisitionBackend::None => Err(Self::missing()),
            AcquisitionBackend::Oscilloscope(scope) => scope.set_segments(n),
            AcquisitionBackend::Drs4(_) => Err(SetupError::Unsupported(
                "sequence acquisition is not available on the DRS4 board".to_string(),
            )),
            AcquisitionBackend::Digitizer(digitizer) => digitizer.driver.set_events_per_block(n),
        }
    }

    pub fn wait_for_trigger(&mut self, timeout: Duration) -> Result<()> {
        match self {
            AcquisitionBackend::None => Err(Self::missing()),
            AcquisitionBackend::Oscilloscope(scope) | AcquisitionBackend::Drs4(scope) => {
                scope.wait_for_trigger(timeout)
            }
            AcquisitionBackend::Digitizer(digitizer) => digitizer.wait_for_trigger(timeout),
        }
    }

    pub fn waveforms(&mut self, channel: u8) -> Result<Vec<Waveform>> {
        match self {
            AcquisitionBackend::None => Err(Self::missing()),
            AcquisitionBackend::Oscilloscope(scope) | AcquisitionBackend::Drs4(scope) => {
                scope.read_waveforms(channel)
            }
            AcquisitionBackend::Digitizer(digitizer) => digitizer.waveforms(channel),
        }
    }

    pub fn set_vdiv(&mut self, channel: u8, volts_per_div: f64) -> Result<()> {
        match self {
            AcquisitionBackend::None => Err(Self::missing()),
            AcquisitionBackend::Oscilloscope(scope) => scope.set_vdiv(channel, volts_per_div),
            AcquisitionBackend::Drs4(_) => {
                tracing::warn!("cannot change the vertical scale of the DRS4 board; ignored");
                Ok(())
            }
            AcquisitionBackend::Digitizer(_) => {
                tracing::warn!("the digitizer has no vertical scale setting; ignored");
                Ok(())
            }
        }
    }
}
