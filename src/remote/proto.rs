//! Messages of the `tct_setup.SetupService` gRPC service.
//!
//! The service has three methods:
//!
//! - `Hello` checks that client and server speak the same [`PROTOCOL_VERSION`].
//! - `Call` runs one [`Operation`] on the served setup and answers with a
//!   [`CallReply`]. Errors raised by the setup travel inside the reply as an
//!   [`ErrorReply`] so the client re-raises the same [`SetupError`] variant;
//!   gRPC statuses are reserved for transport problems.
//! - `Lease` is a bidirectional stream holding one named lock. The client
//!   opens it with an acquire, the server answers `granted` once the lock is
//!   held, and a later release message returns it. A stream that ends any
//!   other way returns the lock too.

use crate::error::{Result, SetupError};
use crate::instruments::{OutputStatus, StagePosition, Waveform};
use crate::locks::ResourceGroup;

include!(concat!(env!("OUT_DIR"), "/tct_setup.SetupService.rs"));

/// Bumped on any incompatible change of the messages below.
pub const PROTOCOL_VERSION: u32 = 2;

/// Metadata header carrying the shared handshake token.
pub const TOKEN_HEADER: &str = "x-setup-token";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloRequest {
    #[prost(uint32, tag = "1")]
    pub version: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HelloReply {
    #[prost(uint32, tag = "1")]
    pub version: u32,
}

// Calls ----------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallRequest {
    /// Caller identity for identity-aware operations.
    #[prost(string, optional, tag = "1")]
    pub who: Option<String>,
    #[prost(
        oneof = "Operation",
        tags = "2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31"
    )]
    pub op: Option<Operation>,
}

/// One call on the remote [`SetupApi`](crate::setup::SetupApi).
#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum Operation {
    #[prost(message, tag = "2")]
    MoveTo(MoveTo),
    #[prost(message, tag = "3")]
    StagePosition(Empty),
    #[prost(message, tag = "4")]
    LaserStatus(Empty),
    #[prost(enumeration = "Output", tag = "5")]
    SetLaserStatus(i32),
    #[prost(message, tag = "6")]
    LaserDac(Empty),
    #[prost(uint32, tag = "7")]
    SetLaserDac(u32),
    #[prost(message, tag = "8")]
    LaserFrequency(Empty),
    #[prost(double, tag = "9")]
    SetLaserFrequency(f64),
    #[prost(message, tag = "10")]
    MeasureBiasVoltage(Empty),
    #[prost(double, tag = "11")]
    SetBiasVoltage(f64),
    #[prost(message, tag = "12")]
    MeasureBiasCurrent(Empty),
    #[prost(message, tag = "13")]
    CurrentCompliance(Empty),
    #[prost(double, tag = "14")]
    SetCurrentCompliance(f64),
    #[prost(message, tag = "15")]
    BiasOutputStatus(Empty),
    #[prost(enumeration = "Output", tag = "16")]
    SetBiasOutputStatus(i32),
    #[prost(message, tag = "17")]
    ConfigureForTwoPulses(Empty),
    #[prost(uint32, tag = "18")]
    ConfigureSequenceAcquisition(u32),
    #[prost(message, tag = "19")]
    WaitForTrigger(Empty),
    #[prost(uint32, tag = "20")]
    GetWaveform(u32),
    #[prost(message, tag = "21")]
    SetVdiv(Vdiv),
    #[prost(message, tag = "22")]
    MeasureTemperature(Empty),
    #[prost(message, tag = "23")]
    MeasureHumidity(Empty),
    #[prost(message, tag = "24")]
    PeltierVoltageSetpoint(Empty),
    #[prost(double, tag = "25")]
    SetPeltierVoltage(f64),
    #[prost(message, tag = "26")]
    PeltierCurrentSetpoint(Empty),
    #[prost(double, tag = "27")]
    SetPeltierCurrent(f64),
    #[prost(message, tag = "28")]
    MeasurePeltierVoltage(Empty),
    #[prost(message, tag = "29")]
    MeasurePeltierCurrent(Empty),
    #[prost(message, tag = "30")]
    PeltierStatus(Empty),
    #[prost(enumeration = "Output", tag = "31")]
    SetPeltierStatus(i32),
}

impl Operation {
    /// Whether the server may queue this call behind another client's hold.
    ///
    /// These are the identity-aware operations; the server runs them under
    /// a named lock, so no deadline applies to them.
    pub fn waits_for_lock(&self) -> bool {
        matches!(
            self,
            Operation::MoveTo(_)
                | Operation::SetLaserStatus(_)
                | Operation::SetLaserDac(_)
                | Operation::SetLaserFrequency(_)
                | Operation::SetBiasVoltage(_)
                | Operation::SetCurrentCompliance(_)
                | Operation::SetBiasOutputStatus(_)
                | Operation::ConfigureForTwoPulses(_)
                | Operation::ConfigureSequenceAcquisition(_)
                | Operation::SetVdiv(_)
                | Operation::SetPeltierVoltage(_)
                | Operation::SetPeltierCurrent(_)
                | Operation::SetPeltierStatus(_)
        )
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MoveTo {
    #[prost(double, optional, tag = "1")]
    pub x: Option<f64>,
    #[prost(double, optional, tag = "2")]
    pub y: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub z: Option<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Vdiv {
    #[prost(uint32, tag = "1")]
    pub channel: u32,
    #[prost(double, tag = "2")]
    pub volts_per_div: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Output {
    Unspecified = 0,
    On = 1,
    Off = 2,
}

impl From<OutputStatus> for Output {
    fn from(status: OutputStatus) -> Self {
        match status {
            OutputStatus::On => Output::On,
            OutputStatus::Off => Output::Off,
        }
    }
}

/// Encode an output status for an enumeration field.
pub fn output(status: OutputStatus) -> i32 {
    Output::from(status) as i32
}

/// Decode an output status field.
pub fn output_status(value: i32) -> Result<OutputStatus> {
    match Output::try_from(value) {
        Ok(Output::On) => Ok(OutputStatus::On),
        Ok(Output::Off) => Ok(OutputStatus::Off),
        _ => Err(SetupError::InvalidInput(format!(
            "{} is not an output status",
            value
        ))),
    }
}

/// Decode a channel field into the `u8` the instruments take.
pub fn channel(value: u32) -> Result<u8> {
    u8::try_from(value)
        .map_err(|_| SetupError::InvalidInput(format!("channel {} out of range", value)))
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallReply {
    #[prost(oneof = "Outcome", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub outcome: Option<Outcome>,
}

/// Successful result of an [`Operation`], or the error it raised.
///
/// Doubles carry NaN natively, so degraded readings need no special case.
#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum Outcome {
    #[prost(message, tag = "1")]
    Done(Empty),
    #[prost(double, tag = "2")]
    Number(f64),
    #[prost(uint32, tag = "3")]
    Dac(u32),
    #[prost(message, tag = "4")]
    Position(Position),
    #[prost(message, tag = "5")]
    Status(StatusReading),
    #[prost(message, tag = "6")]
    Waveforms(Waveforms),
    #[prost(message, tag = "7")]
    Error(ErrorReply),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Position {
    #[prost(double, tag = "1")]
    pub x: f64,
    #[prost(double, tag = "2")]
    pub y: f64,
    #[prost(double, tag = "3")]
    pub z: f64,
}

/// An output status that may be unknown.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusReading {
    #[prost(enumeration = "Output", optional, tag = "1")]
    pub status: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WireWaveform {
    #[prost(double, repeated, tag = "1")]
    pub time: Vec<f64>,
    #[prost(double, repeated, tag = "2")]
    pub amplitude: Vec<f64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Waveforms {
    #[prost(message, repeated, tag = "1")]
    pub waveforms: Vec<WireWaveform>,
}

impl CallReply {
    pub fn from_result(result: Result<Outcome>) -> Self {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Error(ErrorReply::from(&e)),
        };
        Self {
            outcome: Some(outcome),
        }
    }

    /// The outcome, with a remote error turned back into a [`SetupError`].
    pub fn into_outcome(self) -> Result<Outcome> {
        match self.outcome {
            Some(Outcome::Error(e)) => Err(e.into()),
            Some(outcome) => Ok(outcome),
            None => Err(SetupError::Transport("empty reply from setup server".to_string())),
        }
    }
}

impl Outcome {
    pub fn done() -> Self {
        Outcome::Done(Empty {})
    }

    pub fn position(position: StagePosition) -> Self {
        Outcome::Position(Position {
            x: position.x,
            y: position.y,
            z: position.z,
        })
    }

    pub fn status(status: Option<OutputStatus>) -> Self {
        Outcome::Status(StatusReading {
            status: status.map(output),
        })
    }

    pub fn waveforms(waveforms: Vec<Waveform>) -> Self {
        Outcome::Waveforms(Waveforms {
            waveforms: waveforms
                .into_iter()
                .map(|w| WireWaveform {
                    time: w.time,
                    amplitude: w.amplitude,
                })
                .collect(),
        })
    }

    pub fn into_done(self) -> Result<()> {
        match self {
            Outcome::Done(_) => Ok(()),
            other => Err(unexpected(other, "done")),
        }
    }

    pub fn into_number(self) -> Result<f64> {
        match self {
            Outcome::Number(value) => Ok(value),
            other => Err(unexpected(other, "number")),
        }
    }

    pub fn into_dac(self) -> Result<u16> {
        match self {
            Outcome::Dac(dac) => u16::try_from(dac)
                .map_err(|_| SetupError::Transport(format!("laser DAC {} out of range", dac))),
            other => Err(unexpected(other, "dac")),
        }
    }

    pub fn into_position(self) -> Result<StagePosition> {
        match self {
            Outcome::Position(Position { x, y, z }) => Ok(StagePosition { x, y, z }),
            other => Err(unexpected(other, "position")),
        }
    }

    pub fn into_status(self) -> Result<Option<OutputStatus>> {
        match self {
            Outcome::Status(StatusReading { status }) => status
                .map(output_status)
                .transpose()
                .map_err(|e| SetupError::Transport(e.to_string())),
            other => Err(unexpected(other, "status")),
        }
    }

    pub fn into_waveforms(self) -> Result<Vec<Waveform>> {
        match self {
            Outcome::Waveforms(Waveforms { waveforms }) => Ok(waveforms
                .into_iter()
                .map(|w| Waveform {
                    time: w.time,
                    amplitude: w.amplitude,
                })
                .collect()),
            other => Err(unexpected(other, "waveforms")),
        }
    }
}

fn unexpected(outcome: Outcome, expected: &str) -> SetupError {
    SetupError::Transport(format!("expected a {} reply, got {:?}", expected, outcome))
}

// Errors ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ErrorKind {
    Unspecified = 0,
    InvalidInput = 1,
    Config = 2,
    IdentityRequired = 3,
    Unsupported = 4,
    LockProtocol = 5,
    Lock = 6,
    HardwareTimeout = 7,
    Instrument = 8,
    Transport = 9,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorReply {
    #[prost(enumeration = "ErrorKind", tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

impl From<&SetupError> for ErrorReply {
    fn from(error: &SetupError) -> Self {
        let (kind, message) = match error {
            SetupError::InvalidInput(m) => (ErrorKind::InvalidInput, m),
            SetupError::Config(m) => (ErrorKind::Config, m),
            SetupError::IdentityRequired(m) => (ErrorKind::IdentityRequired, m),
            SetupError::Unsupported(m) => (ErrorKind::Unsupported, m),
            SetupError::LockProtocol(m) => (ErrorKind::LockProtocol, m),
            SetupError::Lock(m) => (ErrorKind::Lock, m),
            SetupError::HardwareTimeout(m) => (ErrorKind::HardwareTimeout, m),
            SetupError::Instrument(m) => (ErrorKind::Instrument, m),
            SetupError::Transport(m) => (ErrorKind::Transport, m),
        };
        Self {
            kind: kind as i32,
            message: message.clone(),
        }
    }
}

impl From<ErrorReply> for SetupError {
    fn from(reply: ErrorReply) -> Self {
        let message = reply.message;
        match ErrorKind::try_from(reply.kind) {
            Ok(ErrorKind::InvalidInput) => SetupError::InvalidInput(message),
            Ok(ErrorKind::Config) => SetupError::Config(message),
            Ok(ErrorKind::IdentityRequired) => SetupError::IdentityRequired(message),
            Ok(ErrorKind::Unsupported) => SetupError::Unsupported(message),
            Ok(ErrorKind::LockProtocol) => SetupError::LockProtocol(message),
            Ok(ErrorKind::Lock) => SetupError::Lock(message),
            Ok(ErrorKind::HardwareTimeout) => SetupError::HardwareTimeout(message),
            Ok(ErrorKind::Instrument) => SetupError::Instrument(message),
            Ok(ErrorKind::Transport) => SetupError::Transport(message),
            Ok(ErrorKind::Unspecified) | Err(_) => {
                SetupError::Transport(format!("unrecognized remote error: {}", message))
            }
        }
    }
}

// Leases ---------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Group {
    Unspecified = 0,
    Bias = 1,
    SignalAcquisition = 2,
    Tct = 3,
    Temperature = 4,
}

impl From<ResourceGroup> for Group {
    fn from(group: ResourceGroup) -> Self {
        match group {
            ResourceGroup::Bias => Group::Bias,
            ResourceGroup::SignalAcquisition => Group::SignalAcquisition,
            ResourceGroup::Tct => Group::Tct,
            ResourceGroup::Temperature => Group::Temperature,
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LeaseRequest {
    #[prost(oneof = "LeaseStep", tags = "1, 2")]
    pub step: Option<LeaseStep>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum LeaseStep {
    #[prost(message, tag = "1")]
    Acquire(Acquire),
    #[prost(message, tag = "2")]
    Release(Empty),
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Acquire {
    #[prost(enumeration = "Group", tag = "1")]
    pub group: i32,
    #[prost(string, tag = "2")]
    pub who: String,
}

impl Acquire {
    pub fn resource_group(&self) -> Result<ResourceGroup> {
        match Group::try_from(self.group) {
            Ok(Group::Bias) => Ok(ResourceGroup::Bias),
            Ok(Group::SignalAcquisition) => Ok(ResourceGroup::SignalAcquisition),
            Ok(Group::Tct) => Ok(ResourceGroup::Tct),
            Ok(Group::Temperature) => Ok(ResourceGroup::Temperature),
            Ok(Group::Unspecified) | Err(_) => Err(SetupError::InvalidInput(format!(
                "{} is not a resource group",
                self.group
            ))),
        }
    }
}

impl LeaseRequest {
    pub fn acquire(group: ResourceGroup, who: &str) -> Self {
        Self {
            step: Some(LeaseStep::Acquire(Acquire {
                group: Group::from(group) as i32,
                who: who.to_string(),
            })),
        }
    }

    pub fn release() -> Self {
        Self {
            step: Some(LeaseStep::Release(Empty {})),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LeaseReply {
    #[prost(oneof = "LeaseOutcome", tags = "1, 2, 3")]
    pub outcome: Option<LeaseOutcome>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
pub enum LeaseOutcome {
    #[prost(message, tag = "1")]
    Granted(Empty),
    #[prost(message, tag = "2")]
    Released(Empty),
    #[prost(message, tag = "3")]
    Error(ErrorReply),
}

impl LeaseReply {
    pub fn granted() -> Self {
        Self {
            outcome: Some(LeaseOutcome::Granted(Empty {})),
        }
    }

    pub fn released() -> Self {
        Self {
            outcome: Some(LeaseOutcome::Released(Empty {})),
        }
    }

    pub fn error(error: &SetupError) -> Self {
        Self {
            outcome: Some(LeaseOutcome::Error(ErrorReply::from(error))),
        }
    }

    /// The error carried by a reply that is not the one expected.
    pub fn into_error(self, expected: &str) -> SetupError {
        match self.outcome {
            Some(LeaseOutcome::Error(e)) => e.into(),
            other => SetupError::Transport(format!(
                "expected a {} lease reply, got {:?}",
                expected, other
            )),
        }
    }
}
