//! Error types for the TCT setup.
//!
//! Uses thiserror for derive macros. The setup server ships each variant to
//! remote clients as an error kind plus message, and they re-raise the same
//! variant locally.

use crate::exit_codes;
use thiserror::Error;

/// Main error type for setup operations.
///
/// Advisory telemetry failures never surface as errors (they degrade to NaN),
/// so every variant here means the caller's sequence cannot continue as planned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SetupError {
    /// A parameter was malformed or out of range. Raised before touching hardware.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be read or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// An identity-aware operation was invoked without a caller identity.
    #[error("operation '{0}' requires a caller identity")]
    IdentityRequired(String),

    /// The deployed setup does not provide this operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A named lock was released by someone who does not hold it.
    #[error("lock protocol violation: {0}")]
    LockProtocol(String),

    /// The shared lock storage failed; exclusivity can no longer be guaranteed.
    #[error("lock storage failure: {0}")]
    Lock(String),

    /// An instrument did not respond in time.
    #[error("hardware timeout: {0}")]
    HardwareTimeout(String),

    /// An instrument driver reported a failure.
    #[error("instrument failure: {0}")]
    Instrument(String),

    /// The setup server could not be reached or the connection broke.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl SetupError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            SetupError::InvalidInput(_)
            | SetupError::Config(_)
            | SetupError::IdentityRequired(_)
            | SetupError::Unsupported(_) => exit_codes::USER_ERROR,
            SetupError::HardwareTimeout(_) | SetupError::Instrument(_) => {
                exit_codes::HARDWARE_FAILURE
            }
            SetupError::Transport(_) => exit_codes::TRANSPORT_FAILURE,
            SetupError::LockProtocol(_) | SetupError::Lock(_) => exit_codes::LOCK_FAILURE,
        }
    }
}

/// Result type alias for setup operations.
pub type Result<T> = std::result::Result<T, SetupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_user_errors() {
        let err = SetupError::InvalidInput("DAC out of range".to_string());
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
        let err = SetupError::IdentityRequired("set_bias_voltage".to_string());
        assert_eq!(err.exit_code(), exit_codes::USER_ERROR);
    }

    #[test]
    fn hardware_errors_have_hardware_exit_code() {
        let err = SetupError::HardwareTimeout("no trigger".to_string());
        assert_eq!(err.exit_code(), exit_codes::HARDWARE_FAILURE);
        let err = SetupError::Instrument("serial port closed".to_string());
        assert_eq!(err.exit_code(), exit_codes::HARDWARE_FAILURE);
    }

    #[test]
    fn lock_errors_have_lock_exit_code() {
        let err = SetupError::LockProtocol("not the holder".to_string());
        assert_eq!(err.exit_code(), exit_codes::LOCK_FAILURE);
        let err = SetupError::Lock("disk gone".to_string());
        assert_eq!(err.exit_code(), exit_codes::LOCK_FAILURE);
    }

    #[test]
    fn transport_error_has_transport_exit_code() {
        let err = SetupError::Transport("connection refused".to_string());
        assert_eq!(err.exit_code(), exit_codes::TRANSPORT_FAILURE);
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = SetupError::IdentityRequired("move_to".to_string());
        assert_eq!(err.to_string(), "operation 'move_to' requires a caller identity");

        let err = SetupError::HardwareTimeout("trigger".to_string());
        assert_eq!(err.to_string(), "hardware timeout: trigger");
    }
}
