//! Exit code constants for the tct-setup CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, invalid config, unsupported operation)
//! - 2: Hardware failure (instrument error or timeout)
//! - 3: Transport failure (setup server unreachable or lost)
//! - 4: Lock failure (lock protocol violation or lock storage unavailable)

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments, invalid configuration, or unsupported operation.
pub const USER_ERROR: i32 = 1;

/// Hardware failure: an instrument reported an error or did not respond in time.
pub const HARDWARE_FAILURE: i32 = 2;

/// Transport failure: the setup server could not be reached or dropped the connection.
pub const TRANSPORT_FAILURE: i32 = 3;

/// Lock failure: a named lock was misused or its backing storage failed.
pub const LOCK_FAILURE: i32 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            SUCCESS,
            USER_ERROR,
            HARDWARE_FAILURE,
            TRANSPORT_FAILURE,
            LOCK_FAILURE,
        ];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Exit codes must be distinct");
                }
            }
        }
    }
}
