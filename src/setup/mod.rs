//! Hardware access for the TCT setup.
//!
//! - [`TctSetup`]: the façade owning every instrument, with one local lock
//!   per instrument
//! - [`NamedLockSetup`]: the façade plus the four named resource group
//!   locks shared with other processes
//! - [`SetupApi`]: the operation set both implement, as does the remote
//!   proxy in [`crate::remote`]
//! - [`Identified`]: binds a caller identity to any of them
//!
//! Advisory telemetry (temperature, humidity) and absent bias or Peltier
//! supplies degrade to NaN plus a warning. Timeouts, lock violations and
//! driver failures are returned as errors.

mod api;
mod backends;
mod facade;
mod identified;
mod named;


pub use api::{Hold, SetupApi};
pub use backends::{AcquisitionBackend, BiasBackend, DIGITIZER_WINDOW_END, DigitizerBackend};
pub use facade::{MAX_LASER_DAC, TctSetup};
pub use identified::Identified;
pub use named::NamedLockSetup;
