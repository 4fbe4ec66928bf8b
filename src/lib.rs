//! Shared access to a laser TCT measurement setup.
//!
//! A single server process owns the instruments (stages, laser, bias supply,
//! oscilloscope or digitizer, environment sensor, Peltier supply). Scan and
//! control scripts on the same host talk to it through [`remote`], and
//! coordinate multi-step hardware sequences through four named, reentrant,
//! cross-process locks, one per resource group (see [`locks`]).

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fs;
pub mod instruments;
pub mod locks;
pub mod remote;
pub mod setup;
