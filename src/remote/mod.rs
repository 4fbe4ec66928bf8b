//! Network access to the one setup instance on this host.
//!
//! A single server process owns the instruments and serves them over gRPC
//! ([`SetupServer`]); every script connects with [`connect_to_setup`] and
//! receives a proxy implementing the same [`SetupApi`](crate::setup::SetupApi)
//! as the local façade. Errors raised in the server come back as the same
//! [`SetupError`](crate::error::SetupError) variant.
//!
//! The token is a compatibility handshake shared by all participants, not
//! access control.

mod client;
pub mod proto;
mod server;

#[cfg(test)]
mod tests;

pub use client::{RemoteSetup, connect_to_setup};
pub use server::{ServerHandle, SetupServer};
