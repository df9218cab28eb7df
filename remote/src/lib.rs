//! Client side of the authenticated thermostat protocol.

pub mod client;

pub use client::{ClientError, RemoteController};
