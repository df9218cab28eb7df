//! Multi-zone thermostat controller: shared measurement cycle, per-unit
//! heating decisions and the authenticated HTTP interface.

pub mod hardware;
pub mod host;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod store;
