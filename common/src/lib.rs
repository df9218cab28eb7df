pub mod config;
pub mod cycle;
pub mod envelope;
pub mod error;
pub mod protocol;
pub mod thermostat;
pub mod types;

pub use config::{
    Configuration, MeasurementTiming, SensorType, SkippedUnit, ThermostatConfig, ThermostatEntry,
};
pub use cycle::{CyclePhase, MeasurementCycle};
pub use envelope::{now_ms, AuthenticatedEnvelope, HmacKey, TagEncoding};
pub use error::{AuthError, ConfigError, ProtocolError, SensorError};
pub use protocol::{Authenticator, Endpoint};
pub use thermostat::ThermostatUnit;
pub use types::{PinLevel, Reading, ThermostatData, ThermostatSetpoint};
