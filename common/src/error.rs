//! Error types shared by the controller and the remote client.

use thiserror::Error;

/// Why an envelope was not trusted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("hmac tag mismatch")]
    TagMismatch,

    #[error("nonce {nonce:?} deviates {deviation_ms} ms from local time (window {window_ms} ms)")]
    StaleNonce {
        nonce: String,
        deviation_ms: u64,
        window_ms: u64,
    },

    #[error("nonce {nonce:?} is not a millisecond timestamp")]
    MalformedNonce { nonce: String },

    #[error("malformed envelope: {what}")]
    MalformedEnvelope { what: String },
}

/// Configuration problems detected while loading the configuration record.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no valid thermostats found")]
    NoValidUnits,

    #[error("invalid hmac key: {what}")]
    InvalidKey { what: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures of the remote setpoint protocol as seen by a client.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("response failed authentication: {0}")]
    Authentication(#[from] AuthError),

    #[error("thermostat {name:?} not present in response")]
    UnitNotFound { name: String },

    #[error("unexpected payload: {what}")]
    UnexpectedPayload { what: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a sensor read that produced no measurement.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("bad checksum")]
    BadChecksum,

    #[error("sensor did not answer in time")]
    Timeout,
}
