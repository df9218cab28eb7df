//! Remote setpoint protocol.
//!
//! A client wraps `{name, setpoint}` in an envelope and POSTs it to either
//! `data.json` or `config.json`. The controller answers every request, accepted
//! or not, with a fresh envelope around the current state for that endpoint,
//! so the client learns from the response whether its change took effect.

use std::{fmt, str::FromStr};

use serde::Serialize;
use serde_json::Value;

use crate::{
    config::{Configuration, ThermostatEntry},
    envelope::{AuthenticatedEnvelope, HmacKey, TagEncoding, DEFAULT_NONCE_WINDOW_MS},
    error::{AuthError, ProtocolError},
    types::{ThermostatData, ThermostatSetpoint},
};

/// The two state documents a controller serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Endpoint {
    #[default]
    Data,
    Config,
}

impl Endpoint {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Data => "data.json",
            Self::Config => "config.json",
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Self::Data => "/data.json",
            Self::Config => "/config.json",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

impl FromStr for Endpoint {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim_start_matches('/') {
            "data.json" => Ok(Self::Data),
            "config.json" => Ok(Self::Config),
            other => Err(format!(
                "unknown endpoint {other:?} (use data.json or config.json)"
            )),
        }
    }
}

/// Key, tag encoding and freshness window shared by both ends of a deployment.
#[derive(Debug, Clone)]
pub struct Authenticator {
    key: HmacKey,
    encoding: TagEncoding,
    nonce_window_ms: u64,
}

impl Authenticator {
    pub fn new(key: HmacKey, encoding: TagEncoding) -> Self {
        Self {
            key,
            encoding,
            nonce_window_ms: DEFAULT_NONCE_WINDOW_MS,
        }
    }

    pub fn with_nonce_window(mut self, nonce_window_ms: u64) -> Self {
        self.nonce_window_ms = nonce_window_ms;
        self
    }

    pub fn from_config(key: HmacKey, config: &Configuration) -> Self {
        Self::new(key, config.hmac_encoding).with_nonce_window(config.nonce_window_ms)
    }

    pub fn nonce_window_ms(&self) -> u64 {
        self.nonce_window_ms
    }

    /// Wraps `payload` with a timestamp nonce.
    pub fn seal<T: Serialize + ?Sized>(
        &self,
        payload: &T,
    ) -> Result<AuthenticatedEnvelope, serde_json::Error> {
        AuthenticatedEnvelope::produce_with(&self.key, payload, None, self.encoding)
    }

    pub fn seal_with_nonce<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        nonce: String,
    ) -> Result<AuthenticatedEnvelope, serde_json::Error> {
        AuthenticatedEnvelope::produce_with(&self.key, payload, Some(nonce), self.encoding)
    }

    /// Tag check only; used by clients on responses.
    pub fn verify<'a>(&self, envelope: &'a AuthenticatedEnvelope) -> Result<&'a Value, AuthError> {
        if envelope.validate_with(&self.key, self.encoding) {
            Ok(&envelope.payload)
        } else {
            Err(AuthError::TagMismatch)
        }
    }

    /// Freshness and tag; used by the controller on requests.
    pub fn accept<'a>(
        &self,
        envelope: &'a AuthenticatedEnvelope,
        now_ms: i64,
    ) -> Result<&'a Value, AuthError> {
        envelope.open(&self.key, self.encoding, now_ms, self.nonce_window_ms)
    }
}

/// Builds the authenticated body of a setpoint update request.
pub fn setpoint_request(
    auth: &Authenticator,
    name: &str,
    setpoint: f64,
) -> Result<AuthenticatedEnvelope, ProtocolError> {
    let change = ThermostatSetpoint {
        name: name.to_string(),
        setpoint,
    };
    Ok(auth.seal(&change)?)
}

/// Server side: authenticates a request and extracts the setpoint change.
pub fn accept_setpoint_request(
    auth: &Authenticator,
    envelope: &AuthenticatedEnvelope,
    now_ms: i64,
) -> Result<ThermostatSetpoint, ProtocolError> {
    let payload = auth.accept(envelope, now_ms)?;
    let change: ThermostatSetpoint =
        serde_json::from_value(payload.clone()).map_err(|err| ProtocolError::UnexpectedPayload {
            what: format!("setpoint change: {err}"),
        })?;

    if change.name.is_empty() || !change.setpoint.is_finite() {
        return Err(ProtocolError::UnexpectedPayload {
            what: "setpoint change requires a name and a finite setpoint".to_string(),
        });
    }
    Ok(change)
}

/// Client side: validates a `data.json` response and returns all records.
pub fn interpret_data_response(
    auth: &Authenticator,
    envelope: &AuthenticatedEnvelope,
) -> Result<Vec<ThermostatData>, ProtocolError> {
    let payload = auth.verify(envelope)?;
    serde_json::from_value(payload.clone()).map_err(|err| ProtocolError::UnexpectedPayload {
        what: format!("thermostat data list: {err}"),
    })
}

/// Client side: validates the response to a setpoint update and returns the
/// resulting state of the named unit.
///
/// For `config.json` only the setpoint is known; for `data.json` the latest
/// observed state is included.
pub fn interpret_setpoint_response(
    auth: &Authenticator,
    endpoint: Endpoint,
    envelope: &AuthenticatedEnvelope,
    name: &str,
) -> Result<ThermostatData, ProtocolError> {
    let not_found = || ProtocolError::UnitNotFound {
        name: name.to_string(),
    };

    match endpoint {
        Endpoint::Data => interpret_data_response(auth, envelope)?
            .into_iter()
            .find(|data| data.name == name)
            .ok_or_else(not_found),
        Endpoint::Config => {
            let payload = auth.verify(envelope)?;
            let config: Configuration = serde_json::from_value(payload.clone()).map_err(|err| {
                ProtocolError::UnexpectedPayload {
                    what: format!("configuration: {err}"),
                }
            })?;
            config
                .thermostats
                .iter()
                .filter_map(ThermostatEntry::config)
                .find(|entry| entry.name == name)
                .map(|entry| ThermostatData {
                    name: entry.name.clone(),
                    setpoint: entry.setpoint_or_default(),
                    timestamp: None,
                    temperature: None,
                    humidity: None,
                    heating_is_on: None,
                })
                .ok_or_else(not_found)
        }
    }
}
