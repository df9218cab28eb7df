use serde::{Deserialize, Serialize};

/// Logic level of a digital output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

impl PinLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::High => "HIGH",
        }
    }
}

impl From<bool> for PinLevel {
    fn from(high: bool) -> Self {
        if high {
            Self::High
        } else {
            Self::Low
        }
    }
}

/// A raw sensor measurement before correction and rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
}

/// The setpoint-change record carried by remote update requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermostatSetpoint {
    pub name: String,
    pub setpoint: f64,
}

/// Latest state of one thermostat, as published on `data.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermostatData {
    pub name: String,
    pub setpoint: f64,
    /// UNIX timestamp (ms) of the latest measurement attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(
        rename = "heatingIsOn",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub heating_is_on: Option<bool>,
}
