use std::{collections::HashSet, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    envelope::{HmacKey, TagEncoding, DEFAULT_NONCE_WINDOW_MS},
    error::ConfigError,
};

pub const DEFAULT_SAMPLING_INTERVAL_S: f64 = 120.0;
pub const DEFAULT_SENSOR_WARM_UP_S: f64 = 4.0;
pub const DEFAULT_TIMEOUT_S: f64 = 5.0;
pub const DEFAULT_ACTUATOR_JITTER_MS: u64 = 500;
pub const DEFAULT_SETPOINT_C: f64 = 18.0;

const MIN_POWER_UP_DELAY: Duration = Duration::from_secs(1);
const MIN_REARM_DELAY: Duration = Duration::from_secs(2);

/// DHT sensor family. Serialized as the model number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SensorType {
    Dht11,
    #[default]
    Dht22,
}

impl TryFrom<u8> for SensorType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            11 => Ok(Self::Dht11),
            22 => Ok(Self::Dht22),
            other => Err(format!("unsupported sensor type {other} (use 11 or 22)")),
        }
    }
}

impl From<SensorType> for u8 {
    fn from(value: SensorType) -> Self {
        match value {
            SensorType::Dht11 => 11,
            SensorType::Dht22 => 22,
        }
    }
}

/// One entry of `thermostats[]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThermostatConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_pin: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<SensorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actuator_pin: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<f64>,
    /// Summand in °C applied to every raw temperature reading.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_correction: Option<f64>,
}

/// A `thermostats[]` entry as stored. Entries that do not fit [`ThermostatConfig`]
/// are kept verbatim so they survive a write-back, and are skipped at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThermostatEntry {
    Valid(ThermostatConfig),
    Invalid(serde_json::Value),
}

impl ThermostatEntry {
    pub fn config(&self) -> Option<&ThermostatConfig> {
        match self {
            Self::Valid(config) => Some(config),
            Self::Invalid(_) => None,
        }
    }
}

impl From<ThermostatConfig> for ThermostatEntry {
    fn from(value: ThermostatConfig) -> Self {
        Self::Valid(value)
    }
}

impl ThermostatConfig {
    pub fn setpoint_or_default(&self) -> f64 {
        self.setpoint
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_SETPOINT_C)
    }
}

/// The persisted configuration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Configuration {
    pub host: String,
    pub port: u16,
    /// Seconds between the end of one measurement cycle and the start of the next.
    pub sampling_interval: f64,
    /// Seconds to wait after powering the sensor rail before sampling.
    pub sensor_warm_up_time: f64,
    /// Seconds to wait for all sensors of a cycle to answer.
    pub timeout_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_power_pin: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_pin: Option<u8>,
    pub thermostats: Vec<ThermostatEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmac_key: Option<String>,
    pub hmac_encoding: TagEncoding,
    pub nonce_window_ms: u64,
    pub actuator_jitter_ms: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            sampling_interval: DEFAULT_SAMPLING_INTERVAL_S,
            sensor_warm_up_time: DEFAULT_SENSOR_WARM_UP_S,
            timeout_seconds: DEFAULT_TIMEOUT_S,
            sensor_power_pin: None,
            heartbeat_pin: None,
            thermostats: Vec::new(),
            hmac_key: None,
            hmac_encoding: TagEncoding::Base64,
            nonce_window_ms: DEFAULT_NONCE_WINDOW_MS,
            actuator_jitter_ms: DEFAULT_ACTUATOR_JITTER_MS,
        }
    }
}

/// Why a `thermostats[]` entry was not loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingName,
    DuplicateName,
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedUnit {
    pub index: usize,
    pub reason: SkipReason,
    pub entry: ThermostatEntry,
}

impl fmt::Display for SkippedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entry = serde_json::to_string(&self.entry).unwrap_or_default();
        match &self.reason {
            SkipReason::MissingName => write!(f, "skipping thermostat without name")?,
            SkipReason::DuplicateName => write!(f, "skipping thermostat with duplicate name")?,
            SkipReason::Invalid(err) => write!(f, "skipping invalid thermostat ({err})")?,
        }
        write!(f, " at index {}: {entry}", self.index)
    }
}

/// Timing of the shared measurement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementTiming {
    pub sampling_interval: Duration,
    pub sensor_warm_up: Duration,
    pub timeout: Duration,
    pub actuator_jitter: Duration,
}

impl MeasurementTiming {
    /// Delay between powering the rail and sampling; never below one second.
    pub fn power_up_delay(&self) -> Duration {
        self.sensor_warm_up.max(MIN_POWER_UP_DELAY)
    }

    /// Delay between the end of a cycle and the next one; never below two seconds.
    pub fn rearm_delay(&self) -> Duration {
        self.sampling_interval.max(MIN_REARM_DELAY)
    }
}

impl Default for MeasurementTiming {
    fn default() -> Self {
        Configuration::default().timing()
    }
}

impl Configuration {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_slice(raw)?;
        config.sanitize();
        Ok(config)
    }

    /// Replaces negative or non-finite durations with their defaults.
    pub fn sanitize(&mut self) {
        fn seconds(value: f64, default: f64) -> f64 {
            if value.is_finite() && value >= 0.0 {
                value
            } else {
                default
            }
        }

        self.sampling_interval = seconds(self.sampling_interval, DEFAULT_SAMPLING_INTERVAL_S);
        self.sensor_warm_up_time = seconds(self.sensor_warm_up_time, DEFAULT_SENSOR_WARM_UP_S);
        self.timeout_seconds = seconds(self.timeout_seconds, DEFAULT_TIMEOUT_S);
        for entry in &mut self.thermostats {
            let ThermostatEntry::Valid(thermostat) = entry else {
                continue;
            };
            thermostat.name = thermostat.name.trim().to_string();
            if thermostat.setpoint.is_some_and(|value| !value.is_finite()) {
                thermostat.setpoint = None;
            }
            if thermostat
                .temperature_correction
                .is_some_and(|value| !value.is_finite())
            {
                thermostat.temperature_correction = None;
            }
        }
    }

    pub fn timing(&self) -> MeasurementTiming {
        fn seconds(value: f64, default: f64) -> Duration {
            Duration::try_from_secs_f64(value).unwrap_or(Duration::from_secs_f64(default))
        }

        MeasurementTiming {
            sampling_interval: seconds(self.sampling_interval, DEFAULT_SAMPLING_INTERVAL_S),
            sensor_warm_up: seconds(self.sensor_warm_up_time, DEFAULT_SENSOR_WARM_UP_S),
            timeout: seconds(self.timeout_seconds, DEFAULT_TIMEOUT_S),
            actuator_jitter: Duration::from_millis(self.actuator_jitter_ms),
        }
    }

    /// Splits `thermostats[]` into loadable entries and skipped ones.
    ///
    /// Fails only when no entry is loadable.
    pub fn select_units(&self) -> Result<(Vec<ThermostatConfig>, Vec<SkippedUnit>), ConfigError> {
        let mut seen = HashSet::new();
        let mut accepted = Vec::new();
        let mut skipped = Vec::new();

        for (index, entry) in self.thermostats.iter().enumerate() {
            let reason = match entry {
                ThermostatEntry::Invalid(raw) => Some(SkipReason::Invalid(
                    serde_json::from_value::<ThermostatConfig>(raw.clone())
                        .err()
                        .map_or_else(|| "not a thermostat".to_string(), |err| err.to_string()),
                )),
                ThermostatEntry::Valid(config) if config.name.is_empty() => {
                    Some(SkipReason::MissingName)
                }
                ThermostatEntry::Valid(config) if !seen.insert(config.name.as_str()) => {
                    Some(SkipReason::DuplicateName)
                }
                ThermostatEntry::Valid(config) => {
                    accepted.push(config.clone());
                    None
                }
            };

            if let Some(reason) = reason {
                skipped.push(SkippedUnit {
                    index,
                    reason,
                    entry: entry.clone(),
                });
            }
        }

        if accepted.is_empty() {
            return Err(ConfigError::NoValidUnits);
        }
        Ok((accepted, skipped))
    }

    /// Returns the configured key, generating and storing a new one if absent.
    ///
    /// The flag is `true` when a key was generated and the record must be written back.
    pub fn ensure_hmac_key(&mut self) -> Result<(HmacKey, bool), ConfigError> {
        if let Some(encoded) = self.hmac_key.as_deref() {
            return Ok((HmacKey::from_base64(encoded)?, false));
        }
        let key = HmacKey::generate();
        self.hmac_key = Some(key.to_base64());
        Ok((key, true))
    }

    /// The record as served on `config.json`: secret key removed.
    pub fn public_view(&self) -> Self {
        Self {
            hmac_key: None,
            ..self.clone()
        }
    }

    /// Updates the stored setpoint of the named thermostat. Returns `false` if absent.
    pub fn set_unit_setpoint(&mut self, name: &str, setpoint: f64) -> bool {
        let entry = self.thermostats.iter_mut().find_map(|entry| match entry {
            ThermostatEntry::Valid(config) if config.name == name => Some(config),
            _ => None,
        });
        match entry {
            Some(entry) => {
                entry.setpoint = Some(setpoint);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_record_uses_defaults() {
        let config = Configuration::from_json(b"{}").unwrap();
        assert_eq!(config, Configuration::default());
        assert_eq!(config.timing().sampling_interval, Duration::from_secs(120));
        assert_eq!(config.timing().actuator_jitter, Duration::from_millis(500));
        assert_eq!(config.nonce_window_ms, 2_000);
    }

    #[test]
    fn parses_camel_case_record() {
        let raw = br#"{
            "samplingInterval": 60,
            "sensorWarmUpTime": 2.5,
            "timeoutSeconds": 8,
            "sensorPowerPin": 17,
            "heartbeatPin": 27,
            "port": 8080,
            "hmacEncoding": "hex",
            "thermostats": [
                {"name": "Living room", "sensorPin": 4, "sensorType": 11, "actuatorPin": 22, "setpoint": 20.5},
                {"name": "Hall", "temperatureCorrection": -0.4}
            ]
        }"#;
        let config = Configuration::from_json(raw).unwrap();

        assert_eq!(config.sensor_power_pin, Some(17));
        assert_eq!(config.heartbeat_pin, Some(27));
        assert_eq!(config.hmac_encoding, TagEncoding::Hex);
        assert_eq!(config.timing().sensor_warm_up, Duration::from_millis(2_500));
        let (units, skipped) = config.select_units().unwrap();
        assert!(skipped.is_empty());
        assert_eq!(units[0].sensor_type, Some(SensorType::Dht11));
        assert_eq!(units[0].setpoint_or_default(), 20.5);
        assert_eq!(units[1].setpoint_or_default(), DEFAULT_SETPOINT_C);
        assert_eq!(units[1].temperature_correction, Some(-0.4));
    }

    #[test]
    fn malformed_unit_is_skipped_and_siblings_load() {
        let raw = br#"{"thermostats": [
            {"name": "Living room", "sensorPin": 4, "actuatorPin": 17},
            {"name": "Bad", "sensorType": 12},
            {"name": "Wide", "sensorPin": 300},
            {"name": "Text", "setpoint": "warm"},
            7
        ]}"#;
        let config = Configuration::from_json(raw).unwrap();
        let (units, skipped) = config.select_units().unwrap();

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "Living room");
        let indices: Vec<_> = skipped.iter().map(|skip| skip.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert!(matches!(&skipped[0].reason, SkipReason::Invalid(err) if err.contains("sensor type 12")));
        assert!(skipped[0].to_string().contains("\"Bad\""));
    }

    #[test]
    fn malformed_unit_survives_write_back() {
        let raw = br#"{"thermostats": [{"name": "A"}, {"name": "Bad", "sensorType": 12}]}"#;
        let mut config = Configuration::from_json(raw).unwrap();
        assert!(config.set_unit_setpoint("A", 19.0));
        assert!(!config.set_unit_setpoint("Bad", 19.0));

        let written = serde_json::to_value(&config).unwrap();
        assert_eq!(written["thermostats"][0]["setpoint"], serde_json::json!(19.0));
        assert_eq!(
            written["thermostats"][1],
            serde_json::json!({"name": "Bad", "sensorType": 12})
        );
    }

    #[test]
    fn negative_durations_fall_back_to_defaults() {
        let config =
            Configuration::from_json(br#"{"samplingInterval": -1, "timeoutSeconds": 3}"#).unwrap();
        assert_eq!(config.sampling_interval, DEFAULT_SAMPLING_INTERVAL_S);
        assert_eq!(config.timeout_seconds, 3.0);
    }

    #[test]
    fn delays_respect_lower_bounds() {
        let timing = MeasurementTiming {
            sampling_interval: Duration::from_millis(500),
            sensor_warm_up: Duration::ZERO,
            timeout: Duration::from_secs(5),
            actuator_jitter: Duration::ZERO,
        };
        assert_eq!(timing.power_up_delay(), Duration::from_secs(1));
        assert_eq!(timing.rearm_delay(), Duration::from_secs(2));

        let timing = MeasurementTiming {
            sampling_interval: Duration::from_secs(120),
            sensor_warm_up: Duration::from_secs(4),
            ..timing
        };
        assert_eq!(timing.power_up_delay(), Duration::from_secs(4));
        assert_eq!(timing.rearm_delay(), Duration::from_secs(120));
    }

    #[test]
    fn skips_nameless_and_duplicate_units() {
        let config = Configuration::from_json(
            br#"{"thermostats": [{"name": "A"}, {"sensorPin": 4}, {"name": "A"}, {"name": " B "}]}"#,
        )
        .unwrap();
        let (accepted, skipped) = config.select_units().unwrap();

        let names: Vec<_> = accepted.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(skipped.len(), 2);
        assert_eq!(skipped[0].index, 1);
        assert_eq!(skipped[0].reason, SkipReason::MissingName);
        assert_eq!(skipped[1].reason, SkipReason::DuplicateName);
        assert!(skipped[0].to_string().contains("without name"));
    }

    #[test]
    fn no_valid_units_is_an_error() {
        let config = Configuration::from_json(br#"{"thermostats": [{"name": ""}]}"#).unwrap();
        assert!(matches!(
            config.select_units(),
            Err(ConfigError::NoValidUnits)
        ));
    }

    #[test]
    fn missing_key_is_generated_once() {
        let mut config = Configuration::default();
        let (key, generated) = config.ensure_hmac_key().unwrap();
        assert!(generated);
        assert_eq!(key.len(), 64);

        let (again, generated) = config.ensure_hmac_key().unwrap();
        assert!(!generated);
        assert_eq!(again, key);
    }

    #[test]
    fn public_view_omits_key() {
        let mut config = Configuration::default();
        config.ensure_hmac_key().unwrap();
        let json = serde_json::to_value(config.public_view()).unwrap();
        assert!(json.get("hmacKey").is_none());
        assert!(serde_json::to_value(&config).unwrap().get("hmacKey").is_some());
    }

    #[test]
    fn setpoint_update_targets_named_unit() {
        let mut config =
            Configuration::from_json(br#"{"thermostats": [{"name": "A"}, {"name": "B"}]}"#).unwrap();
        assert!(config.set_unit_setpoint("B", 21.0));
        assert!(!config.set_unit_setpoint("C", 21.0));
        assert_eq!(config.thermostats[0].config().unwrap().setpoint, None);
        assert_eq!(config.thermostats[1].config().unwrap().setpoint, Some(21.0));
    }
}
