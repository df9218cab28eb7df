use crate::{
    config::{SensorType, ThermostatConfig},
    error::SensorError,
    types::{PinLevel, Reading, ThermostatData},
};

/// One zone: a sensor and an actuator compared against a setpoint.
///
/// The unit is pure state. It never touches hardware itself; every mutation
/// that can change the heating decision returns the level the actuator should
/// be driven to (`None` if the unit has no actuator), and the caller performs
/// the write.
///
/// `heating_is_on` is only ever assigned by [`ThermostatUnit::decide`], from the
/// last temperature and the current setpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatUnit {
    name: String,
    setpoint: f64,
    sensor_pin: Option<u8>,
    sensor_type: SensorType,
    actuator_pin: Option<u8>,
    temperature_correction: f64,

    timestamp_ms: Option<i64>,
    temperature: Option<f64>,
    humidity: Option<f64>,
    heating_is_on: bool,
}

impl ThermostatUnit {
    pub fn new(config: &ThermostatConfig) -> Self {
        Self {
            name: config.name.clone(),
            setpoint: config.setpoint_or_default(),
            sensor_pin: config.sensor_pin,
            sensor_type: config.sensor_type.unwrap_or_default(),
            actuator_pin: config.actuator_pin,
            temperature_correction: config.temperature_correction.unwrap_or(0.0),
            timestamp_ms: None,
            temperature: None,
            humidity: None,
            heating_is_on: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn sensor_pin(&self) -> Option<u8> {
        self.sensor_pin
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    pub fn actuator_pin(&self) -> Option<u8> {
        self.actuator_pin
    }

    pub fn has_sensor(&self) -> bool {
        self.sensor_pin.is_some()
    }

    pub fn has_actuator(&self) -> bool {
        self.actuator_pin.is_some()
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn humidity(&self) -> Option<f64> {
        self.humidity
    }

    pub fn heating_is_on(&self) -> bool {
        self.heating_is_on
    }

    /// The level the actuator should currently hold, if the unit has one.
    pub fn actuator_level(&self) -> Option<PinLevel> {
        self.has_actuator()
            .then(|| PinLevel::from(self.heating_is_on))
    }

    /// Stores the outcome of a sensor read and re-evaluates the heating decision.
    ///
    /// A failed read clears temperature and humidity so heating falls back to off.
    /// Units without a sensor ignore reads entirely.
    pub fn record_reading(
        &mut self,
        outcome: Result<Reading, SensorError>,
        now_ms: i64,
    ) -> Option<PinLevel> {
        if !self.has_sensor() {
            return None;
        }

        self.timestamp_ms = Some(now_ms);
        match outcome {
            Ok(reading) => {
                self.temperature = Some(round_temperature(
                    reading.temperature + self.temperature_correction,
                ));
                self.humidity = Some(round_humidity(reading.humidity));
            }
            Err(_) => {
                self.temperature = None;
                self.humidity = None;
            }
        }
        self.decide()
    }

    /// Changes the setpoint and immediately re-evaluates against the last reading.
    pub fn set_setpoint(&mut self, setpoint: f64) -> Option<PinLevel> {
        self.setpoint = setpoint;
        self.decide()
    }

    /// Heating is on iff there is an actuator and the last temperature is strictly below the setpoint.
    pub fn decide(&mut self) -> Option<PinLevel> {
        self.heating_is_on = self.has_actuator()
            && self
                .temperature
                .is_some_and(|temperature| temperature < self.setpoint);
        self.actuator_level()
    }

    pub fn data(&self) -> ThermostatData {
        ThermostatData {
            name: self.name.clone(),
            setpoint: self.setpoint,
            timestamp: self.timestamp_ms,
            temperature: self.temperature,
            humidity: self.humidity,
            heating_is_on: Some(self.heating_is_on),
        }
    }
}

/// Nearest 0.1 °C.
pub fn round_temperature(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Nearest whole percent.
pub fn round_humidity(value: f64) -> f64 {
    value.round()
}
