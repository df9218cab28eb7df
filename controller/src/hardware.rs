//! GPIO and sensor capabilities.
//!
//! The scheduler and the unit registry only see [`Sensor`] and [`OutputPin`].
//! The host build binds them to [`SimulatedDht`] and [`LoggedPin`]; a board
//! build plugs real drivers in behind the same traits.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use thermostat_common::{PinLevel, Reading, SensorError, SensorType, ThermostatUnit};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

pub type SensorFuture = Pin<Box<dyn Future<Output = Result<Reading, SensorError>> + Send>>;

/// A temperature/humidity sensor. Each call starts one independent measurement.
pub trait Sensor: Send + Sync {
    fn read(&self) -> SensorFuture;
}

#[derive(Debug, Error)]
#[error("failed to drive gpio {pin}: {reason}")]
pub struct HardwareError {
    pub pin: u8,
    pub reason: String,
}

/// A digital output: actuator relay, sensor power rail or indicator LED.
pub trait OutputPin: Send + Sync {
    fn pin(&self) -> u8;
    fn write(&self, level: PinLevel) -> Result<(), HardwareError>;
}

/// Hardware attached to one thermostat unit. Each actuator belongs to exactly one unit.
#[derive(Clone, Default)]
pub struct UnitBindings {
    pub sensor: Option<Arc<dyn Sensor>>,
    pub actuator: Option<Arc<dyn OutputPin>>,
}

/// Output pin that records and logs every level written to it.
#[derive(Debug)]
pub struct LoggedPin {
    pin: u8,
    label: String,
    writes: Mutex<Vec<PinLevel>>,
}

impl LoggedPin {
    pub fn new(pin: u8, label: impl Into<String>) -> Self {
        Self {
            pin,
            label: label.into(),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn level(&self) -> Option<PinLevel> {
        self.writes().last().copied()
    }

    pub fn writes(&self) -> Vec<PinLevel> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OutputPin for LoggedPin {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn write(&self, level: PinLevel) -> Result<(), HardwareError> {
        debug!(pin = self.pin, label = %self.label, "gpio write {}", level.as_str());
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(level);
        Ok(())
    }
}

/// Host stand-in for a DHT sensor: a slowly drifting, repeating indoor climate.
#[derive(Debug)]
pub struct SimulatedDht {
    pin: u8,
    sensor_type: SensorType,
    base_temperature: f64,
    latency: Duration,
    tick: AtomicU64,
}

impl SimulatedDht {
    pub fn new(pin: u8, sensor_type: SensorType) -> Self {
        Self {
            pin,
            sensor_type,
            base_temperature: 19.0 + f64::from(pin % 4) * 0.5,
            latency: Duration::from_millis(25),
            tick: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn sample(&self, tick: u64) -> Reading {
        // DHT11 reports whole degrees.
        let temperature = self.base_temperature + (tick % 8) as f64 * 0.2;
        let temperature = match self.sensor_type {
            SensorType::Dht11 => temperature.round(),
            SensorType::Dht22 => temperature,
        };
        Reading {
            temperature,
            humidity: 42.0 + (tick % 6) as f64 * 0.5,
        }
    }
}

impl Sensor for SimulatedDht {
    fn read(&self) -> SensorFuture {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        let reading = self.sample(tick);
        let latency = self.latency;
        let pin = self.pin;
        Box::pin(async move {
            tokio::time::sleep(latency).await;
            debug!(pin, "simulated dht reading {reading:?}");
            Ok(reading)
        })
    }
}

/// Bindings for the host build: simulated sensors, logged actuator pins.
pub fn simulated_bindings(unit: &ThermostatUnit) -> UnitBindings {
    UnitBindings {
        sensor: unit.sensor_pin().map(|pin| {
            Arc::new(SimulatedDht::new(pin, unit.sensor_type())) as Arc<dyn Sensor>
        }),
        actuator: unit.actuator_pin().map(|pin| {
            Arc::new(LoggedPin::new(pin, format!("actuator {}", unit.name()))) as Arc<dyn OutputPin>
        }),
    }
}

const HEARTBEAT_PATTERN_MS: [(PinLevel, u64); 4] = [
    (PinLevel::High, 100),
    (PinLevel::Low, 100),
    (PinLevel::High, 100),
    (PinLevel::Low, 700),
];

/// Blinks `pin` in a double-pulse heartbeat until `shutdown` turns true, then drives it low.
pub fn spawn_heartbeat(pin: Arc<dyn OutputPin>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        'outer: loop {
            for (level, hold_ms) in HEARTBEAT_PATTERN_MS {
                if let Err(err) = pin.write(level) {
                    warn!("heartbeat write failed: {err}");
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(hold_ms)) => {}
                    _ = shutdown.wait_for(|stop| *stop) => break 'outer,
                }
            }
        }

        if let Err(err) = pin.write(PinLevel::Low) {
            warn!("heartbeat shutdown write failed: {err}");
        }
    })
}
