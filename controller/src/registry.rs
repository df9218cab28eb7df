use std::{sync::Arc, time::Duration};

use rand::Rng;
use thermostat_common::{
    Configuration, PinLevel, Reading, SensorError, ThermostatData, ThermostatUnit,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::hardware::{Sensor, UnitBindings};

pub type SharedRegistry = Arc<Mutex<UnitRegistry>>;

struct UnitSlot {
    unit: ThermostatUnit,
    bindings: UnitBindings,
    active: bool,
}

/// All thermostat units of one controller, their hardware, and the persisted record.
///
/// Shared between the scheduler, the HTTP handlers and the shutdown path behind
/// a single async mutex.
pub struct UnitRegistry {
    slots: Vec<UnitSlot>,
    config: Configuration,
}

impl UnitRegistry {
    /// Units with an actuator but no sensor can never heat; their relay is released here.
    pub fn new(config: Configuration, units: Vec<(ThermostatUnit, UnitBindings)>) -> Self {
        let slots = units
            .into_iter()
            .map(|(unit, bindings)| UnitSlot {
                unit,
                bindings,
                active: false,
            })
            .collect::<Vec<_>>();

        for slot in &slots {
            if !slot.unit.has_sensor() {
                if let Some(actuator) = &slot.bindings.actuator {
                    if let Err(err) = actuator.write(PinLevel::Low) {
                        warn!("failed to release actuator of {}: {err}", slot.unit.name());
                    }
                }
            }
        }

        Self { slots, config }
    }

    pub fn shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    fn slot(&self, name: &str) -> Option<&UnitSlot> {
        self.slots.iter().find(|slot| slot.unit.name() == name)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut UnitSlot> {
        self.slots.iter_mut().find(|slot| slot.unit.name() == name)
    }

    pub fn unit(&self, name: &str) -> Option<&ThermostatUnit> {
        self.slot(name).map(|slot| &slot.unit)
    }

    pub fn names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|slot| slot.unit.name().to_string())
            .collect()
    }

    pub fn has_active_units(&self) -> bool {
        self.slots.iter().any(|slot| slot.active)
    }

    /// Returns `false` for unknown or already active units.
    pub fn activate(&mut self, name: &str) -> bool {
        match self.slot_mut(name) {
            Some(slot) if !slot.active => {
                slot.active = true;
                info!("activated thermostat {name}");
                true
            }
            _ => false,
        }
    }

    /// Removes the unit from measurement and drives its actuator to `heating_on`.
    pub fn deactivate(&mut self, name: &str, heating_on: bool) -> bool {
        let Some(slot) = self.slot_mut(name) else {
            return false;
        };
        let was_active = std::mem::replace(&mut slot.active, false);
        if let Some(actuator) = &slot.bindings.actuator {
            if let Err(err) = actuator.write(PinLevel::from(heating_on)) {
                warn!("failed to drive actuator of {name}: {err}");
            }
        }
        if was_active {
            info!("deactivated thermostat {name}");
        }
        was_active
    }

    pub fn deactivate_all(&mut self, heating_on: bool) {
        for name in self.names() {
            self.deactivate(&name, heating_on);
        }
    }

    /// Active units that have a sensor, in configuration order.
    pub fn active_sensors(&self) -> Vec<(String, Arc<dyn Sensor>)> {
        self.slots
            .iter()
            .filter(|slot| slot.active)
            .filter_map(|slot| {
                slot.bindings
                    .sensor
                    .clone()
                    .map(|sensor| (slot.unit.name().to_string(), sensor))
            })
            .collect()
    }

    /// Applies a read outcome to an active unit. Returns the actuator level it now wants.
    pub fn record_reading(
        &mut self,
        name: &str,
        outcome: Result<Reading, SensorError>,
        now_ms: i64,
    ) -> Option<PinLevel> {
        let slot = self.slot_mut(name).filter(|slot| slot.active)?;
        slot.unit.record_reading(outcome, now_ms)
    }

    /// Updates the unit and the persisted record. `None` if no unit has that name.
    pub fn set_setpoint(&mut self, name: &str, setpoint: f64) -> Option<Option<PinLevel>> {
        let level = self.slot_mut(name)?.unit.set_setpoint(setpoint);
        self.config.set_unit_setpoint(name, setpoint);
        Some(level)
    }

    /// Writes the unit's current decision to its actuator, if the unit is still active.
    pub fn sync_actuator(&self, name: &str) {
        let Some(slot) = self.slot(name).filter(|slot| slot.active) else {
            return;
        };
        let (Some(actuator), Some(level)) = (&slot.bindings.actuator, slot.unit.actuator_level())
        else {
            return;
        };
        if let Err(err) = actuator.write(level) {
            warn!("failed to drive actuator of {name}: {err}");
        }
    }

    pub fn data(&self) -> Vec<ThermostatData> {
        self.slots.iter().map(|slot| slot.unit.data()).collect()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }
}

/// Waits a random delay below `jitter`, then writes the unit's current decision.
///
/// The level is read after the delay so concurrent decisions cannot be applied out of order.
pub async fn drive_after_jitter(registry: SharedRegistry, name: String, jitter: Duration) {
    let max_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
    if max_ms > 0 {
        let delay = rand::thread_rng().gen_range(0..max_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    registry.lock().await.sync_actuator(&name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{LoggedPin, OutputPin, SimulatedDht};
    use pretty_assertions::assert_eq;
    use thermostat_common::{ThermostatConfig, ThermostatEntry};

    fn unit_with_pin(
        name: &str,
        setpoint: f64,
        sensor: bool,
    ) -> ((ThermostatUnit, UnitBindings), Arc<LoggedPin>) {
        let unit = ThermostatUnit::new(&ThermostatConfig {
            name: name.into(),
            sensor_pin: sensor.then_some(4),
            actuator_pin: Some(17),
            setpoint: Some(setpoint),
            ..ThermostatConfig::default()
        });
        let pin = Arc::new(LoggedPin::new(17, name));
        let bindings = UnitBindings {
            sensor: sensor
                .then(|| Arc::new(SimulatedDht::new(4, unit.sensor_type())) as Arc<dyn Sensor>),
            actuator: Some(pin.clone() as Arc<dyn OutputPin>),
        };
        ((unit, bindings), pin)
    }

    fn config(names: &[&str]) -> Configuration {
        Configuration {
            thermostats: names
                .iter()
                .map(|name| ThermostatConfig {
                    name: name.to_string(),
                    ..ThermostatConfig::default()
                })
                .map(ThermostatEntry::from)
                .collect(),
            ..Configuration::default()
        }
    }

    fn warm(temperature: f64) -> Result<Reading, SensorError> {
        Ok(Reading {
            temperature,
            humidity: 50.0,
        })
    }

    #[test]
    fn sensorless_actuator_is_released_at_startup() {
        let (garage, pin) = unit_with_pin("Garage", 20.0, false);
        let registry = UnitRegistry::new(config(&["Garage"]), vec![garage]);

        assert_eq!(pin.writes(), vec![PinLevel::Low]);
        assert!(registry.active_sensors().is_empty());
    }

    #[test]
    fn inactive_units_ignore_readings() {
        let (hall, _) = unit_with_pin("Hall", 20.0, true);
        let mut registry = UnitRegistry::new(config(&["Hall"]), vec![hall]);

        assert_eq!(registry.record_reading("Hall", warm(18.0), 1), None);
        assert_eq!(registry.unit("Hall").unwrap().temperature(), None);

        assert!(registry.activate("Hall"));
        assert!(!registry.activate("Hall"));
        assert_eq!(
            registry.record_reading("Hall", warm(18.0), 2),
            Some(PinLevel::High)
        );
        assert_eq!(registry.active_sensors().len(), 1);
    }

    #[test]
    fn setpoint_updates_unit_and_record() {
        let (hall, _) = unit_with_pin("Hall", 20.0, true);
        let mut registry = UnitRegistry::new(config(&["Hall"]), vec![hall]);
        registry.activate("Hall");
        registry.record_reading("Hall", warm(19.0), 1);

        assert_eq!(registry.set_setpoint("Hall", 18.5), Some(Some(PinLevel::Low)));
        assert_eq!(registry.set_setpoint("Cellar", 18.5), None);
        assert_eq!(
            registry.configuration().thermostats[0].config().unwrap().setpoint,
            Some(18.5)
        );
        assert_eq!(registry.data()[0].setpoint, 18.5);
        assert_eq!(registry.data()[0].heating_is_on, Some(false));
    }

    #[test]
    fn deactivate_all_drives_requested_level() {
        let (hall, hall_pin) = unit_with_pin("Hall", 25.0, true);
        let (bath, bath_pin) = unit_with_pin("Bath", 25.0, true);
        let mut registry = UnitRegistry::new(config(&["Hall", "Bath"]), vec![hall, bath]);
        registry.activate("Hall");
        registry.activate("Bath");

        registry.deactivate_all(false);
        assert!(!registry.has_active_units());
        assert_eq!(hall_pin.level(), Some(PinLevel::Low));
        assert_eq!(bath_pin.level(), Some(PinLevel::Low));

        registry.deactivate("Bath", true);
        assert_eq!(bath_pin.level(), Some(PinLevel::High));
    }

    #[test]
    fn sync_skips_inactive_units() {
        let (hall, pin) = unit_with_pin("Hall", 25.0, true);
        let mut registry = UnitRegistry::new(config(&["Hall"]), vec![hall]);
        registry.activate("Hall");
        registry.record_reading("Hall", warm(18.0), 1);

        registry.sync_actuator("Hall");
        assert_eq!(pin.writes(), vec![PinLevel::High]);

        registry.deactivate("Hall", false);
        registry.sync_actuator("Hall");
        assert_eq!(pin.writes(), vec![PinLevel::High, PinLevel::Low]);
    }

    #[tokio::test(start_paused = true)]
    async fn jittered_write_lands_within_window() {
        let (hall, pin) = unit_with_pin("Hall", 25.0, true);
        let mut registry = UnitRegistry::new(config(&["Hall"]), vec![hall]);
        registry.activate("Hall");
        registry.record_reading("Hall", warm(18.0), 1);
        let registry = registry.shared();

        let started = tokio::time::Instant::now();
        drive_after_jitter(registry, "Hall".into(), Duration::from_millis(500)).await;

        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(pin.level(), Some(PinLevel::High));
    }
}
