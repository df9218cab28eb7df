//! Controller-wide measurement cycle.
//!
//! All units share one sensor power rail, so readings are taken together:
//! power up, wait for the sensors to warm up, read every active sensor in
//! parallel under one timeout, power down, wait for the next interval.

use std::{sync::Arc, time::Duration};

use thermostat_common::{
    now_ms, CyclePhase, MeasurementCycle, MeasurementTiming, PinLevel, SensorError,
};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info, warn};

use crate::{
    hardware::OutputPin,
    registry::{drive_after_jitter, SharedRegistry},
};

const ARMING_DELAY: Duration = Duration::from_secs(1);

pub struct MeasurementScheduler {
    registry: SharedRegistry,
    power_rail: Option<Arc<dyn OutputPin>>,
    timing: MeasurementTiming,
    wake: Notify,
    phase: watch::Sender<CyclePhase>,
}

impl MeasurementScheduler {
    pub fn new(
        registry: SharedRegistry,
        power_rail: Option<Arc<dyn OutputPin>>,
        timing: MeasurementTiming,
    ) -> Self {
        let (phase, _) = watch::channel(CyclePhase::Idle);
        Self {
            registry,
            power_rail,
            timing,
            wake: Notify::new(),
            phase,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: CyclePhase) {
        debug!("measurement phase {}", phase.as_str());
        self.phase.send_replace(phase);
    }

    /// Adds a unit to the measurement cycle, starting from the next cycle.
    pub async fn activate(&self, name: &str) -> bool {
        let activated = self.registry.lock().await.activate(name);
        if activated {
            self.wake.notify_one();
        }
        activated
    }

    pub async fn activate_all(&self) {
        let mut registry = self.registry.lock().await;
        for name in registry.names() {
            registry.activate(&name);
        }
        drop(registry);
        self.wake.notify_one();
    }

    /// Forces the power rail off and every unit inactive, actuators at `heating_on`.
    ///
    /// Safe in any phase. The phase stays `Deactivated` while an in-flight cycle
    /// winds down; reads still in flight are discarded when they land.
    pub async fn deactivate_all(&self, heating_on: bool) {
        let mut registry = self.registry.lock().await;
        self.write_rail(PinLevel::Low);
        registry.deactivate_all(heating_on);
        self.set_phase(CyclePhase::Deactivated);
        drop(registry);
        info!("all thermostats deactivated (heating {})", if heating_on { "on" } else { "off" });
    }

    /// Drives measurement cycles for as long as the task lives.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.set_phase(CyclePhase::Idle);
            while !self.registry.lock().await.has_active_units() {
                self.wake.notified().await;
            }

            self.set_phase(CyclePhase::Arming);
            tokio::time::sleep(ARMING_DELAY).await;

            while self.registry.lock().await.has_active_units() {
                self.run_cycle().await;
                if !self.registry.lock().await.has_active_units() {
                    break;
                }
                self.set_phase(CyclePhase::Rearming);
                tokio::time::sleep(self.timing.rearm_delay()).await;
            }
        }
    }

    /// One power-up, sample, power-down pass over the units active at sampling time.
    pub async fn run_cycle(&self) {
        let powered = self.power_rail.is_some();
        {
            let registry = self.registry.lock().await;
            if !registry.has_active_units() {
                return;
            }
            if powered {
                self.set_phase(CyclePhase::PoweringUp);
                self.write_rail(PinLevel::High);
            }
        }
        if powered {
            tokio::time::sleep(self.timing.power_up_delay()).await;
        }

        // Units activated once sampling has begun wait for the next cycle.
        let sensors = {
            let registry = self.registry.lock().await;
            if powered && self.phase() == CyclePhase::Deactivated {
                return;
            }
            self.set_phase(CyclePhase::Sampling);
            registry.active_sensors()
        };
        let mut cycle = MeasurementCycle::start(sensors.iter().map(|(name, _)| name.clone()), now_ms());
        let cycle_size = sensors.len();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<String>();

        for (name, sensor) in sensors {
            let registry = self.registry.clone();
            let done = done_tx.clone();
            let jitter = self.timing.actuator_jitter;
            tokio::spawn(async move {
                let outcome = sensor.read().await;
                match &outcome {
                    Ok(reading) => debug!("{name}: {reading:?}"),
                    Err(err) => warn!("{name}: sensor read failed: {err}"),
                }
                let wanted = registry.lock().await.record_reading(&name, outcome, now_ms());
                let _ = done.send(name.clone());
                if wanted.is_some() {
                    drive_after_jitter(registry, name, jitter).await;
                }
            });
        }
        drop(done_tx);

        let collected = tokio::time::timeout(self.timing.timeout, async {
            while !cycle.is_complete() {
                match done_rx.recv().await {
                    Some(name) => {
                        cycle.complete(&name);
                    }
                    None => break,
                }
            }
        })
        .await;

        if collected.is_err() {
            warn!(
                "measurement timed out after {} ms with {} of {} readings missing",
                cycle.elapsed_ms(now_ms()),
                cycle.remaining(),
                cycle_size
            );
            for name in cycle.pending() {
                warn!("{name}: {}", SensorError::Timeout);
            }
        }

        if powered {
            let _registry = self.registry.lock().await;
            if self.phase() == CyclePhase::Deactivated {
                return;
            }
            self.set_phase(CyclePhase::PoweringDown);
            self.write_rail(PinLevel::Low);
        }
    }

    fn write_rail(&self, level: PinLevel) {
        if let Some(rail) = &self.power_rail {
            if let Err(err) = rail.write(level) {
                warn!("failed to switch sensor power rail: {err}");
            }
        }
    }
}
