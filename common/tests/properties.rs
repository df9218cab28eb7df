use proptest::prelude::*;
use serde_json::json;
use thermostat_common::{
    envelope::DEFAULT_NONCE_WINDOW_MS, thermostat::round_temperature, AuthenticatedEnvelope,
    HmacKey, PinLevel, Reading, SensorError, ThermostatConfig, ThermostatUnit,
};

fn unit(setpoint: f64, actuator: bool) -> ThermostatUnit {
    ThermostatUnit::new(&ThermostatConfig {
        name: "zone".into(),
        sensor_pin: Some(4),
        actuator_pin: actuator.then_some(18),
        setpoint: Some(setpoint),
        ..ThermostatConfig::default()
    })
}

proptest! {
    #[test]
    fn heating_follows_temperature_below_setpoint(
        temperature in -20.0f64..45.0,
        setpoint in 5.0f64..30.0,
        actuator in any::<bool>(),
    ) {
        let mut unit = unit(setpoint, actuator);
        let level = unit.record_reading(Ok(Reading { temperature, humidity: 50.0 }), 0);

        let expected = actuator && round_temperature(temperature) < setpoint;
        prop_assert_eq!(unit.heating_is_on(), expected);
        prop_assert_eq!(level, actuator.then(|| PinLevel::from(expected)));
    }

    #[test]
    fn failed_read_never_heats(setpoint in 5.0f64..30.0, previous in -20.0f64..45.0) {
        let mut unit = unit(setpoint, true);
        unit.record_reading(Ok(Reading { temperature: previous, humidity: 50.0 }), 0);
        unit.record_reading(Err(SensorError::BadChecksum), 1);
        prop_assert!(!unit.heating_is_on());
    }

    #[test]
    fn envelope_only_validates_under_its_own_key(
        key in prop::collection::vec(any::<u8>(), 1..96),
        other in prop::collection::vec(any::<u8>(), 1..96),
        name in "[a-zA-Z ]{1,16}",
        setpoint in -50.0f64..50.0,
        nonce in any::<u64>(),
    ) {
        let key = HmacKey::from_bytes(key).unwrap();
        let payload = json!({"name": name, "setpoint": setpoint});
        let envelope = AuthenticatedEnvelope::produce(&key, &payload, Some(nonce.to_string())).unwrap();
        prop_assert!(envelope.validate(&key));

        let other = HmacKey::from_bytes(other).unwrap();
        prop_assume!(other != key);
        prop_assert!(!envelope.validate(&other));
    }

    #[test]
    fn freshness_bound_is_two_seconds(now in 1_000_000i64..2_000_000_000_000, offset in -10_000i64..10_000) {
        let key = HmacKey::from_bytes(vec![1; 64]).unwrap();
        let envelope =
            AuthenticatedEnvelope::produce(&key, &json!({}), Some((now + offset).to_string())).unwrap();
        let fresh = envelope.check_freshness(now, DEFAULT_NONCE_WINDOW_MS).is_ok();
        prop_assert_eq!(fresh, offset.unsigned_abs() <= DEFAULT_NONCE_WINDOW_MS);
    }
}
