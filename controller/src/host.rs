use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use thermostat_common::{
    config::{DEFAULT_SAMPLING_INTERVAL_S, DEFAULT_SENSOR_WARM_UP_S, DEFAULT_TIMEOUT_S},
    envelope::HMAC_KEY_LEN,
    Authenticator, Configuration, ThermostatUnit,
};
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use crate::{
    hardware::{simulated_bindings, spawn_heartbeat, LoggedPin, OutputPin},
    registry::UnitRegistry,
    scheduler::MeasurementScheduler,
    server::{self, AppState},
    store::{ConfigStore, CONFIG_PATH_ENV},
};

#[derive(Debug, Parser)]
#[command(name = "thermostat-controller", version, about = "Multi-zone thermostat controller")]
struct Args {
    /// Configuration file. Defaults to /etc/thermostat-pi-dht/config.json.
    #[arg(env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,
}

pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("thermostat-controller v{}", env!("CARGO_PKG_VERSION"));

    let store = ConfigStore::resolve(args.config);
    info!("using configuration {}", store.path().display());

    let mut config = store.load().await?;
    log_settings(&config);

    let (key, generated) = config.ensure_hmac_key()?;
    if generated {
        info!("no hmac key configured, generated a new {HMAC_KEY_LEN}-byte key");
        store
            .save(&config)
            .await
            .context("failed to store generated hmac key")?;
    } else if key.len() < HMAC_KEY_LEN {
        warn!(
            "hmac key is only {} bytes long, {HMAC_KEY_LEN} are recommended",
            key.len()
        );
    }

    let (entries, skipped) = config.select_units()?;
    for skipped in &skipped {
        warn!("{skipped}");
    }
    let units = entries
        .iter()
        .map(|entry| {
            let unit = ThermostatUnit::new(entry);
            info!(
                "thermostat {}: sensor {:?} ({}), actuator {:?}, setpoint {}",
                unit.name(),
                unit.sensor_pin(),
                u8::from(unit.sensor_type()),
                unit.actuator_pin(),
                unit.setpoint()
            );
            let bindings = simulated_bindings(&unit);
            (unit, bindings)
        })
        .collect::<Vec<_>>();

    let timing = config.timing();
    let auth = Authenticator::from_config(key, &config);
    let power_rail = config
        .sensor_power_pin
        .map(|pin| Arc::new(LoggedPin::new(pin, "sensor power")) as Arc<dyn OutputPin>);
    let registry = UnitRegistry::new(config.clone(), units).shared();

    let scheduler = Arc::new(MeasurementScheduler::new(
        registry.clone(),
        power_rail,
        timing,
    ));
    let scheduler_task = tokio::spawn(scheduler.clone().run());
    scheduler.activate_all().await;

    let (stop_heartbeat, heartbeat_stopped) = watch::channel(false);
    let heartbeat_task = config.heartbeat_pin.map(|pin| {
        spawn_heartbeat(
            Arc::new(LoggedPin::new(pin, "heartbeat")),
            heartbeat_stopped,
        )
    });

    let app = server::router(AppState::new(
        registry,
        auth,
        store,
        timing.actuator_jitter,
    ));

    let host = std::env::var("THERMOSTAT_HTTP_HOST").unwrap_or(config.host.clone());
    let port = std::env::var("THERMOSTAT_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.port);
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind controller server at {host}:{port}"))?;

    info!("controller listening on http://{host}:{port}");
    let shutdown_scheduler = scheduler.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let signal = wait_for_signal().await;
            info!("received {signal}, shutting down");
            shutdown_scheduler.deactivate_all(false).await;
        })
        .await?;

    stop_heartbeat.send_replace(true);
    if let Some(task) = heartbeat_task {
        let _ = task.await;
    }
    scheduler_task.abort();
    info!("controller stopped");
    Ok(())
}

fn log_settings(config: &Configuration) {
    fn origin(value: f64, default: f64) -> &'static str {
        if value == default {
            "default"
        } else {
            "custom"
        }
    }

    info!(
        "{} sampling interval {}s",
        origin(config.sampling_interval, DEFAULT_SAMPLING_INTERVAL_S),
        config.sampling_interval
    );
    info!(
        "{} sensor warm-up time {}s",
        origin(config.sensor_warm_up_time, DEFAULT_SENSOR_WARM_UP_S),
        config.sensor_warm_up_time
    );
    info!(
        "{} sensor timeout {}s",
        origin(config.timeout_seconds, DEFAULT_TIMEOUT_S),
        config.timeout_seconds
    );
    match config.sensor_power_pin {
        Some(pin) => info!("sensor power rail on gpio {pin}"),
        None => info!("no sensor power rail configured"),
    }
    if let Some(pin) = config.heartbeat_pin {
        info!("heartbeat on gpio {pin}");
    }
    info!(
        "hmac tags {:?}, nonce window {} ms, actuator jitter {} ms",
        config.hmac_encoding, config.nonce_window_ms, config.actuator_jitter_ms
    );
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut interrupt), Ok(mut terminate), Ok(mut quit), Ok(mut hangup)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
        signal(SignalKind::hangup()),
    ) else {
        warn!("failed to install signal handlers, falling back to ctrl-c");
        let _ = tokio::signal::ctrl_c().await;
        return "ctrl-c";
    };

    tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
        _ = hangup.recv() => "SIGHUP",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn config_path_is_positional() {
        let args = Args::try_parse_from(["thermostat-controller", "/tmp/zones.json"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/zones.json")));
    }

    #[test]
    fn help_and_version_are_not_paths() {
        let err = Args::try_parse_from(["thermostat-controller", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);

        let err = Args::try_parse_from(["thermostat-controller", "--version"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn extra_arguments_are_rejected() {
        assert!(Args::try_parse_from(["thermostat-controller", "a.json", "b.json"]).is_err());
    }
}
