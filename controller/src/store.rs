use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use thermostat_common::Configuration;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/thermostat-pi-dht/config.json";
pub const CONFIG_PATH_ENV: &str = "THERMOSTAT_CONFIG";

/// The JSON configuration file, shared by startup and the setpoint handlers.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// The given path, or the system default when none or an empty one is given.
    pub fn resolve(path: Option<PathBuf>) -> Self {
        let path = path
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        self.path.as_ref()
    }

    pub async fn load(&self) -> anyhow::Result<Configuration> {
        let _guard = self.lock.lock().await;
        let raw = tokio::fs::read(self.path())
            .await
            .with_context(|| format!("failed to read configuration {}", self.path().display()))?;
        Configuration::from_json(&raw)
            .with_context(|| format!("invalid configuration {}", self.path().display()))
    }

    pub async fn save(&self, config: &Configuration) -> anyhow::Result<()> {
        self.writer().await.write(config).await
    }

    /// Exclusive access to the file until the returned writer is used or dropped.
    ///
    /// Writers are handed out in the order they were requested, so a caller that
    /// takes one while still holding the state it snapshots keeps file order equal
    /// to snapshot order.
    pub async fn writer(&self) -> ConfigWriter {
        ConfigWriter {
            path: self.path.clone(),
            _guard: self.lock.clone().lock_owned().await,
        }
    }
}

pub struct ConfigWriter {
    path: Arc<PathBuf>,
    _guard: OwnedMutexGuard<()>,
}

impl ConfigWriter {
    /// Replaces the file atomically so a crash never leaves a truncated record behind.
    pub async fn write(self, config: &Configuration) -> anyhow::Result<()> {
        let path = self.path.as_path();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(config)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, payload)
            .await
            .with_context(|| format!("failed to write {}", staging.display()))?;
        tokio::fs::rename(&staging, path)
            .await
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use thermostat_common::ThermostatConfig;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("thermostat-store-{}-{name}", std::process::id()))
            .join("config.json")
    }

    #[test]
    fn resolve_falls_back_to_system_path() {
        let store = ConfigStore::resolve(Some("/tmp/a.json".into()));
        assert_eq!(store.path(), Path::new("/tmp/a.json"));

        let store = ConfigStore::resolve(Some(PathBuf::new()));
        assert_eq!(store.path(), Path::new(DEFAULT_CONFIG_PATH));

        let store = ConfigStore::resolve(None);
        assert_eq!(store.path(), Path::new(DEFAULT_CONFIG_PATH));
    }

    #[tokio::test]
    async fn save_then_load_keeps_record() {
        let path = scratch_path("roundtrip");
        let store = ConfigStore::new(&path);
        let config = Configuration {
            port: 8123,
            hmac_key: Some("c2VjcmV0".into()),
            thermostats: vec![ThermostatConfig {
                name: "Hall".into(),
                setpoint: Some(19.5),
                ..ThermostatConfig::default()
            }
            .into()],
            ..Configuration::default()
        };

        store.save(&config).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, config);
        assert!(!path.with_extension("json.tmp").exists());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn writes_land_in_writer_order() {
        let path = scratch_path("ordering");
        let store = ConfigStore::new(&path);
        let older = Configuration {
            port: 8001,
            ..Configuration::default()
        };
        let newer = Configuration {
            port: 8002,
            ..Configuration::default()
        };

        let first = store.writer().await;
        let second = tokio::spawn({
            let store = store.clone();
            let newer = newer.clone();
            async move { store.writer().await.write(&newer).await }
        });
        tokio::task::yield_now().await;
        first.write(&older).await.unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(store.load().await.unwrap().port, 8002);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let store = ConfigStore::new(scratch_path("missing"));
        let err = store.load().await.unwrap_err();
        assert!(format!("{err:#}").contains("failed to read configuration"));
    }
}
