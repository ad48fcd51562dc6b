use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use climate_common::RuntimeConfig;

/// Room id → start of the current away period.
pub type AwayState = BTreeMap<String, DateTime<Utc>>;

#[derive(Clone)]
pub struct AppStore {
    runtime_path: Arc<PathBuf>,
    away_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl AppStore {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("CLIMATE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.climate"));
        Self::new(data_dir)
    }

    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            away_path: Arc::new(data_dir.join("away.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        read_or_default(&self.runtime_path).await
    }

    pub async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(&self.runtime_path, runtime).await
    }

    pub async fn load_away_state(&self) -> anyhow::Result<AwayState> {
        let _guard = self.lock.lock().await;
        read_or_default(&self.away_path).await
    }

    pub async fn save_away_state(&self, away: &AwayState) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(&self.away_path, away).await
    }
}

async fn read_or_default<T: DeserializeOwned + Default>(path: &Path) -> anyhow::Result<T> {
    match tokio::fs::read(path).await {
        Ok(raw) => serde_json::from_slice::<T>(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, payload)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_store(name: &str) -> (AppStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "climate-store-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        (AppStore::new(dir.clone()), dir)
    }

    #[tokio::test]
    async fn missing_files_load_defaults() {
        let (store, dir) = temp_store("defaults");

        let runtime = store.load_runtime_config().await.unwrap();
        let away = store.load_away_state().await.unwrap();

        assert_eq!(runtime.timezone, "Europe/London");
        assert!(runtime.rooms.is_empty());
        assert!(away.is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn away_state_survives_reload() {
        let (store, dir) = temp_store("away");
        let since = Utc.with_ymd_and_hms(2026, 1, 9, 8, 0, 0).unwrap();
        let mut away = AwayState::new();
        away.insert("bedroom".into(), since);

        store.save_away_state(&away).await.unwrap();
        let restored = store.load_away_state().await.unwrap();

        assert_eq!(restored.get("bedroom"), Some(&since));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn partial_runtime_config_fills_defaults() {
        let (store, dir) = temp_store("partial");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("runtime.json"),
            r#"{"timezone": "Europe/Dublin", "weather": {"api_key": "abc"}}"#,
        )
        .unwrap();

        let runtime = store.load_runtime_config().await.unwrap();

        assert_eq!(runtime.timezone, "Europe/Dublin");
        assert_eq!(runtime.weather.api_key, "abc");
        assert_eq!(runtime.weather.refresh_secs, 900);
        assert_eq!(runtime.cycle_interval_secs, 600);
        let _ = std::fs::remove_dir_all(dir);
    }
}
