use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use shuttle_core::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            url: "sqlite://shuttle.db".to_string(),
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub count: usize,
    pub sleep_ms: u64,
    pub jitter_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 4,
            sleep_ms: 100,
            jitter_ms: 20,
        }
    }
}

impl WorkersConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .worker_sleep(Duration::from_millis(self.sleep_ms))
            .worker_jitter(Duration::from_millis(self.jitter_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    pub jobs: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { jobs: 20 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub workers: WorkersConfig,
    pub telemetry: TelemetryConfig,
    pub demo: DemoConfig,
}

fn base() -> Figment {
    Figment::from(Serialized::defaults(AppConfig::default()))
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: SHUTTLE_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = base();

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("SHUTTLE_").split("__"));

    Ok(figment.extract()?)
}
