//! Environment-driven configuration, mirroring the original Python
//! service's `pydantic_settings.BaseSettings` with an optional
//! `.env` file and `extra = "ignore"` semantics: unknown environment
//! variables are ignored, and every field with a default falls back to
//! it when unset.

use crate::error::{Result, SyncError};
use serde::Deserialize;

/// Which backend the engine's watermark store uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkBackend {
    Kv,
    File,
}

impl Default for WatermarkBackend {
    fn default() -> Self {
        WatermarkBackend::Kv
    }
}

/// All configuration recognized by the engine (§6). Loaded once at
/// startup from process environment variables and an optional `.env`
/// file; unrecognized variables are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub postgres_host: String,
    pub postgres_port: u16,
    pub postgres_user: String,
    pub postgres_password: String,
    pub postgres_db: String,

    pub elasticsearch_host: String,
    pub elasticsearch_port: u16,

    pub redis_host: String,
    pub redis_port: u16,

    #[serde(default = "default_filmwork_index")]
    pub filmwork_index_name: String,
    #[serde(default = "default_genres_index")]
    pub genres_index_name: String,
    #[serde(default = "default_persons_index")]
    pub persons_index_name: String,

    #[serde(default = "default_state_file_path")]
    pub state_file_path: String,
    #[serde(default = "default_sync_time")]
    pub default_sync_time: String,
    #[serde(default = "default_sleep_time")]
    pub default_sleep_time: u64,
    #[serde(default)]
    pub watermark_backend: WatermarkBackend,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

fn default_filmwork_index() -> String {
    "movies".to_string()
}
fn default_genres_index() -> String {
    "genres".to_string()
}
fn default_persons_index() -> String {
    "persons".to_string()
}
fn default_state_file_path() -> String {
    "sync_state.json".to_string()
}
fn default_sync_time() -> String {
    "1970-01-01T00:00:00+00:00".to_string()
}
fn default_sleep_time() -> u64 {
    5
}
fn default_batch_size() -> u32 {
    100
}

impl Settings {
    /// Loads settings from the process environment, first folding in an
    /// optional `.env` file in the current directory (ignored if
    /// absent — same relaxed behavior as the original's `env_file`).
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        cfg.try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn es_base_url(&self) -> String {
        format!("http://{}:{}", self.elasticsearch_host, self.elasticsearch_port)
    }

    pub fn postgres_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.postgres_host,
            self.postgres_port,
            self.postgres_user,
            self.postgres_password,
            self.postgres_db
        )
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}", self.redis_host, self.redis_port)
    }
}
