use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

/// Runtime configuration, read from the environment (and `.env`).
///
/// Scalars have defaults. The Postgres, Redis and R2 settings are optional
/// and switch the matching backend on when present.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Root for the job snapshot file and locally stored images.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// PostgreSQL connection string. Jobs are kept in a JSON snapshot when unset.
    pub database_url: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Redis connection string for the shared pending set.
    pub redis_url: Option<String>,

    /// R2 bucket name; images go to local disk when unset.
    pub r2_bucket: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,

    /// In-process workers started by the server. Zero disables them.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Worker id prefix; defaults to a random one per process.
    pub worker_id: Option<String>,

    #[serde(default = "default_worker_idle_wait_ms")]
    pub worker_idle_wait_ms: u64,

    /// Age after which a `processing` job is presumed orphaned.
    #[serde(default = "default_reclaim_after_secs")]
    pub reclaim_after_secs: u64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Credentials for the R2 bucket.
#[derive(Debug, Clone)]
pub struct R2Settings {
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Postgres connection pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_db_max_connections(),
            min_connections: default_db_min_connections(),
            acquire_timeout: Duration::from_secs(default_db_acquire_timeout_secs()),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_db_min_connections() -> u32 {
    2
}

fn default_db_acquire_timeout_secs() -> u64 {
    10
}

fn default_worker_count() -> usize {
    2
}

fn default_worker_idle_wait_ms() -> u64 {
    1000
}

fn default_reclaim_after_secs() -> u64 {
    600
}

fn default_reaper_interval_secs() -> u64 {
    30
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// R2 settings, if the bucket is configured. Partial settings are an error.
    pub fn r2(&self) -> Result<Option<R2Settings>, ConfigError> {
        let Some(bucket) = self.r2_bucket.clone() else {
            return Ok(None);
        };

        let require = |value: &Option<String>, name: &'static str| {
            value.clone().ok_or(ConfigError::Missing(name))
        };

        Ok(Some(R2Settings {
            bucket,
            endpoint: require(&self.r2_endpoint, "R2_ENDPOINT")?,
            access_key: require(&self.r2_access_key, "R2_ACCESS_KEY")?,
            secret_key: require(&self.r2_secret_key, "R2_SECRET_KEY")?,
        }))
    }

    /// Pool sizing; at least one connection, and the minimum never above the maximum.
    pub fn pool_settings(&self) -> PoolSettings {
        let max_connections = self.db_max_connections.max(1);
        PoolSettings {
            max_connections,
            min_connections: self.db_min_connections.min(max_connections),
            acquire_timeout: Duration::from_secs(self.db_acquire_timeout_secs),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("jobs.json")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    pub fn worker_idle_wait(&self) -> Duration {
        Duration::from_millis(self.worker_idle_wait_ms)
    }

    pub fn reclaim_after(&self) -> Duration {
        Duration::from_secs(self.reclaim_after_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }

    /// `WORKER_ID`, or a random prefix unique to this process.
    pub fn worker_prefix(&self) -> String {
        match &self.worker_id {
            Some(id) => id.clone(),
            None => format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set when R2_BUCKET is set")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> AppConfig {
        envy::from_iter(
            vars.iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.snapshot_path(), PathBuf::from("data/jobs.json"));
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert!(config.database_url.is_none());
        assert!(config.r2().unwrap().is_none());
        assert!(config.worker_prefix().starts_with("worker-"));
        assert_eq!(config.pool_settings(), PoolSettings::default());
    }

    #[test]
    fn test_pool_settings() {
        let config = config_from(&[
            ("DB_MAX_CONNECTIONS", "5"),
            ("DB_MIN_CONNECTIONS", "1"),
            ("DB_ACQUIRE_TIMEOUT_SECS", "3"),
        ]);
        let pool = config.pool_settings();
        assert_eq!(pool.max_connections, 5);
        assert_eq!(pool.min_connections, 1);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(3));

        let pool = config_from(&[("DB_MAX_CONNECTIONS", "0"), ("DB_MIN_CONNECTIONS", "8")])
            .pool_settings();
        assert_eq!(pool.max_connections, 1);
        assert_eq!(pool.min_connections, 1);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("WORKER_COUNT", "0"),
            ("RECLAIM_AFTER_SECS", "5"),
            ("REDIS_URL", "redis://localhost"),
        ]);
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.worker_count, 0);
        assert_eq!(config.reclaim_after(), Duration::from_secs(5));
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost"));

        let config = config_from(&[("WORKER_ID", "edge")]);
        assert_eq!(config.worker_prefix(), "edge");
    }

    #[test]
    fn test_partial_r2_settings_are_rejected() {
        let config = config_from(&[("R2_BUCKET", "images"), ("R2_ENDPOINT", "https://r2")]);
        assert!(matches!(config.r2(), Err(ConfigError::Missing("R2_ACCESS_KEY"))));
    }
}
