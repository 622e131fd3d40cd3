use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level service configuration, loaded from a TOML file.
///
/// Every section and field has a default so a missing file yields a runnable
/// development configuration (in-memory store backend, no push credentials).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service: ServiceInfo,
    pub database: DatabaseConfig,
    pub module: ModuleConfig,
    pub push: PushConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service: ServiceInfo::default(),
            database: DatabaseConfig::default(),
            module: ModuleConfig::default(),
            push: PushConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceInfo {
    pub name: String,
    pub instance_id: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: "courier".to_string(),
            instance_id: "courier-01".to_string(),
        }
    }
}

/// Relational store connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Store backend. `memory` is the only in-tree backend; the driver trait
    /// is where a vendor driver plugs in.
    pub backend: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Delay between reconnect attempts after the connection drops.
    pub reconnect_interval_ms: u64,
    /// Command queue drain tick.
    pub process_interval_ms: u64,
    pub hibernate: HibernateConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            host: "localhost".to_string(),
            port: 1433,
            user: String::new(),
            password: String::new(),
            database: "Push".to_string(),
            connect_timeout_ms: 5_000,
            request_timeout_ms: 15_000,
            reconnect_interval_ms: 5_000,
            process_interval_ms: 50,
            hibernate: HibernateConfig::default(),
        }
    }
}

impl DatabaseConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms)
    }
}

/// Command queue hibernation: pause the drain tick after a configured idle
/// window so an idle service performs no polling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HibernateConfig {
    pub enabled: bool,
    pub idle_ms: u64,
}

impl Default for HibernateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            idle_ms: 10_000,
        }
    }
}

impl HibernateConfig {
    pub fn idle_window(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}

/// Worker identity and pipeline cadence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Identity presented to the store procedures; rows are assigned per
    /// module so multiple workers can share one table.
    pub module_id: u8,
    pub fetch_interval_ms: u64,
    pub send_interval_ms: u64,
    pub archive_interval_ms: u64,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            module_id: 1,
            fetch_interval_ms: 1_000,
            send_interval_ms: 3_000,
            archive_interval_ms: 60_000,
        }
    }
}

impl ModuleConfig {
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn archive_interval(&self) -> Duration {
        Duration::from_millis(self.archive_interval_ms)
    }
}

/// Push delivery (FCM v1) settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub project_id: String,
    /// Service-account access token presented as the bearer credential.
    pub bearer_token: String,
    /// Full endpoint override, used by tests and proxies. When unset the
    /// endpoint is derived from `project_id`.
    pub endpoint: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            bearer_token: String::new(),
            endpoint: None,
            request_timeout_ms: 10_000,
        }
    }
}
