//! `herald.toml`: server, dispatcher, retry, reaper and storage settings plus
//! the seeded handler definitions, webhook endpoints and functions.

use std::path::{Path, PathBuf};
use std::time::Duration;

use herald_core::app::{DispatcherConfig, ReaperConfig, WorkerPoolConfig};
use herald_core::domain::{HandlerDefinition, WebhookEndpoint};
use herald_core::producers::EnqueueTarget;
use herald_core::queue::RetryPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Overrides `storage.database_url`.
pub const DATABASE_URL_ENV: &str = "HERALD_DATABASE_URL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub server: ServerConfig,
    pub dispatcher: DispatcherSection,
    pub retry: RetryPolicy,
    pub reaper: ReaperSection,
    pub storage: StorageConfig,
    pub handlers: Vec<HandlerDefinition>,
    pub webhooks: Vec<WebhookEndpoint>,
    pub functions: Vec<FunctionConfig>,
}

impl HeraldConfig {
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let contents = std::fs::read_to_string(path).map_err(|err| LoadError::Io {
            path: path.into(),
            err,
        })?;
        toml::from_str(&contents).map_err(|err| LoadError::Parse {
            path: path.into(),
            err,
        })
    }

    /// Configured handler definitions, plus one per webhook endpoint whose
    /// prefix has no explicit definition.
    pub fn handler_definitions(&self) -> Vec<HandlerDefinition> {
        let mut definitions = self.handlers.clone();
        for endpoint in &self.webhooks {
            let listed = definitions
                .iter()
                .any(|d| d.event_type == endpoint.event_type_prefix);
            if !listed {
                definitions.push(endpoint.routing_definition());
            }
        }
        definitions
    }

    /// Apply environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            if !url.is_empty() {
                self.storage.database_url = Some(url);
            }
        }
        self
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{}\": {err}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{}\": {err}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        err: toml::de::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        let pool = WorkerPoolConfig::default();
        Self {
            workers: pool.workers,
            poll_interval_ms: u64::try_from(pool.poll_interval.as_millis()).unwrap_or(1_000),
            batch_size: DispatcherConfig::default().batch_size,
        }
    }
}

impl DispatcherSection {
    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers: self.workers,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: self.batch_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperSection {
    pub enabled: bool,
    pub interval_secs: u64,
    pub grace_secs: u64,
}

impl Default for ReaperSection {
    fn default() -> Self {
        let defaults = ReaperConfig::default();
        Self {
            enabled: false,
            interval_secs: defaults.interval.as_secs(),
            grace_secs: defaults.grace.as_secs(),
        }
    }
}

impl ReaperSection {
    /// `None` unless enabled.
    pub fn reaper_config(&self) -> Option<ReaperConfig> {
        self.enabled.then(|| ReaperConfig {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            grace: Duration::from_secs(self.grace_secs),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: 10,
        }
    }
}

/// A function whose calls become queued events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub name: String,
    #[serde(flatten)]
    pub target: EnqueueTarget,
}
