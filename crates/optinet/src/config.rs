// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service configuration.
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::cache::{CacheSettings, CacheStore, MemoryStore};
use crate::netconf::TcpConnector;
use crate::poller::{PollerConfig, TelemetryGroup};
use crate::pool::PoolSizes;
use crate::schema::{default_modules, FileSchemaProvider};
use crate::session::SessionConfig;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Annotated configuration printed by `optinetd gen-config`.
pub const EXAMPLE_CONFIG: &str = r#"# optinetd configuration

log_level = "info"

[poller]
interval_ms = 2000
failure_backoff_ms = 5000
device_workers = 32
group_workers = 32
entity_workers = 64
groups_per_device = 4
entities_per_group = 8
mux_ports = { first = 4101, last = 4120 }
demux_ports = { first = 5201, last = 5220 }
groups = ["edfa-booster", "edfa-preamplifier", "optical-ports", "operational-config"]

[session]
connect_timeout_ms = 15000
connect_retries = 2
retry_delay_ms = 250
io_timeout_ms = 30000

[cache]
# "memory" or "sqlite"
backend = "sqlite"
path = "optinet-cache.db"
retention_hours = 24
# grouped_ttl_secs = 60
local_utc_offset_minutes = 0

[schema]
dir = "schemas"

[schema.modules]
edfa = "lumentum-ote-edfa"
optical-port = "lumentum-ote-port-optical"

[devices]
store = "devices.json"
"#;

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub poller: PollerSection,

    #[serde(default)]
    pub session: SessionSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub schema: SchemaSection,

    #[serde(default)]
    pub devices: DevicesSection,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poller: PollerSection::default(),
            session: SessionSection::default(),
            cache: CacheSection::default(),
            schema: SchemaSection::default(),
            devices: DevicesSection::default(),
            log_level: default_log_level(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.poller.validate()?;
        self.cache.validate()?;

        if self.schema.modules.is_empty() {
            return Err(ConfigError::Invalid("No schema modules configured".into()));
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid("log_level is empty".into()));
        }
        Ok(())
    }
}

/// Inclusive range of port numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub first: u32,
    pub last: u32,
}

impl PortRange {
    pub fn ports(&self) -> Vec<u32> {
        (self.first..=self.last).collect()
    }
}

/// `[poller]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_failure_backoff_ms")]
    pub failure_backoff_ms: u64,

    #[serde(default = "default_device_workers")]
    pub device_workers: usize,

    #[serde(default = "default_group_workers")]
    pub group_workers: usize,

    #[serde(default = "default_entity_workers")]
    pub entity_workers: usize,

    #[serde(default = "default_groups_per_device")]
    pub groups_per_device: usize,

    #[serde(default = "default_entities_per_group")]
    pub entities_per_group: usize,

    #[serde(default = "default_mux_ports")]
    pub mux_ports: PortRange,

    #[serde(default = "default_demux_ports")]
    pub demux_ports: PortRange,

    #[serde(default = "default_groups")]
    pub groups: Vec<TelemetryGroup>,
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_failure_backoff_ms() -> u64 {
    5000
}

fn default_device_workers() -> usize {
    32
}

fn default_group_workers() -> usize {
    32
}

fn default_entity_workers() -> usize {
    64
}

fn default_groups_per_device() -> usize {
    4
}

fn default_entities_per_group() -> usize {
    8
}

fn default_mux_ports() -> PortRange {
    PortRange {
        first: 4101,
        last: 4120,
    }
}

fn default_demux_ports() -> PortRange {
    PortRange {
        first: 5201,
        last: 5220,
    }
}

fn default_groups() -> Vec<TelemetryGroup> {
    TelemetryGroup::ALL.to_vec()
}

impl Default for PollerSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            failure_backoff_ms: default_failure_backoff_ms(),
            device_workers: default_device_workers(),
            group_workers: default_group_workers(),
            entity_workers: default_entity_workers(),
            groups_per_device: default_groups_per_device(),
            entities_per_group: default_entities_per_group(),
            mux_ports: default_mux_ports(),
            demux_ports: default_demux_ports(),
            groups: default_groups(),
        }
    }
}

impl PollerSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(ConfigError::Invalid("poller.interval_ms must be > 0".into()));
        }
        for (name, value) in [
            ("device_workers", self.device_workers),
            ("group_workers", self.group_workers),
            ("entity_workers", self.entity_workers),
            ("groups_per_device", self.groups_per_device),
            ("entities_per_group", self.entities_per_group),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("poller.{} must be > 0", name)));
            }
        }
        for (name, range) in [("mux_ports", self.mux_ports), ("demux_ports", self.demux_ports)] {
            if range.first > range.last {
                return Err(ConfigError::Invalid(format!(
                    "poller.{} starts after it ends ({} > {})",
                    name, range.first, range.last
                )));
            }
        }
        Ok(())
    }

    pub fn pool_sizes(&self) -> PoolSizes {
        PoolSizes {
            device: self.device_workers,
            group: self.group_workers,
            entity: self.entity_workers,
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.interval_ms),
            failure_backoff: Duration::from_millis(self.failure_backoff_ms),
            device_limit: self.device_workers,
            groups_per_device: self.groups_per_device,
            entities_per_group: self.entities_per_group,
            mux_ports: self.mux_ports.ports(),
            demux_ports: self.demux_ports.ports(),
            groups: self.groups.clone(),
        }
    }
}

/// `[session]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Read/write timeout on device sockets; absent means block forever.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: Option<u64>,
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_connect_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    250
}

fn default_io_timeout_ms() -> Option<u64> {
    Some(30_000)
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_retries: default_connect_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl SessionSection {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            connect_retries: self.connect_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.io_timeout_ms.map(Duration::from_millis))
    }
}

/// Cache storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Database file for the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default)]
    pub grouped_ttl_secs: Option<u64>,

    /// Offset used to render `timestamp_local`.
    #[serde(default)]
    pub local_utc_offset_minutes: i32,
}

fn default_retention_hours() -> u64 {
    24
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            path: None,
            retention_hours: default_retention_hours(),
            grouped_ttl_secs: None,
            local_utc_offset_minutes: 0,
        }
    }
}

impl CacheSection {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_hours == 0 {
            return Err(ConfigError::Invalid("cache.retention_hours must be > 0".into()));
        }
        if self.backend == CacheBackend::Sqlite && self.path.is_none() {
            return Err(ConfigError::Invalid(
                "cache.path is required for the sqlite backend".into(),
            ));
        }
        self.offset().map(|_| ())
    }

    fn offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.local_utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "cache.local_utc_offset_minutes out of range: {}",
                self.local_utc_offset_minutes
            ))
        })
    }

    pub fn settings(&self) -> Result<CacheSettings, ConfigError> {
        Ok(CacheSettings {
            retention: Duration::from_secs(self.retention_hours * 3600),
            grouped_ttl: self.grouped_ttl_secs.map(Duration::from_secs),
            local_offset: self.offset()?,
        })
    }

    /// Open the configured backend.
    pub fn open_store(&self) -> crate::Result<Arc<dyn CacheStore>> {
        match self.backend {
            CacheBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            CacheBackend::Sqlite => self.open_sqlite(),
        }
    }

    #[cfg(feature = "sqlite")]
    fn open_sqlite(&self) -> crate::Result<Arc<dyn CacheStore>> {
        let path = self.path.as_deref().ok_or_else(|| {
            crate::Error::CacheUnavailable("no database path configured".into())
        })?;
        Ok(Arc::new(crate::cache::SqliteStore::open(path)?))
    }

    #[cfg(not(feature = "sqlite"))]
    fn open_sqlite(&self) -> crate::Result<Arc<dyn CacheStore>> {
        Err(crate::Error::CacheUnavailable(
            "built without the sqlite feature".into(),
        ))
    }
}

/// `[schema]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSection {
    #[serde(default = "default_schema_dir")]
    pub dir: PathBuf,

    /// Component kind to template module name.
    #[serde(default = "default_modules")]
    pub modules: BTreeMap<String, String>,
}

fn default_schema_dir() -> PathBuf {
    PathBuf::from("schemas")
}

impl Default for SchemaSection {
    fn default() -> Self {
        Self {
            dir: default_schema_dir(),
            modules: default_modules(),
        }
    }
}

impl SchemaSection {
    pub fn provider(&self) -> FileSchemaProvider {
        FileSchemaProvider::new(self.dir.clone(), self.modules.clone())
    }
}

/// `[devices]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesSection {
    /// JSON credential store.
    #[serde(default = "default_device_store")]
    pub store: PathBuf,
}

fn default_device_store() -> PathBuf {
    PathBuf::from("devices.json")
}

impl Default for DevicesSection {
    fn default() -> Self {
        Self {
            store: default_device_store(),
        }
    }
}
