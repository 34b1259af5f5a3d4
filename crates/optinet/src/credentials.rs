// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device credentials and the credential store.
//!
//! The persisted format is a JSON object mapping device ID to its
//! credentials, using the field names the HTTP layer sends
//! (`ip`, `port`, `username`, `password`).

use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Connection credentials for one device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "ip", alias = "host")]
    pub host: String,
    #[serde(deserialize_with = "port_from_any")]
    pub port: u32,
    #[serde(rename = "username", alias = "user")]
    pub user: String,
    #[serde(rename = "password", alias = "secret")]
    pub secret: String,
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        port: u32,
        user: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            secret: secret.into(),
        }
    }

    /// Check every field is present and the port is in 1..=65535.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidCredentials("missing ip".into()));
        }
        if self.user.is_empty() {
            return Err(Error::InvalidCredentials("missing username".into()));
        }
        if self.secret.is_empty() {
            return Err(Error::InvalidCredentials("missing password".into()));
        }
        if self.port == 0 || self.port > 65535 {
            return Err(Error::InvalidCredentials(format!(
                "port {} out of range",
                self.port
            )));
        }
        Ok(())
    }

    /// `host:port` as used for connecting and logging.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("secret", &"***")
            .finish()
    }
}

// Ports arrive as numbers or numeric strings; anything else becomes 0 and
// fails validation instead of failing deserialization of the whole request.
fn port_from_any<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(i64),
        Float(f64),
        Text(String),
        Other(serde_json::Value),
    }

    let port = match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(n) => u32::try_from(n).unwrap_or(0),
        PortRepr::Float(f) if f.fract() == 0.0 && f > 0.0 && f <= u32::MAX as f64 => f as u32,
        PortRepr::Text(s) => s.trim().parse::<u32>().unwrap_or(0),
        PortRepr::Float(_) | PortRepr::Other(_) => 0,
    };
    Ok(port)
}

/// Reject empty or blank device identifiers.
pub fn validate_device_id(device_id: &str) -> Result<()> {
    if device_id.trim().is_empty() {
        return Err(Error::InvalidDeviceId(device_id.to_string()));
    }
    Ok(())
}

/// Lookup of registered devices.
pub trait CredentialStore: Send + Sync {
    fn get_credentials(&self, device_id: &str) -> Result<Option<Credentials>>;

    fn list_device_ids(&self) -> Result<Vec<String>>;
}

/// Credentials persisted in a JSON file.
pub struct JsonFileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole file. A missing file is an empty store.
    pub fn load(&self) -> Result<BTreeMap<String, Credentials>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(Error::CredentialStore(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw)
            .map_err(|e| Error::CredentialStore(format!("{}: {}", self.path.display(), e)))
    }

    fn persist(&self, devices: &BTreeMap<String, Credentials>) -> Result<()> {
        let json = serde_json::to_string_pretty(devices)
            .map_err(|e| Error::CredentialStore(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| Error::CredentialStore(format!("{}: {}", self.path.display(), e)))
    }

    /// Insert or replace a device.
    pub fn save_device(&self, device_id: &str, credentials: Credentials) -> Result<()> {
        validate_device_id(device_id)?;
        credentials.validate()?;

        let _guard = self.write_lock.lock();
        let mut devices = self.load()?;
        devices.insert(device_id.to_string(), credentials);
        self.persist(&devices)?;
        tracing::info!(device = device_id, "saved device");
        Ok(())
    }

    /// Remove a device. Returns false when it was not registered.
    pub fn delete_device(&self, device_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut devices = self.load()?;
        if devices.remove(device_id).is_none() {
            tracing::warn!(device = device_id, "device not found in storage");
            return Ok(false);
        }
        self.persist(&devices)?;
        tracing::info!(device = device_id, "deleted device");
        Ok(true)
    }
}

impl CredentialStore for JsonFileCredentialStore {
    fn get_credentials(&self, device_id: &str) -> Result<Option<Credentials>> {
        Ok(self.load()?.remove(device_id))
    }

    fn list_device_ids(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    devices: RwLock<BTreeMap<String, Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, device_id: &str, credentials: Credentials) {
        self.devices
            .write()
            .insert(device_id.to_string(), credentials);
    }

    pub fn remove(&self, device_id: &str) -> Option<Credentials> {
        self.devices.write().remove(device_id)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credentials(&self, device_id: &str) -> Result<Option<Credentials>> {
        Ok(self.devices.read().get(device_id).cloned())
    }

    fn list_device_ids(&self) -> Result<Vec<String>> {
        Ok(self.devices.read().keys().cloned().collect())
    }
}
