// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series monitoring cache.
//!
//! Every stored reading produces two writes:
//!
//! - a current snapshot under `device:{id}:monitoring:{component}:{parameter}`
//! - a history member under `device:{id}:timeseries:{component}:{parameter}`,
//!   scored by the reading's event time in epoch milliseconds
//!
//! History is pruned on every write with a cutoff of `now - retention`
//! taken from the wall clock, never from device-reported time, so a device
//! with a skewed clock cannot wipe its own series.
//!
//! Grouped snapshots keep one record for a whole group of sibling
//! entities (all mux ports, all demux ports) and one history member per
//! round, scored by the newest timestamp found across the group.
//!
//! The two writes are independent; a reader may briefly observe a snapshot
//! without its history member.

pub mod clock;
pub mod keys;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use store::CacheStore;

use crate::catalog::parse_port_label;
use crate::compiler::ParamValue;
use crate::error::{Error, Result};
use crate::timestamp::{format_local, Timestamp};
use chrono::{FixedOffset, Offset, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default history retention.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Current value of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringRecord {
    pub value: ParamValue,
    #[serde(alias = "timestamp")]
    pub timestamp_local: String,
}

/// One entity's parameters inside a grouped snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupedEntry {
    #[serde(flatten)]
    pub values: BTreeMap<String, ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

/// Current values of a whole group, keyed by entity id (port number).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupedRecord {
    pub values: BTreeMap<String, GroupedEntry>,
    #[serde(alias = "timestamp")]
    pub timestamp_local: String,
}

/// Who a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    User,
    Device,
}

/// Running (user-set) or operational (device-reported) configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub value: ParamValue,
    #[serde(alias = "timestamp")]
    pub timestamp_local: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub source: ConfigSource,
}

/// A history member with its score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry<T> {
    pub score: i64,
    #[serde(flatten)]
    pub record: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Active,
    NoData,
}

/// Data freshness of one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub status: DeviceState,
    pub last_update: Option<String>,
    pub data_points: usize,
}

/// Cache behaviour knobs.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub retention: Duration,
    /// Expiry applied to grouped snapshots when the caller gives none.
    pub grouped_ttl: Option<Duration>,
    /// Offset used to render `timestamp_local`.
    pub local_offset: FixedOffset,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            grouped_ttl: None,
            local_offset: Utc.fix(),
        }
    }
}

/// Normalize a value for storage: numeric text becomes a number and a
/// missing value becomes the empty string.
pub fn storable(value: Option<&ParamValue>) -> ParamValue {
    match value {
        None => ParamValue::Text(String::new()),
        Some(ParamValue::Text(s)) => ParamValue::from_text(s),
        Some(v) => v.clone(),
    }
}

/// Snapshot and history cache over a [`CacheStore`].
pub struct MonitoringCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
}

impl MonitoringCache {
    pub fn new(store: Arc<dyn CacheStore>, settings: CacheSettings) -> Self {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn CacheStore>,
        settings: CacheSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    fn local(&self, score: i64) -> String {
        format_local(score, self.settings.local_offset)
    }

    // Event time of a reading, falling back to the wall clock.
    fn score_of(&self, timestamp: Option<&Timestamp>) -> i64 {
        match timestamp.map(Timestamp::to_epoch_millis) {
            Some(Ok(ms)) => ms,
            Some(Err(e)) => {
                tracing::debug!(error = %e, "unusable timestamp, using server time");
                self.clock.now_millis()
            }
            None => self.clock.now_millis(),
        }
    }

    fn prune(&self, key: &str) -> Result<usize> {
        let retention = self.settings.retention.as_millis() as i64;
        let cutoff = self.clock.now_millis() - retention;
        self.store.zrem_range_by_score(key, i64::MIN, cutoff)
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(key, error = %e, "malformed cache record");
                Ok(None)
            }
        }
    }

    fn history<T: DeserializeOwned>(&self, key: &str, count: usize) -> Result<Vec<HistoryEntry<T>>> {
        let members = self.store.zrevrange(key, count)?;
        Ok(members
            .into_iter()
            .filter_map(|(member, score)| {
                serde_json::from_str(&member)
                    .ok()
                    .map(|record| HistoryEntry { score, record })
            })
            .collect())
    }

    /// Store a current value and append it to the parameter's history.
    /// Returns the history score used.
    pub fn store_snapshot(
        &self,
        device_id: &str,
        component: &str,
        parameter: &str,
        value: Option<&ParamValue>,
        timestamp: Option<&Timestamp>,
    ) -> Result<i64> {
        let score = self.score_of(timestamp);
        let record = MonitoringRecord {
            value: storable(value),
            timestamp_local: self.local(score),
        };
        let json = encode(&record)?;

        self.store
            .set(&keys::monitoring(device_id, component, parameter), &json, None)?;
        let series = keys::timeseries(device_id, component, parameter);
        self.store.zadd(&series, &json, score)?;
        self.prune(&series)?;

        tracing::debug!(device = device_id, component, parameter, score, "stored snapshot");
        Ok(score)
    }

    /// Store a grouped snapshot and append it to the group's history.
    ///
    /// The score is the newest usable entity timestamp, or now when no
    /// entity carries one. `ttl` overrides the configured grouped expiry.
    pub fn store_grouped(
        &self,
        device_id: &str,
        group: &str,
        entries: &BTreeMap<String, GroupedEntry>,
        ttl: Option<Duration>,
    ) -> Result<i64> {
        let score = entries
            .values()
            .filter_map(|e| e.timestamp.as_ref())
            .filter_map(|ts| ts.to_epoch_millis().ok())
            .filter(|&ms| ms != 0)
            .max()
            .unwrap_or_else(|| self.clock.now_millis());

        let record = GroupedRecord {
            values: entries.clone(),
            timestamp_local: self.local(score),
        };
        let json = encode(&record)?;

        let ttl = ttl.or(self.settings.grouped_ttl);
        self.store.set(&keys::grouped(device_id, group), &json, ttl)?;
        let series = keys::grouped_timeseries(device_id, group);
        self.store.zadd(&series, &json, score)?;
        self.prune(&series)?;

        tracing::debug!(device = device_id, group, entities = entries.len(), score, "stored grouped snapshot");
        Ok(score)
    }

    /// Current value of a parameter.
    ///
    /// Components named `optical-port-<mux|demux>-<n>` are answered from the
    /// grouped snapshot of their side; `None` when that port or parameter is
    /// absent from it.
    pub fn get_snapshot(
        &self,
        device_id: &str,
        component: &str,
        parameter: &str,
    ) -> Result<Option<MonitoringRecord>> {
        if let Some((side, port)) = parse_port_label(component) {
            let Some(group) = self.get_grouped_snapshot(device_id, &side.group())? else {
                return Ok(None);
            };
            let value = group
                .values
                .get(&port.to_string())
                .and_then(|entry| entry.values.get(parameter))
                .cloned();
            return Ok(value.map(|value| MonitoringRecord {
                value,
                timestamp_local: group.timestamp_local,
            }));
        }

        self.read(&keys::monitoring(device_id, component, parameter))
    }

    /// Current values of several parameters of one component.
    pub fn get_snapshots<S: AsRef<str>>(
        &self,
        device_id: &str,
        component: &str,
        parameters: &[S],
    ) -> Result<BTreeMap<String, Option<MonitoringRecord>>> {
        if parse_port_label(component).is_some() {
            return parameters
                .iter()
                .map(|p| {
                    let p = p.as_ref();
                    Ok((p.to_string(), self.get_snapshot(device_id, component, p)?))
                })
                .collect();
        }

        let keys: Vec<String> = parameters
            .iter()
            .map(|p| keys::monitoring(device_id, component, p.as_ref()))
            .collect();
        let raws = self.store.get_many(&keys)?;
        Ok(parameters
            .iter()
            .zip(raws)
            .map(|(p, raw)| {
                let record = raw.and_then(|r| serde_json::from_str(&r).ok());
                (p.as_ref().to_string(), record)
            })
            .collect())
    }

    pub fn get_grouped_snapshot(&self, device_id: &str, group: &str) -> Result<Option<GroupedRecord>> {
        self.read(&keys::grouped(device_id, group))
    }

    /// Newest `count` history entries of a parameter, newest first.
    /// Malformed members are skipped.
    pub fn get_history(
        &self,
        device_id: &str,
        component: &str,
        parameter: &str,
        count: usize,
    ) -> Result<Vec<HistoryEntry<MonitoringRecord>>> {
        self.history(&keys::timeseries(device_id, component, parameter), count)
    }

    pub fn get_grouped_history(
        &self,
        device_id: &str,
        group: &str,
        count: usize,
    ) -> Result<Vec<HistoryEntry<GroupedRecord>>> {
        self.history(&keys::grouped_timeseries(device_id, group), count)
    }

    fn config_record(
        &self,
        value: &ParamValue,
        timestamp: Option<&Timestamp>,
        user: Option<&str>,
        source: ConfigSource,
    ) -> ConfigRecord {
        ConfigRecord {
            value: value.clone(),
            timestamp_local: self.local(self.score_of(timestamp)),
            user: user.map(str::to_string),
            source,
        }
    }

    /// Record a value set by `user`.
    pub fn store_running_config(
        &self,
        device_id: &str,
        component: &str,
        parameter: &str,
        value: &ParamValue,
        user: &str,
        timestamp: Option<&Timestamp>,
    ) -> Result<()> {
        let record = self.config_record(value, timestamp, Some(user), ConfigSource::User);
        self.store.set(
            &keys::running(device_id, component, parameter),
            &encode(&record)?,
            None,
        )?;
        tracing::debug!(device = device_id, component, parameter, user, "stored running config");
        Ok(())
    }

    pub fn get_running_config(
        &self,
        device_id: &str,
        component: &str,
        parameter: &str,
    ) -> Result<Option<ConfigRecord>> {
        self.read(&keys::running(device_id, component, parameter))
    }

    /// Record a configuration value reported by the device.
    pub fn store_operational_config(
        &self,
        device_id: &str,
        component: &str,
        parameter: &str,
        value: &ParamValue,
        timestamp: Option<&Timestamp>,
    ) -> Result<()> {
        let record = self.config_record(value, timestamp, None, ConfigSource::Device);
        self.store.set(
            &keys::operational(device_id, component, parameter),
            &encode(&record)?,
            None,
        )
    }

    pub fn get_operational_config(
        &self,
        device_id: &str,
        component: &str,
        parameter: &str,
    ) -> Result<Option<ConfigRecord>> {
        self.read(&keys::operational(device_id, component, parameter))
    }

    /// Delete everything stored for a device. Returns the number of keys.
    pub fn cleanup_device(&self, device_id: &str) -> Result<usize> {
        let keys = self.store.keys_with_prefix(&keys::device_prefix(device_id))?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete(&keys)?;
        tracing::info!(device = device_id, keys = removed, "cleaned up device data");
        Ok(removed)
    }

    /// Freshness summary from the device's current snapshots.
    pub fn device_status(&self, device_id: &str) -> Result<DeviceStatus> {
        let keys = self
            .store
            .keys_with_prefix(&keys::monitoring_prefix(device_id))?;

        let mut latest: Option<String> = None;
        for raw in self.store.get_many(&keys)?.into_iter().flatten() {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) else {
                continue;
            };
            let stamp = value
                .get("timestamp_local")
                .or_else(|| value.get("timestamp"))
                .and_then(|v| v.as_str());
            if let Some(stamp) = stamp {
                if latest.as_deref().map_or(true, |l| stamp > l) {
                    latest = Some(stamp.to_string());
                }
            }
        }

        Ok(match latest {
            Some(last) => DeviceStatus {
                status: DeviceState::Active,
                last_update: Some(last),
                data_points: keys.len(),
            },
            None => DeviceStatus {
                status: DeviceState::NoData,
                last_update: None,
                data_points: 0,
            },
        })
    }
}

fn encode<T: Serialize>(record: &T) -> Result<String> {
    serde_json::to_string(record).map_err(|e| Error::CacheUnavailable(e.to_string()))
}
