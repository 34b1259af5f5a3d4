// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request dispatch behind the device-data HTTP endpoint.
//!
//! The body is either one sub-request or a list of them:
//!
//! ```json
//! {
//!   "device_credentials": {"ip": "10.0.0.1", "port": 830, "username": "admin", "password": "..."},
//!   "device_id": "d1",
//!   "data_params": [
//!     {"key": "gain", "operation": "read", "component": "edfa",
//!      "parameter": ["input-power", "output-power"],
//!      "query": {"edfa": {"dn": "ne=1;chassis=1;card=1;edfa=1"}}}
//!   ]
//! }
//! ```
//!
//! A single sub-request answers `{"data": ...}` or `{"error": {"message": ...}}`
//! with the error's status. A list answers `[{"key", "data"}, {"key", "error"}]`
//! with status 200; one failing item never hides the others.

use crate::access::{DataAccess, ReadRequest, WriteRequest};
use crate::cache::MonitoringCache;
use crate::catalog::entity_label;
use crate::compiler::{ParamValue, Qualifiers};
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key given to a single sub-request that carries none.
pub const ONLY_KEY: &str = "only-key";

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDataRequest {
    pub device_credentials: Credentials,
    #[serde(default)]
    pub device_id: Option<String>,
    pub data_params: DataParams,
}

/// One sub-request or a batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DataParams {
    Many(Vec<SubRequest>),
    One(SubRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Config,
}

/// `parameter` accepts a name or a list of names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParameterSpec {
    One(String),
    Many(Vec<String>),
}

impl ParameterSpec {
    pub fn names(&self) -> Vec<String> {
        match self {
            ParameterSpec::One(name) => vec![name.clone()],
            ParameterSpec::Many(names) => names.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubRequest {
    #[serde(default)]
    pub key: Option<String>,
    pub operation: Operation,
    pub component: String,
    pub parameter: ParameterSpec,
    #[serde(default)]
    pub query: Qualifiers,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Status and JSON body handed back to the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
}

impl ApiReply {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(err: &Error) -> Self {
        Self {
            status: err.status(),
            body: error_body(err),
        }
    }
}

fn error_body(err: &Error) -> Value {
    json!({ "error": { "message": err.to_string() } })
}

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Cache,
    Device,
}

/// Values of a read served from the cache when possible.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedRead {
    pub values: BTreeMap<String, Option<ParamValue>>,
    pub timestamp: String,
    pub source: DataSource,
}

/// Answer a read from the current snapshots, or from the device when any
/// requested parameter has no snapshot yet.
pub fn cached_or_live(
    cache: &MonitoringCache,
    access: &DataAccess,
    credentials: &Credentials,
    device_id: &str,
    request: &ReadRequest,
) -> Result<CachedRead> {
    let label = entity_label(&request.component, &request.qualifiers);
    let snapshots = cache.get_snapshots(device_id, &label, &request.parameters)?;

    if !snapshots.is_empty() && snapshots.values().all(Option::is_some) {
        let timestamp = snapshots
            .values()
            .flatten()
            .map(|r| r.timestamp_local.clone())
            .max()
            .unwrap_or_default();
        let values = snapshots
            .into_iter()
            .map(|(k, r)| (k, r.map(|r| r.value)))
            .collect();
        return Ok(CachedRead {
            values,
            timestamp,
            source: DataSource::Cache,
        });
    }

    tracing::debug!(device = device_id, component = %label, "cache miss, reading device");
    let live = access.get_data(credentials, Some(device_id), request)?;
    Ok(CachedRead {
        values: live.values,
        timestamp: live.timestamp.to_string(),
        source: DataSource::Device,
    })
}

/// Dispatches device-data requests.
pub struct DeviceApi {
    access: Arc<DataAccess>,
    cache: Option<Arc<MonitoringCache>>,
}

impl DeviceApi {
    pub fn new(access: Arc<DataAccess>) -> Self {
        Self {
            access,
            cache: None,
        }
    }

    /// Serve reads from the cache when a `device_id` is given, and record
    /// successful writes as running config.
    pub fn with_cache(mut self, cache: Arc<MonitoringCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Parse a JSON body and dispatch it.
    pub fn handle_json(&self, body: &str, user: Option<&str>) -> ApiReply {
        match serde_json::from_str::<DeviceDataRequest>(body) {
            Ok(request) => self.handle_device_data(&request, user),
            Err(e) => ApiReply::error(&Error::InvalidRequest(e.to_string())),
        }
    }

    pub fn handle_device_data(&self, request: &DeviceDataRequest, user: Option<&str>) -> ApiReply {
        if let Err(e) = request.device_credentials.validate() {
            return ApiReply::error(&e);
        }

        match &request.data_params {
            DataParams::One(sub) => match self.dispatch(request, sub, user) {
                Ok(data) => ApiReply::ok(json!({ "data": data })),
                Err(e) => {
                    tracing::error!(component = %sub.component, error = %e, "device data request failed");
                    ApiReply::error(&e)
                }
            },
            DataParams::Many(subs) => {
                let items = subs
                    .iter()
                    .map(|sub| {
                        let key = sub.key.clone().unwrap_or_else(|| ONLY_KEY.to_string());
                        match self.dispatch(request, sub, user) {
                            Ok(data) => json!({ "key": key, "data": data }),
                            Err(e) => {
                                tracing::warn!(key = %key, error = %e, "batch item failed");
                                let mut item = error_body(&e);
                                if let Value::Object(map) = &mut item {
                                    map.insert("key".into(), Value::String(key));
                                }
                                item
                            }
                        }
                    })
                    .collect();
                ApiReply::ok(Value::Array(items))
            }
        }
    }

    fn dispatch(
        &self,
        request: &DeviceDataRequest,
        sub: &SubRequest,
        user: Option<&str>,
    ) -> Result<Value> {
        let credentials = &request.device_credentials;
        let device_id = request.device_id.as_deref();

        match sub.operation {
            Operation::Read => {
                let mut read = ReadRequest::new(&sub.component, sub.parameter.names());
                read.qualifiers = sub.query.clone();
                self.read(credentials, device_id, &read)
            }
            Operation::Config => {
                let ParameterSpec::One(parameter) = &sub.parameter else {
                    return Err(Error::InvalidRequest(
                        "config takes exactly one parameter".into(),
                    ));
                };
                let value = sub
                    .value
                    .as_ref()
                    .ok_or_else(|| Error::InvalidRequest("config requires a value".into()))
                    .and_then(value_text)?;

                let mut write = WriteRequest::new(&sub.component, parameter, value);
                write.qualifiers = sub.query.clone();
                self.access.edit_data(credentials, device_id, &write)?;
                self.record_running(device_id, &write, user);
                Ok(json!({ "success": true }))
            }
        }
    }

    fn read(
        &self,
        credentials: &Credentials,
        device_id: Option<&str>,
        request: &ReadRequest,
    ) -> Result<Value> {
        let (values, timestamp) = match (&self.cache, device_id) {
            (Some(cache), Some(id)) => {
                let read = cached_or_live(cache, &self.access, credentials, id, request)?;
                (read.values, Value::String(read.timestamp))
            }
            _ => {
                let live = self.access.get_data(credentials, device_id, request)?;
                let ts = serde_json::to_value(&live.timestamp)
                    .map_err(|e| Error::Protocol(e.to_string()))?;
                (live.values, ts)
            }
        };

        let mut data = Map::new();
        for (name, value) in values {
            let value = match value {
                Some(v) => serde_json::to_value(v).map_err(|e| Error::Protocol(e.to_string()))?,
                None => Value::Null,
            };
            data.insert(name, value);
        }
        data.insert("timestamp".into(), timestamp);
        Ok(Value::Object(data))
    }

    // The device already accepted the write; a cache failure is only logged.
    fn record_running(&self, device_id: Option<&str>, write: &WriteRequest, user: Option<&str>) {
        let (Some(cache), Some(device_id)) = (&self.cache, device_id) else {
            return;
        };
        let label = entity_label(&write.component, &write.qualifiers);
        if let Err(e) = cache.store_running_config(
            device_id,
            &label,
            &write.parameter,
            &ParamValue::from_text(&write.value),
            user.unwrap_or("api"),
            None,
        ) {
            tracing::warn!(device = device_id, error = %e, "failed to record running config");
        }
    }
}

fn value_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::InvalidRequest(format!(
            "unsupported config value: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSettings, MemoryStore};
    use crate::mock::{data_reply, error_reply, ok_reply, MockConnector};
    use crate::schema::StaticSchemaProvider;
    use crate::session::{SessionConfig, SessionManager};

    const EDFA: &str = include_str!("../tests/fixtures/lumentum-ote-edfa.xml");

    fn api(mock: MockConnector) -> (DeviceApi, Arc<MonitoringCache>, Arc<MockConnector>) {
        let mock = Arc::new(mock);
        let schemas = StaticSchemaProvider::new().with_template("edfa", EDFA).unwrap();
        let sessions = Arc::new(SessionManager::new(mock.clone(), SessionConfig::default()));
        let access = Arc::new(DataAccess::new(Arc::new(schemas), sessions));
        let cache = Arc::new(MonitoringCache::new(
            Arc::new(MemoryStore::new()),
            CacheSettings::default(),
        ));
        (DeviceApi::new(access).with_cache(cache.clone()), cache, mock)
    }

    fn device() -> MockConnector {
        MockConnector::new(|request| {
            if request.starts_with("<config") {
                if request.contains("target-gain") {
                    Ok(ok_reply())
                } else {
                    Ok(error_reply("access-denied", "read-only leaf"))
                }
            } else {
                Ok(data_reply(&[
                    ("input-power", "8.0"),
                    ("output-power", "20.0"),
                    ("timestamp", "1700000000"),
                ]))
            }
        })
    }

    const CREDS: &str = r#"{"ip": "10.0.0.1", "port": "830", "username": "admin", "password": "pw"}"#;

    #[test]
    fn test_single_read() {
        let (api, _, _) = api(device());
        let body = format!(
            r#"{{"device_credentials": {}, "data_params": {{"operation": "read", "component": "edfa",
                "parameter": ["input-power", "output-power"],
                "query": {{"edfa": {{"dn": "ne=1;chassis=1;card=1;edfa=1"}}}}}}}}"#,
            CREDS
        );
        let reply = api.handle_json(&body, None);
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["data"]["input-power"], json!(8.0));
        assert_eq!(reply.body["data"]["output-power"], json!(20.0));
        assert_eq!(reply.body["data"]["timestamp"], json!(1_700_000_000));
    }

    #[test]
    fn test_single_failure_carries_status() {
        let (api, _, _) = api(device());
        let body = format!(
            r#"{{"device_credentials": {}, "data_params": {{"operation": "read", "component": "edfa",
                "parameter": "no-such-leaf", "query": {{}}}}}}"#,
            CREDS
        );
        let reply = api.handle_json(&body, None);
        assert_eq!(reply.status, 404);
        assert!(reply.body["error"]["message"].as_str().unwrap().contains("no-such-leaf"));

        let bad = api.handle_json(r#"{"device_credentials": {}}"#, None);
        assert_eq!(bad.status, 400);
    }

    #[test]
    fn test_invalid_credentials_rejected_before_io() {
        let (api, _, mock) = api(device());
        let body = r#"{"device_credentials": {"ip": "", "port": 830, "username": "u", "password": "p"},
            "data_params": {"operation": "read", "component": "edfa", "parameter": "input-power", "query": {}}}"#;
        let reply = api.handle_json(body, None);
        assert_eq!(reply.status, 400);
        assert_eq!(mock.connect_attempts(), 0);
    }

    #[test]
    fn test_batch_isolates_failures() {
        let (api, cache, _) = api(device());
        let body = format!(
            r#"{{"device_credentials": {}, "device_id": "d1", "data_params": [
                {{"key": "set-gain", "operation": "config", "component": "edfa", "parameter": "target-gain",
                  "value": 17.5, "query": {{"edfa": {{"dn": "ne=1;chassis=1;card=1;edfa=1"}}}}}},
                {{"key": "set-name", "operation": "config", "component": "edfa", "parameter": "custom-name",
                  "value": "east", "query": {{}}}},
                {{"key": "power", "operation": "read", "component": "edfa", "parameter": "input-power", "query": {{}}}}
            ]}}"#,
            CREDS
        );
        let reply = api.handle_json(&body, Some("alice"));
        assert_eq!(reply.status, 200);
        let items = reply.body.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["key"], "set-gain");
        assert_eq!(items[0]["data"]["success"], true);
        assert_eq!(items[1]["key"], "set-name");
        assert!(items[1]["error"]["message"].is_string());
        assert_eq!(items[2]["data"]["input-power"], json!(8.0));

        let running = cache
            .get_running_config("d1", "edfa-booster", "target-gain")
            .unwrap()
            .unwrap();
        assert_eq!(running.value, ParamValue::Number(17.5));
        assert_eq!(running.user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_config_shape_errors() {
        let (api, _, _) = api(device());
        for params in [
            r#"{"operation": "config", "component": "edfa", "parameter": "target-gain", "query": {}}"#,
            r#"{"operation": "config", "component": "edfa", "parameter": ["a", "b"], "value": 1, "query": {}}"#,
            r#"{"operation": "config", "component": "edfa", "parameter": "target-gain", "value": [1], "query": {}}"#,
        ] {
            let body = format!(r#"{{"device_credentials": {}, "data_params": {}}}"#, CREDS, params);
            assert_eq!(api.handle_json(&body, None).status, 400, "{}", params);
        }
    }

    #[test]
    fn test_cached_or_live() {
        let (api, cache, mock) = api(device());
        let credentials: Credentials = serde_json::from_str(CREDS).unwrap();
        let request = ReadRequest::new("edfa", ["input-power"])
            .qualify("edfa", "dn", "ne=1;chassis=1;card=1;edfa=1");

        let live = cached_or_live(&cache, &api.access, &credentials, "d1", &request).unwrap();
        assert_eq!(live.source, DataSource::Device);
        assert_eq!(mock.connect_count(), 1);

        cache
            .store_snapshot("d1", "edfa-booster", "input-power", Some(&ParamValue::Number(3.0)), None)
            .unwrap();
        let cached = cached_or_live(&cache, &api.access, &credentials, "d1", &request).unwrap();
        assert_eq!(cached.source, DataSource::Cache);
        assert_eq!(cached.values["input-power"], Some(ParamValue::Number(3.0)));
        assert_eq!(mock.sessions()[0].get_count(), 1);
    }
}
