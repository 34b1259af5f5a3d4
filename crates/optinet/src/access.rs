// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data access layer: compile, send, decode.

use crate::compiler::{self, ParamValue, Qualifiers};
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::netconf::Datastore;
use crate::schema::SchemaProvider;
use crate::session::SessionManager;
use crate::timestamp::Timestamp;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// A read of one or more parameters of one component.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub component: String,
    pub parameters: Vec<String>,
    pub qualifiers: Qualifiers,
}

impl ReadRequest {
    pub fn new<I, S>(component: &str, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            component: component.to_string(),
            parameters: parameters.into_iter().map(Into::into).collect(),
            qualifiers: Qualifiers::new(),
        }
    }

    /// Add a `key = value` child under every `tag` node.
    pub fn qualify(mut self, tag: &str, key: &str, value: &str) -> Self {
        self.qualifiers
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }
}

/// A write of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub component: String,
    pub parameter: String,
    pub value: String,
    pub qualifiers: Qualifiers,
}

impl WriteRequest {
    pub fn new(component: &str, parameter: &str, value: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            parameter: parameter.to_string(),
            value: value.into(),
            qualifiers: Qualifiers::new(),
        }
    }

    pub fn qualify(mut self, tag: &str, key: &str, value: &str) -> Self {
        self.qualifiers
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }
}

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResult {
    /// One entry per requested parameter; `None` when the device sent nothing.
    pub values: BTreeMap<String, Option<ParamValue>>,
    /// Device-reported time, or server time when the reply carried none.
    pub timestamp: Timestamp,
    /// Whether `timestamp` came from the device.
    pub device_time: bool,
    /// Parameters unknown to the schema and left out of the filter.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub omitted: Vec<String>,
}

impl ReadResult {
    /// Values that are present, for storing.
    pub fn present(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.as_str(), v)))
    }
}

/// Reads and writes device parameters through schema-compiled documents.
pub struct DataAccess {
    schemas: Arc<dyn SchemaProvider>,
    sessions: Arc<SessionManager>,
}

impl DataAccess {
    pub fn new(schemas: Arc<dyn SchemaProvider>, sessions: Arc<SessionManager>) -> Self {
        Self { schemas, sessions }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Fetch the requested parameters.
    pub fn get_data(
        &self,
        credentials: &Credentials,
        device_id: Option<&str>,
        request: &ReadRequest,
    ) -> Result<ReadResult> {
        credentials.validate()?;
        if request.parameters.is_empty() {
            return Err(Error::InvalidRequest("no parameters requested".into()));
        }

        let template = self.schemas.template(&request.component, device_id)?;
        let filter =
            compiler::compile_filter(&template, &request.parameters, &request.qualifiers)?;

        let session = self.sessions.acquire(credentials)?;
        let start = Instant::now();
        let reply = session.get(&filter.to_xml())?;
        tracing::debug!(
            device = device_id.unwrap_or("-"),
            component = %request.component,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "NETCONF get"
        );

        let decoded = compiler::decode_reply(&reply, &request.parameters)?;
        let (timestamp, device_time) = match decoded.timestamp {
            Some(ts) => (ts, true),
            None => (Timestamp::now(), false),
        };

        Ok(ReadResult {
            values: decoded.values,
            timestamp,
            device_time,
            omitted: filter.omitted,
        })
    }

    /// Apply one parameter to the running datastore.
    pub fn edit_data(
        &self,
        credentials: &Credentials,
        device_id: Option<&str>,
        request: &WriteRequest,
    ) -> Result<()> {
        credentials.validate()?;

        let template = self.schemas.template(&request.component, device_id)?;
        let config = compiler::compile_config(
            &template,
            &request.parameter,
            &request.value,
            &request.qualifiers,
        )?;

        let session = self.sessions.acquire(credentials)?;
        session.edit_config(Datastore::Running, &config.to_xml())?;
        tracing::info!(
            device = device_id.unwrap_or("-"),
            component = %request.component,
            parameter = %request.parameter,
            "edit-config applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{data_reply, error_reply, ok_reply, MockConnector};
    use crate::netconf::NetconfError;
    use crate::schema::StaticSchemaProvider;
    use crate::session::SessionConfig;

    const EDFA: &str = include_str!("../tests/fixtures/lumentum-ote-edfa.xml");

    fn access(mock: Arc<MockConnector>) -> DataAccess {
        let schemas = StaticSchemaProvider::new().with_template("edfa", EDFA).unwrap();
        let sessions = Arc::new(SessionManager::new(mock, SessionConfig::default()));
        DataAccess::new(Arc::new(schemas), sessions)
    }

    fn creds() -> Credentials {
        Credentials::new("10.0.0.9", 830, "admin", "pw")
    }

    #[test]
    fn test_get_data_with_device_time() {
        let mock = Arc::new(MockConnector::with_leaves(&[
            ("input-power", "8.0"),
            ("operational-state", "In service"),
            ("timestamp", "1700000000"),
        ]));
        let access = access(mock.clone());

        let request = ReadRequest::new("edfa", ["input-power", "operational-state", "measured-gain"])
            .qualify("edfa", "dn", "ne=1;chassis=1;card=1;edfa=1");
        let result = access.get_data(&creds(), Some("d1"), &request).unwrap();

        assert_eq!(result.values["input-power"], Some(ParamValue::Number(8.0)));
        assert_eq!(
            result.values["operational-state"],
            Some(ParamValue::Text("In service".into()))
        );
        assert_eq!(result.values["measured-gain"], None);
        assert_eq!(result.timestamp, Timestamp::Integer(1_700_000_000));
        assert!(result.device_time);
        assert_eq!(result.present().count(), 2);
    }

    #[test]
    fn test_get_data_falls_back_to_server_time() {
        let mock = Arc::new(MockConnector::with_leaves(&[("input-power", "1")]));
        let result = access(mock)
            .get_data(&creds(), None, &ReadRequest::new("edfa", ["input-power"]))
            .unwrap();
        assert!(!result.device_time);
        assert!(result.timestamp.to_epoch_millis().is_ok());
    }

    #[test]
    fn test_get_data_sends_filter_with_dn() {
        let mock = Arc::new(MockConnector::new(|filter| {
            assert!(filter.starts_with("<filter"));
            assert!(filter.contains("<dn>ne=1;chassis=1;card=1;edfa=2</dn>"));
            Ok(data_reply(&[("input-power", "3.5")]))
        }));
        let request = ReadRequest::new("edfa", ["input-power", "unknown-leaf"])
            .qualify("edfa", "dn", "ne=1;chassis=1;card=1;edfa=2");
        let result = access(mock).get_data(&creds(), None, &request).unwrap();
        assert_eq!(result.omitted, vec!["unknown-leaf"]);
        assert_eq!(result.values["unknown-leaf"], None);
    }

    #[test]
    fn test_validation_before_io() {
        let mock = Arc::new(MockConnector::with_leaves(&[]));
        let access = access(mock.clone());
        let mut bad = creds();
        bad.user.clear();

        let err = access
            .get_data(&bad, None, &ReadRequest::new("edfa", ["input-power"]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials(_)));

        let err = access
            .get_data(&creds(), None, &ReadRequest::new("amplifier", ["input-power"]))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaUnavailable { .. }));
        assert_eq!(mock.connect_attempts(), 0);
    }

    #[test]
    fn test_device_error_is_protocol() {
        let mock = Arc::new(MockConnector::new(|_| {
            Err(NetconfError::UnexpectedReply("garbled".into()))
        }));
        let err = access(mock)
            .get_data(&creds(), None, &ReadRequest::new("edfa", ["input-power"]))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_edit_data() {
        let mock = Arc::new(MockConnector::new(|_| Ok(ok_reply())));
        let access = access(mock.clone());
        let request = WriteRequest::new("edfa", "target-gain", "14")
            .qualify("edfa", "dn", "ne=1;chassis=1;card=1;edfa=1");
        access.edit_data(&creds(), Some("d1"), &request).unwrap();

        let edits = mock.edits();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].starts_with("<config"));
        assert!(edits[0].contains(">14</target-gain>"));

        // reuses the session opened for the first write
        access.edit_data(&creds(), Some("d1"), &request).unwrap();
        assert_eq!(mock.connect_count(), 1);
    }

    #[test]
    fn test_edit_data_rejected() {
        let mock = Arc::new(MockConnector::new(|_| Ok(error_reply("invalid-value", "out of range"))));
        let err = access(mock)
            .edit_data(&creds(), None, &WriteRequest::new("edfa", "target-gain", "99"))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(ref m) if m.contains("out of range")));

        let mock = Arc::new(MockConnector::new(|_| Ok(ok_reply())));
        let err = access(mock)
            .edit_data(&creds(), None, &WriteRequest::new("edfa", "nope", "1"))
            .unwrap_err();
        assert!(matches!(err, Error::ParameterNotFound(_)));
    }
}
