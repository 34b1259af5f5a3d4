// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::float_cmp)] // Test assertions with constants

//! Poller rounds feeding the cache, and API reads served from it.

use optinet::api::{cached_or_live, DataSource, DeviceApi};
use optinet::cache::{CacheSettings, MemoryStore, MonitoringCache};
use optinet::catalog::port_qualifiers;
use optinet::credentials::MemoryCredentialStore;
use optinet::mock::{data_reply, MockConnector};
use optinet::poller::{Poller, PollerConfig, TelemetryGroup};
use optinet::pool::{PoolSizes, WorkerPool};
use optinet::schema::StaticSchemaProvider;
use optinet::session::{SessionConfig, SessionManager};
use optinet::{Credentials, DataAccess, ParamValue, ReadRequest};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const EDFA: &str = include_str!("fixtures/lumentum-ote-edfa.xml");
const PORT: &str = include_str!("fixtures/lumentum-ote-port-optical.xml");

struct Site {
    poller: Poller,
    access: Arc<DataAccess>,
    cache: Arc<MonitoringCache>,
    mock: Arc<MockConnector>,
}

fn creds() -> Credentials {
    Credentials::new("10.0.0.1", 830, "admin", "secret")
}

fn gets(mock: &MockConnector) -> u32 {
    mock.sessions().iter().map(|s| s.get_count()).sum()
}

// Ports answer with their own number as input power; port 4103 is down.
fn device() -> MockConnector {
    MockConnector::new(|filter| {
        for port in [4101u32, 4102] {
            if filter.contains(&format!(";port={}", port)) {
                return Ok(data_reply(&[
                    ("input-power", &format!("-{}.5", port - 4100)),
                    ("output-power", "-1.0"),
                    ("operational-state", "in-service"),
                    ("timestamp", "1700000000"),
                ]));
            }
        }
        if filter.contains(";port=4103") {
            return Err(optinet::netconf::NetconfError::Closed);
        }
        Ok(data_reply(&[
            ("input-power", "8.0"),
            ("output-power", "20.0"),
            ("timestamp", "1700000000"),
        ]))
    })
}

fn site() -> Site {
    let mock = Arc::new(device());
    let schemas = StaticSchemaProvider::new()
        .with_template("edfa", EDFA)
        .unwrap()
        .with_template("optical-port", PORT)
        .unwrap();
    let sessions = Arc::new(SessionManager::new(mock.clone(), SessionConfig::default()));
    let access = Arc::new(DataAccess::new(Arc::new(schemas), sessions));
    let cache = Arc::new(MonitoringCache::new(
        Arc::new(MemoryStore::new()),
        CacheSettings::default(),
    ));
    let credentials = Arc::new(MemoryCredentialStore::new());
    credentials.insert("roadm-1", creds());
    let pool = Arc::new(
        WorkerPool::new(PoolSizes {
            device: 2,
            group: 4,
            entity: 4,
        })
        .unwrap(),
    );
    let config = PollerConfig {
        interval: Duration::from_secs(3600),
        groups: vec![TelemetryGroup::EdfaBooster, TelemetryGroup::OpticalPorts],
        mux_ports: vec![4101, 4102, 4103],
        demux_ports: Vec::new(),
        ..Default::default()
    };
    let poller = Poller::new(config, credentials, access.clone(), cache.clone(), pool);
    Site {
        poller,
        access,
        cache,
        mock,
    }
}

#[test]
fn test_round_then_cached_reads() {
    let site = site();
    assert!(site.poller.start_polling("roadm-1").unwrap());
    // The loop's first round may race with this one; both write the same values.
    let report = site.poller.poll_round();
    assert_eq!(report.devices, 1);
    assert_eq!(report.succeeded.len(), 1);
    site.poller.shutdown();

    let booster = site
        .cache
        .get_snapshot("roadm-1", "edfa-booster", "input-power")
        .unwrap()
        .unwrap();
    assert_eq!(booster.value, ParamValue::Number(8.0));
    assert_eq!(booster.timestamp_local, "2023-11-14T22:13:20.000");

    let mux = site
        .cache
        .get_grouped_snapshot("roadm-1", "optical-ports-mux")
        .unwrap()
        .unwrap();
    assert_eq!(mux.values.len(), 2);
    assert!(!mux.values.contains_key("4103"));

    // Port reads resolve through the grouped snapshot without device I/O.
    let before = gets(&site.mock);
    let mut request = ReadRequest::new("optical-port", ["input-power", "operational-state"]);
    request.qualifiers = port_qualifiers(4102);
    let read = cached_or_live(&site.cache, &site.access, &creds(), "roadm-1", &request).unwrap();
    assert_eq!(read.source, DataSource::Cache);
    assert_eq!(read.values["input-power"], Some(ParamValue::Number(-2.5)));
    assert_eq!(
        read.values["operational-state"],
        Some(ParamValue::Text("in-service".into()))
    );
    assert_eq!(gets(&site.mock), before);

    // A port missing from the snapshot falls through to the device.
    request.qualifiers = port_qualifiers(4101);
    request.parameters.push("custom-name".into());
    let live = cached_or_live(&site.cache, &site.access, &creds(), "roadm-1", &request).unwrap();
    assert_eq!(live.source, DataSource::Device);
    assert_eq!(gets(&site.mock), before + 1);
}

#[test]
fn test_api_read_prefers_cache() {
    let site = site();
    assert!(site.poller.tracked_devices().is_empty());

    site.cache
        .store_snapshot(
            "roadm-1",
            "edfa-booster",
            "output-power",
            Some(&ParamValue::Number(21.5)),
            None,
        )
        .unwrap();

    let api = DeviceApi::new(site.access.clone()).with_cache(site.cache.clone());
    let body = json!({
        "device_credentials": {"ip": "10.0.0.1", "port": 830, "username": "admin", "password": "secret"},
        "device_id": "roadm-1",
        "data_params": {
            "operation": "read",
            "component": "edfa",
            "parameter": "output-power",
            "query": {"edfa": {"dn": "ne=1;chassis=1;card=1;edfa=1"}}
        }
    });
    let reply = api.handle_json(&body.to_string(), None);
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body["data"]["output-power"], json!(21.5));
    assert!(reply.body["data"]["timestamp"].is_string());
    assert_eq!(gets(&site.mock), 0);
}
