// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Polling orchestrator.
//!
//! A [`Poller`] owns the set of tracked devices and one background loop
//! thread. Each round polls every tracked device on the device tier of the
//! [`WorkerPool`]; each device runs its telemetry groups on the group tier,
//! and groups fan out per port on the entity tier.
//!
//! Failures are contained at every level: a device, a group or a port that
//! fails is logged and skipped, and the round carries on. A round that
//! blows up as a whole delays the next one by `failure_backoff`.
//!
//! # Lifecycle
//!
//! - tracking the first device starts the loop
//! - untracking the last device signals the loop to stop
//! - [`Poller::shutdown`] (or drop) stops the loop and waits for it

mod groups;

pub use groups::{GroupOutcome, TelemetryGroup};

use crate::access::{DataAccess, WriteRequest};
use crate::cache::MonitoringCache;
use crate::catalog::{DEMUX_PORTS, MUX_PORTS};
use crate::credentials::{validate_device_id, CredentialStore, Credentials};
use crate::error::{Error, Result};
use crate::pool::{Task, Tier, WorkerPool};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use groups::DeviceContext;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Polling schedule and fan-out limits.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between rounds.
    pub interval: Duration,
    /// Pause after a round that failed as a whole.
    pub failure_backoff: Duration,
    /// Devices polled at once.
    pub device_limit: usize,
    /// Groups of one device polled at once.
    pub groups_per_device: usize,
    /// Ports of one group polled at once.
    pub entities_per_group: usize,
    pub mux_ports: Vec<u32>,
    pub demux_ports: Vec<u32>,
    pub groups: Vec<TelemetryGroup>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            failure_backoff: Duration::from_secs(5),
            device_limit: 32,
            groups_per_device: 4,
            entities_per_group: 8,
            mux_ports: MUX_PORTS.collect(),
            demux_ports: DEMUX_PORTS.collect(),
            groups: TelemetryGroup::ALL.to_vec(),
        }
    }
}

/// Result of polling one device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceReport {
    pub stored: usize,
    pub failed_entities: usize,
    pub failed_groups: Vec<TelemetryGroup>,
}

/// Result of one polling round.
#[derive(Debug, Clone, Default)]
pub struct RoundReport {
    pub devices: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub stored: usize,
    pub elapsed: Duration,
}

struct Shared {
    config: Arc<PollerConfig>,
    credentials: Arc<dyn CredentialStore>,
    access: Arc<DataAccess>,
    cache: Arc<MonitoringCache>,
    pool: Arc<WorkerPool>,
    devices: Mutex<BTreeSet<String>>,
}

impl Shared {
    fn poll_round(&self) -> RoundReport {
        let start = Instant::now();
        let devices: Vec<String> = self.devices.lock().iter().cloned().collect();

        let tasks: Vec<Task<Result<DeviceReport>>> = devices
            .iter()
            .map(|id| {
                let ctx = self.device_context(id);
                Box::new(move || ctx.and_then(poll_device)) as Task<Result<DeviceReport>>
            })
            .collect();

        let mut report = RoundReport {
            devices: devices.len(),
            ..Default::default()
        };
        let results = self
            .pool
            .run_all(Tier::Device, tasks, self.config.device_limit);
        for (device_id, result) in devices.into_iter().zip(results) {
            match result {
                Ok(Ok(device)) => {
                    report.stored += device.stored;
                    report.succeeded.push(device_id);
                }
                Ok(Err(e)) => {
                    tracing::error!(device = %device_id, error = %e, "device poll failed");
                    report.failed.push(device_id);
                }
                Err(e) => {
                    tracing::error!(device = %device_id, error = %e, "device poll aborted");
                    report.failed.push(device_id);
                }
            }
        }

        report.elapsed = start.elapsed();
        report
    }

    fn device_context(&self, device_id: &str) -> Result<Arc<DeviceContext>> {
        let credentials = self.credentials.get_credentials(device_id)?.ok_or_else(|| {
            Error::InvalidCredentials(format!("no credentials stored for device {}", device_id))
        })?;
        credentials.validate()?;
        Ok(Arc::new(DeviceContext {
            device_id: device_id.to_string(),
            credentials,
            access: Arc::clone(&self.access),
            cache: Arc::clone(&self.cache),
            pool: Arc::clone(&self.pool),
            config: Arc::clone(&self.config),
        }))
    }
}

fn poll_device(ctx: Arc<DeviceContext>) -> Result<DeviceReport> {
    let selected = ctx.config.groups.clone();
    let tasks: Vec<Task<Result<GroupOutcome>>> = selected
        .iter()
        .map(|&group| {
            let ctx = Arc::clone(&ctx);
            Box::new(move || groups::poll_group(&ctx, group)) as Task<Result<GroupOutcome>>
        })
        .collect();

    let mut report = DeviceReport::default();
    let results = ctx
        .pool
        .run_all(Tier::Group, tasks, ctx.config.groups_per_device);
    for (group, result) in selected.into_iter().zip(results) {
        match result {
            Ok(Ok(outcome)) => {
                report.stored += outcome.stored;
                report.failed_entities += outcome.failed;
                if outcome.failed > 0 {
                    tracing::warn!(
                        device = %ctx.device_id,
                        group = group.name(),
                        failed = outcome.failed,
                        "group polled with failures"
                    );
                }
            }
            Ok(Err(e)) => {
                tracing::error!(device = %ctx.device_id, group = group.name(), error = %e, "group poll failed");
                report.failed_groups.push(group);
            }
            Err(e) => {
                tracing::error!(device = %ctx.device_id, group = group.name(), error = %e, "group poll aborted");
                report.failed_groups.push(group);
            }
        }
    }

    if !groups_all_failed(&report, ctx.config.groups.len()) {
        tracing::debug!(device = %ctx.device_id, stored = report.stored, "device polled");
        return Ok(report);
    }
    Err(Error::Poller(format!(
        "every telemetry group failed for device {}",
        ctx.device_id
    )))
}

fn groups_all_failed(report: &DeviceReport, total: usize) -> bool {
    total > 0 && report.failed_groups.len() == total
}

struct LoopHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl LoopHandle {
    fn signal(&mut self) {
        drop(self.stop_tx.take());
    }

    fn is_stopping(&self) -> bool {
        self.stop_tx.is_none()
    }

    fn join(&mut self) {
        self.signal();
        if let Some(handle) = self.thread.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("polling loop exited abnormally");
            }
        }
    }
}

fn run_loop(shared: Arc<Shared>, stop_rx: Receiver<()>) {
    tracing::info!(interval_ms = shared.config.interval.as_millis() as u64, "polling loop started");
    loop {
        let wait = match panic::catch_unwind(AssertUnwindSafe(|| shared.poll_round())) {
            Ok(report) => {
                tracing::debug!(
                    devices = report.devices,
                    failed = report.failed.len(),
                    stored = report.stored,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "polling round complete"
                );
                shared.config.interval
            }
            Err(_) => {
                tracing::error!(
                    backoff_ms = shared.config.failure_backoff.as_millis() as u64,
                    "polling round failed unexpectedly"
                );
                shared.config.failure_backoff
            }
        };

        match stop_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    tracing::info!("polling loop stopped");
}

/// Owns device tracking and the background polling loop.
pub struct Poller {
    shared: Arc<Shared>,
    worker: Mutex<Option<LoopHandle>>,
}

impl Poller {
    pub fn new(
        config: PollerConfig,
        credentials: Arc<dyn CredentialStore>,
        access: Arc<DataAccess>,
        cache: Arc<MonitoringCache>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                credentials,
                access,
                cache,
                pool,
                devices: Mutex::new(BTreeSet::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.shared.config
    }

    /// Track a device, starting the loop if needed. Returns `false` when the
    /// device was already tracked.
    pub fn start_polling(&self, device_id: &str) -> Result<bool> {
        validate_device_id(device_id)?;

        let mut worker = self.worker.lock();
        let added = self.shared.devices.lock().insert(device_id.to_string());
        if added {
            tracing::info!(device = device_id, "polling started");
        }

        match worker.as_mut() {
            Some(handle) if !handle.is_stopping() => return Ok(added),
            Some(handle) => handle.join(),
            None => {}
        }

        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let shared = Arc::clone(&self.shared);
        let thread = thread::Builder::new()
            .name("optinet-poller".into())
            .spawn(move || run_loop(shared, stop_rx))
            .map_err(|e| Error::Poller(format!("failed to spawn polling loop: {}", e)))?;
        *worker = Some(LoopHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        });
        Ok(added)
    }

    /// Stop tracking a device. The loop is told to stop once nothing is
    /// tracked; a round already in progress finishes first.
    pub fn stop_polling(&self, device_id: &str) -> bool {
        let mut worker = self.worker.lock();
        let mut devices = self.shared.devices.lock();
        let removed = devices.remove(device_id);
        if removed {
            tracing::info!(device = device_id, "polling stopped");
        }
        if devices.is_empty() {
            if let Some(handle) = worker.as_mut() {
                handle.signal();
            }
        }
        removed
    }

    /// Track every device of the credential store. Returns how many were
    /// newly tracked; invalid ids are skipped.
    pub fn start_polling_all_devices(&self) -> Result<usize> {
        let mut started = 0;
        for device_id in self.shared.credentials.list_device_ids()? {
            match self.start_polling(&device_id) {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e @ Error::InvalidDeviceId(_)) => {
                    tracing::warn!(device = %device_id, error = %e, "skipping device");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(devices = started, "polling all stored devices");
        Ok(started)
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_stopping())
    }

    pub fn tracked_devices(&self) -> Vec<String> {
        self.shared.devices.lock().iter().cloned().collect()
    }

    /// Poll every tracked device once, on the calling thread.
    pub fn poll_round(&self) -> RoundReport {
        self.shared.poll_round()
    }

    /// Apply one parameter on a device. Failures are logged, never raised.
    pub fn configure_device_parameter(
        &self,
        credentials: &Credentials,
        device_id: Option<&str>,
        request: &WriteRequest,
    ) -> bool {
        let device = device_id.unwrap_or("-");
        if let Err(e) = credentials.validate() {
            tracing::error!(device, error = %e, "rejected configuration request");
            return false;
        }

        match self.shared.access.edit_data(credentials, device_id, request) {
            Ok(()) => {
                tracing::info!(
                    device,
                    component = %request.component,
                    parameter = %request.parameter,
                    "parameter configured"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    device,
                    component = %request.component,
                    parameter = %request.parameter,
                    error = %e,
                    "failed to configure parameter"
                );
                false
            }
        }
    }

    /// Untrack everything, stop the loop and wait for it.
    pub fn shutdown(&self) {
        let handle = {
            let mut worker = self.worker.lock();
            self.shared.devices.lock().clear();
            worker.take()
        };
        if let Some(mut handle) = handle {
            handle.join();
            tracing::info!("poller shut down");
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSettings, GroupedEntry, ManualClock, MemoryStore};
    use crate::compiler::ParamValue;
    use crate::credentials::MemoryCredentialStore;
    use crate::mock::{data_reply, error_reply, ok_reply, MockConnector};
    use crate::pool::PoolSizes;
    use crate::schema::StaticSchemaProvider;
    use crate::session::{SessionConfig, SessionManager};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // A minute after the device time the fixtures report.
    const NOW_MS: i64 = 1_700_000_060_000;

    const EDFA: &str = include_str!("../../tests/fixtures/lumentum-ote-edfa.xml");
    const PORT: &str = include_str!("../../tests/fixtures/lumentum-ote-port-optical.xml");

    struct Harness {
        poller: Poller,
        cache: Arc<MonitoringCache>,
        store: Arc<MemoryCredentialStore>,
        mock: Arc<MockConnector>,
    }

    fn creds() -> Credentials {
        Credentials::new("10.0.0.1", 830, "admin", "secret")
    }

    fn harness(mock: MockConnector, config: PollerConfig) -> Harness {
        let mock = Arc::new(mock);
        let schemas = StaticSchemaProvider::new()
            .with_template("edfa", EDFA)
            .unwrap()
            .with_template("optical-port", PORT)
            .unwrap();
        let sessions = Arc::new(SessionManager::new(mock.clone(), SessionConfig::default()));
        let access = Arc::new(DataAccess::new(Arc::new(schemas), sessions));
        let cache = Arc::new(MonitoringCache::with_clock(
            Arc::new(MemoryStore::new()),
            CacheSettings::default(),
            Arc::new(ManualClock::new(NOW_MS)),
        ));
        let store = Arc::new(MemoryCredentialStore::new());
        store.insert("d1", creds());
        let pool = Arc::new(
            WorkerPool::new(PoolSizes {
                device: 2,
                group: 4,
                entity: 8,
            })
            .unwrap(),
        );
        let poller = Poller::new(config, store.clone(), access, cache.clone(), pool);
        Harness {
            poller,
            cache,
            store,
            mock,
        }
    }

    fn only(groups: &[TelemetryGroup], mux: &[u32]) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(3600),
            groups: groups.to_vec(),
            mux_ports: mux.to_vec(),
            demux_ports: Vec::new(),
            ..Default::default()
        }
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let h = harness(
            MockConnector::with_leaves(&[("input-power", "1.0")]),
            only(&[TelemetryGroup::EdfaBooster], &[]),
        );
        assert!(!h.poller.is_running());
        assert!(h.poller.start_polling("d1").unwrap());
        assert!(!h.poller.start_polling("d1").unwrap());
        assert!(h.poller.is_running());
        assert_eq!(h.poller.tracked_devices(), vec!["d1"]);

        assert!(h.poller.stop_polling("d1"));
        assert!(!h.poller.stop_polling("d1"));
        assert!(!h.poller.is_running());

        // restart after a stop spawns a fresh loop
        assert!(h.poller.start_polling("d1").unwrap());
        assert!(h.poller.is_running());
        h.poller.shutdown();
        assert!(!h.poller.is_running());
        assert!(h.poller.tracked_devices().is_empty());
    }

    #[test]
    fn test_invalid_device_id_rejected() {
        let h = harness(MockConnector::with_leaves(&[]), only(&[], &[]));
        assert!(matches!(
            h.poller.start_polling(""),
            Err(Error::InvalidDeviceId(_))
        ));
        assert!(!h.poller.is_running());
    }

    #[test]
    fn test_edfa_round_stores_snapshots() {
        let h = harness(
            MockConnector::with_leaves(&[
                ("input-power", "8.0"),
                ("output-power", "20.0"),
                ("timestamp", "1700000000"),
            ]),
            only(&[TelemetryGroup::EdfaBooster], &[]),
        );
        h.poller.shared.devices.lock().insert("d1".into());

        let report = h.poller.poll_round();
        assert_eq!(report.devices, 1);
        assert_eq!(report.succeeded, vec!["d1"]);
        assert!(report.stored >= 2);

        let record = h
            .cache
            .get_snapshot("d1", "edfa-booster", "input-power")
            .unwrap()
            .unwrap();
        assert_eq!(record.value, ParamValue::Number(8.0));
        let history = h
            .cache
            .get_history("d1", "edfa-booster", "output-power", 5)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].score, 1_700_000_000_000);
    }

    #[test]
    fn test_missing_leaves_keep_last_value() {
        let rounds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&rounds);
        let mock = MockConnector::new(move |request| {
            if request.contains("port=") {
                return Ok(data_reply(&[("input-power", "-3.0")]));
            }
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(data_reply(&[
                    ("input-power", "8.0"),
                    ("output-power", "20.0"),
                    ("timestamp", "1700000000"),
                ]))
            } else {
                Ok(data_reply(&[
                    ("input-power", "8.5"),
                    ("timestamp", "1700000030"),
                ]))
            }
        });
        let h = harness(
            mock,
            only(
                &[TelemetryGroup::EdfaBooster, TelemetryGroup::OpticalPorts],
                &[4101],
            ),
        );
        h.poller.shared.devices.lock().insert("d1".into());

        h.poller.poll_round();
        h.poller.poll_round();
        assert_eq!(rounds.load(Ordering::SeqCst), 2);

        let input = h
            .cache
            .get_snapshot("d1", "edfa-booster", "input-power")
            .unwrap()
            .unwrap();
        assert_eq!(input.value, ParamValue::Number(8.5));
        let output = h
            .cache
            .get_snapshot("d1", "edfa-booster", "output-power")
            .unwrap()
            .unwrap();
        assert_eq!(output.value, ParamValue::Number(20.0));

        let history = h
            .cache
            .get_history("d1", "edfa-booster", "output-power", 10)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            h.cache
                .get_history("d1", "edfa-booster", "input-power", 10)
                .unwrap()
                .len(),
            2
        );

        assert!(h
            .cache
            .get_snapshot("d1", "edfa-booster", "back-reflection-power")
            .unwrap()
            .is_none());

        let group = h
            .cache
            .get_grouped_snapshot("d1", "optical-ports-mux")
            .unwrap()
            .unwrap();
        let entry = &group.values["4101"];
        assert_eq!(entry.values.len(), 1);
        assert_eq!(entry.values["input-power"], ParamValue::Number(-3.0));
    }

    #[test]
    fn test_failing_port_is_isolated() {
        let mock = MockConnector::new(|request| {
            if request.contains("port=4103") {
                Ok(error_reply("operation-failed", "port unavailable"))
            } else {
                Ok(data_reply(&[("input-power", "-2.5"), ("output-power", "1.5")]))
            }
        });
        let h = harness(
            mock,
            only(&[TelemetryGroup::OpticalPorts], &[4101, 4102, 4103, 4104, 4105]),
        );

        let mut previous = BTreeMap::new();
        let mut stale = GroupedEntry::default();
        stale.values.insert("input-power".into(), ParamValue::Number(99.0));
        previous.insert("4103".to_string(), stale.clone());
        h.cache
            .store_grouped("d1", "optical-ports-mux", &previous, None)
            .unwrap();

        h.poller.shared.devices.lock().insert("d1".into());
        let report = h.poller.poll_round();
        assert_eq!(report.succeeded, vec!["d1"]);
        assert_eq!(report.stored, 4);

        let group = h
            .cache
            .get_grouped_snapshot("d1", "optical-ports-mux")
            .unwrap()
            .unwrap();
        assert_eq!(group.values.len(), 5);
        assert_eq!(group.values["4103"], stale);
        for port in ["4101", "4102", "4104", "4105"] {
            assert_eq!(
                group.values[port].values["input-power"],
                ParamValue::Number(-2.5)
            );
        }
        assert!(h
            .cache
            .get_grouped_snapshot("d1", "optical-ports-demux")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_device_without_credentials_does_not_stop_others() {
        let h = harness(
            MockConnector::with_leaves(&[("input-power", "3.0")]),
            only(&[TelemetryGroup::EdfaBooster], &[]),
        );
        {
            let mut devices = h.poller.shared.devices.lock();
            devices.insert("d1".into());
            devices.insert("ghost".into());
        }

        let report = h.poller.poll_round();
        assert_eq!(report.devices, 2);
        assert_eq!(report.succeeded, vec!["d1"]);
        assert_eq!(report.failed, vec!["ghost"]);
    }

    #[test]
    fn test_operational_config_group() {
        let h = harness(
            MockConnector::with_leaves(&[("target-gain", "15.5"), ("custom-name", "east")]),
            only(&[TelemetryGroup::OperationalConfig], &[4101]),
        );
        h.poller.shared.devices.lock().insert("d1".into());
        let report = h.poller.poll_round();
        assert_eq!(report.succeeded, vec!["d1"]);

        let gain = h
            .cache
            .get_operational_config("d1", "edfa-booster", "target-gain")
            .unwrap()
            .unwrap();
        assert_eq!(gain.value, ParamValue::Number(15.5));
        let name = h
            .cache
            .get_operational_config("d1", "optical-port-mux-4101", "custom-name")
            .unwrap()
            .unwrap();
        assert_eq!(name.value, ParamValue::Text("east".into()));
    }

    #[test]
    fn test_start_polling_all_devices() {
        let h = harness(
            MockConnector::with_leaves(&[("input-power", "1.0")]),
            only(&[TelemetryGroup::EdfaBooster], &[]),
        );
        h.store.insert("d2", creds());
        assert_eq!(h.poller.start_polling_all_devices().unwrap(), 2);
        assert_eq!(h.poller.start_polling_all_devices().unwrap(), 0);
        assert_eq!(h.poller.tracked_devices(), vec!["d1", "d2"]);
        h.poller.shutdown();
    }

    #[test]
    fn test_configure_device_parameter() {
        let mock = MockConnector::new(|request| {
            if request.contains("target-gain") {
                Ok(ok_reply())
            } else {
                Ok(error_reply("invalid-value", "read-only"))
            }
        });
        let h = harness(mock, only(&[], &[]));
        let write = WriteRequest::new("edfa", "target-gain", "17")
            .qualify("edfa", "dn", "ne=1;chassis=1;card=1;edfa=1");
        assert!(h.poller.configure_device_parameter(&creds(), Some("d1"), &write));
        assert_eq!(h.mock.edits().len(), 1);

        let rejected = WriteRequest::new("edfa", "custom-name", "x");
        assert!(!h.poller.configure_device_parameter(&creds(), Some("d1"), &rejected));

        let bad = Credentials::new("", 830, "admin", "secret");
        assert!(!h.poller.configure_device_parameter(&bad, Some("d1"), &write));
        assert_eq!(h.mock.edits().len(), 2);
    }
}
