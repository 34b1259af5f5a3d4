// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry groups polled for every device each round.

use super::PollerConfig;
use crate::access::{DataAccess, ReadRequest, ReadResult};
use crate::cache::{GroupedEntry, MonitoringCache};
use crate::catalog::{
    port_qualifiers, EdfaRole, PortSide, COMPONENT_EDFA, COMPONENT_OPTICAL_PORT,
    PORT_CONFIG_PARAMETERS, PORT_MONITORING_PARAMETERS,
};
use crate::compiler::Qualifiers;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::pool::{Task, Tier, WorkerPool};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A set of parameters polled together for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TelemetryGroup {
    EdfaBooster,
    EdfaPreamplifier,
    OpticalPorts,
    OperationalConfig,
}

impl TelemetryGroup {
    pub const ALL: [TelemetryGroup; 4] = [
        TelemetryGroup::EdfaBooster,
        TelemetryGroup::EdfaPreamplifier,
        TelemetryGroup::OpticalPorts,
        TelemetryGroup::OperationalConfig,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TelemetryGroup::EdfaBooster => "edfa-booster",
            TelemetryGroup::EdfaPreamplifier => "edfa-preamplifier",
            TelemetryGroup::OpticalPorts => "optical-ports",
            TelemetryGroup::OperationalConfig => "operational-config",
        }
    }
}

/// What one group produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupOutcome {
    /// Values (or port entries) written to the cache.
    pub stored: usize,
    /// Entities that failed inside the group.
    pub failed: usize,
}

/// Everything a group needs, shared with its entity tasks.
pub(crate) struct DeviceContext {
    pub device_id: String,
    pub credentials: Credentials,
    pub access: Arc<DataAccess>,
    pub cache: Arc<MonitoringCache>,
    pub pool: Arc<WorkerPool>,
    pub config: Arc<PollerConfig>,
}

impl DeviceContext {
    fn read(
        &self,
        component: &str,
        parameters: &[&str],
        qualifiers: Qualifiers,
    ) -> Result<ReadResult> {
        let mut request = ReadRequest::new(component, parameters.iter().copied());
        request.qualifiers = qualifiers;
        self.access
            .get_data(&self.credentials, Some(&self.device_id), &request)
    }

    fn ports(&self, side: PortSide) -> &[u32] {
        match side {
            PortSide::Mux => &self.config.mux_ports,
            PortSide::Demux => &self.config.demux_ports,
        }
    }
}

pub(crate) fn poll_group(ctx: &Arc<DeviceContext>, group: TelemetryGroup) -> Result<GroupOutcome> {
    match group {
        TelemetryGroup::EdfaBooster => poll_edfa(ctx, EdfaRole::Booster),
        TelemetryGroup::EdfaPreamplifier => poll_edfa(ctx, EdfaRole::Preamplifier),
        TelemetryGroup::OpticalPorts => poll_ports(ctx),
        TelemetryGroup::OperationalConfig => poll_operational(ctx),
    }
}

// One snapshot per monitored parameter, scored by device time.
fn poll_edfa(ctx: &DeviceContext, role: EdfaRole) -> Result<GroupOutcome> {
    let result = ctx.read(COMPONENT_EDFA, role.monitoring_parameters(), role.qualifiers())?;
    let label = role.label();

    let mut outcome = GroupOutcome::default();
    // Leaves the device left out keep their last cached value.
    for (parameter, value) in result.present() {
        ctx.cache.store_snapshot(
            &ctx.device_id,
            &label,
            parameter,
            Some(value),
            Some(&result.timestamp),
        )?;
        outcome.stored += 1;
    }
    Ok(outcome)
}

fn poll_port(ctx: &DeviceContext, port: u32) -> Result<GroupedEntry> {
    let result = ctx.read(
        COMPONENT_OPTICAL_PORT,
        &PORT_MONITORING_PARAMETERS,
        port_qualifiers(port),
    )?;
    Ok(GroupedEntry {
        values: result
            .present()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        timestamp: result.device_time.then_some(result.timestamp),
    })
}

/// Mux and demux grouped snapshots. Ports that fail this round keep the
/// entry they had in the previous snapshot.
fn poll_ports(ctx: &Arc<DeviceContext>) -> Result<GroupOutcome> {
    let mut outcome = GroupOutcome::default();

    for side in PortSide::ALL {
        let ports = ctx.ports(side).to_vec();
        if ports.is_empty() {
            continue;
        }

        let tasks: Vec<Task<Result<GroupedEntry>>> = ports
            .iter()
            .map(|&port| {
                let ctx = Arc::clone(ctx);
                Box::new(move || poll_port(&ctx, port)) as Task<Result<GroupedEntry>>
            })
            .collect();
        let results = ctx
            .pool
            .run_all(Tier::Entity, tasks, ctx.config.entities_per_group);

        let group = side.group();
        let previous = ctx.cache.get_grouped_snapshot(&ctx.device_id, &group)?;
        let mut entries = BTreeMap::new();
        let mut fresh = 0;

        for (port, result) in ports.iter().zip(results) {
            let key = port.to_string();
            let failure = match result {
                Ok(Ok(entry)) => {
                    entries.insert(key, entry);
                    fresh += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };

            tracing::debug!(device = %ctx.device_id, port, error = %failure, "port poll failed");
            outcome.failed += 1;
            if let Some(old) = previous.as_ref().and_then(|p| p.values.get(&key)) {
                entries.insert(key, old.clone());
            }
        }

        if fresh == 0 {
            tracing::warn!(device = %ctx.device_id, group = %group, "no port answered, snapshot left unchanged");
            continue;
        }
        ctx.cache
            .store_grouped(&ctx.device_id, &group, &entries, None)?;
        outcome.stored += fresh;
    }

    Ok(outcome)
}

/// Store every reported config leaf of one entity as operational config.
fn store_operational(
    ctx: &DeviceContext,
    label: &str,
    parameters: &[&str],
    qualifiers: Qualifiers,
    component: &str,
) -> Result<usize> {
    let result = ctx.read(component, parameters, qualifiers)?;
    let mut stored = 0;
    for (parameter, value) in result.present() {
        ctx.cache
            .store_operational_config(&ctx.device_id, label, parameter, value, None)?;
        stored += 1;
    }
    Ok(stored)
}

/// Config leaves of both amplifiers and every port, stamped with server time.
fn poll_operational(ctx: &Arc<DeviceContext>) -> Result<GroupOutcome> {
    let mut tasks: Vec<Task<Result<usize>>> = Vec::new();

    for role in EdfaRole::ALL {
        let ctx = Arc::clone(ctx);
        tasks.push(Box::new(move || {
            store_operational(
                &ctx,
                &role.label(),
                role.config_parameters(),
                role.qualifiers(),
                COMPONENT_EDFA,
            )
        }));
    }
    for side in PortSide::ALL {
        for &port in ctx.ports(side) {
            let ctx = Arc::clone(ctx);
            tasks.push(Box::new(move || {
                store_operational(
                    &ctx,
                    &side.port_label(port),
                    &PORT_CONFIG_PARAMETERS,
                    port_qualifiers(port),
                    COMPONENT_OPTICAL_PORT,
                )
            }));
        }
    }

    let total = tasks.len();
    let mut outcome = GroupOutcome::default();
    let mut last_error = None;
    for result in ctx
        .pool
        .run_all(Tier::Entity, tasks, ctx.config.entities_per_group)
    {
        match result {
            Ok(Ok(stored)) => outcome.stored += stored,
            Ok(Err(e)) => {
                tracing::debug!(device = %ctx.device_id, error = %e, "operational config read failed");
                outcome.failed += 1;
                last_error = Some(e.to_string());
            }
            Err(e) => {
                outcome.failed += 1;
                last_error = Some(e.to_string());
            }
        }
    }

    match last_error {
        Some(reason) if outcome.failed == total => Err(Error::Poller(format!(
            "every operational config read failed: {}",
            reason
        ))),
        _ => Ok(outcome),
    }
}
