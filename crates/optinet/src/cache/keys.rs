// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cache key layout.

pub fn device_prefix(device_id: &str) -> String {
    format!("device:{}:", device_id)
}

pub fn monitoring_prefix(device_id: &str) -> String {
    format!("device:{}:monitoring:", device_id)
}

pub fn monitoring(device_id: &str, component: &str, parameter: &str) -> String {
    format!("device:{}:monitoring:{}:{}", device_id, component, parameter)
}

pub fn timeseries(device_id: &str, component: &str, parameter: &str) -> String {
    format!("device:{}:timeseries:{}:{}", device_id, component, parameter)
}

/// Current grouped snapshot, e.g. `device:d1:monitoring:optical-ports-mux:grouped`.
pub fn grouped(device_id: &str, group: &str) -> String {
    monitoring(device_id, group, "grouped")
}

pub fn grouped_timeseries(device_id: &str, group: &str) -> String {
    timeseries(device_id, group, "grouped")
}

pub fn running(device_id: &str, component: &str, parameter: &str) -> String {
    format!("device:{}:running:{}:{}", device_id, component, parameter)
}

pub fn operational(device_id: &str, component: &str, parameter: &str) -> String {
    format!("device:{}:operational:{}:{}", device_id, component, parameter)
}
