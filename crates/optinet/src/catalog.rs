// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device vocabulary: component kinds, leaf names, distinguished names and
//! the parameter sets polled for each entity.

use crate::compiler::Qualifiers;
use regex::Regex;
use std::ops::RangeInclusive;
use std::sync::OnceLock;

pub const COMPONENT_EDFA: &str = "edfa";
pub const COMPONENT_OPTICAL_PORT: &str = "optical-port";

/// Tag the port distinguished name is injected under.
pub const PORT_QUALIFIER_TAG: &str = "physical-port";

pub mod edfa {
    pub const INPUT_POWER: &str = "input-power";
    pub const OUTPUT_POWER: &str = "output-power";
    pub const ENTITY_DESCRIPTION: &str = "entity-description";
    pub const OPERATIONAL_STATE: &str = "operational-state";
    pub const MEASURED_GAIN: &str = "measured-gain";
    pub const BACK_REFLECTION_POWER: &str = "back-reflection-power";
    pub const OPTICAL_RETURN_LOSS: &str = "optical-return-loss";
    pub const ALS_DISABLED_SECONDS_REMAINING: &str = "als-disabled-seconds-remaining";

    pub const CUSTOM_NAME: &str = "custom-name";
    pub const MAINTENANCE_STATE: &str = "maintenance-state";
    pub const CONTROL_MODE: &str = "control-mode";
    pub const GAIN_SWITCH_MODE: &str = "gain-switch-mode";
    pub const TARGET_GAIN: &str = "target-gain";
    pub const TARGET_POWER: &str = "target-power";
    pub const TARGET_GAIN_TILT: &str = "target-gain-tilt";
    pub const LOS_SHUTDOWN: &str = "los-shutdown";
    pub const FORCE_APR: &str = "force-apr";
    pub const OPTICAL_LOO_THRESHOLD: &str = "optical-loo-threshold";
    pub const OPTICAL_LOO_HYSTERESIS: &str = "optical-loo-hysteresis";
    pub const OPTICAL_RETURN_LOSS_THRESHOLD: &str = "optical-return-loss-threshold";
    pub const OPTICAL_RETURN_LOSS_HYSTERESIS: &str = "optical-return-loss-hysteresis";
    pub const INPUT_OVERLOAD_THRESHOLD: &str = "input-overload-threshold";
    pub const INPUT_OVERLOAD_HYSTERESIS: &str = "input-overload-hysteresis";
    pub const INPUT_LOW_DEGRADE_THRESHOLD: &str = "input-low-degrade-threshold";
    pub const INPUT_LOW_DEGRADE_HYSTERESIS: &str = "input-low-degrade-hysteresis";
    pub const OPTICAL_LOS_THRESHOLD: &str = "optical-los-threshold";
    pub const OPTICAL_LOS_HYSTERESIS: &str = "optical-los-hysteresis";
    pub const ORL_THRESHOLD_WARNING_THRESHOLD: &str = "orl-threshold-warning-threshold";
    pub const ORL_THRESHOLD_WARNING_HYSTERESIS: &str = "orl-threshold-warning-hysteresis";
}

pub mod port {
    pub const ENTITY_DESCRIPTION: &str = "entity-description";
    pub const OPERATIONAL_STATE: &str = "operational-state";
    pub const INPUT_POWER: &str = "input-power";
    pub const OUTPUT_POWER: &str = "output-power";

    pub const CUSTOM_NAME: &str = "custom-name";
    pub const MAINTENANCE_STATE: &str = "maintenance-state";
    pub const INPUT_LOW_DEGRADE_THRESHOLD: &str = "input-low-degrade-threshold";
    pub const INPUT_LOW_DEGRADE_HYSTERESIS: &str = "input-low-degrade-hysteresis";
    pub const OPTICAL_LOS_THRESHOLD: &str = "optical-los-threshold";
    pub const OPTICAL_LOS_HYSTERESIS: &str = "optical-los-hysteresis";
}

/// Amplifier position on the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdfaRole {
    Booster,
    Preamplifier,
}

impl EdfaRole {
    pub const ALL: [EdfaRole; 2] = [EdfaRole::Booster, EdfaRole::Preamplifier];

    pub fn index(&self) -> u32 {
        match self {
            EdfaRole::Booster => 1,
            EdfaRole::Preamplifier => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EdfaRole::Booster => "booster",
            EdfaRole::Preamplifier => "preamplifier",
        }
    }

    /// Cache component label, e.g. `edfa-booster`.
    pub fn label(&self) -> String {
        format!("edfa-{}", self.name())
    }

    pub fn dn(&self) -> String {
        format!("ne=1;chassis=1;card=1;edfa={}", self.index())
    }

    pub fn qualifiers(&self) -> Qualifiers {
        qualifier(COMPONENT_EDFA, &self.dn())
    }

    /// State leaves polled for monitoring.
    pub fn monitoring_parameters(&self) -> &'static [&'static str] {
        use edfa::*;
        match self {
            EdfaRole::Booster => &[
                INPUT_POWER,
                OUTPUT_POWER,
                MEASURED_GAIN,
                BACK_REFLECTION_POWER,
                OPTICAL_RETURN_LOSS,
                ALS_DISABLED_SECONDS_REMAINING,
                ENTITY_DESCRIPTION,
                OPERATIONAL_STATE,
            ],
            EdfaRole::Preamplifier => &[
                INPUT_POWER,
                OUTPUT_POWER,
                MEASURED_GAIN,
                ENTITY_DESCRIPTION,
                OPERATIONAL_STATE,
            ],
        }
    }

    /// Config leaves polled as operational config.
    pub fn config_parameters(&self) -> &'static [&'static str] {
        use edfa::*;
        match self {
            EdfaRole::Booster => &[
                TARGET_GAIN,
                TARGET_POWER,
                CONTROL_MODE,
                CUSTOM_NAME,
                MAINTENANCE_STATE,
                GAIN_SWITCH_MODE,
                TARGET_GAIN_TILT,
                LOS_SHUTDOWN,
                OPTICAL_LOO_THRESHOLD,
                OPTICAL_LOO_HYSTERESIS,
                INPUT_OVERLOAD_THRESHOLD,
                INPUT_OVERLOAD_HYSTERESIS,
                INPUT_LOW_DEGRADE_THRESHOLD,
                INPUT_LOW_DEGRADE_HYSTERESIS,
                OPTICAL_LOS_THRESHOLD,
                OPTICAL_LOS_HYSTERESIS,
                ORL_THRESHOLD_WARNING_THRESHOLD,
                ORL_THRESHOLD_WARNING_HYSTERESIS,
                FORCE_APR,
            ],
            EdfaRole::Preamplifier => &[
                TARGET_GAIN,
                TARGET_POWER,
                CONTROL_MODE,
                CUSTOM_NAME,
                MAINTENANCE_STATE,
                GAIN_SWITCH_MODE,
                TARGET_GAIN_TILT,
                LOS_SHUTDOWN,
                OPTICAL_LOO_THRESHOLD,
                OPTICAL_LOO_HYSTERESIS,
                INPUT_OVERLOAD_THRESHOLD,
                INPUT_OVERLOAD_HYSTERESIS,
                FORCE_APR,
            ],
        }
    }
}

/// Side of the mux/demux filter a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortSide {
    Mux,
    Demux,
}

impl PortSide {
    pub const ALL: [PortSide; 2] = [PortSide::Mux, PortSide::Demux];

    pub fn name(&self) -> &'static str {
        match self {
            PortSide::Mux => "mux",
            PortSide::Demux => "demux",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mux" => Some(PortSide::Mux),
            "demux" => Some(PortSide::Demux),
            _ => None,
        }
    }

    /// Grouped snapshot name, e.g. `optical-ports-mux`.
    pub fn group(&self) -> String {
        format!("optical-ports-{}", self.name())
    }

    /// Per-port component label, e.g. `optical-port-mux-4101`.
    pub fn port_label(&self, port: u32) -> String {
        format!("optical-port-{}-{}", self.name(), port)
    }

    pub fn default_ports(&self) -> RangeInclusive<u32> {
        match self {
            PortSide::Mux => MUX_PORTS,
            PortSide::Demux => DEMUX_PORTS,
        }
    }
}

pub const MUX_PORTS: RangeInclusive<u32> = 4101..=4120;
pub const DEMUX_PORTS: RangeInclusive<u32> = 5201..=5220;

/// Leaves stored per port in the grouped snapshots.
pub const PORT_MONITORING_PARAMETERS: [&str; 4] = [
    port::INPUT_POWER,
    port::OUTPUT_POWER,
    port::ENTITY_DESCRIPTION,
    port::OPERATIONAL_STATE,
];

/// Port config leaves polled as operational config.
pub const PORT_CONFIG_PARAMETERS: [&str; 6] = [
    port::CUSTOM_NAME,
    port::MAINTENANCE_STATE,
    port::INPUT_LOW_DEGRADE_THRESHOLD,
    port::INPUT_LOW_DEGRADE_HYSTERESIS,
    port::OPTICAL_LOS_THRESHOLD,
    port::OPTICAL_LOS_HYSTERESIS,
];

pub fn port_dn(port: u32) -> String {
    format!("ne=1;chassis=1;card=1;port={}", port)
}

pub fn port_qualifiers(port: u32) -> Qualifiers {
    qualifier(PORT_QUALIFIER_TAG, &port_dn(port))
}

fn port_label_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^optical-port-(mux|demux)-(\d{1,9})$").ok())
        .as_ref()
}

/// Split `optical-port-mux-4101` into its side and port number.
pub fn parse_port_label(component: &str) -> Option<(PortSide, u32)> {
    let caps = port_label_pattern()?.captures(component)?;
    Some((PortSide::parse(&caps[1])?, caps[2].parse().ok()?))
}

/// Cache label of the entity a request addresses.
///
/// Requests qualified with a known amplifier or port distinguished name map
/// to the labels the poller stores under (`edfa-booster`,
/// `optical-port-mux-4101`); anything else keeps the component kind.
pub fn entity_label(component: &str, qualifiers: &Qualifiers) -> String {
    let dn = |tag: &str| qualifiers.get(tag).and_then(|q| q.get("dn"));

    if component == COMPONENT_EDFA {
        if let Some(role) = dn(COMPONENT_EDFA)
            .and_then(|dn| EdfaRole::ALL.into_iter().find(|r| &r.dn() == dn))
        {
            return role.label();
        }
    } else if component == COMPONENT_OPTICAL_PORT {
        let port = dn(PORT_QUALIFIER_TAG)
            .and_then(|dn| dn.rsplit_once(";port="))
            .and_then(|(_, n)| n.parse::<u32>().ok());
        if let Some(port) = port {
            if let Some(side) = PortSide::ALL
                .into_iter()
                .find(|s| s.default_ports().contains(&port))
            {
                return side.port_label(port);
            }
        }
    }
    component.to_string()
}

fn qualifier(tag: &str, dn: &str) -> Qualifiers {
    let mut q = Qualifiers::new();
    q.entry(tag.to_string())
        .or_default()
        .insert("dn".to_string(), dn.to_string());
    q
}
