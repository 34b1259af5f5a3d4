// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reply decoding.
//!
//! Replies are matched on local names only, so whatever prefixes the device
//! chose never matter. For each requested parameter the first element of
//! that name in document order supplies the value.

use crate::error::{Error, Result};
use crate::timestamp::Timestamp;
use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Element names probed, in order, for a device-reported time.
pub const TIMESTAMP_CANDIDATES: [&str; 6] = [
    "timestamp",
    "time",
    "event-time",
    "time-stamp",
    "last-changed",
    "last-updated",
];

/// A decoded leaf value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// Numeric when the text parses as a finite number, otherwise text.
    pub fn from_text(text: &str) -> Self {
        match text.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => ParamValue::Number(n),
            _ => ParamValue::Text(text.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Text(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(n: f64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

/// Flattened view of a reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedReply {
    /// Every requested parameter; `None` when absent or empty.
    pub values: BTreeMap<String, Option<ParamValue>>,
    /// Requested parameters whose element exists in the reply, empty or not.
    pub found: BTreeSet<String>,
    /// Namespace URI seen for each local name before matching.
    pub namespaces: HashMap<String, String>,
    /// Device-reported time, if any candidate element carried one.
    pub timestamp: Option<Timestamp>,
}

/// Decode `parameters` out of a reply (or any XML document).
pub fn decode_reply<S: AsRef<str>>(xml: &str, parameters: &[S]) -> Result<DecodedReply> {
    let doc = Document::parse(xml).map_err(|e| Error::Protocol(format!("unparsable reply: {}", e)))?;
    let root = doc.root_element();

    let mut decoded = DecodedReply {
        namespaces: record_namespaces(root),
        timestamp: timestamp_in(root),
        ..Default::default()
    };

    for name in parameters.iter().map(AsRef::as_ref) {
        let element = first_named(root, name);
        if element.is_some() {
            decoded.found.insert(name.to_string());
        }
        let value = element
            .and_then(|el| el.text())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ParamValue::from_text);
        decoded.values.insert(name.to_string(), value);
    }

    Ok(decoded)
}

/// Probe [`TIMESTAMP_CANDIDATES`]; digit-only text becomes an integer.
pub fn extract_timestamp(xml: &str) -> Result<Option<Timestamp>> {
    let doc = Document::parse(xml).map_err(|e| Error::Protocol(format!("unparsable reply: {}", e)))?;
    Ok(timestamp_in(doc.root_element()))
}

fn timestamp_in(root: Node<'_, '_>) -> Option<Timestamp> {
    TIMESTAMP_CANDIDATES.iter().find_map(|candidate| {
        let text = first_named(root, candidate)?.text()?.trim();
        if text.is_empty() {
            return None;
        }
        let digits = text.bytes().all(|b| b.is_ascii_digit());
        Some(match text.parse::<i64>() {
            Ok(n) if digits => Timestamp::Integer(n),
            _ => Timestamp::Text(text.to_string()),
        })
    })
}

// First descendant element (root excluded) with the given local name.
fn first_named<'a, 'input>(root: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    root.descendants()
        .skip(1)
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn record_namespaces(root: Node<'_, '_>) -> HashMap<String, String> {
    root.descendants()
        .filter(|n| n.is_element())
        .filter_map(|n| {
            n.tag_name()
                .namespace()
                .map(|ns| (n.tag_name().name().to_string(), ns.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="101">
  <data>
    <edfas xmlns="http://www.lumentum.com/lumentum-ote-edfa" xmlns:lotep="http://www.lumentum.com/lumentum-ote-edfa">
      <edfa>
        <dn>ne=1;chassis=1;card=1;edfa=2</dn>
        <state>
          <lotep:entity-description>Preamplifier</lotep:entity-description>
          <lotep:input-power>8.0</lotep:input-power>
          <lotep:output-power> 20.0 </lotep:output-power>
        </state>
        <config>
          <lotep:orl-threshold-warning-threshold />
        </config>
      </edfa>
    </edfas>
  </data>
</rpc-reply>"#;

    #[test]
    fn test_decode_values() {
        let decoded = decode_reply(
            REPLY,
            &[
                "input-power",
                "output-power",
                "entity-description",
                "orl-threshold-warning-threshold",
                "missing",
            ],
        )
        .unwrap();

        assert_eq!(decoded.values["input-power"], Some(ParamValue::Number(8.0)));
        assert_eq!(decoded.values["output-power"], Some(ParamValue::Number(20.0)));
        assert_eq!(
            decoded.values["entity-description"],
            Some(ParamValue::Text("Preamplifier".into()))
        );
        assert_eq!(decoded.values["orl-threshold-warning-threshold"], None);
        assert_eq!(decoded.values["missing"], None);

        assert!(decoded.found.contains("orl-threshold-warning-threshold"));
        assert!(!decoded.found.contains("missing"));
        assert_eq!(
            decoded.namespaces.get("input-power").map(String::as_str),
            Some("http://www.lumentum.com/lumentum-ote-edfa")
        );
        assert!(decoded.timestamp.is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_reply("<rpc-reply><data>", &["x"]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_extract_timestamp_order() {
        let xml = r#"<r><data><last-updated>2023-11-14T22:13:20Z</last-updated><time>1700000000</time></data></r>"#;
        assert_eq!(
            extract_timestamp(xml).unwrap(),
            Some(Timestamp::Integer(1_700_000_000))
        );

        let xml = r#"<r><event-time>  </event-time><last-changed>2023-11-14T22:13:20Z</last-changed></r>"#;
        assert_eq!(
            extract_timestamp(xml).unwrap(),
            Some(Timestamp::Text("2023-11-14T22:13:20Z".into()))
        );

        assert_eq!(extract_timestamp("<r><x>1</x></r>").unwrap(), None);
    }

    #[test]
    fn test_param_value_from_text() {
        assert_eq!(ParamValue::from_text("-20"), ParamValue::Number(-20.0));
        assert_eq!(ParamValue::from_text("on"), ParamValue::Text("on".into()));
        assert_eq!(ParamValue::from_text("NaN"), ParamValue::Text("NaN".into()));
        assert_eq!(
            serde_json::to_string(&ParamValue::Number(8.0)).unwrap(),
            "8.0"
        );
    }
}
