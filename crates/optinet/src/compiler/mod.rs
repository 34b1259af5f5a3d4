// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Filter/config compiler.
//!
//! Turns a logical parameter request into the smallest NETCONF document that
//! reaches every requested leaf of a [`SchemaTemplate`]:
//!
//! 1. [`SchemaTemplate::locate`] each parameter (unknown names are omitted).
//! 2. [`build_tree`] merges the located paths, sharing ancestors.
//! 3. [`apply_namespaces`] sets an explicit `xmlns` attribute on every node
//!    whose local name has a recorded namespace.
//! 4. [`inject_qualifiers`] appends caller key/value children (such as `dn`)
//!    under the tags they target.
//! 5. The root is renamed to `filter` (reads) or `config` (writes).
//!
//! # Example
//!
//! ```
//! use optinet::compiler::{compile_filter, Qualifiers};
//! use optinet::schema::SchemaTemplate;
//!
//! let template = SchemaTemplate::parse(
//!     r#"<data xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
//!          <edfas xmlns="urn:edfa"><edfa xmlns="urn:edfa">
//!            <state xmlns="urn:edfa"><input-power xmlns="urn:edfa"/></state>
//!          </edfa></edfas>
//!        </data>"#,
//! ).unwrap();
//!
//! let mut qualifiers = Qualifiers::new();
//! qualifiers.entry("edfa".into()).or_default()
//!     .insert("dn".into(), "ne=1;chassis=1;card=1;edfa=1".into());
//!
//! let doc = compile_filter(&template, &["input-power"], &qualifiers).unwrap();
//! assert!(doc.to_xml().starts_with("<filter"));
//! assert!(doc.omitted.is_empty());
//! ```

pub mod decode;
pub mod tree;

pub use decode::{decode_reply, extract_timestamp, DecodedReply, ParamValue, TIMESTAMP_CANDIDATES};
pub use tree::XmlElement;

use crate::error::{Error, Result};
use crate::schema::{SchemaPath, SchemaTemplate};
use std::collections::{BTreeMap, HashMap};

/// Per-tag key/value children to inject, e.g. `{"edfa": {"dn": "..."}}`.
pub type Qualifiers = BTreeMap<String, BTreeMap<String, String>>;

/// A compiled request document.
///
/// Parameters the template does not know are listed in `omitted` rather
/// than failing the whole document.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDocument {
    pub document: XmlElement,
    pub included: Vec<String>,
    pub omitted: Vec<String>,
}

impl CompiledDocument {
    pub fn to_xml(&self) -> String {
        self.document.to_xml()
    }

    pub fn to_pretty_xml(&self) -> String {
        self.document.to_pretty_xml()
    }
}

/// Merge absolute paths into one tree.
///
/// The first path creates the root; the first segment of later paths is
/// assumed to be that same root. Each later segment reuses the first node of
/// that name found anywhere under the root, otherwise it is created under the
/// current parent. Sibling order therefore follows insertion, not the
/// template.
pub fn build_tree(paths: &[SchemaPath]) -> Option<XmlElement> {
    let mut root: Option<XmlElement> = None;

    for path in paths {
        let Some((first, rest)) = path.segments().split_first() else {
            continue;
        };
        let root = root.get_or_insert_with(|| XmlElement::new(first.as_str()));

        let mut parent: Vec<usize> = Vec::new();
        for segment in rest {
            if let Some(existing) = root.find_descendant_path(segment) {
                parent = existing;
            } else if let Some(node) = root.node_at_mut(&parent) {
                let idx = node.push(XmlElement::new(segment.as_str()));
                parent.push(idx);
            }
        }
    }

    root
}

/// Set `xmlns` on every node (root included) whose local name is mapped.
pub fn apply_namespaces(tree: &mut XmlElement, namespaces: &HashMap<String, String>) {
    tree.walk_mut(&mut |node| {
        if let Some(ns) = namespaces.get(&node.name) {
            node.set_attribute("xmlns", ns);
        }
    });
}

/// Append one child per qualifier entry under every node whose tag is a
/// qualifier key.
pub fn inject_qualifiers(tree: &mut XmlElement, qualifiers: &Qualifiers) {
    for (tag, entries) in qualifiers {
        // Collect first so injected children are never matched themselves.
        for path in tree.paths_named(tag) {
            if let Some(node) = tree.node_at_mut(&path) {
                for (key, value) in entries {
                    node.push(XmlElement::with_text(key.as_str(), value.as_str()));
                }
            }
        }
    }
}

/// Compile a `<filter>` for one or more parameters.
///
/// Fails with `ParameterNotFound` only when none of the parameters resolve,
/// since an empty filter would select the whole datastore.
pub fn compile_filter<S: AsRef<str>>(
    template: &SchemaTemplate,
    parameters: &[S],
    qualifiers: &Qualifiers,
) -> Result<CompiledDocument> {
    if parameters.is_empty() {
        return Err(Error::InvalidRequest("no parameters requested".into()));
    }

    let mut included = Vec::new();
    let mut omitted = Vec::new();
    let mut paths = Vec::new();
    for name in parameters.iter().map(AsRef::as_ref) {
        if included.iter().chain(omitted.iter()).any(|p| p == name) {
            continue;
        }
        match template.locate(name) {
            Some(path) => {
                paths.push(path);
                included.push(name.to_string());
            }
            None => omitted.push(name.to_string()),
        }
    }

    if !omitted.is_empty() {
        tracing::warn!(omitted = ?omitted, "parameters not found in schema, omitted from filter");
    }

    let mut document = match build_tree(&paths) {
        Some(tree) => tree,
        None => return Err(Error::ParameterNotFound(omitted.join(", "))),
    };
    apply_namespaces(&mut document, template.namespaces());
    inject_qualifiers(&mut document, qualifiers);
    document.name = "filter".to_string();

    Ok(CompiledDocument {
        document,
        included,
        omitted,
    })
}

/// Compile a `<config>` that sets `parameter` to `value`.
pub fn compile_config(
    template: &SchemaTemplate,
    parameter: &str,
    value: &str,
    qualifiers: &Qualifiers,
) -> Result<CompiledDocument> {
    let path = template
        .locate(parameter)
        .ok_or_else(|| Error::ParameterNotFound(parameter.to_string()))?;

    let mut document = build_tree(std::slice::from_ref(&path))
        .ok_or_else(|| Error::ParameterNotFound(parameter.to_string()))?;
    if let Some(leaf) = document
        .find_descendant_path(parameter)
        .and_then(|p| document.node_at_mut(&p))
    {
        leaf.text = Some(value.to_string());
    }
    apply_namespaces(&mut document, template.namespaces());
    inject_qualifiers(&mut document, qualifiers);
    document.name = "config".to_string();

    Ok(CompiledDocument {
        document,
        included: vec![parameter.to_string()],
        omitted: Vec::new(),
    })
}
