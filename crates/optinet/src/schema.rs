// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Schema template store.
//!
//! A template is the XML skeleton generated offline from a device's YANG
//! modules: one element per leaf, each tagged with its namespace. Templates
//! are parsed once with `roxmltree` into an owned [`SchemaNode`] tree and are
//! immutable afterwards.
//!
//! Lookup is by local name. When a name appears more than once in the same
//! template, the first node in document order wins.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use roxmltree::Document;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One element of a schema template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaNode {
    pub name: String,
    pub namespace: Option<String>,
    pub children: Vec<SchemaNode>,
}

impl SchemaNode {
    fn from_xml(node: roxmltree::Node<'_, '_>) -> Self {
        SchemaNode {
            name: node.tag_name().name().to_string(),
            namespace: node.tag_name().namespace().map(str::to_string),
            children: node
                .children()
                .filter(|c| c.is_element())
                .map(SchemaNode::from_xml)
                .collect(),
        }
    }

    /// Child with the given local name.
    pub fn child(&self, name: &str) -> Option<&SchemaNode> {
        self.children.iter().find(|c| c.name == name)
    }

    // Pre-order search below `self`, recording the names walked.
    fn find_path(&self, name: &str, trail: &mut Vec<String>) -> bool {
        for child in &self.children {
            trail.push(child.name.clone());
            if child.name == name || child.find_path(name, trail) {
                return true;
            }
            trail.pop();
        }
        false
    }
}

/// Absolute path of local names from the template root to a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaPath(Vec<String>);

impl SchemaPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SchemaPath(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Local name of the addressed node.
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Display for SchemaPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Parsed, immutable schema template.
#[derive(Debug, Clone)]
pub struct SchemaTemplate {
    root: SchemaNode,
    namespaces: HashMap<String, String>,
}

impl SchemaTemplate {
    /// Parse a template document.
    pub fn parse(xml: &str) -> std::result::Result<Self, String> {
        let doc = Document::parse(xml).map_err(|e| format!("Failed to parse XML: {}", e))?;
        let root = doc.root_element();

        let mut namespaces = HashMap::new();
        for node in root.descendants().filter(|n| n.is_element()) {
            if let Some(ns) = node.tag_name().namespace() {
                namespaces.insert(node.tag_name().name().to_string(), ns.to_string());
            }
        }

        Ok(SchemaTemplate {
            root: SchemaNode::from_xml(root),
            namespaces,
        })
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    /// Namespace recorded for each local name (later nodes overwrite earlier ones).
    pub fn namespaces(&self) -> &HashMap<String, String> {
        &self.namespaces
    }

    pub fn namespace_of(&self, local_name: &str) -> Option<&str> {
        self.namespaces.get(local_name).map(String::as_str)
    }

    /// Path of the first node (document order, root excluded) named `name`.
    pub fn locate(&self, name: &str) -> Option<SchemaPath> {
        let mut trail = vec![self.root.name.clone()];
        if self.root.find_path(name, &mut trail) {
            Some(SchemaPath(trail))
        } else {
            None
        }
    }

    /// Follow `path` from the root.
    pub fn walk(&self, path: &SchemaPath) -> Option<&SchemaNode> {
        let (first, rest) = path.segments().split_first()?;
        if *first != self.root.name {
            return None;
        }
        rest.iter()
            .try_fold(&self.root, |node, segment| node.child(segment))
    }
}

/// Source of schema templates, keyed by component kind.
pub trait SchemaProvider: Send + Sync {
    /// Template for `component`, honouring per-device overrides when
    /// `device_id` is given.
    fn template(&self, component: &str, device_id: Option<&str>) -> Result<Arc<SchemaTemplate>>;
}

/// Default component kind to template module mapping.
pub fn default_modules() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("edfa".to_string(), "lumentum-ote-edfa".to_string()),
        (
            "optical-port".to_string(),
            "lumentum-ote-port-optical".to_string(),
        ),
    ])
}

/// Templates read from `<dir>/<module>.xml`, with per-device overrides in
/// `<dir>/device_<id>/<module>.xml`.
pub struct FileSchemaProvider {
    dir: PathBuf,
    modules: BTreeMap<String, String>,
    parsed: RwLock<HashMap<PathBuf, Arc<SchemaTemplate>>>,
}

impl FileSchemaProvider {
    pub fn new(dir: impl Into<PathBuf>, modules: BTreeMap<String, String>) -> Self {
        Self {
            dir: dir.into(),
            modules,
            parsed: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Drop every parsed template so the next lookup re-reads the files.
    pub fn invalidate(&self) {
        self.parsed.write().clear();
    }

    fn resolve_path(&self, module: &str, device_id: Option<&str>) -> PathBuf {
        let file = format!("{}.xml", module);
        if let Some(id) = device_id {
            let device_path = self.dir.join(format!("device_{}", id)).join(&file);
            if device_path.is_file() {
                return device_path;
            }
        }
        self.dir.join(file)
    }
}

impl SchemaProvider for FileSchemaProvider {
    fn template(&self, component: &str, device_id: Option<&str>) -> Result<Arc<SchemaTemplate>> {
        let module = self
            .modules
            .get(component)
            .ok_or_else(|| Error::schema(component, "no template module mapped"))?;
        let path = self.resolve_path(module, device_id);

        if let Some(template) = self.parsed.read().get(&path) {
            return Ok(Arc::clone(template));
        }

        let xml = std::fs::read_to_string(&path)
            .map_err(|e| Error::schema(component, format!("{}: {}", path.display(), e)))?;
        let template = Arc::new(
            SchemaTemplate::parse(&xml)
                .map_err(|e| Error::schema(component, format!("{}: {}", path.display(), e)))?,
        );
        tracing::debug!(component, path = %path.display(), "loaded schema template");

        self.parsed.write().insert(path, Arc::clone(&template));
        Ok(template)
    }
}

/// In-memory templates keyed by component kind.
#[derive(Default)]
pub struct StaticSchemaProvider {
    templates: HashMap<String, Arc<SchemaTemplate>>,
}

impl StaticSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and register a template for `component`.
    pub fn with_template(mut self, component: &str, xml: &str) -> Result<Self> {
        let template = SchemaTemplate::parse(xml).map_err(|e| Error::schema(component, e))?;
        self.templates
            .insert(component.to_string(), Arc::new(template));
        Ok(self)
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn template(&self, component: &str, _device_id: Option<&str>) -> Result<Arc<SchemaTemplate>> {
        self.templates
            .get(component)
            .cloned()
            .ok_or_else(|| Error::schema(component, "no template registered"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDFA: &str = include_str!("../tests/fixtures/lumentum-ote-edfa.xml");

    #[test]
    fn test_locate_walks_back_to_node() {
        let template = SchemaTemplate::parse(EDFA).unwrap();
        for name in ["input-power", "target-gain", "dn", "pump-current", "force-apr"] {
            let path = template.locate(name).unwrap();
            assert_eq!(path.leaf(), Some(name));
            assert_eq!(template.walk(&path).map(|n| n.name.as_str()), Some(name));
        }
    }

    #[test]
    fn test_locate_first_match_wins() {
        let template = SchemaTemplate::parse(EDFA).unwrap();
        // target-gain also exists under edfas-metadata; the edfa config leaf comes first
        assert_eq!(
            template.locate("target-gain").unwrap().to_string(),
            "/data/edfas/edfa/config/target-gain"
        );
        // dn under edfa precedes the dn entries of voa/pump/coil lists
        assert_eq!(template.locate("dn").unwrap().to_string(), "/data/edfas/edfa/dn");
    }

    #[test]
    fn test_locate_missing_and_root() {
        let template = SchemaTemplate::parse(EDFA).unwrap();
        assert!(template.locate("no-such-leaf").is_none());
        assert!(template.locate("data").is_none());
    }

    #[test]
    fn test_namespaces_recorded() {
        let template = SchemaTemplate::parse(EDFA).unwrap();
        assert_eq!(
            template.namespace_of("data"),
            Some("urn:ietf:params:xml:ns:netconf:base:1.0")
        );
        assert_eq!(
            template.namespace_of("input-power"),
            Some("http://www.lumentum.com/lumentum-ote-edfa")
        );
    }

    #[test]
    fn test_file_provider_device_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lumentum-ote-edfa.xml"), EDFA).unwrap();
        let device_dir = dir.path().join("device_dev-7");
        std::fs::create_dir_all(&device_dir).unwrap();
        std::fs::write(
            device_dir.join("lumentum-ote-edfa.xml"),
            r#"<data><edfas><edfa><state><extra-leaf/></state></edfa></edfas></data>"#,
        )
        .unwrap();

        let provider = FileSchemaProvider::new(dir.path(), default_modules());
        let shared = provider.template("edfa", None).unwrap();
        assert!(shared.locate("input-power").is_some());
        assert!(shared.locate("extra-leaf").is_none());

        let device = provider.template("edfa", Some("dev-7")).unwrap();
        assert!(device.locate("extra-leaf").is_some());

        // Devices without an override share the common template
        let other = provider.template("edfa", Some("dev-8")).unwrap();
        assert!(Arc::ptr_eq(&shared, &other));
    }

    #[test]
    fn test_file_provider_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileSchemaProvider::new(dir.path(), default_modules());

        let err = provider.template("edfa", None).unwrap_err();
        assert!(matches!(err, Error::SchemaUnavailable { .. }));

        let err = provider.template("amplifier", None).unwrap_err();
        assert!(matches!(err, Error::SchemaUnavailable { .. }));
    }
}
