// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Owned, mutable XML element tree used to assemble request documents.

use std::fmt::Write as _;

/// An element with ordered attributes, optional text and ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Set an attribute, replacing any previous value.
    pub fn set_attribute(&mut self, key: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self
                .attributes
                .push((key.to_string(), value.to_string())),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Append a child and return its index.
    pub fn push(&mut self, child: XmlElement) -> usize {
        self.children.push(child);
        self.children.len() - 1
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Index path of the first descendant (pre-order, `self` excluded)
    /// named `name`.
    pub fn find_descendant_path(&self, name: &str) -> Option<Vec<usize>> {
        for (i, child) in self.children.iter().enumerate() {
            if child.name == name {
                return Some(vec![i]);
            }
            if let Some(mut rest) = child.find_descendant_path(name) {
                rest.insert(0, i);
                return Some(rest);
            }
        }
        None
    }

    /// First descendant named `name`.
    pub fn find_descendant(&self, name: &str) -> Option<&XmlElement> {
        let path = self.find_descendant_path(name)?;
        self.node_at(&path)
    }

    pub fn node_at(&self, path: &[usize]) -> Option<&XmlElement> {
        path.iter()
            .try_fold(self, |node, &i| node.children.get(i))
    }

    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut XmlElement> {
        let mut node = self;
        for &i in path {
            node = node.children.get_mut(i)?;
        }
        Some(node)
    }

    /// Visit `self` and every descendant in document order.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut XmlElement)) {
        f(self);
        for child in &mut self.children {
            child.walk_mut(f);
        }
    }

    /// Index paths of `self` (empty path) and every descendant named `name`.
    pub fn paths_named(&self, name: &str) -> Vec<Vec<usize>> {
        let mut out = Vec::new();
        let mut trail = Vec::new();
        self.collect_paths(name, &mut trail, &mut out);
        out
    }

    fn collect_paths(&self, name: &str, trail: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if self.name == name {
            out.push(trail.clone());
        }
        for (i, child) in self.children.iter().enumerate() {
            trail.push(i);
            child.collect_paths(name, trail, out);
            trail.pop();
        }
    }

    /// Compact serialization.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write(&mut out, None, 0);
        out
    }

    /// Two-space indented serialization with a trailing newline.
    pub fn to_pretty_xml(&self) -> String {
        let mut out = String::new();
        self.write(&mut out, Some(2), 0);
        out
    }

    fn write(&self, out: &mut String, indent: Option<usize>, depth: usize) {
        if let Some(step) = indent {
            out.push_str(&" ".repeat(step * depth));
        }
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attributes {
            let _ = write!(out, " {}=\"{}\"", k, escape_attr(v));
        }

        let text = self.text.as_deref().filter(|t| !t.is_empty());
        if text.is_none() && self.children.is_empty() {
            out.push_str("/>");
        } else {
            out.push('>');
            if let Some(t) = text {
                out.push_str(&escape_text(t));
            }
            if !self.children.is_empty() {
                if indent.is_some() {
                    out.push('\n');
                }
                for child in &self.children {
                    child.write(out, indent, depth + 1);
                }
                if let Some(step) = indent {
                    out.push_str(&" ".repeat(step * depth));
                }
            }
            let _ = write!(out, "</{}>", self.name);
        }
        if indent.is_some() {
            out.push('\n');
        }
    }
}

pub(crate) fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> XmlElement {
        let mut root = XmlElement::new("data");
        let mut a = XmlElement::new("a");
        a.push(XmlElement::new("leaf"));
        root.push(a);
        let mut b = XmlElement::new("b");
        b.push(XmlElement::with_text("leaf", "x"));
        root.push(b);
        root
    }

    #[test]
    fn test_find_descendant_first_match() {
        let root = sample();
        assert_eq!(root.find_descendant_path("leaf"), Some(vec![0, 0]));
        assert_eq!(root.find_descendant_path("b"), Some(vec![1]));
        assert_eq!(root.find_descendant_path("data"), None);
        assert_eq!(root.paths_named("leaf"), vec![vec![0, 0], vec![1, 0]]);
        assert_eq!(root.paths_named("data"), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_serialization() {
        let mut root = sample();
        root.set_attribute("xmlns", "urn:x");
        assert_eq!(
            root.to_xml(),
            r#"<data xmlns="urn:x"><a><leaf/></a><b><leaf>x</leaf></b></data>"#
        );
        assert_eq!(
            root.to_pretty_xml(),
            "<data xmlns=\"urn:x\">\n  <a>\n    <leaf/>\n  </a>\n  <b>\n    <leaf>x</leaf>\n  </b>\n</data>\n"
        );
    }

    #[test]
    fn test_escaping() {
        let mut el = XmlElement::with_text("dn", "a<b & c");
        el.set_attribute("note", "say \"hi\"");
        assert_eq!(
            el.to_xml(),
            r#"<dn note="say &quot;hi&quot;">a&lt;b &amp; c</dn>"#
        );
    }

    #[test]
    fn test_set_attribute_replaces() {
        let mut el = XmlElement::new("x");
        el.set_attribute("xmlns", "a");
        el.set_attribute("xmlns", "b");
        assert_eq!(el.attributes.len(), 1);
        assert_eq!(el.attribute("xmlns"), Some("b"));
    }
}
