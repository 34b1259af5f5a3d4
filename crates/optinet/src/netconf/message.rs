// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NETCONF message builders and reply parsing.

use super::NetconfError;
use roxmltree::{Document, Node};
use std::fmt;

/// NETCONF base namespace.
pub const NS_BASE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

pub const CAP_BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
pub const CAP_BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Configuration datastore targeted by `<edit-config>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
}

impl Datastore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Datastore::Running => "running",
            Datastore::Candidate => "candidate",
            Datastore::Startup => "startup",
        }
    }
}

/// Client `<hello>` advertising `capabilities`.
pub fn hello(capabilities: &[&str]) -> String {
    let caps: String = capabilities
        .iter()
        .map(|c| format!("<capability>{}</capability>", c))
        .collect();
    format!(
        r#"{}<hello xmlns="{}"><capabilities>{}</capabilities></hello>"#,
        XML_DECL, NS_BASE, caps
    )
}

/// Wrap an operation in an `<rpc>` envelope.
pub fn rpc(message_id: u64, operation: &str) -> String {
    format!(
        r#"{}<rpc message-id="{}" xmlns="{}">{}</rpc>"#,
        XML_DECL, message_id, NS_BASE, operation
    )
}

/// `<get>` with a compiled `<filter>` document.
pub fn get(filter: &str) -> String {
    format!("<get>{}</get>", filter)
}

/// `<edit-config>` with a compiled `<config>` document.
pub fn edit_config(target: Datastore, config: &str) -> String {
    format!(
        "<edit-config><target><{}/></target>{}</edit-config>",
        target.as_str(),
        config
    )
}

pub fn close_session() -> String {
    "<close-session/>".to_string()
}

/// Parsed server `<hello>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub session_id: Option<u64>,
    pub capabilities: Vec<String>,
}

impl ServerHello {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

pub fn parse_hello(xml: &str) -> Result<ServerHello, NetconfError> {
    let doc = parse(xml)?;
    let root = doc.root_element();
    if root.tag_name().name() != "hello" {
        return Err(NetconfError::UnexpectedReply(format!(
            "expected <hello>, got <{}>",
            root.tag_name().name()
        )));
    }

    let capabilities = root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "capability")
        .filter_map(|n| n.text())
        .map(|t| t.trim().to_string())
        .collect();
    let session_id = child_text(root, "session-id").and_then(|t| t.parse().ok());

    Ok(ServerHello {
        session_id,
        capabilities,
    })
}

/// One `<rpc-error>` entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RpcError {
    pub error_type: String,
    pub tag: String,
    pub severity: String,
    pub message: Option<String>,
}

impl RpcError {
    pub fn is_error(&self) -> bool {
        self.severity != "warning"
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.tag, self.error_type)?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

/// Parsed `<rpc-reply>`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    pub message_id: Option<String>,
    pub ok: bool,
    pub errors: Vec<RpcError>,
    pub raw: String,
}

impl RpcReply {
    /// `rpc-error` entries with error severity.
    pub fn failures(&self) -> Vec<RpcError> {
        self.errors.iter().filter(|e| e.is_error()).cloned().collect()
    }
}

/// Kind of message received on a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Reply(RpcReply),
    Notification,
}

/// Parse a server message that is either a reply or a notification.
pub fn parse_incoming(xml: &str) -> Result<Incoming, NetconfError> {
    let doc = parse(xml)?;
    let root = doc.root_element();
    match root.tag_name().name() {
        "notification" => Ok(Incoming::Notification),
        "rpc-reply" => Ok(Incoming::Reply(reply_from(root, xml))),
        other => Err(NetconfError::UnexpectedReply(format!(
            "expected <rpc-reply>, got <{}>",
            other
        ))),
    }
}

pub fn parse_rpc_reply(xml: &str) -> Result<RpcReply, NetconfError> {
    match parse_incoming(xml)? {
        Incoming::Reply(reply) => Ok(reply),
        Incoming::Notification => Err(NetconfError::UnexpectedReply(
            "expected <rpc-reply>, got <notification>".into(),
        )),
    }
}

fn reply_from(root: Node<'_, '_>, xml: &str) -> RpcReply {
    // <ok/> may sit directly under rpc-reply or, on some devices, under <data>
    let ok = root
        .descendants()
        .any(|n| n.is_element() && n.tag_name().name() == "ok");
    let errors = root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "rpc-error")
        .map(|e| RpcError {
            error_type: child_text(e, "error-type").unwrap_or_default(),
            tag: child_text(e, "error-tag").unwrap_or_default(),
            severity: child_text(e, "error-severity").unwrap_or_else(|| "error".into()),
            message: child_text(e, "error-message"),
        })
        .collect();

    RpcReply {
        message_id: root.attribute("message-id").map(str::to_string),
        ok,
        errors,
        raw: xml.to_string(),
    }
}

fn parse(xml: &str) -> Result<Document<'_>, NetconfError> {
    Document::parse(xml).map_err(|e| NetconfError::Malformed(e.to_string()))
}

fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}
