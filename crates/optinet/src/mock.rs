// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Programmable fake NETCONF device.
//!
//! [`MockConnector`] hands out [`MockSession`]s whose replies come from a
//! caller-supplied responder. The responder sees the compiled `<filter>` or
//! `<config>` document and returns reply XML (or an error), so tests can
//! route on distinguished names or fail specific entities.

use crate::compiler::tree::escape_text;
use crate::credentials::Credentials;
use crate::netconf::message::{self, NS_BASE};
use crate::netconf::{Connector, Datastore, NetconfError, NetconfSession};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Responder = dyn Fn(&str) -> Result<String, NetconfError> + Send + Sync;

/// `<rpc-reply>` carrying `leaves` under `<data>`.
pub fn data_reply(leaves: &[(&str, &str)]) -> String {
    let body: String = leaves
        .iter()
        .map(|(name, value)| format!("<{0}>{1}</{0}>", name, escape_text(value)))
        .collect();
    format!(
        r#"<rpc-reply xmlns="{}" message-id="1"><data>{}</data></rpc-reply>"#,
        NS_BASE, body
    )
}

/// `<rpc-reply>` with `<ok/>`.
pub fn ok_reply() -> String {
    format!(r#"<rpc-reply xmlns="{}" message-id="1"><ok/></rpc-reply>"#, NS_BASE)
}

/// `<rpc-reply>` with one `rpc-error`.
pub fn error_reply(tag: &str, message: &str) -> String {
    format!(
        r#"<rpc-reply xmlns="{}" message-id="1"><rpc-error><error-type>application</error-type><error-tag>{}</error-tag><error-severity>error</error-severity><error-message>{}</error-message></rpc-error></rpc-reply>"#,
        NS_BASE,
        tag,
        escape_text(message)
    )
}

/// Connector producing [`MockSession`]s.
pub struct MockConnector {
    responder: Arc<Responder>,
    fail_next: AtomicU32,
    unreachable: AtomicBool,
    connect_delay: Mutex<Duration>,
    attempts: AtomicU32,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    edits: Arc<Mutex<Vec<String>>>,
    next_id: AtomicU64,
}

impl MockConnector {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, NetconfError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            fail_next: AtomicU32::new(0),
            unreachable: AtomicBool::new(false),
            connect_delay: Mutex::new(Duration::ZERO),
            attempts: AtomicU32::new(0),
            sessions: Mutex::new(Vec::new()),
            edits: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Device that answers every request with the same leaves.
    pub fn with_leaves(leaves: &[(&str, &str)]) -> Self {
        let reply = data_reply(leaves);
        Self::new(move |request| {
            if request.starts_with("<config") {
                Ok(ok_reply())
            } else {
                Ok(reply.clone())
            }
        })
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail every connect attempt while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Sleep this long inside each connect.
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful connects.
    pub fn connect_count(&self) -> u32 {
        self.sessions.lock().len() as u32
    }

    /// Sessions handed out so far, oldest first.
    pub fn sessions(&self) -> Vec<Arc<MockSession>> {
        self.sessions.lock().clone()
    }

    /// `<config>` documents received by `edit-config`, in order.
    pub fn edits(&self) -> Vec<String> {
        self.edits.lock().clone()
    }
}

impl Connector for MockConnector {
    fn connect(
        &self,
        _credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<Arc<dyn NetconfSession>, NetconfError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(NetconfError::Connect("connection refused".into()));
        }
        let pending = self.fail_next.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_next.store(pending - 1, Ordering::SeqCst);
            return Err(NetconfError::Connect("connection refused".into()));
        }

        let session = Arc::new(MockSession {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            responder: Arc::clone(&self.responder),
            connected: AtomicBool::new(true),
            closes: AtomicU32::new(0),
            gets: AtomicU32::new(0),
            edits: Arc::clone(&self.edits),
        });
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// Session of a [`MockConnector`].
pub struct MockSession {
    id: u64,
    responder: Arc<Responder>,
    connected: AtomicBool,
    closes: AtomicU32,
    gets: AtomicU32,
    edits: Arc<Mutex<Vec<String>>>,
}

impl MockSession {
    /// Simulate the device dropping the session.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Times `close()` was called.
    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn get_count(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }

    fn respond(&self, request: &str) -> Result<message::RpcReply, NetconfError> {
        if !self.is_connected() {
            return Err(NetconfError::Closed);
        }
        let xml = (self.responder)(request)?;
        let reply = message::parse_rpc_reply(&xml)?;
        let failures = reply.failures();
        if !failures.is_empty() {
            return Err(NetconfError::Rpc(failures));
        }
        Ok(reply)
    }
}

impl NetconfSession for MockSession {
    fn get(&self, filter: &str) -> Result<String, NetconfError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.respond(filter)?.raw)
    }

    fn edit_config(&self, _target: Datastore, config: &str) -> Result<(), NetconfError> {
        self.edits.lock().push(config.to_string());
        if self.respond(config)?.ok {
            Ok(())
        } else {
            Err(NetconfError::UnexpectedReply(
                "edit-config reply without <ok/>".into(),
            ))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn session_id(&self) -> Option<u64> {
        Some(self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replies_parse() {
        let reply = message::parse_rpc_reply(&data_reply(&[("input-power", "1 < 2")])).unwrap();
        assert!(reply.raw.contains("1 &lt; 2"));
        assert!(message::parse_rpc_reply(&ok_reply()).unwrap().ok);
        assert_eq!(
            message::parse_rpc_reply(&error_reply("invalid-value", "bad"))
                .unwrap()
                .failures()
                .len(),
            1
        );
    }

    #[test]
    fn test_session_counts() {
        let connector = MockConnector::with_leaves(&[("x", "1")]);
        let creds = Credentials::new("h", 830, "u", "p");
        let session = connector.connect(&creds, Duration::from_secs(1)).unwrap();
        assert!(session.get("<filter/>").unwrap().contains("<x>1</x>"));
        session.edit_config(Datastore::Running, "<config/>").unwrap();
        session.close();
        assert!(session.get("<filter/>").is_err());

        let mock = &connector.sessions()[0];
        assert_eq!(mock.get_count(), 2);
        assert_eq!(mock.close_count(), 1);
        assert_eq!(connector.edits(), vec!["<config/>"]);
    }
}
