// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session manager.
//!
//! Keeps at most one live session per `(host, port, user)`. Each key owns a
//! slot lock: acquires for the same key serialize around the
//! check-and-reconnect sequence, while acquires for different keys only
//! share the brief lookup of the slot itself.
//!
//! ```text
//! Absent --connect--> Live --not connected--> Stale --close--> Absent
//!                      \------------close()-----------------/
//! ```
//!
//! Sessions are never expired for idleness, only on liveness failure or an
//! explicit close.

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::netconf::{Connector, NetconfSession};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache key for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub host: String,
    pub port: u32,
    pub user: String,
}

impl From<&Credentials> for SessionKey {
    fn from(c: &Credentials) -> Self {
        Self {
            host: c.host.clone(),
            port: c.port,
            user: c.user.clone(),
        }
    }
}

/// Connect policy.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    /// Connect attempts per acquire (at least one is always made).
    pub connect_retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            connect_retries: 2,
            retry_delay: Duration::from_millis(250),
        }
    }
}

type Slot = Arc<Mutex<Option<Arc<dyn NetconfSession>>>>;

/// Owns and reuses device sessions.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    slots: Mutex<HashMap<SessionKey, Slot>>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn slot(&self, key: &SessionKey) -> Slot {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Return the live session for these credentials, reconnecting if the
    /// cached one went stale.
    pub fn acquire(&self, credentials: &Credentials) -> Result<Arc<dyn NetconfSession>> {
        credentials.validate()?;
        let slot = self.slot(&SessionKey::from(credentials));
        let mut current = slot.lock();

        if let Some(session) = current.as_ref() {
            if session.is_connected() {
                return Ok(Arc::clone(session));
            }
            tracing::debug!(endpoint = %credentials.endpoint(), "discarding stale session");
            session.close();
            *current = None;
        }

        let session = self.connect_with_retry(credentials)?;
        *current = Some(Arc::clone(&session));
        Ok(session)
    }

    fn connect_with_retry(&self, credentials: &Credentials) -> Result<Arc<dyn NetconfSession>> {
        let endpoint = credentials.endpoint();
        let attempts = self.config.connect_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let start = Instant::now();
            match self
                .connector
                .connect(credentials, self.config.connect_timeout)
            {
                Ok(session) => {
                    tracing::info!(
                        endpoint = %endpoint,
                        attempt,
                        session_id = ?session.session_id(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "opened NETCONF session"
                    );
                    return Ok(session);
                }
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, attempt, error = %e, "NETCONF connect attempt failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        std::thread::sleep(self.config.retry_delay);
                    }
                }
            }
        }

        tracing::error!(
            endpoint = %endpoint,
            attempts,
            error = %last_error,
            "failed to create NETCONF session"
        );
        Err(Error::ConnectionFailed {
            endpoint,
            attempts,
            reason: last_error,
        })
    }

    /// Close and forget the session for these credentials.
    /// Returns false when there was none.
    pub fn close(&self, credentials: &Credentials) -> bool {
        let slot = self.slots.lock().get(&SessionKey::from(credentials)).cloned();
        let Some(slot) = slot else {
            return false;
        };
        let taken = slot.lock().take();
        match taken {
            Some(session) => {
                session.close();
                tracing::debug!(endpoint = %credentials.endpoint(), "closed NETCONF session");
                true
            }
            None => false,
        }
    }

    /// Close every cached session.
    pub fn close_all(&self) {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        for slot in slots {
            if let Some(session) = slot.lock().take() {
                session.close();
            }
        }
    }

    /// Number of cached sessions that report connected.
    pub fn live_sessions(&self) -> usize {
        let slots: Vec<Slot> = self.slots.lock().values().cloned().collect();
        slots
            .iter()
            .filter(|slot| slot.lock().as_ref().is_some_and(|s| s.is_connected()))
            .count()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{data_reply, MockConnector};
    use std::sync::Barrier;
    use std::thread;

    fn fast() -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_millis(100),
            connect_retries: 2,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn creds(host: &str) -> Credentials {
        Credentials::new(host, 830, "admin", "pw")
    }

    fn connector() -> Arc<MockConnector> {
        Arc::new(MockConnector::new(|_| Ok(data_reply(&[]))))
    }

    #[test]
    fn test_reuse_live_session() {
        let mock = connector();
        let manager = SessionManager::new(mock.clone(), fast());

        let a = manager.acquire(&creds("10.0.0.1")).unwrap();
        let b = manager.acquire(&creds("10.0.0.1")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mock.connect_count(), 1);
        assert_eq!(manager.live_sessions(), 1);
    }

    #[test]
    fn test_stale_session_replaced_and_closed_once() {
        let mock = connector();
        let manager = SessionManager::new(mock.clone(), fast());

        let a = manager.acquire(&creds("10.0.0.1")).unwrap();
        mock.sessions()[0].disconnect();

        let b = manager.acquire(&creds("10.0.0.1")).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(mock.connect_count(), 2);
        assert_eq!(mock.sessions()[0].close_count(), 1);

        // the replacement is reused from now on
        let c = manager.acquire(&creds("10.0.0.1")).unwrap();
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(mock.sessions()[0].close_count(), 1);
    }

    #[test]
    fn test_retry_then_success() {
        let mock = connector();
        mock.fail_next_connects(1);
        let manager = SessionManager::new(mock.clone(), fast());

        assert!(manager.acquire(&creds("10.0.0.1")).is_ok());
        assert_eq!(mock.connect_attempts(), 2);
    }

    #[test]
    fn test_retries_exhausted() {
        let mock = connector();
        mock.set_unreachable(true);
        let manager = SessionManager::new(mock.clone(), fast());

        let err = match manager.acquire(&creds("10.0.0.1")) {
            Err(e) => e,
            Ok(_) => panic!("expected failure"),
        };
        match err {
            Error::ConnectionFailed { attempts, endpoint, .. } => {
                assert_eq!(attempts, 2);
                assert_eq!(endpoint, "10.0.0.1:830");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(mock.connect_attempts(), 2);
        assert_eq!(manager.live_sessions(), 0);
    }

    #[test]
    fn test_invalid_credentials_never_connect() {
        let mock = connector();
        let manager = SessionManager::new(mock.clone(), fast());
        let mut bad = creds("10.0.0.1");
        bad.port = 0;
        assert!(matches!(
            manager.acquire(&bad),
            Err(Error::InvalidCredentials(_))
        ));
        assert_eq!(mock.connect_attempts(), 0);
    }

    #[test]
    fn test_concurrent_same_key_connects_once() {
        let mock = connector();
        mock.set_connect_delay(Duration::from_millis(20));
        let manager = Arc::new(SessionManager::new(mock.clone(), fast()));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    manager.acquire(&creds("10.0.0.1")).map(|_| ()).is_ok()
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(mock.connect_count(), 1);
    }

    #[test]
    fn test_different_keys_connect_concurrently() {
        let mock = connector();
        mock.set_connect_delay(Duration::from_millis(100));
        let manager = Arc::new(SessionManager::new(mock.clone(), fast()));

        let start = Instant::now();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || manager.acquire(&creds(&format!("10.0.0.{}", i))).is_ok())
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
        // serialized connects would take at least 400ms
        assert!(start.elapsed() < Duration::from_millis(350));
        assert_eq!(manager.live_sessions(), 4);
    }

    #[test]
    fn test_close_and_close_all() {
        let mock = connector();
        let manager = SessionManager::new(mock.clone(), fast());
        manager.acquire(&creds("10.0.0.1")).unwrap();
        manager.acquire(&creds("10.0.0.2")).unwrap();

        assert!(manager.close(&creds("10.0.0.1")));
        assert!(!manager.close(&creds("10.0.0.1")));
        assert_eq!(manager.live_sessions(), 1);

        manager.close_all();
        assert_eq!(manager.live_sessions(), 0);
        assert!(mock.sessions().iter().all(|s| s.close_count() == 1));
    }
}
