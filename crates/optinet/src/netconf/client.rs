// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NETCONF sessions over a byte stream.

use super::framing::{FrameCodec, Framing, DEFAULT_MAX_MESSAGE_SIZE};
use super::message::{self, Datastore, Incoming, RpcReply, CAP_BASE_1_0, CAP_BASE_1_1};
use super::NetconfError;
use crate::credentials::Credentials;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A live NETCONF session.
pub trait NetconfSession: Send + Sync {
    /// `<get>` with a `<filter>` document; returns the raw reply XML.
    fn get(&self, filter: &str) -> Result<String, NetconfError>;

    /// `<edit-config>` with a `<config>` document; succeeds only on `<ok/>`.
    fn edit_config(&self, target: Datastore, config: &str) -> Result<(), NetconfError>;

    fn is_connected(&self) -> bool;

    /// Close the session. Idempotent.
    fn close(&self);

    fn session_id(&self) -> Option<u64>;
}

/// Opens sessions to devices.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Arc<dyn NetconfSession>, NetconfError>;
}

struct Channel<S> {
    stream: S,
    codec: FrameCodec,
}

impl<S: Read + Write> Channel<S> {
    fn send(&mut self, payload: &str) -> Result<(), NetconfError> {
        let frame = self.codec.encode(payload.as_bytes());
        self.stream.write_all(&frame)?;
        self.stream.flush()?;
        Ok(())
    }

    fn recv(&mut self) -> Result<String, NetconfError> {
        let bytes = self.codec.read_message(&mut self.stream)?;
        String::from_utf8(bytes).map_err(|e| NetconfError::Malformed(e.to_string()))
    }
}

/// NETCONF session over an already-established byte stream.
pub struct StreamSession<S> {
    channel: Mutex<Channel<S>>,
    connected: AtomicBool,
    next_message_id: AtomicU64,
    session_id: Option<u64>,
    capabilities: Vec<String>,
    endpoint: String,
}

impl<S: Read + Write + Send> StreamSession<S> {
    /// Exchange hellos and pick the framing both ends support.
    pub fn establish(stream: S, endpoint: &str, max_message_size: usize) -> Result<Self, NetconfError> {
        let mut channel = Channel {
            stream,
            codec: FrameCodec::new(max_message_size),
        };

        channel.send(&message::hello(&[CAP_BASE_1_0, CAP_BASE_1_1]))?;
        let server = message::parse_hello(&channel.recv()?)?;
        if server.supports(CAP_BASE_1_1) {
            channel.codec.set_framing(Framing::Chunked);
        } else if !server.supports(CAP_BASE_1_0) {
            return Err(NetconfError::UnexpectedReply(
                "server advertises no supported base capability".into(),
            ));
        }

        tracing::debug!(
            endpoint,
            session_id = ?server.session_id,
            framing = ?channel.codec.framing(),
            "NETCONF session established"
        );

        Ok(Self {
            channel: Mutex::new(channel),
            connected: AtomicBool::new(true),
            next_message_id: AtomicU64::new(1),
            session_id: server.session_id,
            capabilities: server.capabilities,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn rpc(&self, operation: &str) -> Result<RpcReply, NetconfError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(NetconfError::Closed);
        }
        let result = self.exchange(operation);
        if matches!(result, Err(NetconfError::Io(_))) {
            self.connected.store(false, Ordering::Release);
        }
        result
    }

    fn exchange(&self, operation: &str) -> Result<RpcReply, NetconfError> {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let mut channel = self.channel.lock();
        channel.send(&message::rpc(id, operation))?;

        let expected = id.to_string();
        loop {
            let xml = channel.recv()?;
            match message::parse_incoming(&xml)? {
                Incoming::Notification => {
                    tracing::debug!(endpoint = %self.endpoint, "skipping notification");
                }
                Incoming::Reply(reply) => match reply.message_id.as_deref() {
                    None => return Ok(reply),
                    Some(mid) if mid == expected => return Ok(reply),
                    Some(mid) => {
                        tracing::warn!(
                            endpoint = %self.endpoint,
                            expected = %expected,
                            got = mid,
                            "discarding reply for another request"
                        );
                    }
                },
            }
        }
    }
}

impl<S: Read + Write + Send> NetconfSession for StreamSession<S> {
    fn get(&self, filter: &str) -> Result<String, NetconfError> {
        let reply = self.rpc(&message::get(filter))?;
        let failures = reply.failures();
        if !failures.is_empty() {
            return Err(NetconfError::Rpc(failures));
        }
        Ok(reply.raw)
    }

    fn edit_config(&self, target: Datastore, config: &str) -> Result<(), NetconfError> {
        let reply = self.rpc(&message::edit_config(target, config))?;
        let failures = reply.failures();
        if !failures.is_empty() {
            return Err(NetconfError::Rpc(failures));
        }
        if !reply.ok {
            return Err(NetconfError::UnexpectedReply(
                "edit-config reply without <ok/>".into(),
            ));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        // Best effort; the stream is dropped with the session either way.
        if let Err(e) = self.exchange(&message::close_session()) {
            tracing::debug!(endpoint = %self.endpoint, error = %e, "close-session failed");
        }
    }

    fn session_id(&self) -> Option<u64> {
        self.session_id
    }
}

/// NETCONF over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    io_timeout: Option<Duration>,
    max_message_size: usize,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            io_timeout: Some(Duration::from_secs(30)),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl TcpConnector {
    pub fn new(io_timeout: Option<Duration>) -> Self {
        Self {
            io_timeout,
            ..Default::default()
        }
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    fn open(&self, credentials: &Credentials, timeout: Duration) -> Result<TcpStream, NetconfError> {
        let port = u16::try_from(credentials.port)
            .map_err(|_| NetconfError::Connect(format!("invalid port {}", credentials.port)))?;
        let addrs = (credentials.host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| NetconfError::Connect(format!("resolve {}: {}", credentials.host, e)))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => NetconfError::Connect(e.to_string()),
            None => NetconfError::Connect(format!("no address for {}", credentials.host)),
        })
    }
}

impl Connector for TcpConnector {
    fn connect(
        &self,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Arc<dyn NetconfSession>, NetconfError> {
        let start = Instant::now();
        let stream = self.open(credentials, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.io_timeout)?;
        stream.set_write_timeout(self.io_timeout)?;

        let endpoint = credentials.endpoint();
        let session = StreamSession::establish(stream, &endpoint, self.max_message_size)?;
        tracing::debug!(
            endpoint = %endpoint,
            user = %credentials.user,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "connected"
        );
        Ok(Arc::new(session))
    }
}
