// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NETCONF client.
//!
//! - [`framing`]: RFC 6242 end-of-message and chunked framing
//! - [`message`]: request builders, hello/reply parsing
//! - [`client`]: the [`NetconfSession`] and [`Connector`] seams, and a
//!   session over any byte stream ([`StreamSession`], [`TcpConnector`])
//!
//! Secure transports plug in by implementing [`Connector`] and handing the
//! authenticated byte stream to [`StreamSession::establish`].

pub mod client;
pub mod framing;
pub mod message;

pub use client::{Connector, NetconfSession, StreamSession, TcpConnector};
pub use framing::{FrameCodec, Framing};
pub use message::{Datastore, RpcError, RpcReply, ServerHello};

use thiserror::Error;

/// Transport and protocol failures.
#[derive(Debug, Error)]
pub enum NetconfError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Device rejected request: {}", join_errors(.0))]
    Rpc(Vec<RpcError>),

    #[error("Session closed")]
    Closed,

    #[error("Connect failed: {0}")]
    Connect(String),
}

fn join_errors(errors: &[RpcError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<NetconfError> for crate::Error {
    fn from(err: NetconfError) -> Self {
        crate::Error::Protocol(err.to_string())
    }
}
