// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Library error taxonomy.
//!
//! Validation failures (`InvalidCredentials`, `InvalidDeviceId`,
//! `InvalidRequest`) are raised before any I/O. `ParameterNotFound` is only
//! surfaced when a request cannot be compiled at all; parameters that are
//! merely missing from a multi-parameter read are reported as omissions on
//! the compiled document instead.

use thiserror::Error;

/// Errors returned by optinet operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid device ID: {0:?}")]
    InvalidDeviceId(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Schema unavailable for component '{component}': {reason}")]
    SchemaUnavailable { component: String, reason: String },

    #[error("Parameter not found in schema: {0}")]
    ParameterNotFound(String),

    #[error("Connection to {endpoint} failed after {attempts} attempt(s): {reason}")]
    ConnectionFailed {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Credential store error: {0}")]
    CredentialStore(String),

    #[error("Poller error: {0}")]
    Poller(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn schema(component: &str, reason: impl Into<String>) -> Self {
        Error::SchemaUnavailable {
            component: component.to_string(),
            reason: reason.into(),
        }
    }

    /// HTTP-style status code for API responses.
    pub fn status(&self) -> u16 {
        match self {
            Error::InvalidCredentials(_) | Error::InvalidDeviceId(_) | Error::InvalidRequest(_) => {
                400
            }
            Error::ParameterNotFound(_) => 404,
            Error::SchemaUnavailable { .. } | Error::CredentialStore(_) | Error::Poller(_) => 500,
            Error::ConnectionFailed { .. } | Error::Protocol(_) => 502,
            Error::CacheUnavailable(_) => 503,
        }
    }

    /// True for errors detected before touching the network or the cache.
    pub fn is_validation(&self) -> bool {
        self.status() == 400
    }
}
