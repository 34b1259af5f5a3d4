// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # optinet - schema-driven NETCONF access for optical network elements
//!
//! Reads and writes device parameters by name. A per-component XML schema
//! template tells the compiler where each leaf lives, so callers never build
//! subtree filters or `<config>` documents by hand. A background poller keeps
//! a time-series cache of amplifier and port telemetry fresh.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use optinet::access::{DataAccess, ReadRequest};
//! use optinet::netconf::TcpConnector;
//! use optinet::schema::{default_modules, FileSchemaProvider};
//! use optinet::session::{SessionConfig, SessionManager};
//! use optinet::{Credentials, Result};
//! use std::sync::Arc;
//!
//! fn main() -> Result<()> {
//!     let sessions = Arc::new(SessionManager::new(
//!         Arc::new(TcpConnector::default()),
//!         SessionConfig::default(),
//!     ));
//!     let schemas = Arc::new(FileSchemaProvider::new("schemas", default_modules()));
//!     let access = DataAccess::new(schemas, sessions);
//!
//!     let creds = Credentials::new("10.0.0.1", 830, "admin", "secret");
//!     let request = ReadRequest::new("edfa", ["input-power", "output-power"])
//!         .qualify("edfa", "dn", "ne=1;chassis=1;card=1;edfa=1");
//!     let result = access.get_data(&creds, Some("roadm-1"), &request)?;
//!     println!("{:?} at {}", result.values, result.timestamp);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------------+
//! |  api         device-data requests (single / batch)                |
//! |  poller      background rounds -> cache                           |
//! +-------------------------------------------------------------------+
//! |  access      get_data / edit_data                                 |
//! |  compiler    schema template -> filter / config, reply -> values  |
//! +-------------------------------------------------------------------+
//! |  session     one reusable session per device                      |
//! |  netconf     hello, framing, rpc correlation over TCP             |
//! +-------------------------------------------------------------------+
//! |  cache       snapshots, history, config records (memory / sqlite) |
//! |  pool        device / group / entity worker tiers                 |
//! +-------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`compiler`] - filter and config compilation, reply decoding
//! - [`netconf`] - NETCONF 1.0/1.1 client
//! - [`session`] - session reuse and reconnection
//! - [`access`] - named-parameter reads and writes
//! - [`cache`] - monitoring cache
//! - [`poller`] - periodic device polling
//! - [`api`] - request dispatch for the HTTP layer
//! - [`config`] - service configuration (TOML)

pub mod access;
pub mod api;
pub mod cache;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod credentials;
pub mod error;
/// Fake NETCONF device for tests and demos.
pub mod mock;
pub mod netconf;
pub mod poller;
pub mod pool;
pub mod schema;
pub mod session;
pub mod timestamp;

pub use access::{DataAccess, ReadRequest, ReadResult, WriteRequest};
pub use api::{ApiReply, DeviceApi, DeviceDataRequest};
pub use cache::{CacheSettings, CacheStore, MemoryStore, MonitoringCache};
pub use compiler::ParamValue;
pub use config::ServiceConfig;
pub use credentials::{CredentialStore, Credentials};
pub use error::{Error, Result};
pub use poller::{Poller, PollerConfig, TelemetryGroup};
pub use pool::{PoolSizes, WorkerPool};
pub use session::{SessionConfig, SessionManager};
pub use timestamp::Timestamp;
