// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! optinet polling daemon and command-line client
//!
//! # Usage
//!
//! ```bash
//! # Poll every registered device until Ctrl+C
//! optinetd --config optinetd.toml
//!
//! # Poll two devices only
//! optinetd run roadm-1 roadm-2
//!
//! # Show the filter compiled for a read
//! optinetd compile edfa input-power output-power --dn "ne=1;chassis=1;card=1;edfa=1"
//!
//! # One-off read and write
//! optinetd get roadm-1 edfa input-power --dn "ne=1;chassis=1;card=1;edfa=1"
//! optinetd set roadm-1 edfa target-gain 17.5 --dn "ne=1;chassis=1;card=1;edfa=1"
//!
//! # Dispatch a device-data request body
//! optinetd request body.json
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use crossbeam::channel::{self, RecvTimeoutError};
use optinet::access::{DataAccess, ReadRequest, WriteRequest};
use optinet::api::DeviceApi;
use optinet::cache::MonitoringCache;
use optinet::compiler::{compile_config, compile_filter, Qualifiers};
use optinet::config::{ServiceConfig, EXAMPLE_CONFIG};
use optinet::credentials::{CredentialStore, Credentials, JsonFileCredentialStore};
use optinet::poller::Poller;
use optinet::pool::WorkerPool;
use optinet::schema::SchemaProvider;
use optinet::session::SessionManager;
use optinet::ParamValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// optinet NETCONF telemetry service
#[derive(Parser, Debug)]
#[command(name = "optinetd")]
#[command(about = "NETCONF telemetry poller and configuration client for optical network elements")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "optinetd.toml")]
    config: PathBuf,

    /// Log level, overrides the configuration file (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Seconds between status reports while running (0 to disable)
    #[arg(long, default_value = "60")]
    status_interval: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll devices until interrupted (default)
    Run {
        /// Devices to poll; every registered device when empty
        devices: Vec<String>,
    },

    /// Print the filter (or config, with --value) compiled for a request
    Compile {
        component: String,
        #[arg(required = true)]
        parameters: Vec<String>,
        /// Distinguished name qualifying the component
        #[arg(long)]
        dn: Option<String>,
        /// Tag the dn is injected under (defaults to the component)
        #[arg(long)]
        tag: Option<String>,
        /// Compile an edit-config for the first parameter instead
        #[arg(long)]
        value: Option<String>,
    },

    /// Read parameters from a registered device
    Get {
        device: String,
        component: String,
        #[arg(required = true)]
        parameters: Vec<String>,
        #[arg(long)]
        dn: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },

    /// Write one parameter on a registered device
    Set {
        device: String,
        component: String,
        parameter: String,
        value: String,
        #[arg(long)]
        dn: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        /// Recorded as the author of the change
        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Show cached history of one parameter
    History {
        device: String,
        component: String,
        parameter: String,
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,
    },

    /// Dispatch a device-data request body (JSON file, `-` for stdin)
    Request {
        body: PathBuf,
        #[arg(long)]
        user: Option<String>,
    },

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "optinetd.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate,
}

/// Everything below the poller, built from one configuration.
struct Service {
    config: ServiceConfig,
    access: Arc<DataAccess>,
    cache: Arc<MonitoringCache>,
    credentials: Arc<JsonFileCredentialStore>,
}

impl Service {
    fn build(config: ServiceConfig) -> anyhow::Result<Self> {
        let store = config.cache.open_store().context("opening cache store")?;
        let cache = Arc::new(MonitoringCache::new(store, config.cache.settings()?));
        let sessions = Arc::new(SessionManager::new(
            Arc::new(config.session.connector()),
            config.session.session_config(),
        ));
        let access = Arc::new(DataAccess::new(
            Arc::new(config.schema.provider()),
            sessions,
        ));
        let credentials = Arc::new(JsonFileCredentialStore::new(config.devices.store.clone()));
        Ok(Self {
            config,
            access,
            cache,
            credentials,
        })
    }

    fn device(&self, device_id: &str) -> anyhow::Result<Credentials> {
        match self.credentials.get_credentials(device_id)? {
            Some(creds) => Ok(creds),
            None => bail!(
                "device {} is not registered in {}",
                device_id,
                self.config.devices.store.display()
            ),
        }
    }
}

fn qualifiers(component: &str, tag: Option<String>, dn: Option<String>) -> Qualifiers {
    let mut q = Qualifiers::new();
    if let Some(dn) = dn {
        q.entry(tag.unwrap_or_else(|| component.to_string()))
            .or_default()
            .insert("dn".to_string(), dn);
    }
    q
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Subcommands that need no configuration
    match &args.command {
        Some(Commands::GenConfig { output }) => return cmd_gen_config(output),
        Some(Commands::Validate) => return cmd_validate(&args.config),
        _ => {}
    }

    let found = args.config.exists();
    let config = if found {
        ServiceConfig::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        ServiceConfig::default()
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if !found {
        tracing::warn!(path = %args.config.display(), "configuration file not found, using defaults");
    }
    let service = Service::build(config)?;

    match args.command {
        None => cmd_run(&service, Vec::new(), args.status_interval),
        Some(Commands::Run { devices }) => cmd_run(&service, devices, args.status_interval),
        Some(Commands::Compile {
            component,
            parameters,
            dn,
            tag,
            value,
        }) => {
            let q = qualifiers(&component, tag, dn);
            cmd_compile(&service, &component, &parameters, &q, value.as_deref())
        }
        Some(Commands::Get {
            device,
            component,
            parameters,
            dn,
            tag,
        }) => {
            let mut request = ReadRequest::new(&component, parameters);
            request.qualifiers = qualifiers(&component, tag, dn);
            cmd_get(&service, &device, &request)
        }
        Some(Commands::Set {
            device,
            component,
            parameter,
            value,
            dn,
            tag,
            user,
        }) => {
            let mut request = WriteRequest::new(&component, &parameter, value);
            request.qualifiers = qualifiers(&component, tag, dn);
            cmd_set(&service, &device, &request, &user)
        }
        Some(Commands::History {
            device,
            component,
            parameter,
            count,
        }) => cmd_history(&service, &device, &component, &parameter, count),
        Some(Commands::Request { body, user }) => cmd_request(&service, &body, user.as_deref()),
        Some(Commands::GenConfig { .. } | Commands::Validate) => Ok(()),
    }
}

fn cmd_run(service: &Service, devices: Vec<String>, status_interval: u64) -> anyhow::Result<()> {
    let pool = Arc::new(
        WorkerPool::new(service.config.poller.pool_sizes()).context("starting worker pool")?,
    );
    let poller = Poller::new(
        service.config.poller.poller_config(),
        service.credentials.clone(),
        service.access.clone(),
        service.cache.clone(),
        pool.clone(),
    );

    tracing::info!("optinetd v{}", env!("CARGO_PKG_VERSION"));

    if devices.is_empty() {
        let started = poller.start_polling_all_devices()?;
        if started == 0 {
            tracing::warn!(
                store = %service.config.devices.store.display(),
                "no registered devices to poll"
            );
        }
    } else {
        for device in &devices {
            poller.start_polling(device)?;
        }
    }
    tracing::info!(devices = ?poller.tracked_devices(), "polling started, press Ctrl+C to stop");

    let (stop_tx, stop_rx) = channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })?;

    let tick = if status_interval > 0 {
        Duration::from_secs(status_interval)
    } else {
        Duration::from_secs(3600)
    };
    loop {
        match stop_rx.recv_timeout(tick) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if status_interval == 0 {
                    continue;
                }
                for device in poller.tracked_devices() {
                    match service.cache.device_status(&device) {
                        Ok(status) => tracing::info!(
                            device = %device,
                            status = ?status.status,
                            last_update = status.last_update.as_deref().unwrap_or("-"),
                            data_points = status.data_points,
                            "device status"
                        ),
                        Err(e) => tracing::warn!(device = %device, error = %e, "status unavailable"),
                    }
                }
            }
        }
    }

    tracing::info!("shutting down");
    poller.shutdown();
    pool.shutdown();
    service.access.sessions().close_all();
    Ok(())
}

fn cmd_compile(
    service: &Service,
    component: &str,
    parameters: &[String],
    qualifiers: &Qualifiers,
    value: Option<&str>,
) -> anyhow::Result<()> {
    let template = service.config.schema.provider().template(component, None)?;
    let doc = match (value, parameters.first()) {
        (Some(value), Some(parameter)) => compile_config(&template, parameter, value, qualifiers)?,
        (Some(_), None) => bail!("--value needs a parameter"),
        (None, _) => compile_filter(&template, parameters, qualifiers)?,
    };
    if !doc.omitted.is_empty() {
        eprintln!("omitted (not in schema): {}", doc.omitted.join(", "));
    }
    println!("{}", doc.to_pretty_xml());
    Ok(())
}

fn cmd_get(service: &Service, device: &str, request: &ReadRequest) -> anyhow::Result<()> {
    let creds = service.device(device)?;
    let result = service.access.get_data(&creds, Some(device), request)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn cmd_set(
    service: &Service,
    device: &str,
    request: &WriteRequest,
    user: &str,
) -> anyhow::Result<()> {
    let creds = service.device(device)?;
    service.access.edit_data(&creds, Some(device), request)?;
    let label = optinet::catalog::entity_label(&request.component, &request.qualifiers);
    service.cache.store_running_config(
        device,
        &label,
        &request.parameter,
        &ParamValue::from_text(&request.value),
        user,
        None,
    )?;
    println!("{} {} = {}", label, request.parameter, request.value);
    Ok(())
}

fn cmd_history(
    service: &Service,
    device: &str,
    component: &str,
    parameter: &str,
    count: usize,
) -> anyhow::Result<()> {
    let history = service
        .cache
        .get_history(device, component, parameter, count)?;
    if history.is_empty() {
        println!("no history for {} {} {}", device, component, parameter);
        return Ok(());
    }
    for entry in history {
        println!("{}  {}", entry.record.timestamp_local, entry.record.value);
    }
    Ok(())
}

fn cmd_request(service: &Service, path: &Path, user: Option<&str>) -> anyhow::Result<()> {
    let body = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())?
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?
    };
    let api = DeviceApi::new(service.access.clone()).with_cache(service.cache.clone());
    let reply = api.handle_json(&body, user);
    println!("{}", serde_json::to_string_pretty(&reply.body)?);
    if reply.status != 200 {
        bail!("request failed with status {}", reply.status);
    }
    Ok(())
}

fn cmd_gen_config(output: &Path) -> anyhow::Result<()> {
    std::fs::write(output, EXAMPLE_CONFIG)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let config = ServiceConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    println!("Configuration valid!");
    println!();
    println!("Poll interval:  {} ms", config.poller.interval_ms);
    println!("Groups:         {:?}", config.poller.groups);
    println!(
        "Ports:          mux {}-{}, demux {}-{}",
        config.poller.mux_ports.first,
        config.poller.mux_ports.last,
        config.poller.demux_ports.first,
        config.poller.demux_ports.last
    );
    println!("Cache backend:  {:?}", config.cache.backend);
    println!("Schemas:        {}", config.schema.dir.display());
    println!("Device store:   {}", config.devices.store.display());
    Ok(())
}
