//! OBD Monitor
//!
//! Opens an ELM327 serial bridge, runs an OBD session on it and logs
//! connection-state and snapshot changes until interrupted.

use anyhow::{bail, Context};
use config::{Config, ConfigError, Environment, File, Source};
use data_validator::ValidationConfig;
use obd_protocol::ObdError;
use obd_scheduler::{ConnectionState, ConnectionStateMachine, ObdEngine, ObdSession, SessionConfig};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::SerialPortBuilderExt;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Config file looked up when no path is given
pub const DEFAULT_CONFIG: &str = "obd-monitor";

/// Serial device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device node (RFCOMM bind of a Bluetooth adapter, or USB serial)
    pub device: String,
    /// Baud rate; protocol default when unset
    pub baud_rate: Option<u32>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/rfcomm0".to_string(),
            baud_rate: None,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Max level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of plain text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub serial: SerialConfig,
    pub session: SessionConfig,
    pub validation: ValidationConfig,
    pub log: LogConfig,
    /// Prometheus listen address; no exporter when unset
    pub metrics_addr: Option<SocketAddr>,
}

/// Load configuration from `path` (or the optional default file) and `OBD__*` variables
pub fn load_config(path: Option<&str>) -> Result<MonitorConfig, ConfigError> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name(DEFAULT_CONFIG).required(false),
    };
    load_from(file)
}

fn load_from<S>(source: S) -> Result<MonitorConfig, ConfigError>
where
    S: Source + Send + Sync + 'static,
{
    Config::builder()
        .add_source(source)
        .add_source(
            Environment::with_prefix("OBD")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

/// Initialize logging
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let level = Level::from_str(&config.level)
        .with_context(|| format!("Invalid log level {:?}", config.level))?;
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
    .context("Failed to set tracing subscriber")
}

/// Install the Prometheus exporter and describe the session counters
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    metrics::describe_counter!("obd_commands_sent_total", "Commands written to the adapter");
    metrics::describe_counter!("obd_command_timeouts_total", "Commands that got no reply in time");
    metrics::describe_counter!("obd_decode_failures_total", "Replies that did not decode, by PID");
    metrics::describe_counter!("obd_init_retries_total", "Retried adapter setup steps");
    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

/// Open the configured serial device and monitor it until Ctrl-C
pub async fn run(config: MonitorConfig) -> anyhow::Result<()> {
    let connection = ConnectionStateMachine::new();
    connection.begin_connect();

    let baud_rate = config
        .serial
        .baud_rate
        .unwrap_or_else(|| config.session.protocol.default_baud_rate());
    info!(
        "Opening {} at {} baud, protocol {}",
        config.serial.device, baud_rate, config.session.protocol
    );

    let port = match tokio_serial::new(&config.serial.device, baud_rate)
        .timeout(Duration::from_millis(100))
        .open_native_async()
    {
        Ok(port) => port,
        Err(err) => {
            let reason = match err.kind() {
                tokio_serial::ErrorKind::NoDevice => ObdError::DeviceNotFound,
                _ => ObdError::SerialError(err.to_string()),
            };
            connection.fail(reason);
            return Err(err)
                .with_context(|| format!("Failed to open serial port {}", config.serial.device));
        }
    };

    let (reader, writer) = tokio::io::split(port);
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };
    monitor(config, connection, reader, writer, shutdown).await
}

/// Run a session over `reader`/`writer`, logging its feeds until `shutdown`
/// resolves or the session ends
pub async fn monitor<R, W>(
    config: MonitorConfig,
    connection: ConnectionStateMachine,
    reader: R,
    writer: W,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let engine = ObdEngine::new(config.session, config.validation, connection)
        .context("Invalid session configuration")?;
    let (handle, mut session) = ObdSession::spawn(engine, reader, writer);
    let mut state = handle.state();
    let mut snapshot = handle.snapshot();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Ok(()) = state.changed() => {
                let current = state.borrow_and_update().clone();
                if let ConnectionState::Failed(reason) = current {
                    error!("Connection failed: {}", reason);
                    handle.disconnect().await.ok();
                    bail!("OBD session failed: {}", reason);
                }
                info!("Connection state: {:?}", current);
            }
            Ok(()) = snapshot.changed() => {
                let line = serde_json::to_string(&*snapshot.borrow_and_update())?;
                info!(target: "snapshot", "{}", line);
            }
            result = &mut session => {
                return result
                    .context("Session task panicked")?
                    .context("Session ended with an error");
            }
            _ = &mut shutdown => {
                info!("Interrupted, disconnecting");
                break;
            }
        }
    }

    handle.disconnect().await.ok();
    drop(handle);
    session
        .await
        .context("Session task panicked")?
        .context("Session ended with an error")
}
