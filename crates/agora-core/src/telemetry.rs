//! Logging setup
//!
//! TigerStyle: Explicit telemetry configuration, one global subscriber.
//!
//! Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG` (or the
//! configured level). Library code only emits `tracing` events; binaries and
//! test harnesses decide whether to call [`init_telemetry`].

use crate::error::{Error, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default log level filter
const LOG_LEVEL_DEFAULT: &str = "info";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Log level filter, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Whether to write events to stdout
    pub stdout_enabled: bool,
    /// Whether to emit ANSI colors
    pub ansi_enabled: bool,
    /// Whether to include the event target (module path)
    pub target_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "agora".to_string(),
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            stdout_enabled: true,
            ansi_enabled: true,
            target_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Disable stdout output
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Disable ANSI colors
    pub fn without_ansi(mut self) -> Self {
        self.ansi_enabled = false;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `AGORA_SERVICE_NAME`: Service name (default: "agora")
    /// - `RUST_LOG`: Log level filter (default: "info")
    /// - `NO_COLOR`: Disable ANSI colors when set
    pub fn from_env() -> Self {
        let service_name =
            std::env::var("AGORA_SERVICE_NAME").unwrap_or_else(|_| "agora".to_string());
        let log_level =
            std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_LEVEL_DEFAULT.to_string());
        let ansi_enabled = std::env::var_os("NO_COLOR").is_none();

        Self {
            service_name,
            log_level,
            ansi_enabled,
            ..Default::default()
        }
    }
}

/// Guard returned by [`init_telemetry`]
///
/// Holds nothing today; keeping it alive for the life of the process leaves
/// room for exporters that flush on drop.
#[derive(Debug)]
pub struct TelemetryGuard {
    _private: (),
}

/// Install the global tracing subscriber
///
/// # Errors
/// Returns error if the filter does not parse or a global subscriber is
/// already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            Error::invalid_configuration("log_level", format!("{}: {}", config.log_level, e))
        })?,
    };

    let fmt_layer = if config.stdout_enabled {
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(config.ansi_enabled)
                .with_target(config.target_enabled),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::internal(format!("failed to initialize tracing subscriber: {}", e)))?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");

    Ok(TelemetryGuard { _private: () })
}
