//! Runtime configuration
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use agora_core::constants::*;
use agora_core::{Error, Result};
use agora_transport::RouterConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`AgentRuntime`](crate::AgentRuntime)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Gateway address for the default TCP connector (host:port)
    #[serde(default = "default_gateway_address")]
    pub gateway_address: String,

    /// Client id presented on every gateway connection (generated if not set)
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Message router configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Timeout for gateway acknowledgements of control requests
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,

    /// Deliver a published event once per target agent, even when several
    /// subscriptions resolve to it
    #[serde(default = "default_deduplicate_publish_targets")]
    pub deduplicate_publish_targets: bool,
}

fn default_gateway_address() -> String {
    GATEWAY_ADDRESS_DEFAULT.to_string()
}

fn default_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_control_timeout_ms() -> u64 {
    CONTROL_REQUEST_TIMEOUT_MS_DEFAULT
}

fn default_deduplicate_publish_targets() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gateway_address: default_gateway_address(),
            client_id: default_client_id(),
            router: RouterConfig::default(),
            control_timeout_ms: CONTROL_REQUEST_TIMEOUT_MS_DEFAULT,
            deduplicate_publish_targets: true,
        }
    }
}

impl RuntimeConfig {
    /// Create from environment variables
    ///
    /// Reads:
    /// - `AGORA_GATEWAY_ADDRESS`: Gateway address (default: "127.0.0.1:5001")
    /// - `AGORA_CLIENT_ID`: Client id (default: random UUID)
    /// - `AGORA_OUTBOUND_QUEUE_CAPACITY`: Outbound queue capacity (default: 1024)
    ///
    /// # Errors
    /// Returns error if a variable is set but does not parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(address) = std::env::var("AGORA_GATEWAY_ADDRESS") {
            config.gateway_address = address;
        }
        if let Ok(client_id) = std::env::var("AGORA_CLIENT_ID") {
            config.client_id = client_id;
        }
        if let Ok(capacity) = std::env::var("AGORA_OUTBOUND_QUEUE_CAPACITY") {
            config.router.outbound_queue_capacity = capacity.parse().map_err(|e| {
                Error::invalid_configuration(
                    "router.outbound_queue_capacity",
                    format!("{}: {}", capacity, e),
                )
            })?;
        }
        Ok(config)
    }

    /// Create configuration for testing with short timeouts
    pub fn for_testing() -> Self {
        Self {
            router: RouterConfig::for_testing(),
            control_timeout_ms: 2_000,
            ..Default::default()
        }
    }

    /// Set the gateway address
    pub fn with_gateway_address(mut self, address: impl Into<String>) -> Self {
        self.gateway_address = address.into();
        self
    }

    /// Set the client id
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the router configuration
    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.router = router;
        self
    }

    /// Set the control request timeout
    pub fn with_control_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.control_timeout_ms = timeout_ms;
        self
    }

    /// Deliver events once per matching subscription instead of once per agent
    pub fn with_deduplicate_publish_targets(mut self, deduplicate: bool) -> Self {
        self.deduplicate_publish_targets = deduplicate;
        self
    }

    /// Control request timeout as Duration
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.gateway_address.contains(':') {
            return Err(Error::invalid_configuration(
                "gateway_address",
                "must be in host:port format",
            ));
        }
        if self.client_id.is_empty() || self.client_id.len() > CLIENT_ID_LENGTH_BYTES_MAX {
            return Err(Error::invalid_configuration(
                "client_id",
                format!("must be 1..={} bytes", CLIENT_ID_LENGTH_BYTES_MAX),
            ));
        }
        if self.control_timeout_ms == 0
            || self.control_timeout_ms > CONTROL_REQUEST_TIMEOUT_MS_MAX
        {
            return Err(Error::invalid_configuration(
                "control_timeout_ms",
                format!("must be in 1..={}", CONTROL_REQUEST_TIMEOUT_MS_MAX),
            ));
        }
        self.router
            .validate()
            .map_err(|reason| Error::invalid_configuration("router", reason))
    }
}
