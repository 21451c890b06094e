//! Router configuration
//!
//! TigerStyle: Explicit configuration with bounded values.

use agora_core::constants::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect backoff configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the second connect attempt in milliseconds
    #[serde(default = "default_delay_ms_initial")]
    pub delay_ms_initial: u64,
    /// Upper bound on the delay between attempts in milliseconds
    #[serde(default = "default_delay_ms_max")]
    pub delay_ms_max: u64,
    /// Connect attempts before giving up
    #[serde(default = "default_attempts_count_max")]
    pub attempts_count_max: u32,
    /// Timeout for one connect attempt in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_delay_ms_initial() -> u64 {
    RECONNECT_DELAY_MS_INITIAL
}

fn default_delay_ms_max() -> u64 {
    RECONNECT_DELAY_MS_MAX
}

fn default_attempts_count_max() -> u32 {
    RECONNECT_ATTEMPTS_COUNT_DEFAULT
}

fn default_connect_timeout_ms() -> u64 {
    CONNECT_TIMEOUT_MS_DEFAULT
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            delay_ms_initial: RECONNECT_DELAY_MS_INITIAL,
            delay_ms_max: RECONNECT_DELAY_MS_MAX,
            attempts_count_max: RECONNECT_ATTEMPTS_COUNT_DEFAULT,
            connect_timeout_ms: CONNECT_TIMEOUT_MS_DEFAULT,
        }
    }
}

impl BackoffConfig {
    /// Delay after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        debug_assert!(attempt >= 1);
        let shift = attempt.saturating_sub(1).min(20);
        let delay_ms = self
            .delay_ms_initial
            .saturating_mul(1u64 << shift)
            .min(self.delay_ms_max);
        Duration::from_millis(delay_ms)
    }

    /// Connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.delay_ms_initial == 0 {
            return Err("initial reconnect delay must be positive".into());
        }
        if self.delay_ms_max < self.delay_ms_initial {
            return Err("max reconnect delay must not be below the initial delay".into());
        }
        if self.attempts_count_max == 0 || self.attempts_count_max > RECONNECT_ATTEMPTS_COUNT_MAX
        {
            return Err(format!(
                "reconnect attempts must be in 1..={}",
                RECONNECT_ATTEMPTS_COUNT_MAX
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect timeout must be positive".into());
        }
        Ok(())
    }
}

/// Message router configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Capacity of the outbound queue; producers wait when it is full
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Retries of one envelope after a transient write fault
    #[serde(default = "default_write_retry_count_max")]
    pub write_retry_count_max: u32,
    /// Reconnect backoff
    #[serde(default)]
    pub backoff: BackoffConfig,
}

fn default_outbound_queue_capacity() -> usize {
    OUTBOUND_QUEUE_CAPACITY_DEFAULT
}

fn default_write_retry_count_max() -> u32 {
    WRITE_RETRY_COUNT_DEFAULT
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY_DEFAULT,
            write_retry_count_max: WRITE_RETRY_COUNT_DEFAULT,
            backoff: BackoffConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Set the outbound queue capacity
    pub fn with_outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.outbound_queue_capacity = capacity;
        self
    }

    /// Set the write retry count
    pub fn with_write_retry_count(mut self, count: u32) -> Self {
        self.write_retry_count_max = count;
        self
    }

    /// Set the reconnect backoff
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.outbound_queue_capacity == 0
            || self.outbound_queue_capacity > OUTBOUND_QUEUE_CAPACITY_MAX
        {
            return Err(format!(
                "outbound queue capacity must be in 1..={}",
                OUTBOUND_QUEUE_CAPACITY_MAX
            ));
        }
        if self.write_retry_count_max > WRITE_RETRY_COUNT_MAX {
            return Err(format!(
                "write retry count must be at most {}",
                WRITE_RETRY_COUNT_MAX
            ));
        }
        self.backoff.validate()
    }

    /// Create configuration for testing with short delays
    pub fn for_testing() -> Self {
        Self {
            outbound_queue_capacity: 64,
            write_retry_count_max: WRITE_RETRY_COUNT_DEFAULT,
            backoff: BackoffConfig {
                delay_ms_initial: 5,
                delay_ms_max: 50,
                attempts_count_max: 5,
                connect_timeout_ms: 1000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = RouterConfig::default();
        assert_eq!(config.outbound_queue_capacity, 1024);
        assert_eq!(config.write_retry_count_max, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let invalid = RouterConfig::default().with_outbound_queue_capacity(0);
        assert!(invalid.validate().is_err());

        let invalid = RouterConfig::default().with_write_retry_count(WRITE_RETRY_COUNT_MAX + 1);
        assert!(invalid.validate().is_err());

        let invalid = RouterConfig::default().with_backoff(BackoffConfig {
            attempts_count_max: 0,
            ..Default::default()
        });
        assert!(invalid.validate().is_err());

        assert!(RouterConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_backoff_is_bounded_exponential() {
        let backoff = BackoffConfig {
            delay_ms_initial: 10,
            delay_ms_max: 100,
            attempts_count_max: 10,
            connect_timeout_ms: 1000,
        };
        assert_eq!(backoff.delay_after(1), Duration::from_millis(10));
        assert_eq!(backoff.delay_after(2), Duration::from_millis(20));
        assert_eq!(backoff.delay_after(4), Duration::from_millis(80));
        assert_eq!(backoff.delay_after(5), Duration::from_millis(100));
        assert_eq!(backoff.delay_after(64), Duration::from_millis(100));
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: RouterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RouterConfig::default());
    }
}
