//! Error types for Agora
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for Agora operations
pub type Result<T> = std::result::Result<T, Error>;

/// Agora error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Agent Errors
    // =========================================================================
    #[error("Unknown agent type: {agent_type}")]
    UnknownAgentType { agent_type: String },

    #[error("Agent type already registered: {agent_type}")]
    DuplicateAgentType { agent_type: String },

    #[error("Agent activation failed: {agent_id}, reason: {reason}")]
    AgentActivationFailed { agent_id: String, reason: String },

    #[error("Handler failed: {agent_id}, reason: {reason}")]
    HandlerFailed { agent_id: String, reason: String },

    #[error("No handler for message type {type_name}")]
    NoHandler { type_name: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid agent ID: {id}, reason: {reason}")]
    InvalidAgentId { id: String, reason: String },

    #[error("Invalid topic: {topic}, reason: {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("Agent state too large: {size} bytes exceeds limit of {limit} bytes")]
    StateTooLarge { size: usize, limit: usize },

    // =========================================================================
    // Subscription Errors
    // =========================================================================
    #[error("Subscription already exists: {id}")]
    DuplicateSubscription { id: String },

    #[error("Subscription not found: {id}")]
    SubscriptionNotFound { id: String },

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    #[error("Serializer already registered for message type {type_name}")]
    DuplicateSerializer { type_name: String },

    #[error("Serialization failed for message type {type_name}: {reason}")]
    Serialization { type_name: String, reason: String },

    // =========================================================================
    // Messaging Errors
    // =========================================================================
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("Delivery failed: {reason}")]
    Delivery { reason: String },

    #[error("Operation timed out: {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Remote error: {message}")]
    Remote { message: String },

    // =========================================================================
    // State Errors
    // =========================================================================
    #[error("State store failed: {agent_id}, reason: {reason}")]
    StateStore { agent_id: String, reason: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an unknown agent type error
    pub fn unknown_agent_type(agent_type: impl Into<String>) -> Self {
        Self::UnknownAgentType {
            agent_type: agent_type.into(),
        }
    }

    /// Create a handler failed error
    pub fn handler_failed(agent_id: impl ToString, reason: impl Into<String>) -> Self {
        Self::HandlerFailed {
            agent_id: agent_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Serialization {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a delivery error
    pub fn delivery(reason: impl Into<String>) -> Self {
        Self::Delivery {
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a cancelled error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a remote error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    ///
    /// Retrying is always the caller's decision; the runtime never retries
    /// a request on its own.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Delivery { .. } | Self::Timeout { .. }
        )
    }
}
