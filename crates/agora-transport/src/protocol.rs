//! Gateway wire protocol
//!
//! TigerStyle: Explicit message types with bounded payloads.

use agora_core::{AgentId, Payload, SubscriptionDefinition};
use serde::{Deserialize, Serialize};

/// Correlation or control request id
pub type RequestId = String;

/// Metadata sent as the first frame of every gateway connection
///
/// The client id stays the same across reconnects so the gateway can treat a
/// new stream as the same logical client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    /// Stable per-process client id
    pub client_id: String,
    /// Wire protocol version
    pub protocol_version: u32,
}

impl ConnectionMetadata {
    /// Metadata for the current protocol version
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            protocol_version: agora_core::constants::PROTOCOL_VERSION,
        }
    }
}

/// Envelope exchanged with the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    // =========================================================================
    // Messaging
    // =========================================================================
    /// Point-to-point request to an agent
    Request {
        correlation_id: RequestId,
        message_id: String,
        source: Option<AgentId>,
        target: AgentId,
        payload: Payload,
    },

    /// Response to a request, carrying the request's correlation id
    Response {
        correlation_id: RequestId,
        result: Result<Option<Payload>, String>,
    },

    /// Event published to a topic
    PublishEvent {
        id: String,
        topic_type: String,
        topic_source: String,
        sender: Option<AgentId>,
        payload: Payload,
    },

    // =========================================================================
    // Control
    // =========================================================================
    /// Announce an agent type hosted by this client
    RegisterAgentTypeRequest {
        request_id: RequestId,
        type_name: String,
    },

    /// Acknowledge an agent type registration
    RegisterAgentTypeResponse {
        request_id: RequestId,
        error: Option<String>,
    },

    /// Install a subscription at the gateway
    AddSubscriptionRequest {
        request_id: RequestId,
        subscription: SubscriptionDefinition,
    },

    /// Acknowledge a subscription install
    AddSubscriptionResponse {
        request_id: RequestId,
        error: Option<String>,
    },

    /// Remove a subscription at the gateway
    RemoveSubscriptionRequest {
        request_id: RequestId,
        subscription_id: String,
    },

    /// Acknowledge a subscription removal
    RemoveSubscriptionResponse {
        request_id: RequestId,
        error: Option<String>,
    },
}

impl Envelope {
    /// Correlation or control request id, if this envelope has one
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Request { correlation_id, .. } => Some(correlation_id),
            Self::Response { correlation_id, .. } => Some(correlation_id),
            Self::PublishEvent { .. } => None,
            Self::RegisterAgentTypeRequest { request_id, .. } => Some(request_id),
            Self::RegisterAgentTypeResponse { request_id, .. } => Some(request_id),
            Self::AddSubscriptionRequest { request_id, .. } => Some(request_id),
            Self::AddSubscriptionResponse { request_id, .. } => Some(request_id),
            Self::RemoveSubscriptionRequest { request_id, .. } => Some(request_id),
            Self::RemoveSubscriptionResponse { request_id, .. } => Some(request_id),
        }
    }

    /// Check if this envelope answers an earlier request
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            Self::Response { .. }
                | Self::RegisterAgentTypeResponse { .. }
                | Self::AddSubscriptionResponse { .. }
                | Self::RemoveSubscriptionResponse { .. }
        )
    }

    /// Short name of the envelope kind, for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Response { .. } => "response",
            Self::PublishEvent { .. } => "publish_event",
            Self::RegisterAgentTypeRequest { .. } => "register_agent_type_request",
            Self::RegisterAgentTypeResponse { .. } => "register_agent_type_response",
            Self::AddSubscriptionRequest { .. } => "add_subscription_request",
            Self::AddSubscriptionResponse { .. } => "add_subscription_response",
            Self::RemoveSubscriptionRequest { .. } => "remove_subscription_request",
            Self::RemoveSubscriptionResponse { .. } => "remove_subscription_response",
        }
    }

    /// Error carried by a control response, if any
    pub fn control_error(&self) -> Option<&str> {
        match self {
            Self::RegisterAgentTypeResponse { error, .. }
            | Self::AddSubscriptionResponse { error, .. }
            | Self::RemoveSubscriptionResponse { error, .. } => error.as_deref(),
            _ => None,
        }
    }
}
