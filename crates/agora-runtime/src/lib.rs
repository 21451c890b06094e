//! Agora Runtime
//!
//! Agent runtime for Agora clients.
//!
//! # Overview
//!
//! The runtime provides:
//! - On-demand agent activation with state restore
//! - Point-to-point requests correlated with their responses
//! - Topic publish with subscription-based fan-out
//! - Typed message handlers and a codec registry keyed by type name
//!
//! # TigerStyle
//! - Single activation guarantee (one agent instance per id)
//! - Every pending request resolves exactly once
//! - Bounded outbound queue (senders wait, nothing is dropped silently)

pub mod agent;
pub mod config;
pub mod container;
pub mod handlers;
pub mod message;
pub mod pending;
pub mod runtime;
pub mod serialization;
pub mod stats;
pub mod subscriptions;

pub use agent::{Agent, AgentFactory, FnAgentFactory, MessageContext};
pub use config::RuntimeConfig;
pub use container::{AgentCell, AgentContainer};
pub use handlers::{HandlerMap, Handles, RoutedAgent};
pub use message::{AnyMessage, Message};
pub use pending::PendingRequests;
pub use runtime::{AgentRuntime, AgentRuntimeBuilder, PublishOptions, RuntimeHandle, SendOptions};
pub use serialization::{JsonCodec, MessageCodec, SerializationRegistry};
pub use stats::{RuntimeStats, RuntimeStatsSnapshot};
pub use subscriptions::SubscriptionIndex;

pub use agora_core::{
    AgentId, AgentType, Error, KeyMapping, Payload, Result, SubscriptionDefinition, TopicId,
    TopicMatcher,
};
