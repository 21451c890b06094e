//! Agora Core
//!
//! Core types, errors, and constants for the Agora agent runtime.
//!
//! # Overview
//!
//! Agora activates stateful agents on demand, routes point-to-point requests
//! between them with response correlation, and fans topic-addressed events out
//! to every subscribed agent, all over one long-lived stream to a gateway.
//! This crate holds the vocabulary shared by the transport and runtime crates:
//! addresses, payloads, subscriptions, errors, and limits.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `AGENT_KEY_LENGTH_BYTES_MAX`)
//! - No recursion (bounded iteration only)

pub mod agent_id;
pub mod constants;
pub mod error;
pub mod metrics;
pub mod payload;
pub mod subscription;
pub mod telemetry;

pub use agent_id::{AgentId, AgentType, TopicId};
pub use constants::*;
pub use error::{Error, Result};
pub use payload::{Payload, JSON_CONTENT_TYPE, OCTET_STREAM_CONTENT_TYPE};
pub use subscription::{KeyMapping, SubscriptionDefinition, TopicMatcher};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
