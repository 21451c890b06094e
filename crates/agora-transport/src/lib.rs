//! Agora Transport
//!
//! Gateway transport for the Agora agent runtime.
//!
//! # Overview
//!
//! The transport provides:
//! - The envelope wire protocol and length-prefixed framing
//! - A reconnecting channel that owns the physical gateway stream
//! - A message router with a bounded outbound queue and two pumps
//! - TCP and in-memory gateway connectors
//!
//! # TigerStyle
//! - One stream at a time, replaced by compare-and-swap
//! - Bounded queues (senders wait, nothing is silently dropped)
//! - Explicit lifecycle states, including an explicit fault

pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod router;
pub mod tcp;

pub use channel::ReconnectingChannel;
pub use codec::{encode_frame, read_frame, write_frame, FRAME_HEADER_SIZE_BYTES};
pub use config::{BackoffConfig, RouterConfig};
pub use connection::{Connection, Connector, EnvelopeReader, EnvelopeWriter, StreamingCall};
pub use error::{TransportError, TransportResult};
pub use memory::{MemoryConnector, MemoryGateway};
pub use protocol::{ConnectionMetadata, Envelope, RequestId};
pub use router::{DeliveryReceipt, MessageRouter, MessageSink, RouterState};
pub use tcp::{accept_connection, TcpConnector};
