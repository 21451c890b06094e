//! Agora Storage
//!
//! Agent state storage for the Agora agent runtime.
//!
//! # Overview
//!
//! The runtime never interprets agent state. Agents serialize themselves into
//! an opaque blob, and a [`StateStore`] keeps the latest blob per agent id.
//! Backends:
//! - In-memory (for testing and single-process deployments)

pub mod memory;
pub mod store;

pub use memory::MemoryStateStore;
pub use store::StateStore;
