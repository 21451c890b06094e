//! State store trait
//!
//! TigerStyle: Explicit operations, bounded sizes.

use agora_core::{AgentId, Result};
use async_trait::async_trait;
use bytes::Bytes;

/// Store for opaque per-agent state blobs
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Replace the stored blob for an agent
    async fn save(&self, agent_id: &AgentId, state: Bytes) -> Result<()>;

    /// Load the stored blob for an agent
    async fn load(&self, agent_id: &AgentId) -> Result<Option<Bytes>>;

    /// Remove the stored blob for an agent
    async fn delete(&self, agent_id: &AgentId) -> Result<()>;

    /// Check if a blob exists for an agent
    async fn exists(&self, agent_id: &AgentId) -> Result<bool> {
        Ok(self.load(agent_id).await?.is_some())
    }
}
