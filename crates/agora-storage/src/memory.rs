//! In-memory state store
//!
//! TigerStyle: Simple in-memory implementation with explicit size limits.

use crate::store::StateStore;
use agora_core::constants::AGENT_STATE_SIZE_BYTES_MAX;
use agora_core::{AgentId, Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::instrument;

/// In-memory state store
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    /// agent id -> latest state blob
    data: Arc<RwLock<HashMap<AgentId, Bytes>>>,
}

impl MemoryStateStore {
    /// Create a new in-memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    #[instrument(skip(self, state), fields(agent_id = %agent_id, state_len = state.len()))]
    async fn save(&self, agent_id: &AgentId, state: Bytes) -> Result<()> {
        if state.len() > AGENT_STATE_SIZE_BYTES_MAX {
            return Err(Error::StateTooLarge {
                size: state.len(),
                limit: AGENT_STATE_SIZE_BYTES_MAX,
            });
        }

        let mut data = self.data.write().await;
        data.insert(agent_id.clone(), state);
        Ok(())
    }

    #[instrument(skip(self), fields(agent_id = %agent_id))]
    async fn load(&self, agent_id: &AgentId) -> Result<Option<Bytes>> {
        let data = self.data.read().await;
        Ok(data.get(agent_id).cloned())
    }

    #[instrument(skip(self), fields(agent_id = %agent_id))]
    async fn delete(&self, agent_id: &AgentId) -> Result<()> {
        let mut data = self.data.write().await;
        data.remove(agent_id);
        Ok(())
    }
}
