//! Agent trait and factories
//!
//! TigerStyle: Agents are created by an explicit factory per agent type and
//! handle one message at a time.

use crate::handlers::HandlerMap;
use crate::message::AnyMessage;
use crate::runtime::RuntimeHandle;
use crate::serialization::MessageCodec;
use agora_core::{AgentId, Result, TopicId};
use async_trait::async_trait;
use bytes::Bytes;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context for one message delivered to an agent
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Id of the message
    pub message_id: String,
    /// Agent that sent the message, if it came from one
    pub sender: Option<AgentId>,
    /// Topic the message was published to; `None` for direct requests
    pub topic: Option<TopicId>,
    /// Whether the sender waits for a response
    pub is_rpc: bool,
    /// Cancelled when the runtime shuts down
    pub cancellation: CancellationToken,
    /// Handle for sending and publishing from inside the handler
    pub runtime: RuntimeHandle,
}

/// A stateful agent
///
/// The runtime holds at most one instance per [`AgentId`] and delivers one
/// message at a time to it.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Handle one message; the returned message is the response to a request
    ///
    /// The response of a published event is discarded.
    async fn on_message(
        &mut self,
        message: AnyMessage,
        ctx: MessageContext,
    ) -> Result<Option<AnyMessage>>;

    /// Snapshot the agent's state as an opaque blob
    async fn save_state(&self) -> Result<Option<Bytes>> {
        Ok(None)
    }

    /// Restore the agent's state from a blob produced by `save_state`
    async fn load_state(&mut self, _state: Bytes) -> Result<()> {
        Ok(())
    }
}

/// Creates agents of one type
#[async_trait]
pub trait AgentFactory: Send + Sync + 'static {
    /// Create the agent for `id`
    async fn create(&self, id: &AgentId, runtime: RuntimeHandle) -> Result<Box<dyn Agent>>;

    /// Codecs for the message types this agent type handles
    ///
    /// Registered with the runtime's serializers when the agent type is.
    fn message_codecs(&self) -> Vec<(&'static str, Arc<dyn MessageCodec>)> {
        Vec::new()
    }
}

/// Factory from a closure
///
/// # Example
///
/// ```ignore
/// let factory = FnAgentFactory::new(|id: &AgentId, _runtime| Counter::new(id.key()))
///     .handling(&handlers);
/// ```
pub struct FnAgentFactory<F, A> {
    make: F,
    codecs: Vec<(&'static str, Arc<dyn MessageCodec>)>,
    _agent: PhantomData<fn() -> A>,
}

impl<F, A> FnAgentFactory<F, A>
where
    F: Fn(&AgentId, RuntimeHandle) -> A + Send + Sync + 'static,
    A: Agent,
{
    /// Wrap a closure
    pub fn new(make: F) -> Self {
        Self {
            make,
            codecs: Vec::new(),
            _agent: PhantomData,
        }
    }

    /// Declare the message types handled by `handlers`
    pub fn handling<S: Send + Sync + 'static>(mut self, handlers: &HandlerMap<S>) -> Self {
        self.codecs.extend(handlers.codecs());
        self
    }
}

#[async_trait]
impl<F, A> AgentFactory for FnAgentFactory<F, A>
where
    F: Fn(&AgentId, RuntimeHandle) -> A + Send + Sync + 'static,
    A: Agent,
{
    async fn create(&self, id: &AgentId, runtime: RuntimeHandle) -> Result<Box<dyn Agent>> {
        Ok(Box::new((self.make)(id, runtime)))
    }

    fn message_codecs(&self) -> Vec<(&'static str, Arc<dyn MessageCodec>)> {
        self.codecs.clone()
    }
}
