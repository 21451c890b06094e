//! Typed message handlers
//!
//! TigerStyle: Handlers are registered explicitly per message type name, no
//! reflection.
//!
//! A [`HandlerMap`] maps message type names to handlers over some agent state
//! `S`. A state type opts into a message type by implementing
//! [`Handles<M>`](Handles); [`RoutedAgent`] turns the state and its map into
//! an [`Agent`]. The map also carries a JSON codec per handled type, which
//! the runtime registers along with the agent type.

use crate::agent::{Agent, MessageContext};
use crate::message::{AnyMessage, Message};
use crate::serialization::{JsonCodec, MessageCodec};
use agora_core::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Handler for message type `M`, implemented by agent state
#[async_trait]
pub trait Handles<M: Message>: Send + Sync {
    /// Handle one message; the returned message answers a request
    async fn handle(&mut self, message: M, ctx: &MessageContext) -> Result<Option<AnyMessage>>;
}

#[async_trait]
trait ErasedHandler<S>: Send + Sync {
    async fn call(
        &self,
        state: &mut S,
        message: AnyMessage,
        ctx: &MessageContext,
    ) -> Result<Option<AnyMessage>>;
}

struct TypedHandler<M> {
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<S, M> ErasedHandler<S> for TypedHandler<M>
where
    S: Handles<M> + 'static,
    M: Message,
{
    async fn call(
        &self,
        state: &mut S,
        message: AnyMessage,
        ctx: &MessageContext,
    ) -> Result<Option<AnyMessage>> {
        let message = message.downcast::<M>().map_err(|other| {
            Error::serialization(
                M::TYPE_NAME,
                format!("handler received a {} value", other.type_name()),
            )
        })?;
        state.handle(message, ctx).await
    }
}

/// Message type name to handler
pub struct HandlerMap<S> {
    handlers: HashMap<&'static str, Box<dyn ErasedHandler<S>>>,
    codecs: HashMap<&'static str, Arc<dyn MessageCodec>>,
}

impl<S: Send + Sync + 'static> HandlerMap<S> {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            codecs: HashMap::new(),
        }
    }

    /// Route messages of type `M` to `S`'s `Handles<M>` implementation
    pub fn with_handler<M: Message>(mut self) -> Self
    where
        S: Handles<M>,
    {
        self.handlers.insert(
            M::TYPE_NAME,
            Box::new(TypedHandler::<M> {
                _message: PhantomData,
            }),
        );
        self.codecs
            .insert(M::TYPE_NAME, Arc::new(JsonCodec::<M>::new()));
        self
    }

    /// Check if a handler is registered for the type name
    pub fn handles(&self, type_name: &str) -> bool {
        self.handlers.contains_key(type_name)
    }

    /// Registered message type names, sorted
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Codec of every handled message type, sorted by type name
    pub fn codecs(&self) -> Vec<(&'static str, Arc<dyn MessageCodec>)> {
        let mut codecs: Vec<_> = self
            .codecs
            .iter()
            .map(|(name, codec)| (*name, codec.clone()))
            .collect();
        codecs.sort_unstable_by_key(|(name, _)| *name);
        codecs
    }

    /// Invoke the handler for the message's type
    pub async fn dispatch(
        &self,
        state: &mut S,
        message: AnyMessage,
        ctx: &MessageContext,
    ) -> Result<Option<AnyMessage>> {
        let handler = self
            .handlers
            .get(message.type_name())
            .ok_or_else(|| Error::NoHandler {
                type_name: message.type_name().to_string(),
            })?;
        handler.call(state, message, ctx).await
    }
}

impl<S: Send + Sync + 'static> Default for HandlerMap<S> {
    fn default() -> Self {
        Self::new()
    }
}

type SaveFn<S> = fn(&S) -> Result<Bytes>;
type LoadFn<S> = fn(Bytes) -> Result<S>;

fn save_json<S: Serialize>(state: &S) -> Result<Bytes> {
    serde_json::to_vec(state)
        .map(Bytes::from)
        .map_err(|e| Error::serialization(std::any::type_name::<S>(), e.to_string()))
}

fn load_json<S: DeserializeOwned>(blob: Bytes) -> Result<S> {
    serde_json::from_slice(&blob)
        .map_err(|e| Error::serialization(std::any::type_name::<S>(), e.to_string()))
}

/// Agent built from state and a shared handler map
pub struct RoutedAgent<S> {
    state: S,
    handlers: Arc<HandlerMap<S>>,
    persistence: Option<(SaveFn<S>, LoadFn<S>)>,
}

impl<S: Send + Sync + 'static> RoutedAgent<S> {
    /// Agent whose state is not persisted
    pub fn new(state: S, handlers: Arc<HandlerMap<S>>) -> Self {
        Self {
            state,
            handlers,
            persistence: None,
        }
    }

    /// Agent whose state is saved and loaded as JSON
    pub fn persistent(state: S, handlers: Arc<HandlerMap<S>>) -> Self
    where
        S: Serialize + DeserializeOwned,
    {
        Self {
            state,
            handlers,
            persistence: Some((save_json::<S>, load_json::<S>)),
        }
    }

    /// Agent state
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Mutable agent state
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }
}

#[async_trait]
impl<S: Send + Sync + 'static> Agent for RoutedAgent<S> {
    async fn on_message(
        &mut self,
        message: AnyMessage,
        ctx: MessageContext,
    ) -> Result<Option<AnyMessage>> {
        self.handlers.dispatch(&mut self.state, message, &ctx).await
    }

    async fn save_state(&self) -> Result<Option<Bytes>> {
        match &self.persistence {
            Some((save, _)) => save(&self.state).map(Some),
            None => Ok(None),
        }
    }

    async fn load_state(&mut self, blob: Bytes) -> Result<()> {
        if let Some((_, load)) = &self.persistence {
            self.state = load(blob)?;
        }
        Ok(())
    }
}
