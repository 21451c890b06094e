//! Agent runtime
//!
//! TigerStyle: Single entry point, explicit configuration, clean shutdown.
//!
//! [`AgentRuntime`] composes the serialization registry, the agent container
//! and the message router. Outbound requests are correlated with their
//! responses through a pending table keyed by a fresh UUID per request.
//! Inbound envelopes arrive from the router's read pump one at a time.
//!
//! Handlers run on the read pump. A handler that sends a request and awaits
//! its response blocks the pump that would deliver that response, so nested
//! requests from inside a handler must be spawned rather than awaited.

use crate::agent::{AgentFactory, MessageContext};
use crate::config::RuntimeConfig;
use crate::container::AgentContainer;
use crate::message::{AnyMessage, Message};
use crate::pending::PendingRequests;
use crate::serialization::{MessageCodec, SerializationRegistry};
use crate::stats::{RuntimeStats, RuntimeStatsSnapshot};
use agora_core::{
    metrics, AgentId, AgentType, Error, Payload, Result, SubscriptionDefinition, TopicId,
};
use agora_storage::{MemoryStateStore, StateStore};
use agora_transport::{
    ConnectionMetadata, Connector, Envelope, MessageRouter, MessageSink, RouterState,
    TcpConnector,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Options
// =============================================================================

/// Options for one request
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Agent on whose behalf the request is sent
    pub sender: Option<AgentId>,
    /// Message id (generated if not set)
    pub message_id: Option<String>,
    /// Give up waiting for the response after this long
    pub timeout: Option<Duration>,
    /// Give up waiting for the response when cancelled
    pub cancellation: Option<CancellationToken>,
}

impl SendOptions {
    /// Options with nothing set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender
    pub fn with_sender(mut self, sender: AgentId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Set the message id
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the cancellation token
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

/// Options for one publish
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Agent on whose behalf the event is published
    pub sender: Option<AgentId>,
    /// Event id (generated if not set)
    pub message_id: Option<String>,
}

impl PublishOptions {
    /// Options with nothing set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sender
    pub fn with_sender(mut self, sender: AgentId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Set the event id
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`AgentRuntime`]
pub struct AgentRuntimeBuilder {
    config: RuntimeConfig,
    connector: Option<Arc<dyn Connector>>,
    state_store: Option<Arc<dyn StateStore>>,
    serializers: Vec<(String, Arc<dyn MessageCodec>)>,
    factories: Vec<(String, Arc<dyn AgentFactory>)>,
    subscriptions: Vec<SubscriptionDefinition>,
    host_cancellation: Option<CancellationToken>,
}

impl AgentRuntimeBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            connector: None,
            state_store: None,
            serializers: Vec::new(),
            factories: Vec::new(),
            subscriptions: Vec::new(),
            host_cancellation: None,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the gateway connector (default: TCP to `gateway_address`)
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Set the state store (default: in-memory)
    pub fn with_state_store(mut self, state_store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(state_store);
        self
    }

    /// Register a codec before start
    pub fn with_serializer(
        mut self,
        type_name: impl Into<String>,
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        self.serializers.push((type_name.into(), codec));
        self
    }

    /// Register an agent type once connected
    pub fn with_agent_factory(
        mut self,
        agent_type: impl Into<String>,
        factory: Arc<dyn AgentFactory>,
    ) -> Self {
        self.factories.push((agent_type.into(), factory));
        self
    }

    /// Add a subscription once connected
    pub fn with_subscription(mut self, subscription: SubscriptionDefinition) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    /// Stop the runtime when the host token is cancelled
    pub fn with_cancellation(mut self, host: CancellationToken) -> Self {
        self.host_cancellation = Some(host);
        self
    }

    /// Start the router and install the configured agent types and
    /// subscriptions
    ///
    /// # Errors
    /// Returns error if the configuration is invalid, a serializer, agent
    /// type or subscription is rejected, or the gateway does not acknowledge
    /// a registration in time.
    pub async fn start(self) -> Result<AgentRuntime> {
        let Self {
            config,
            connector,
            state_store,
            serializers: codecs,
            factories,
            subscriptions,
            host_cancellation,
        } = self;

        config.validate()?;

        let serializers = SerializationRegistry::new();
        for (type_name, codec) in codecs {
            serializers.register_serializer(type_name, codec)?;
        }

        let connector = connector.unwrap_or_else(|| {
            Arc::new(TcpConnector::new(config.gateway_address.clone())) as Arc<dyn Connector>
        });
        let state_store =
            state_store.unwrap_or_else(|| Arc::new(MemoryStateStore::new()) as Arc<dyn StateStore>);

        info!(
            client_id = %config.client_id,
            endpoint = %connector.endpoint(),
            "Starting agent runtime"
        );

        let router = MessageRouter::new(
            config.router.clone(),
            connector,
            ConnectionMetadata::new(config.client_id.clone()),
        )?;

        let runtime = AgentRuntime {
            inner: Arc::new(RuntimeInner {
                config,
                serializers,
                container: AgentContainer::new(state_store),
                router,
                pending: PendingRequests::new(),
                stats: RuntimeStats::default(),
                cancel: CancellationToken::new(),
                stopped: AtomicBool::new(false),
            }),
        };

        let sink = Arc::new(RuntimeSink {
            inner: Arc::downgrade(&runtime.inner),
        });
        runtime.inner.router.start(sink).await?;
        runtime.escalate_router_fault();

        if let Err(e) = runtime.install(factories, subscriptions).await {
            runtime.stop().await;
            return Err(e);
        }

        if let Some(host) = host_cancellation {
            runtime.stop_when_cancelled(host);
        }

        Ok(runtime)
    }
}

impl Default for AgentRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Runtime
// =============================================================================

struct RuntimeInner {
    config: RuntimeConfig,
    serializers: SerializationRegistry,
    container: AgentContainer,
    router: MessageRouter,
    pending: PendingRequests,
    stats: RuntimeStats,
    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The agent runtime
///
/// Cheap to clone; all clones share one router and one set of agents.
#[derive(Clone)]
pub struct AgentRuntime {
    inner: Arc<RuntimeInner>,
}

/// Weak handle to a runtime, given to agents and factories
///
/// Does not keep the runtime alive. Operations on a handle whose runtime is
/// gone fail with `Cancelled`; publishes are dropped.
#[derive(Clone, Default)]
pub struct RuntimeHandle {
    inner: Weak<RuntimeInner>,
}

impl AgentRuntime {
    /// Create a builder
    pub fn builder() -> AgentRuntimeBuilder {
        AgentRuntimeBuilder::new()
    }

    /// Weak handle to this runtime
    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    async fn install(
        &self,
        factories: Vec<(String, Arc<dyn AgentFactory>)>,
        subscriptions: Vec<SubscriptionDefinition>,
    ) -> Result<()> {
        for (agent_type, factory) in factories {
            self.register_agent_factory(agent_type, factory).await?;
        }
        for subscription in subscriptions {
            self.add_subscription(subscription).await?;
        }
        Ok(())
    }

    fn stop_when_cancelled(&self, host: CancellationToken) {
        let handle = self.handle();
        let stopped = self.inner.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stopped.cancelled() => {}
                _ = host.cancelled() => {
                    if let Some(runtime) = handle.upgrade() {
                        info!("Host cancelled, stopping agent runtime");
                        runtime.stop().await;
                    }
                }
            }
        });
    }

    /// Fail every waiting request once the router faults
    ///
    /// A faulted router has no read pump left, so no response can arrive.
    fn escalate_router_fault(&self) {
        let handle = self.handle();
        let stopped = self.inner.cancel.clone();
        let mut state = self.inner.router.subscribe_state();
        tokio::spawn(async move {
            let terminal = tokio::select! {
                biased;
                _ = stopped.cancelled() => return,
                terminal = state.wait_for(|s| s.is_terminal()) => terminal.map(|s| s.clone()),
            };
            let Ok(RouterState::Faulted { reason }) = terminal else {
                return;
            };
            let Some(runtime) = handle.upgrade() else {
                return;
            };
            let failed = runtime
                .inner
                .pending
                .fail_all(|| Error::transport(format!("message router faulted: {}", reason)));
            error!(reason = %reason, failed_requests = failed, "Message router faulted");
        });
    }

    /// Why new requests are refused, if they are
    ///
    /// Checked after a request is registered: `stop` and the fault watcher
    /// set their flag before failing the pending table.
    fn refusal(&self) -> Option<Error> {
        if self.is_stopped() {
            return Some(Error::delivery("runtime stopped"));
        }
        match self.inner.router.state() {
            RouterState::Faulted { reason } => Some(Error::delivery(format!(
                "message router faulted: {}",
                reason
            ))),
            RouterState::Stopped => Some(Error::delivery("message router stopped")),
            RouterState::NotStarted | RouterState::Running => None,
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Send a request to an agent and wait for its response
    ///
    /// # Errors
    /// `Serialization` if the message has no codec; `Delivery` if the request
    /// could not be written to the gateway, or the runtime was stopped or its
    /// router faulted before the send; `Transport` if the router faults while
    /// the response is outstanding; `Timeout` or `Cancelled` when the caller
    /// gives up or the runtime stops mid-request; `Remote` when the target's
    /// handler failed.
    #[instrument(skip_all, fields(agent_id = %target, type_name = message.type_name()), level = "debug")]
    pub async fn send_message(
        &self,
        message: AnyMessage,
        target: &AgentId,
        options: SendOptions,
    ) -> Result<Option<AnyMessage>> {
        let payload = self.inner.serializers.any_to_payload(&message)?;
        let correlation_id = new_id();
        let envelope = Envelope::Request {
            correlation_id: correlation_id.clone(),
            message_id: options.message_id.clone().unwrap_or_else(new_id),
            source: options.sender.clone(),
            target: target.clone(),
            payload,
        };

        let rx = self.inner.pending.register(&correlation_id)?;
        if let Some(e) = self.refusal() {
            self.inner.pending.remove(&correlation_id);
            debug!(correlation_id = %correlation_id, error = %e, "Request refused");
            return Err(e);
        }
        self.inner.stats.record_request_sent();
        let start = Instant::now();

        let result = self
            .exchange(
                envelope,
                rx,
                "send_message",
                options.timeout,
                options.cancellation.as_ref(),
            )
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                // Nothing else removes the entry once the caller stops waiting
                self.inner.pending.remove(&correlation_id);
                metrics::record_request(request_status(&e), elapsed);
                debug!(correlation_id = %correlation_id, error = %e, "Request failed");
                return Err(e);
            }
        };

        match response {
            Envelope::Response { result: Ok(payload), .. } => {
                metrics::record_request("ok", elapsed);
                payload
                    .map(|p| self.inner.serializers.payload_to_object(&p))
                    .transpose()
            }
            Envelope::Response {
                result: Err(message),
                ..
            } => {
                metrics::record_request("remote", elapsed);
                Err(Error::remote(message))
            }
            other => Err(Error::protocol(format!(
                "expected response to request {}, got {}",
                correlation_id,
                other.kind()
            ))),
        }
    }

    /// Send a typed request, registering its codec on first use
    pub async fn send<M: Message>(
        &self,
        message: M,
        target: &AgentId,
        options: SendOptions,
    ) -> Result<Option<AnyMessage>> {
        self.inner.serializers.ensure::<M>();
        self.send_message(AnyMessage::new(message), target, options)
            .await
    }

    /// Send a typed request and decode a typed response
    ///
    /// # Errors
    /// As [`send_message`](Self::send_message); also `Protocol` if the agent
    /// returned no response and `Serialization` if it returned another type.
    pub async fn request<M: Message, R: Message>(
        &self,
        message: M,
        target: &AgentId,
        options: SendOptions,
    ) -> Result<R> {
        self.inner.serializers.ensure::<R>();
        let reply = self.send(message, target, options).await?.ok_or_else(|| {
            Error::protocol(format!("expected a {} response, got none", R::TYPE_NAME))
        })?;
        reply.downcast::<R>().map_err(|other| {
            Error::serialization(
                R::TYPE_NAME,
                format!("response has type {}", other.type_name()),
            )
        })
    }

    /// Route an envelope and wait for the response registered under `rx`
    async fn exchange(
        &self,
        envelope: Envelope,
        rx: oneshot::Receiver<Result<Envelope>>,
        operation: &'static str,
        timeout: Option<Duration>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Envelope> {
        let caller = cancellation.cloned().unwrap_or_default();
        let bounded = async {
            match timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.round_trip(envelope, rx, operation))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(Error::timeout(operation, limit)),
                    }
                }
                None => self.round_trip(envelope, rx, operation).await,
            }
        };

        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(Error::cancelled(operation)),
            _ = caller.cancelled() => Err(Error::cancelled(operation)),
            result = bounded => result,
        }
    }

    async fn round_trip(
        &self,
        envelope: Envelope,
        rx: oneshot::Receiver<Result<Envelope>>,
        operation: &'static str,
    ) -> Result<Envelope> {
        let receipt = self.inner.router.route_message(envelope).await?;
        receipt.wait().await?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::cancelled(operation)),
        }
    }

    // =========================================================================
    // Publish
    // =========================================================================

    /// Publish an event to a topic
    ///
    /// Returns once the event is queued for the gateway. Failures are logged,
    /// never returned.
    #[instrument(skip_all, fields(topic = %topic, type_name = message.type_name()), level = "debug")]
    pub async fn publish_message(
        &self,
        message: AnyMessage,
        topic: &TopicId,
        options: PublishOptions,
    ) {
        let payload = match self.inner.serializers.any_to_payload(&message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Publish dropped: message not serializable");
                return;
            }
        };
        let envelope = Envelope::PublishEvent {
            id: options.message_id.unwrap_or_else(new_id),
            topic_type: topic.topic_type().to_string(),
            topic_source: topic.source().to_string(),
            sender: options.sender,
            payload,
        };

        let routed = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => {
                debug!(topic = %topic, "Publish dropped: runtime stopped");
                return;
            }
            routed = self.inner.router.route_message(envelope) => routed,
        };
        match routed {
            // The write pump logs delivery failures; nobody waits on publishes
            Ok(_receipt) => self.inner.stats.record_publish_sent(),
            Err(e) => warn!(topic = %topic, error = %e, "Publish dropped: not queued"),
        }
    }

    /// Publish a typed event, registering its codec on first use
    pub async fn publish<M: Message>(&self, message: M, topic: &TopicId, options: PublishOptions) {
        self.inner.serializers.ensure::<M>();
        self.publish_message(AnyMessage::new(message), topic, options)
            .await
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an agent type locally and with the gateway
    ///
    /// The factory's message codecs are added to the serializers, keeping
    /// any codec already registered under the same type name.
    ///
    /// # Errors
    /// `DuplicateAgentType` if already registered here. If the gateway
    /// rejects or does not acknowledge the registration, the local
    /// registration is rolled back and the error returned.
    pub async fn register_agent_factory(
        &self,
        agent_type: impl Into<String>,
        factory: Arc<dyn AgentFactory>,
    ) -> Result<AgentType> {
        let codecs = factory.message_codecs();
        let agent_type = self
            .inner
            .container
            .register_agent_factory(agent_type, factory)?;
        for (type_name, codec) in codecs {
            self.inner.serializers.ensure_serializer(type_name, codec);
        }

        let request_id = new_id();
        let envelope = Envelope::RegisterAgentTypeRequest {
            request_id: request_id.clone(),
            type_name: agent_type.name().to_string(),
        };
        if let Err(e) = self.control_request(&request_id, envelope).await {
            self.inner
                .container
                .unregister_agent_factory(agent_type.name());
            warn!(agent_type = %agent_type, error = %e, "Agent type registration rolled back");
            return Err(e);
        }

        info!(agent_type = %agent_type, "Agent type registered with gateway");
        Ok(agent_type)
    }

    /// Add a subscription locally and at the gateway
    ///
    /// # Errors
    /// `DuplicateSubscription` if the id exists here; a gateway rejection
    /// rolls the local subscription back.
    pub async fn add_subscription(&self, subscription: SubscriptionDefinition) -> Result<()> {
        let subscriptions = self.inner.container.subscriptions();
        subscriptions.add(subscription.clone()).await?;

        let request_id = new_id();
        let envelope = Envelope::AddSubscriptionRequest {
            request_id: request_id.clone(),
            subscription: subscription.clone(),
        };
        if let Err(e) = self.control_request(&request_id, envelope).await {
            if let Err(rollback) = subscriptions.remove(subscription.id()).await {
                debug!(error = %rollback, "Subscription already gone during rollback");
            }
            warn!(subscription_id = %subscription.id(), error = %e, "Subscription rolled back");
            return Err(e);
        }

        info!(subscription_id = %subscription.id(), "Subscription added");
        Ok(())
    }

    /// Remove a subscription locally and at the gateway
    ///
    /// # Errors
    /// `SubscriptionNotFound` if the id is unknown here; a gateway rejection
    /// restores the local subscription.
    pub async fn remove_subscription(&self, id: &str) -> Result<SubscriptionDefinition> {
        let subscriptions = self.inner.container.subscriptions();
        let removed = subscriptions.remove(id).await?;

        let request_id = new_id();
        let envelope = Envelope::RemoveSubscriptionRequest {
            request_id: request_id.clone(),
            subscription_id: id.to_string(),
        };
        if let Err(e) = self.control_request(&request_id, envelope).await {
            if let Err(rollback) = subscriptions.add(removed).await {
                debug!(error = %rollback, "Subscription re-added concurrently during rollback");
            }
            warn!(subscription_id = %id, error = %e, "Subscription removal rolled back");
            return Err(e);
        }

        info!(subscription_id = %id, "Subscription removed");
        Ok(removed)
    }

    async fn control_request(&self, request_id: &str, envelope: Envelope) -> Result<()> {
        let rx = self.inner.pending.register(request_id)?;
        if let Some(e) = self.refusal() {
            self.inner.pending.remove(request_id);
            return Err(e);
        }
        let result = self
            .exchange(
                envelope,
                rx,
                "control_request",
                Some(self.inner.config.control_timeout()),
                None,
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.inner.pending.remove(request_id);
                return Err(e);
            }
        };

        match (&response, response.control_error()) {
            (_, Some(reason)) => Err(Error::remote(reason)),
            (Envelope::Response { .. }, None) => Err(Error::protocol(format!(
                "request {} answered with a message response",
                request_id
            ))),
            (_, None) => Ok(()),
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Handle one inbound envelope
    ///
    /// Called by the router's read pump.
    pub async fn on_message(&self, envelope: Envelope) {
        match envelope {
            Envelope::Request {
                correlation_id,
                message_id,
                source,
                target,
                payload,
            } => {
                self.handle_request(correlation_id, message_id, source, target, payload)
                    .await
            }
            Envelope::PublishEvent {
                id,
                topic_type,
                topic_source,
                sender,
                payload,
            } => {
                self.handle_publish(id, topic_type, topic_source, sender, payload)
                    .await
            }
            response @ (Envelope::Response { .. }
            | Envelope::RegisterAgentTypeResponse { .. }
            | Envelope::AddSubscriptionResponse { .. }
            | Envelope::RemoveSubscriptionResponse { .. }) => {
                match self.inner.pending.complete(response) {
                    Ok(()) => self.inner.stats.record_response_received(),
                    Err(e) => {
                        self.inner.stats.record_protocol_error();
                        warn!(error = %e, "Protocol error: unmatched response");
                    }
                }
            }
            other @ (Envelope::RegisterAgentTypeRequest { .. }
            | Envelope::AddSubscriptionRequest { .. }
            | Envelope::RemoveSubscriptionRequest { .. }) => {
                self.inner.stats.record_protocol_error();
                warn!(kind = other.kind(), "Protocol error: control request sent to a client");
            }
        }
    }

    #[instrument(skip_all, fields(correlation_id = %correlation_id, agent_id = %target), level = "debug")]
    async fn handle_request(
        &self,
        correlation_id: String,
        message_id: String,
        source: Option<AgentId>,
        target: AgentId,
        payload: Payload,
    ) {
        self.inner.stats.record_request_handled();
        let ctx = self.context(message_id, source, None, true);

        let result = match self.invoke_agent(&target, &payload, ctx).await {
            Ok(Some(reply)) => self.inner.serializers.any_to_payload(&reply).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        let result = result.map_err(|e| {
            self.inner.stats.record_handler_error();
            warn!(
                correlation_id = %correlation_id,
                agent_id = %target,
                error = %e,
                "Request handling failed"
            );
            e.to_string()
        });

        let response = Envelope::Response {
            correlation_id,
            result,
        };
        // Only enqueue; the read pump must not wait for the write pump
        if let Err(e) = self.inner.router.route_message(response).await {
            warn!(agent_id = %target, error = %e, "Response not queued");
        }
    }

    #[instrument(skip_all, fields(event_id = %id, topic_type = %topic_type), level = "debug")]
    async fn handle_publish(
        &self,
        id: String,
        topic_type: String,
        topic_source: String,
        sender: Option<AgentId>,
        payload: Payload,
    ) {
        let topic = match TopicId::new(topic_type, topic_source) {
            Ok(topic) => topic,
            Err(e) => {
                self.inner.stats.record_protocol_error();
                warn!(error = %e, "Protocol error: event with invalid topic");
                return;
            }
        };

        let targets = self
            .inner
            .container
            .subscriptions()
            .targets(&topic, self.inner.config.deduplicate_publish_targets)
            .await;
        if targets.is_empty() {
            debug!(topic = %topic, "No subscription matched event");
            return;
        }

        for target in targets {
            self.inner.stats.record_event_dispatched();
            let ctx = self.context(id.clone(), sender.clone(), Some(topic.clone()), false);
            if let Err(e) = self.invoke_agent(&target, &payload, ctx).await {
                self.inner.stats.record_handler_error();
                warn!(agent_id = %target, topic = %topic, error = %e, "Event handler failed");
            }
        }
    }

    async fn invoke_agent(
        &self,
        target: &AgentId,
        payload: &Payload,
        ctx: MessageContext,
    ) -> Result<Option<AnyMessage>> {
        let cell = self
            .inner
            .container
            .ensure_agent(target, self.handle())
            .await?;
        let message = self.inner.serializers.payload_to_object(payload)?;

        let mut agent = cell.lock().await;
        agent.on_message(message, ctx).await.map_err(|e| match e {
            Error::HandlerFailed { .. } | Error::NoHandler { .. } => e,
            other => Error::handler_failed(target, other.to_string()),
        })
    }

    fn context(
        &self,
        message_id: String,
        sender: Option<AgentId>,
        topic: Option<TopicId>,
        is_rpc: bool,
    ) -> MessageContext {
        MessageContext {
            message_id,
            sender,
            topic,
            is_rpc,
            cancellation: self.inner.cancel.child_token(),
            runtime: self.handle(),
        }
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Save an agent's state blob to the state store, activating it if needed
    ///
    /// Returns `false` if the agent has no state to save.
    pub async fn save_agent_state(&self, agent_id: &AgentId) -> Result<bool> {
        let cell = self
            .inner
            .container
            .ensure_agent(agent_id, self.handle())
            .await?;
        let blob = cell.lock().await.save_state().await?;
        match blob {
            Some(blob) => {
                self.inner
                    .container
                    .state_store()
                    .save(agent_id, blob)
                    .await?;
                debug!(agent_id = %agent_id, "Agent state saved");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load an agent's state blob from the state store into the agent
    ///
    /// An inactive agent is activated, which restores the blob. Returns
    /// `false` if the store has no blob for the agent.
    pub async fn load_agent_state(&self, agent_id: &AgentId) -> Result<bool> {
        let store = self.inner.container.state_store();
        let Some(blob) = store.load(agent_id).await? else {
            return Ok(false);
        };

        match self.inner.container.get_agent(agent_id) {
            Some(cell) => cell.lock().await.load_state(blob).await?,
            None => {
                self.inner
                    .container
                    .ensure_agent(agent_id, self.handle())
                    .await?;
            }
        }
        debug!(agent_id = %agent_id, "Agent state loaded");
        Ok(true)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the runtime
    ///
    /// Cancels every waiting request, stops the router, and drops all live
    /// agents. Idempotent. Must not be awaited from inside an agent handler,
    /// which runs on the router's read pump.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(client_id = %self.inner.config.client_id, "Stopping agent runtime");

        self.inner.cancel.cancel();
        self.inner.router.stop().await;
        let cancelled = self
            .inner
            .pending
            .fail_all(|| Error::cancelled("runtime stopped"));
        let agents = self.inner.container.clear();

        info!(
            cancelled_requests = cancelled,
            agents_dropped = agents,
            "Agent runtime stopped"
        );
    }

    /// Check if the runtime has been stopped
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Runtime configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Client id presented to the gateway
    pub fn client_id(&self) -> &str {
        &self.inner.config.client_id
    }

    /// Serialization registry
    pub fn serializers(&self) -> &SerializationRegistry {
        &self.inner.serializers
    }

    /// Registered agent types, sorted
    pub fn agent_types(&self) -> Vec<String> {
        self.inner.container.agent_types()
    }

    /// Active subscriptions in id order
    pub async fn subscriptions(&self) -> Vec<SubscriptionDefinition> {
        self.inner.container.subscriptions().list().await
    }

    /// Check if an agent is active
    pub fn is_active(&self, agent_id: &AgentId) -> bool {
        self.inner.container.is_active(agent_id)
    }

    /// Number of active agents
    pub fn active_agent_count(&self) -> usize {
        self.inner.container.active_agent_count()
    }

    /// Number of requests waiting for a response
    pub fn pending_request_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Router lifecycle state
    pub fn router_state(&self) -> RouterState {
        self.inner.router.state()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> RuntimeStatsSnapshot {
        self.inner
            .stats
            .snapshot(self.inner.container.activation_count())
    }
}

impl fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("client_id", &self.inner.config.client_id)
            .field("router_state", &self.inner.router.state())
            .finish()
    }
}

fn request_status(e: &Error) -> &'static str {
    match e {
        Error::Timeout { .. } => "timeout",
        Error::Cancelled { .. } => "cancelled",
        Error::Remote { .. } => "remote",
        _ => "error",
    }
}

// =============================================================================
// Handle
// =============================================================================

impl RuntimeHandle {
    /// Handle not attached to any runtime
    pub fn detached() -> Self {
        Self::default()
    }

    /// The runtime, if it is still alive
    pub fn upgrade(&self) -> Option<AgentRuntime> {
        self.inner.upgrade().map(|inner| AgentRuntime { inner })
    }

    fn runtime(&self) -> Result<AgentRuntime> {
        self.upgrade()
            .ok_or_else(|| Error::cancelled("runtime is gone"))
    }

    /// See [`AgentRuntime::send_message`]
    pub async fn send_message(
        &self,
        message: AnyMessage,
        target: &AgentId,
        options: SendOptions,
    ) -> Result<Option<AnyMessage>> {
        self.runtime()?
            .send_message(message, target, options)
            .await
    }

    /// See [`AgentRuntime::send`]
    pub async fn send<M: Message>(
        &self,
        message: M,
        target: &AgentId,
        options: SendOptions,
    ) -> Result<Option<AnyMessage>> {
        self.runtime()?.send(message, target, options).await
    }

    /// See [`AgentRuntime::publish_message`]
    pub async fn publish_message(
        &self,
        message: AnyMessage,
        topic: &TopicId,
        options: PublishOptions,
    ) {
        match self.upgrade() {
            Some(runtime) => runtime.publish_message(message, topic, options).await,
            None => debug!(topic = %topic, "Publish dropped: runtime is gone"),
        }
    }

    /// See [`AgentRuntime::publish`]
    pub async fn publish<M: Message>(&self, message: M, topic: &TopicId, options: PublishOptions) {
        match self.upgrade() {
            Some(runtime) => runtime.publish(message, topic, options).await,
            None => debug!(topic = %topic, "Publish dropped: runtime is gone"),
        }
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("attached", &(self.inner.strong_count() > 0))
            .finish()
    }
}

// =============================================================================
// Router sink
// =============================================================================

struct RuntimeSink {
    inner: Weak<RuntimeInner>,
}

#[async_trait]
impl MessageSink for RuntimeSink {
    async fn on_message(&self, envelope: Envelope) {
        match self.inner.upgrade() {
            Some(inner) => AgentRuntime { inner }.on_message(envelope).await,
            None => debug!(kind = envelope.kind(), "Envelope dropped: runtime is gone"),
        }
    }
}
