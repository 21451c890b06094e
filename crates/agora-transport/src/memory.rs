//! In-memory gateway for testing
//!
//! TigerStyle: Deterministic routing, explicit fault injection.
//!
//! [`MemoryGateway`] stands in for a real gateway process. Clients connect
//! through [`MemoryConnector`]; every envelope a client writes is recorded and,
//! in routing mode, forwarded the way a gateway would: requests to the client
//! hosting the target agent type, responses back to the requester, published
//! events to every client with a matching subscription. In manual mode nothing
//! is forwarded and the test drives the conversation with
//! [`deliver`](MemoryGateway::deliver).

use crate::connection::{Connection, Connector, EnvelopeReader, EnvelopeWriter};
use crate::error::{TransportError, TransportResult};
use crate::protocol::{ConnectionMetadata, Envelope};
use agora_core::{SubscriptionDefinition, TopicId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, trace};

/// Frame as seen by a memory reader; `Err` simulates an undecodable frame
type Frame = Result<Envelope, String>;

struct ClientLink {
    generation: u64,
    tx: mpsc::UnboundedSender<Frame>,
}

#[derive(Default)]
struct GatewayState {
    links: HashMap<String, ClientLink>,
    connections: Vec<ConnectionMetadata>,
    next_generation: u64,
    fail_next_connects: u32,
    fail_next_writes: u32,
    reject_control: bool,
    observed: Vec<Envelope>,
    /// Agent type -> hosting client
    agent_types: BTreeMap<String, String>,
    /// Subscription id -> (owning client, definition)
    subscriptions: BTreeMap<String, (String, SubscriptionDefinition)>,
    /// Correlation id -> requesting client
    correlations: HashMap<String, String>,
}

/// In-memory gateway
#[derive(Clone)]
pub struct MemoryGateway {
    state: Arc<Mutex<GatewayState>>,
    observed_count: Arc<watch::Sender<usize>>,
    routing: bool,
}

impl MemoryGateway {
    /// Gateway that forwards envelopes between connected clients
    pub fn new() -> Self {
        Self::with_routing(true)
    }

    /// Gateway that only records what clients write
    pub fn manual() -> Self {
        Self::with_routing(false)
    }

    fn with_routing(routing: bool) -> Self {
        let (observed_count, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(GatewayState::default())),
            observed_count: Arc::new(observed_count),
            routing,
        }
    }

    /// Connector that opens streams to this gateway
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            gateway: self.clone(),
        }
    }

    // =========================================================================
    // Fault injection
    // =========================================================================

    /// Fail the next `count` connect attempts
    pub async fn fail_next_connects(&self, count: u32) {
        self.state.lock().await.fail_next_connects = count;
    }

    /// Fail the next `count` writes with a transient I/O fault
    pub async fn fail_next_writes(&self, count: u32) {
        self.state.lock().await.fail_next_writes = count;
    }

    /// Answer every control request with an error
    pub async fn reject_control(&self, reject: bool) {
        self.state.lock().await.reject_control = reject;
    }

    /// Drop the client's current stream; its reader sees end-of-stream
    pub async fn disconnect(&self, client_id: &str) -> bool {
        let removed = self.state.lock().await.links.remove(client_id);
        removed.is_some()
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Push an envelope to a client's current stream
    pub async fn deliver(&self, client_id: &str, envelope: Envelope) -> bool {
        let state = self.state.lock().await;
        send_to(&state, client_id, Ok(envelope))
    }

    /// Push a frame that fails to decode
    pub async fn deliver_malformed(&self, client_id: &str, reason: impl Into<String>) -> bool {
        let state = self.state.lock().await;
        send_to(&state, client_id, Err(reason.into()))
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every envelope written by any client, in write order
    pub async fn observed(&self) -> Vec<Envelope> {
        self.state.lock().await.observed.clone()
    }

    /// Wait until at least `count` envelopes were written, then return them
    pub async fn wait_for_observed(&self, count: usize) -> Vec<Envelope> {
        let mut rx = self.observed_count.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|n| *n >= count).await;
        self.observed().await
    }

    /// Metadata of every connection made, in connect order
    pub async fn connections(&self) -> Vec<ConnectionMetadata> {
        self.state.lock().await.connections.clone()
    }

    /// Number of connections made
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Agent types registered with the gateway
    pub async fn registered_agent_types(&self) -> Vec<String> {
        self.state.lock().await.agent_types.keys().cloned().collect()
    }

    /// Subscriptions installed at the gateway
    pub async fn subscriptions(&self) -> Vec<SubscriptionDefinition> {
        self.state
            .lock()
            .await
            .subscriptions
            .values()
            .map(|(_, def)| def.clone())
            .collect()
    }

    // =========================================================================
    // Client side
    // =========================================================================

    async fn connect(&self, metadata: &ConnectionMetadata) -> TransportResult<Connection> {
        let mut state = self.state.lock().await;
        if state.fail_next_connects > 0 {
            state.fail_next_connects -= 1;
            return Err(TransportError::connect_failed(
                "memory",
                "injected connect fault",
            ));
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let (tx, rx) = mpsc::unbounded_channel();
        // Replacing the link drops the old sender, ending the old reader
        state
            .links
            .insert(metadata.client_id.clone(), ClientLink { generation, tx });
        state.connections.push(metadata.clone());
        debug!(client_id = %metadata.client_id, generation, "Memory gateway accepted client");

        Ok(Connection::new(
            Box::new(MemoryReader { rx }),
            Box::new(MemoryWriter {
                gateway: self.clone(),
                client_id: metadata.client_id.clone(),
                generation,
            }),
        ))
    }

    async fn accept_write(
        &self,
        client_id: &str,
        generation: u64,
        envelope: &Envelope,
    ) -> TransportResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.fail_next_writes > 0 {
                state.fail_next_writes -= 1;
                return Err(TransportError::io("injected write fault"));
            }
            let current = state.links.get(client_id).map(|link| link.generation);
            if current != Some(generation) {
                return Err(TransportError::ConnectionClosed);
            }

            trace!(client_id, kind = envelope.kind(), "Memory gateway received envelope");
            state.observed.push(envelope.clone());
            if self.routing {
                route(&mut state, client_id, envelope);
            }
        }
        self.observed_count.send_modify(|n| *n += 1);
        Ok(())
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGateway")
            .field("routing", &self.routing)
            .finish()
    }
}

fn send_to(state: &GatewayState, client_id: &str, frame: Frame) -> bool {
    match state.links.get(client_id) {
        Some(link) => link.tx.send(frame).is_ok(),
        None => false,
    }
}

/// Forward one envelope the way a gateway would
fn route(state: &mut GatewayState, from: &str, envelope: &Envelope) {
    match envelope {
        Envelope::Request {
            correlation_id,
            target,
            ..
        } => match state.agent_types.get(target.agent_type()).cloned() {
            Some(host) => {
                state
                    .correlations
                    .insert(correlation_id.clone(), from.to_string());
                send_to(state, &host, Ok(envelope.clone()));
            }
            None => {
                let reply = Envelope::Response {
                    correlation_id: correlation_id.clone(),
                    result: Err(format!(
                        "no client hosts agent type '{}'",
                        target.agent_type()
                    )),
                };
                send_to(state, from, Ok(reply));
            }
        },
        Envelope::Response { correlation_id, .. } => {
            if let Some(requester) = state.correlations.remove(correlation_id) {
                send_to(state, &requester, Ok(envelope.clone()));
            }
        }
        Envelope::PublishEvent {
            topic_type,
            topic_source,
            ..
        } => {
            let Ok(topic) = TopicId::new(topic_type.clone(), topic_source.clone()) else {
                return;
            };
            let mut clients = HashSet::new();
            for (owner, def) in state.subscriptions.values() {
                if def.matches(&topic) {
                    clients.insert(owner.clone());
                }
            }
            for client in clients {
                send_to(state, &client, Ok(envelope.clone()));
            }
        }
        Envelope::RegisterAgentTypeRequest {
            request_id,
            type_name,
        } => {
            let error = if state.reject_control {
                Some("rejected by gateway".to_string())
            } else {
                match state.agent_types.get(type_name).cloned() {
                    Some(owner) if owner != from => Some(format!(
                        "agent type '{}' is already hosted by another client",
                        type_name
                    )),
                    _ => {
                        state.agent_types.insert(type_name.clone(), from.to_string());
                        None
                    }
                }
            };
            let reply = Envelope::RegisterAgentTypeResponse {
                request_id: request_id.clone(),
                error,
            };
            send_to(state, from, Ok(reply));
        }
        Envelope::AddSubscriptionRequest {
            request_id,
            subscription,
        } => {
            let error = if state.reject_control {
                Some("rejected by gateway".to_string())
            } else if state.subscriptions.contains_key(subscription.id()) {
                Some(format!("subscription '{}' already exists", subscription.id()))
            } else {
                state.subscriptions.insert(
                    subscription.id().to_string(),
                    (from.to_string(), subscription.clone()),
                );
                None
            };
            let reply = Envelope::AddSubscriptionResponse {
                request_id: request_id.clone(),
                error,
            };
            send_to(state, from, Ok(reply));
        }
        Envelope::RemoveSubscriptionRequest {
            request_id,
            subscription_id,
        } => {
            let error = if state.reject_control {
                Some("rejected by gateway".to_string())
            } else if state.subscriptions.remove(subscription_id).is_none() {
                Some(format!("subscription '{}' not found", subscription_id))
            } else {
                None
            };
            let reply = Envelope::RemoveSubscriptionResponse {
                request_id: request_id.clone(),
                error,
            };
            send_to(state, from, Ok(reply));
        }
        Envelope::RegisterAgentTypeResponse { .. }
        | Envelope::AddSubscriptionResponse { .. }
        | Envelope::RemoveSubscriptionResponse { .. } => {
            debug!(kind = envelope.kind(), "Memory gateway ignoring control response");
        }
    }
}

/// Connector for [`MemoryGateway`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    gateway: MemoryGateway,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, metadata: &ConnectionMetadata) -> TransportResult<Connection> {
        self.gateway.connect(metadata).await
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl EnvelopeReader for MemoryReader {
    async fn read(&mut self) -> TransportResult<Option<Envelope>> {
        match self.rx.recv().await {
            Some(Ok(envelope)) => Ok(Some(envelope)),
            Some(Err(reason)) => Err(TransportError::codec(reason)),
            None => Ok(None),
        }
    }
}

struct MemoryWriter {
    gateway: MemoryGateway,
    client_id: String,
    generation: u64,
}

#[async_trait]
impl EnvelopeWriter for MemoryWriter {
    async fn write(&mut self, envelope: &Envelope) -> TransportResult<()> {
        self.gateway
            .accept_write(&self.client_id, self.generation, envelope)
            .await
    }
}
