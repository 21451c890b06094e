//! Agent runtime tests against the in-memory gateway
//!
//! TigerStyle: Every test bounds its waits; faults are injected explicitly.

use agora_runtime::{
    AgentFactory, AgentId, AgentRuntime, AgentRuntimeBuilder, AnyMessage, Error, FnAgentFactory,
    HandlerMap, Handles, JsonCodec, Message, MessageContext, Payload, PublishOptions,
    RoutedAgent, RuntimeConfig, SendOptions, SubscriptionDefinition, TopicId,
};
use agora_storage::MemoryStateStore;
use agora_transport::{Envelope, MemoryGateway, RouterState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

type Log = Arc<Mutex<Vec<String>>>;

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping {
    n: u32,
}

impl Message for Ping {
    const TYPE_NAME: &'static str = "Ping";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pong {
    n: u32,
    instance: usize,
}

impl Message for Pong {
    const TYPE_NAME: &'static str = "Pong";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Note {
    text: String,
}

impl Message for Note {
    const TYPE_NAME: &'static str = "Note";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Relay {
    text: String,
}

impl Message for Relay {
    const TYPE_NAME: &'static str = "Relay";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Fail;

impl Message for Fail {
    const TYPE_NAME: &'static str = "Fail";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Add {
    n: i64,
}

impl Message for Add {
    const TYPE_NAME: &'static str = "Add";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Total {
    value: i64,
}

impl Message for Total {
    const TYPE_NAME: &'static str = "Total";
}

// =============================================================================
// Agents
// =============================================================================

/// Answers pings with its instance number and logs notes
struct Worker {
    id: AgentId,
    instance: usize,
    log: Log,
}

#[async_trait]
impl Handles<Ping> for Worker {
    async fn handle(
        &mut self,
        message: Ping,
        _ctx: &MessageContext,
    ) -> agora_runtime::Result<Option<AnyMessage>> {
        Ok(Some(AnyMessage::new(Pong {
            n: message.n,
            instance: self.instance,
        })))
    }
}

#[async_trait]
impl Handles<Note> for Worker {
    async fn handle(
        &mut self,
        message: Note,
        _ctx: &MessageContext,
    ) -> agora_runtime::Result<Option<AnyMessage>> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.id, message.text));
        Ok(None)
    }
}

#[async_trait]
impl Handles<Relay> for Worker {
    async fn handle(
        &mut self,
        message: Relay,
        ctx: &MessageContext,
    ) -> agora_runtime::Result<Option<AnyMessage>> {
        let topic = TopicId::new("T", "default")?;
        ctx.runtime
            .publish(Note { text: message.text }, &topic, PublishOptions::new())
            .await;
        Ok(None)
    }
}

#[async_trait]
impl Handles<Fail> for Worker {
    async fn handle(
        &mut self,
        _message: Fail,
        _ctx: &MessageContext,
    ) -> agora_runtime::Result<Option<AnyMessage>> {
        Err(Error::internal("boom"))
    }
}

fn worker_handlers() -> HandlerMap<Worker> {
    HandlerMap::new()
        .with_handler::<Ping>()
        .with_handler::<Note>()
        .with_handler::<Relay>()
        .with_handler::<Fail>()
}

fn worker_factory(created: Arc<AtomicUsize>, log: Log) -> Arc<dyn AgentFactory> {
    let handlers = Arc::new(worker_handlers());
    let shared = handlers.clone();
    let factory = FnAgentFactory::new(move |id: &AgentId, _runtime| {
        let instance = created.fetch_add(1, Ordering::SeqCst) + 1;
        RoutedAgent::new(
            Worker {
                id: id.clone(),
                instance,
                log: log.clone(),
            },
            shared.clone(),
        )
    });
    Arc::new(factory.handling(&handlers))
}

/// Running sum, persisted as JSON
#[derive(Debug, Default, Serialize, Deserialize)]
struct Tally {
    total: i64,
}

#[async_trait]
impl Handles<Add> for Tally {
    async fn handle(
        &mut self,
        message: Add,
        _ctx: &MessageContext,
    ) -> agora_runtime::Result<Option<AnyMessage>> {
        self.total += message.n;
        Ok(Some(AnyMessage::new(Total { value: self.total })))
    }
}

fn tally_factory() -> Arc<dyn AgentFactory> {
    let handlers = Arc::new(HandlerMap::new().with_handler::<Add>());
    let shared = handlers.clone();
    let factory = FnAgentFactory::new(move |_id: &AgentId, _runtime| {
        RoutedAgent::persistent(Tally::default(), shared.clone())
    });
    Arc::new(factory.handling(&handlers))
}

// =============================================================================
// Helpers
// =============================================================================

fn builder(gateway: &MemoryGateway, client_id: &str) -> AgentRuntimeBuilder {
    AgentRuntime::builder()
        .with_config(RuntimeConfig::for_testing().with_client_id(client_id))
        .with_connector(Arc::new(gateway.connector()))
}

/// Builder for a client hosting `Worker` agents
fn host_builder(
    gateway: &MemoryGateway,
    client_id: &str,
    created: Arc<AtomicUsize>,
    log: Log,
) -> AgentRuntimeBuilder {
    builder(gateway, client_id).with_agent_factory("Worker", worker_factory(created, log))
}

fn worker(key: &str) -> AgentId {
    AgentId::new("Worker", key).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition within wait");
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn requests(observed: &[Envelope]) -> Vec<(String, u32)> {
    observed
        .iter()
        .filter_map(|envelope| match envelope {
            Envelope::Request {
                correlation_id,
                payload,
                ..
            } => {
                let ping: Ping = serde_json::from_slice(&payload.data).unwrap();
                Some((correlation_id.clone(), ping.n))
            }
            _ => None,
        })
        .collect()
}

// =============================================================================
// Requests
// =============================================================================

#[tokio::test]
async fn test_request_response_across_clients() {
    let gateway = MemoryGateway::new();
    let created = Arc::new(AtomicUsize::new(0));
    let host = host_builder(&gateway, "host", created.clone(), Log::default())
        .start()
        .await
        .unwrap();
    let caller = builder(&gateway, "caller").start().await.unwrap();
    assert_eq!(gateway.registered_agent_types().await, vec!["Worker"]);

    let pong: Pong = caller
        .request(Ping { n: 7 }, &worker("a"), SendOptions::new())
        .await
        .unwrap();
    assert_eq!(pong, Pong { n: 7, instance: 1 });

    let pong: Pong = caller
        .request(Ping { n: 8 }, &worker("a"), SendOptions::new())
        .await
        .unwrap();
    assert_eq!(pong, Pong { n: 8, instance: 1 });

    let pong: Pong = caller
        .request(Ping { n: 9 }, &worker("b"), SendOptions::new())
        .await
        .unwrap();
    assert_eq!(pong.instance, 2);

    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert!(host.is_active(&worker("a")));
    assert!(!caller.is_active(&worker("a")));

    let caller_stats = caller.stats();
    assert_eq!(caller_stats.requests_sent, 3);
    assert_eq!(caller_stats.responses_received, 3);
    let host_stats = host.stats();
    assert_eq!(host_stats.requests_handled, 3);
    assert_eq!(host_stats.activations, 2);

    caller.stop().await;
    host.stop().await;
}

#[tokio::test]
async fn test_concurrent_requests_activate_once() {
    let gateway = MemoryGateway::new();
    let created = Arc::new(AtomicUsize::new(0));
    let host = host_builder(&gateway, "host", created.clone(), Log::default())
        .start()
        .await
        .unwrap();
    let caller = builder(&gateway, "caller").start().await.unwrap();

    let handles: Vec<_> = (0..20)
        .map(|n| {
            let caller = caller.clone();
            tokio::spawn(async move {
                caller
                    .request::<Ping, Pong>(Ping { n }, &worker("shared"), SendOptions::new())
                    .await
            })
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        let pong = timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
        assert_eq!(pong.n, n as u32);
        assert_eq!(pong.instance, 1);
    }
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(host.active_agent_count(), 1);

    caller.stop().await;
    host.stop().await;
}

#[tokio::test]
async fn test_responses_correlate_out_of_order() {
    let gateway = MemoryGateway::manual();
    let runtime = builder(&gateway, "client-a").start().await.unwrap();

    let handles: Vec<_> = (0..3)
        .map(|n| {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                runtime
                    .request::<Ping, Pong>(Ping { n }, &worker("a"), SendOptions::new())
                    .await
            })
        })
        .collect();

    let observed = timeout(WAIT, gateway.wait_for_observed(3)).await.unwrap();
    let sent = requests(&observed);
    assert_eq!(sent.len(), 3);
    assert_eq!(runtime.pending_request_count(), 3);

    for (correlation_id, n) in sent.into_iter().rev() {
        let data = serde_json::to_vec(&Pong { n, instance: 0 }).unwrap();
        let response = Envelope::Response {
            correlation_id,
            result: Ok(Some(Payload::json("Pong", data))),
        };
        assert!(gateway.deliver("client-a", response).await);
    }

    for (n, handle) in handles.into_iter().enumerate() {
        let pong = timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
        assert_eq!(pong.n, n as u32);
    }
    assert_eq!(runtime.pending_request_count(), 0);

    runtime.stop().await;
}

#[tokio::test]
async fn test_handler_error_becomes_remote_error() {
    let gateway = MemoryGateway::new();
    let host = host_builder(&gateway, "host", Arc::default(), Log::default())
        .start()
        .await
        .unwrap();
    let caller = builder(&gateway, "caller").start().await.unwrap();

    let err = caller
        .send(Fail, &worker("a"), SendOptions::new())
        .await
        .unwrap_err();
    match err {
        Error::Remote { message } => assert!(message.contains("boom"), "{}", message),
        other => panic!("expected remote error, got {:?}", other),
    }
    assert_eq!(host.stats().handler_errors, 1);

    // No client hosts the type: the gateway answers with an error
    let err = caller
        .send(
            Ping { n: 1 },
            &AgentId::new("Nobody", "x").unwrap(),
            SendOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote { .. }));

    caller.stop().await;
    host.stop().await;
}

#[tokio::test]
async fn test_handler_map_registers_message_codecs() {
    let gateway = MemoryGateway::new();
    let host = host_builder(&gateway, "host", Arc::default(), Log::default())
        .start()
        .await
        .unwrap();
    let caller = builder(&gateway, "caller").start().await.unwrap();

    for type_name in worker_handlers().type_names() {
        assert!(host.serializers().exists(type_name), "{}", type_name);
    }

    let pong: Pong = caller
        .request(Ping { n: 3 }, &worker("a"), SendOptions::new())
        .await
        .unwrap();
    assert_eq!(pong.n, 3);

    // A codec registered up front wins over the handler map's
    let codec: Arc<dyn agora_runtime::MessageCodec> = Arc::new(JsonCodec::<Note>::new());
    let runtime = builder(&gateway, "other")
        .with_serializer("Note", codec.clone())
        .with_agent_factory("Other", worker_factory(Arc::default(), Log::default()))
        .start()
        .await
        .unwrap();
    let kept = runtime.serializers().get_serializer("Note").unwrap();
    assert!(Arc::ptr_eq(&kept, &codec));

    runtime.stop().await;
    caller.stop().await;
    host.stop().await;
}

#[tokio::test]
async fn test_request_for_unknown_agent_type_is_answered_with_error() {
    let gateway = MemoryGateway::manual();
    let runtime = builder(&gateway, "client-a")
        .with_serializer("Ping", Arc::new(JsonCodec::<Ping>::new()))
        .start()
        .await
        .unwrap();

    let data = serde_json::to_vec(&Ping { n: 1 }).unwrap();
    let request = Envelope::Request {
        correlation_id: "c-remote".into(),
        message_id: "m-1".into(),
        source: None,
        target: AgentId::new("Nobody", "x").unwrap(),
        payload: Payload::json("Ping", data),
    };
    assert!(gateway.deliver("client-a", request).await);

    let observed = timeout(WAIT, gateway.wait_for_observed(1)).await.unwrap();
    match &observed[0] {
        Envelope::Response {
            correlation_id,
            result: Err(message),
        } => {
            assert_eq!(correlation_id, "c-remote");
            assert!(message.contains("Unknown agent type"), "{}", message);
        }
        other => panic!("expected error response, got {:?}", other),
    }
    assert_eq!(runtime.stats().handler_errors, 1);

    runtime.stop().await;
}

#[tokio::test]
async fn test_timeout_removes_pending_entry() {
    let gateway = MemoryGateway::manual();
    let runtime = builder(&gateway, "client-a").start().await.unwrap();

    let err = runtime
        .send(
            Ping { n: 1 },
            &worker("a"),
            SendOptions::new().with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert_eq!(runtime.pending_request_count(), 0);

    // A response arriving after the caller gave up is a protocol error
    let observed = timeout(WAIT, gateway.wait_for_observed(1)).await.unwrap();
    let (correlation_id, _) = requests(&observed).remove(0);
    let late = Envelope::Response {
        correlation_id,
        result: Ok(None),
    };
    assert!(gateway.deliver("client-a", late).await);
    wait_until(|| runtime.stats().protocol_errors == 1).await;

    runtime.stop().await;
}

#[tokio::test]
async fn test_caller_cancellation() {
    let gateway = MemoryGateway::manual();
    let runtime = builder(&gateway, "client-a").start().await.unwrap();
    let token = CancellationToken::new();

    let handle = {
        let runtime = runtime.clone();
        let token = token.clone();
        tokio::spawn(async move {
            runtime
                .send(
                    Ping { n: 1 },
                    &worker("a"),
                    SendOptions::new().with_cancellation(token),
                )
                .await
        })
    };

    timeout(WAIT, gateway.wait_for_observed(1)).await.unwrap();
    token.cancel();
    let result = timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::Cancelled { .. })));
    assert_eq!(runtime.pending_request_count(), 0);

    runtime.stop().await;
}

#[tokio::test]
async fn test_stop_resolves_outstanding_requests() {
    let gateway = MemoryGateway::manual();
    let runtime = builder(&gateway, "client-a").start().await.unwrap();

    let handles: Vec<_> = (0..50)
        .map(|n| {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                runtime
                    .send(Ping { n }, &worker("a"), SendOptions::new())
                    .await
            })
        })
        .collect();

    timeout(WAIT, gateway.wait_for_observed(50)).await.unwrap();
    assert_eq!(runtime.pending_request_count(), 50);

    runtime.stop().await;
    for handle in handles {
        let result = timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::Cancelled { .. })));
    }
    assert_eq!(runtime.pending_request_count(), 0);
    assert_eq!(runtime.router_state(), RouterState::Stopped);
    assert!(runtime.is_stopped());

    // Idempotent, and nothing is accepted afterwards
    runtime.stop().await;
    let result = runtime
        .send(Ping { n: 99 }, &worker("a"), SendOptions::new())
        .await;
    assert!(matches!(result, Err(Error::Delivery { .. })), "{:?}", result);
    assert_eq!(runtime.pending_request_count(), 0);
    assert_eq!(gateway.observed().await.len(), 50);
}

#[tokio::test]
async fn test_router_fault_fails_outstanding_and_later_requests() {
    let gateway = MemoryGateway::manual();
    let runtime = builder(&gateway, "client-a").start().await.unwrap();

    let outstanding = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            runtime
                .send(Ping { n: 1 }, &worker("a"), SendOptions::new())
                .await
        })
    };
    timeout(WAIT, gateway.wait_for_observed(1)).await.unwrap();
    assert_eq!(runtime.pending_request_count(), 1);

    // Every reconnect attempt fails, so the read pump gives up
    gateway.fail_next_connects(1000).await;
    assert!(gateway.disconnect("client-a").await);

    let result = timeout(WAIT, outstanding).await.unwrap().unwrap();
    match result {
        Err(Error::Transport { reason }) => assert!(reason.contains("faulted"), "{}", reason),
        other => panic!("expected transport error, got {:?}", other),
    }
    assert_eq!(runtime.pending_request_count(), 0);
    assert!(matches!(runtime.router_state(), RouterState::Faulted { .. }));

    let result = timeout(
        WAIT,
        runtime.send(Ping { n: 2 }, &worker("a"), SendOptions::new()),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(Error::Delivery { .. })), "{:?}", result);
    assert_eq!(runtime.pending_request_count(), 0);
    assert_eq!(runtime.stats().requests_sent, 1);

    runtime.stop().await;
}

#[tokio::test]
async fn test_write_failure_is_delivery_error() {
    let gateway = MemoryGateway::manual();
    let config = RuntimeConfig::for_testing().with_client_id("client-a");
    let failing_writes = config.router.write_retry_count_max + 1;
    let runtime = AgentRuntime::builder()
        .with_config(config)
        .with_connector(Arc::new(gateway.connector()))
        .start()
        .await
        .unwrap();

    gateway.fail_next_writes(failing_writes).await;
    let result = timeout(
        WAIT,
        runtime.send(Ping { n: 1 }, &worker("a"), SendOptions::new()),
    )
    .await
    .unwrap();
    assert!(matches!(result, Err(Error::Delivery { .. })), "{:?}", result);
    assert_eq!(runtime.pending_request_count(), 0);
    assert!(gateway.observed().await.is_empty());

    // The router keeps serving later requests
    assert_eq!(runtime.router_state(), RouterState::Running);
    let later = {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            runtime
                .send(Ping { n: 2 }, &worker("a"), SendOptions::new())
                .await
        })
    };
    timeout(WAIT, gateway.wait_for_observed(1)).await.unwrap();
    assert_eq!(runtime.pending_request_count(), 1);

    runtime.stop().await;
    let result = timeout(WAIT, later).await.unwrap().unwrap();
    assert!(matches!(result, Err(Error::Cancelled { .. })));
}

// =============================================================================
// Publish
// =============================================================================

#[tokio::test]
async fn test_publish_reaches_subscribed_agent_once() {
    let gateway = MemoryGateway::new();
    let log = Log::default();
    let runtime = host_builder(&gateway, "client-a", Arc::default(), log.clone())
        .with_subscription(SubscriptionDefinition::type_subscription("T", "Worker"))
        .start()
        .await
        .unwrap();
    assert_eq!(gateway.subscriptions().await.len(), 1);

    let topic = TopicId::new("T", "default").unwrap();
    runtime
        .publish(Note { text: "hello".into() }, &topic, PublishOptions::new())
        .await;
    wait_until(|| entries(&log).len() == 1).await;

    // No subscription for U; the marker on T proves U was passed over
    let other = TopicId::new("U", "default").unwrap();
    runtime
        .publish(Note { text: "lost".into() }, &other, PublishOptions::new())
        .await;
    runtime
        .publish(Note { text: "marker".into() }, &topic, PublishOptions::new())
        .await;
    wait_until(|| entries(&log).len() == 2).await;

    assert_eq!(
        entries(&log),
        vec![
            "Worker/default:hello".to_string(),
            "Worker/default:marker".to_string()
        ]
    );
    assert_eq!(runtime.stats().publishes_sent, 3);
    assert_eq!(runtime.stats().events_dispatched, 2);

    runtime.stop().await;
}

#[tokio::test]
async fn test_topic_source_selects_agent_key() {
    let gateway = MemoryGateway::new();
    let log = Log::default();
    let runtime = host_builder(&gateway, "client-a", Arc::default(), log.clone())
        .with_subscription(SubscriptionDefinition::type_subscription("T", "Worker"))
        .start()
        .await
        .unwrap();

    for source in ["alpha", "beta"] {
        let topic = TopicId::new("T", source).unwrap();
        runtime
            .publish(Note { text: "hi".into() }, &topic, PublishOptions::new())
            .await;
    }
    wait_until(|| entries(&log).len() == 2).await;
    assert_eq!(
        entries(&log),
        vec!["Worker/alpha:hi".to_string(), "Worker/beta:hi".to_string()]
    );
    assert_eq!(runtime.active_agent_count(), 2);

    runtime.stop().await;
}

async fn overlapping_deliveries(deduplicate: bool) -> usize {
    let gateway = MemoryGateway::new();
    let log = Log::default();
    let config = RuntimeConfig::for_testing()
        .with_client_id("client-a")
        .with_deduplicate_publish_targets(deduplicate);
    let runtime = host_builder(&gateway, "client-a", Arc::default(), log.clone())
        .with_config(config)
        .with_subscription(SubscriptionDefinition::type_subscription("T", "Worker"))
        .with_subscription(
            SubscriptionDefinition::type_prefix_subscription("T", "Worker")
                .with_fixed_key("default"),
        )
        .start()
        .await
        .unwrap();

    let topic = TopicId::new("T", "default").unwrap();
    runtime
        .publish(Note { text: "x".into() }, &topic, PublishOptions::new())
        .await;
    // Events are handled in order, so once the marker lands so has every "x"
    let marker = TopicId::new("Tmarker", "m").unwrap();
    runtime
        .publish(Note { text: "end".into() }, &marker, PublishOptions::new())
        .await;
    wait_until(|| entries(&log).iter().any(|e| e.ends_with(":end"))).await;

    let count = entries(&log).iter().filter(|e| e.ends_with(":x")).count();
    runtime.stop().await;
    count
}

#[tokio::test]
async fn test_overlapping_subscriptions_deduplicated() {
    assert_eq!(overlapping_deliveries(true).await, 1);
    assert_eq!(overlapping_deliveries(false).await, 2);
}

#[tokio::test]
async fn test_handler_publishes_through_context() {
    let gateway = MemoryGateway::new();
    let log = Log::default();
    let host = host_builder(&gateway, "host", Arc::default(), log.clone())
        .with_subscription(SubscriptionDefinition::type_subscription("T", "Worker"))
        .start()
        .await
        .unwrap();
    let caller = builder(&gateway, "caller").start().await.unwrap();

    let reply = caller
        .send(
            Relay {
                text: "relayed".into(),
            },
            &worker("relay"),
            SendOptions::new(),
        )
        .await
        .unwrap();
    assert!(reply.is_none());
    wait_until(|| entries(&log) == vec!["Worker/default:relayed".to_string()]).await;

    caller.stop().await;
    host.stop().await;
}

// =============================================================================
// Registration
// =============================================================================

#[tokio::test]
async fn test_duplicate_agent_type_keeps_first_factory() {
    let gateway = MemoryGateway::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let runtime = host_builder(&gateway, "client-a", first.clone(), Log::default())
        .start()
        .await
        .unwrap();

    let err = runtime
        .register_agent_factory("Worker", worker_factory(second.clone(), Log::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateAgentType { .. }));

    let _: Pong = runtime
        .request(Ping { n: 1 }, &worker("a"), SendOptions::new())
        .await
        .unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.agent_types(), vec!["Worker".to_string()]);

    runtime.stop().await;
}

#[tokio::test]
async fn test_gateway_rejection_rolls_back() {
    let gateway = MemoryGateway::new();
    let runtime = builder(&gateway, "client-a").start().await.unwrap();
    gateway.reject_control(true).await;

    let err = runtime
        .register_agent_factory("Worker", worker_factory(Arc::default(), Log::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote { .. }));
    assert!(runtime.agent_types().is_empty());

    let err = runtime
        .add_subscription(SubscriptionDefinition::type_subscription("T", "Worker"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Remote { .. }));
    assert!(runtime.subscriptions().await.is_empty());

    gateway.reject_control(false).await;
    let subscription = SubscriptionDefinition::type_subscription("T", "Worker");
    runtime.add_subscription(subscription.clone()).await.unwrap();

    gateway.reject_control(true).await;
    let err = runtime.remove_subscription(subscription.id()).await.unwrap_err();
    assert!(matches!(err, Error::Remote { .. }));
    assert_eq!(runtime.subscriptions().await, vec![subscription.clone()]);

    gateway.reject_control(false).await;
    let removed = runtime.remove_subscription(subscription.id()).await.unwrap();
    assert_eq!(removed, subscription);
    assert!(gateway.subscriptions().await.is_empty());

    let err = runtime.remove_subscription(subscription.id()).await.unwrap_err();
    assert!(matches!(err, Error::SubscriptionNotFound { .. }));

    runtime.stop().await;
}

#[tokio::test]
async fn test_unacknowledged_registration_fails_start() {
    let gateway = MemoryGateway::manual();
    let config = RuntimeConfig::for_testing()
        .with_client_id("client-a")
        .with_control_timeout_ms(50);
    let result = AgentRuntime::builder()
        .with_config(config)
        .with_connector(Arc::new(gateway.connector()))
        .with_agent_factory("Worker", worker_factory(Arc::default(), Log::default()))
        .start()
        .await;
    assert!(matches!(result, Err(Error::Timeout { .. })));
}

#[tokio::test]
async fn test_invalid_config_fails_start() {
    let gateway = MemoryGateway::new();
    let result = AgentRuntime::builder()
        .with_config(RuntimeConfig::for_testing().with_client_id(""))
        .with_connector(Arc::new(gateway.connector()))
        .start()
        .await;
    assert!(matches!(result, Err(Error::InvalidConfiguration { .. })));
    assert_eq!(gateway.connection_count().await, 0);
}

// =============================================================================
// State and lifecycle
// =============================================================================

#[tokio::test]
async fn test_agent_state_survives_restart() {
    let store = Arc::new(MemoryStateStore::new());
    let tally = AgentId::new("Tally", "main").unwrap();

    let start = |gateway: &MemoryGateway| {
        builder(gateway, "client-a")
            .with_state_store(store.clone())
            .with_agent_factory("Tally", tally_factory())
            .start()
    };

    let gateway = MemoryGateway::new();
    let runtime = start(&gateway).await.unwrap();
    let total: Total = runtime
        .request(Add { n: 5 }, &tally, SendOptions::new())
        .await
        .unwrap();
    assert_eq!(total.value, 5);
    assert!(runtime.save_agent_state(&tally).await.unwrap());

    let total: Total = runtime
        .request(Add { n: 5 }, &tally, SendOptions::new())
        .await
        .unwrap();
    assert_eq!(total.value, 10);

    // Loading replaces the live state with the saved blob
    assert!(runtime.load_agent_state(&tally).await.unwrap());
    let total: Total = runtime
        .request(Add { n: 0 }, &tally, SendOptions::new())
        .await
        .unwrap();
    assert_eq!(total.value, 5);
    runtime.stop().await;

    // A fresh runtime restores the blob on activation
    let gateway = MemoryGateway::new();
    let runtime = start(&gateway).await.unwrap();
    let total: Total = runtime
        .request(Add { n: 1 }, &tally, SendOptions::new())
        .await
        .unwrap();
    assert_eq!(total.value, 6);

    let fresh = AgentId::new("Tally", "other").unwrap();
    assert!(!runtime.load_agent_state(&fresh).await.unwrap());
    runtime.stop().await;
}

#[tokio::test]
async fn test_host_cancellation_stops_runtime() {
    let gateway = MemoryGateway::new();
    let host = CancellationToken::new();
    let runtime = builder(&gateway, "client-a")
        .with_cancellation(host.clone())
        .start()
        .await
        .unwrap();
    assert_eq!(runtime.router_state(), RouterState::Running);

    host.cancel();
    wait_until(|| runtime.is_stopped()).await;
    timeout(WAIT, async {
        while runtime.router_state() != RouterState::Stopped {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_handle_outlives_runtime() {
    let gateway = MemoryGateway::new();
    let runtime = builder(&gateway, "client-a").start().await.unwrap();
    let handle = runtime.handle();
    assert!(handle.upgrade().is_some());

    runtime.stop().await;
    drop(runtime);
    assert!(handle.upgrade().is_none());

    let err = handle
        .send(Ping { n: 1 }, &worker("a"), SendOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
}
