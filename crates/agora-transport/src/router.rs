//! Message router
//!
//! TigerStyle: Two pumps over one reconnecting channel, a bounded outbound
//! queue for backpressure, explicit lifecycle states.
//!
//! The write pump drains the outbound queue in FIFO order and resolves each
//! envelope's [`DeliveryReceipt`] once the envelope is on the wire. The read
//! pump hands inbound envelopes to a [`MessageSink`] one at a time, in arrival
//! order. Both pumps recover broken streams through
//! [`ReconnectingChannel::recreate`].

use crate::channel::ReconnectingChannel;
use crate::config::RouterConfig;
use crate::connection::Connector;
use crate::error::{TransportError, TransportResult};
use crate::protocol::{ConnectionMetadata, Envelope};
use agora_core::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Receiver of inbound envelopes
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    /// Handle one inbound envelope
    ///
    /// The read pump awaits this before reading the next envelope.
    async fn on_message(&self, envelope: Envelope);
}

/// Router lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterState {
    /// Created, pumps not running
    NotStarted,
    /// Pumps running
    Running,
    /// Stopped by [`MessageRouter::stop`]
    Stopped,
    /// The read pump could not re-establish the stream and terminated
    Faulted { reason: String },
}

impl RouterState {
    /// Whether the router has terminated
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted { .. })
    }
}

/// Queued envelope and its completion
struct Outbound {
    envelope: Envelope,
    done: oneshot::Sender<TransportResult<()>>,
}

/// Completion of one routed envelope
///
/// Resolves `Ok` once the envelope was written to the wire, or with the error
/// that prevented it. Dropping the receipt does not cancel the write.
#[derive(Debug)]
pub struct DeliveryReceipt {
    rx: oneshot::Receiver<TransportResult<()>>,
}

impl DeliveryReceipt {
    /// Wait until the envelope is written
    pub async fn wait(self) -> TransportResult<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Cancelled),
        }
    }
}

/// Drives the read and write pumps over one gateway channel
pub struct MessageRouter {
    config: RouterConfig,
    channel: Arc<ReconnectingChannel>,
    queue_tx: mpsc::Sender<Outbound>,
    queue_rx: Mutex<Option<mpsc::Receiver<Outbound>>>,
    state: Arc<watch::Sender<RouterState>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageRouter {
    /// Create a router; nothing runs until [`start`](Self::start)
    pub fn new(
        config: RouterConfig,
        connector: Arc<dyn Connector>,
        metadata: ConnectionMetadata,
    ) -> TransportResult<Self> {
        config
            .validate()
            .map_err(|reason| TransportError::InvalidConfiguration { reason })?;

        let cancel = CancellationToken::new();
        let channel = Arc::new(ReconnectingChannel::new(
            connector,
            metadata,
            config.backoff.clone(),
            cancel.child_token(),
        ));
        let (queue_tx, queue_rx) = mpsc::channel(config.outbound_queue_capacity);
        let (state, _) = watch::channel(RouterState::NotStarted);

        Ok(Self {
            config,
            channel,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            state: Arc::new(state),
            cancel,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> RouterState {
        self.state.borrow().clone()
    }

    /// The underlying channel
    pub fn channel(&self) -> &Arc<ReconnectingChannel> {
        &self.channel
    }

    /// Wait until the router stops or faults
    pub async fn wait_terminated(&self) -> RouterState {
        wait_terminal(self.subscribe_state()).await
    }

    /// Watch lifecycle transitions without borrowing the router
    pub fn subscribe_state(&self) -> watch::Receiver<RouterState> {
        self.state.subscribe()
    }

    /// Start the read and write pumps
    pub async fn start(&self, sink: Arc<dyn MessageSink>) -> TransportResult<()> {
        match self.state() {
            RouterState::NotStarted => {}
            RouterState::Running => return Err(TransportError::AlreadyStarted),
            RouterState::Stopped | RouterState::Faulted { .. } => {
                return Err(TransportError::Stopped)
            }
        }

        let queue_rx = self
            .queue_rx
            .lock()
            .await
            .take()
            .ok_or(TransportError::AlreadyStarted)?;

        info!(
            client_id = %self.channel.metadata().client_id,
            queue_capacity = self.config.outbound_queue_capacity,
            "Starting message router"
        );
        self.state.send_replace(RouterState::Running);

        let write_pump = tokio::spawn(write_pump(
            self.channel.clone(),
            queue_rx,
            self.cancel.clone(),
            self.config.write_retry_count_max,
        ));
        let read_pump = tokio::spawn(read_pump(
            self.channel.clone(),
            sink,
            self.cancel.clone(),
            self.state.clone(),
        ));

        let mut tasks = self.tasks.lock().await;
        tasks.push(write_pump);
        tasks.push(read_pump);
        Ok(())
    }

    /// Enqueue an envelope for the write pump
    ///
    /// Waits for queue space when the queue is full. The returned receipt
    /// resolves once the envelope is on the wire.
    #[instrument(skip(self, envelope), fields(kind = envelope.kind()), level = "trace")]
    pub async fn route_message(&self, envelope: Envelope) -> TransportResult<DeliveryReceipt> {
        let (done, rx) = oneshot::channel();
        self.queue_tx
            .send(Outbound { envelope, done })
            .await
            .map_err(|_| TransportError::QueueClosed)?;
        Ok(DeliveryReceipt { rx })
    }

    /// Stop both pumps and close the channel
    ///
    /// Envelopes still queued resolve with [`TransportError::Cancelled`].
    pub async fn stop(&self) {
        if self.state() == RouterState::Stopped {
            return;
        }
        info!(client_id = %self.channel.metadata().client_id, "Stopping message router");
        self.cancel.cancel();

        // Never started: the write pump is not there to drain the queue
        let queue_rx = self.queue_rx.lock().await.take();
        if let Some(queue_rx) = queue_rx {
            drain_cancelled(queue_rx).await;
        }

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Router pump task failed");
            }
        }

        self.channel.close().await;
        self.state.send_if_modified(|state| {
            if matches!(state, RouterState::Faulted { .. }) {
                false
            } else {
                *state = RouterState::Stopped;
                true
            }
        });
    }
}

impl Drop for MessageRouter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Close the queue and fail everything left in it
/// Wait on a state receiver until the router stops or faults
async fn wait_terminal(mut rx: watch::Receiver<RouterState>) -> RouterState {
    let result = rx.wait_for(|s| s.is_terminal()).await.map(|s| s.clone());
    match result {
        Ok(state) => state,
        // Sender gone with the router
        Err(_) => rx.borrow().clone(),
    }
}

async fn drain_cancelled(mut queue_rx: mpsc::Receiver<Outbound>) {
    queue_rx.close();
    let mut cancelled = 0usize;
    while let Some(outbound) = queue_rx.recv().await {
        let _ = outbound.done.send(Err(TransportError::Cancelled));
        cancelled += 1;
    }
    if cancelled > 0 {
        debug!(cancelled, "Cancelled queued envelopes");
    }
}

// =============================================================================
// Write Pump
// =============================================================================

async fn write_pump(
    channel: Arc<ReconnectingChannel>,
    mut queue_rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
    write_retry_count_max: u32,
) {
    debug!("Write pump starting");

    loop {
        let outbound = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outbound = queue_rx.recv() => match outbound {
                Some(outbound) => outbound,
                None => break,
            },
        };

        let kind = outbound.envelope.kind();
        let result =
            write_with_retry(&channel, &outbound.envelope, write_retry_count_max, &cancel).await;
        match &result {
            Ok(()) => metrics::record_envelope_sent(kind),
            Err(TransportError::Cancelled) => {}
            Err(e) => warn!(kind, error = %e, "Envelope not delivered"),
        }
        // The caller may have stopped waiting
        let _ = outbound.done.send(result);
    }

    drain_cancelled(queue_rx).await;
    debug!("Write pump exiting");
}

/// Write one envelope, recreating the stream on transient faults
async fn write_with_retry(
    channel: &ReconnectingChannel,
    envelope: &Envelope,
    write_retry_count_max: u32,
    cancel: &CancellationToken,
) -> TransportResult<()> {
    let mut attempt: u32 = 0;
    loop {
        let call = channel.streaming_call().await?;
        let written = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            written = call.write(envelope) => written,
        };

        let e = match written {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        if call.is_superseded() {
            // The read pump replaced the stream while this write was in flight
            debug!(generation = call.generation(), "Retrying write on replacement stream");
            continue;
        }

        attempt += 1;
        warn!(
            kind = envelope.kind(),
            generation = call.generation(),
            attempt,
            error = %e,
            "Transient write fault, recreating stream"
        );
        channel.recreate(&call).await?;

        if attempt > write_retry_count_max {
            return Err(TransportError::WriteFailed {
                attempts: attempt,
                reason: e.to_string(),
            });
        }
    }
}

// =============================================================================
// Read Pump
// =============================================================================

async fn read_pump(
    channel: Arc<ReconnectingChannel>,
    sink: Arc<dyn MessageSink>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<RouterState>>,
) {
    debug!("Read pump starting");

    let mut call = match channel.streaming_call().await {
        Ok(call) => call,
        Err(e) => {
            fault_or_exit(e, &state, &cancel);
            return;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = call.read() => next,
        };

        match next {
            Ok(Some(envelope)) => {
                metrics::record_envelope_received(envelope.kind());
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = sink.on_message(envelope) => {}
                }
            }
            Ok(None) => {
                debug!(generation = call.generation(), "Gateway stream ended");
                match channel.recreate(&call).await {
                    Ok(next_call) => call = next_call,
                    Err(e) => {
                        fault_or_exit(e, &state, &cancel);
                        return;
                    }
                }
            }
            Err(TransportError::Codec { reason }) => {
                // One malformed envelope must not take the connection down
                warn!(reason = %reason, "Protocol error: dropping malformed envelope");
            }
            Err(e) => {
                warn!(generation = call.generation(), error = %e, "Gateway stream fault");
                match channel.recreate(&call).await {
                    Ok(next_call) => call = next_call,
                    Err(e) => {
                        fault_or_exit(e, &state, &cancel);
                        return;
                    }
                }
            }
        }
    }

    debug!("Read pump exiting");
}

/// Terminate after the read pump lost the stream for good
fn fault_or_exit(
    e: TransportError,
    state: &watch::Sender<RouterState>,
    cancel: &CancellationToken,
) {
    if matches!(e, TransportError::Cancelled | TransportError::Stopped) {
        debug!("Read pump exiting");
        return;
    }

    error!(error = %e, "Gateway stream lost, message router faulted");
    state.send_replace(RouterState::Faulted {
        reason: e.to_string(),
    });
    // Stops the write pump too; queued and later sends fail instead of hanging
    cancel.cancel();
}
