//! Reconnecting gateway channel
//!
//! TigerStyle: One current stream, replaced by compare-and-swap on generation,
//! bounded exponential backoff between connect attempts.

use crate::config::BackoffConfig;
use crate::connection::{Connector, StreamingCall};
use crate::error::{TransportError, TransportResult};
use crate::protocol::ConnectionMetadata;
use agora_core::metrics;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns the physical stream to the gateway
///
/// The stream is created lazily on first use. A caller that sees its stream
/// fail hands that stream back to [`recreate`](Self::recreate); only the first
/// caller for a given generation reconnects, later callers receive the stream
/// that replaced it.
pub struct ReconnectingChannel {
    connector: Arc<dyn Connector>,
    metadata: ConnectionMetadata,
    backoff: BackoffConfig,
    /// Current stream; the lock is held across connects to serialize them
    current: Mutex<Option<Arc<StreamingCall>>>,
    next_generation: AtomicU64,
    reconnects: AtomicU64,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl ReconnectingChannel {
    /// Create a channel; no connection is made until first use
    pub fn new(
        connector: Arc<dyn Connector>,
        metadata: ConnectionMetadata,
        backoff: BackoffConfig,
        cancel: CancellationToken,
    ) -> Self {
        debug_assert!(!metadata.client_id.is_empty());
        Self {
            connector,
            metadata,
            backoff,
            current: Mutex::new(None),
            next_generation: AtomicU64::new(1),
            reconnects: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            cancel,
        }
    }

    /// Connection metadata presented on every connect
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Number of times the stream has been replaced
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Current stream, connecting first if there is none
    pub async fn streaming_call(&self) -> TransportResult<Arc<StreamingCall>> {
        let mut current = self.current.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Stopped);
        }
        if let Some(call) = current.as_ref() {
            return Ok(call.clone());
        }

        let call = self.connect_with_backoff().await?;
        *current = Some(call.clone());
        Ok(call)
    }

    /// Replace `owned` with a fresh stream
    ///
    /// If `owned` is no longer current, returns the stream that replaced it
    /// without connecting again.
    pub async fn recreate(&self, owned: &StreamingCall) -> TransportResult<Arc<StreamingCall>> {
        let mut current = self.current.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Stopped);
        }

        if let Some(call) = current.as_ref() {
            if call.generation() != owned.generation() {
                debug!(
                    stale = owned.generation(),
                    current = call.generation(),
                    "Stream already replaced"
                );
                return Ok(call.clone());
            }
        }

        // The old stream may still be held by the other pump
        owned.supersede();
        *current = None;

        let call = self.connect_with_backoff().await?;
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        metrics::record_reconnect();
        info!(
            client_id = %self.metadata.client_id,
            old_generation = owned.generation(),
            generation = call.generation(),
            "Gateway stream recreated"
        );
        *current = Some(call.clone());
        Ok(call)
    }

    /// Close the channel; later calls fail with [`TransportError::Stopped`]
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let call = self.current.lock().await.take();
        if let Some(call) = call {
            if let Err(e) = call.close().await {
                debug!(error = %e, "Error closing gateway stream");
            }
        }
    }

    async fn connect_with_backoff(&self) -> TransportResult<Arc<StreamingCall>> {
        let attempts_max = self.backoff.attempts_count_max;
        debug_assert!(attempts_max >= 1);
        let mut last_error = String::new();

        for attempt in 1..=attempts_max {
            let connect = tokio::time::timeout(
                self.backoff.connect_timeout(),
                self.connector.connect(&self.metadata),
            );
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                result = connect => result,
            };

            match result {
                Ok(Ok(connection)) => {
                    let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        endpoint = %self.connector.endpoint(),
                        generation,
                        attempt,
                        "Connected to gateway"
                    );
                    return Ok(Arc::new(StreamingCall::new(generation, connection)));
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!(
                        "connect timed out after {}ms",
                        self.backoff.connect_timeout_ms
                    )
                }
            }

            warn!(
                endpoint = %self.connector.endpoint(),
                attempt,
                attempts_max,
                error = %last_error,
                "Gateway connect failed"
            );

            if attempt < attempts_max {
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                    _ = tokio::time::sleep(self.backoff.delay_after(attempt)) => {}
                }
            }
        }

        Err(TransportError::ReconnectExhausted {
            attempts: attempts_max,
            reason: last_error,
        })
    }
}
