//! Pending request table
//!
//! TigerStyle: Every entry is removed exactly once, by its response, by the
//! caller giving up, or by shutdown.

use agora_core::{Error, Result};
use agora_transport::Envelope;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

type Completion = oneshot::Sender<Result<Envelope>>;

/// Outstanding requests keyed by correlation or control request id
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<String, Completion>>,
}

impl PendingRequests {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry; the receiver resolves with the matching response
    ///
    /// # Errors
    /// `Internal` if the id is already pending.
    pub fn register(&self, id: &str) -> Result<oneshot::Receiver<Result<Envelope>>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(id) {
            return Err(Error::internal(format!("request id {} already pending", id)));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Fulfil the entry matching a response envelope
    ///
    /// # Errors
    /// `Protocol` if the envelope has no id or nothing is pending under it.
    pub fn complete(&self, response: Envelope) -> Result<()> {
        let id = response
            .request_id()
            .ok_or_else(|| Error::protocol(format!("{} carries no request id", response.kind())))?
            .to_string();
        let completion = self.take(&id).ok_or_else(|| {
            Error::protocol(format!(
                "{} for unknown request id {}",
                response.kind(),
                id
            ))
        })?;
        if completion.send(Ok(response)).is_err() {
            debug!(request_id = %id, "Requester stopped waiting");
        }
        Ok(())
    }

    /// Fail one entry
    pub fn fail(&self, id: &str, error: Error) -> bool {
        match self.take(id) {
            Some(completion) => {
                let _ = completion.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Drop an entry without fulfilling it
    pub fn remove(&self, id: &str) -> bool {
        self.take(id).is_some()
    }

    /// Fail every entry, returning how many there were
    pub fn fail_all(&self, error: impl Fn() -> Error) -> usize {
        let drained: Vec<_> = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.drain().collect()
        };
        let count = drained.len();
        for (_, completion) in drained {
            let _ = completion.send(Err(error()));
        }
        count
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self, id: &str) -> Option<Completion> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}
