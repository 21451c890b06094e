//! Duplex envelope streams
//!
//! A [`Connector`] opens one physical stream to the gateway and splits it into
//! a reader half and a writer half. [`StreamingCall`] wraps one such stream
//! together with the generation number the reconnecting channel uses for
//! compare-and-swap replacement.

use crate::error::{TransportError, TransportResult};
use crate::protocol::{ConnectionMetadata, Envelope};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Reading half of a gateway stream
#[async_trait]
pub trait EnvelopeReader: Send {
    /// Read the next envelope; `Ok(None)` means the peer closed the stream
    async fn read(&mut self) -> TransportResult<Option<Envelope>>;
}

/// Writing half of a gateway stream
#[async_trait]
pub trait EnvelopeWriter: Send {
    /// Write one envelope to the wire
    async fn write(&mut self, envelope: &Envelope) -> TransportResult<()>;

    /// Close the writing half
    async fn close(&mut self) -> TransportResult<()> {
        Ok(())
    }
}

/// An open gateway stream
pub struct Connection {
    pub reader: Box<dyn EnvelopeReader>,
    pub writer: Box<dyn EnvelopeWriter>,
}

impl Connection {
    /// Pair a reader and a writer
    pub fn new(reader: Box<dyn EnvelopeReader>, writer: Box<dyn EnvelopeWriter>) -> Self {
        Self { reader, writer }
    }
}

/// Opens gateway streams
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new stream, presenting `metadata` to the gateway
    async fn connect(&self, metadata: &ConnectionMetadata) -> TransportResult<Connection>;

    /// Human readable endpoint, for logs
    fn endpoint(&self) -> String;
}

/// One generation of the physical stream
///
/// The reader is used only by the read pump and the writer only by the write
/// pump. Once superseded, pending and future reads end as if the peer had
/// closed the stream.
pub struct StreamingCall {
    generation: u64,
    reader: Mutex<Box<dyn EnvelopeReader>>,
    writer: Mutex<Box<dyn EnvelopeWriter>>,
    superseded: CancellationToken,
}

impl StreamingCall {
    pub(crate) fn new(generation: u64, connection: Connection) -> Self {
        Self {
            generation,
            reader: Mutex::new(connection.reader),
            writer: Mutex::new(connection.writer),
            superseded: CancellationToken::new(),
        }
    }

    /// Generation number, unique per channel
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a newer stream has replaced this one
    pub fn is_superseded(&self) -> bool {
        self.superseded.is_cancelled()
    }

    pub(crate) fn supersede(&self) {
        self.superseded.cancel();
    }

    /// Read the next envelope
    pub async fn read(&self) -> TransportResult<Option<Envelope>> {
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = self.superseded.cancelled() => Ok(None),
            result = reader.read() => result,
        }
    }

    /// Write one envelope
    pub async fn write(&self, envelope: &Envelope) -> TransportResult<()> {
        if self.is_superseded() {
            return Err(TransportError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        writer.write(envelope).await
    }

    /// Close the writing half
    pub async fn close(&self) -> TransportResult<()> {
        self.supersede();
        let mut writer = self.writer.lock().await;
        writer.close().await
    }
}

impl std::fmt::Debug for StreamingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingCall")
            .field("generation", &self.generation)
            .field("superseded", &self.is_superseded())
            .finish()
    }
}
