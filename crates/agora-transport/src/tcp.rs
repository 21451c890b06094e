//! TCP gateway connector
//!
//! Wire protocol: every frame is `[4-byte big-endian length][JSON body]`. The
//! first frame a client sends is its [`ConnectionMetadata`]; every frame after
//! that in either direction is an [`Envelope`].

use crate::codec::{read_frame, write_frame};
use crate::connection::{Connection, Connector, EnvelopeReader, EnvelopeWriter};
use crate::error::{TransportError, TransportResult};
use crate::protocol::{ConnectionMetadata, Envelope};
use agora_core::constants::FRAME_SIZE_BYTES_MAX;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Connects to a gateway over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    frame_size_bytes_max: usize,
}

impl TcpConnector {
    /// Create a connector for `address` (`host:port`)
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            frame_size_bytes_max: FRAME_SIZE_BYTES_MAX,
        }
    }

    /// Set the frame size limit
    pub fn with_frame_size_max(mut self, frame_size_bytes_max: usize) -> Self {
        debug_assert!(frame_size_bytes_max > 0);
        self.frame_size_bytes_max = frame_size_bytes_max;
        self
    }

    /// Gateway address
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, metadata: &ConnectionMetadata) -> TransportResult<Connection> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| TransportError::connect_failed(&self.address, e.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(address = %self.address, error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, mut write_half) = stream.into_split();
        write_frame(&mut write_half, metadata, self.frame_size_bytes_max).await?;

        Ok(Connection::new(
            Box::new(TcpEnvelopeReader {
                read_half,
                frame_size_bytes_max: self.frame_size_bytes_max,
            }),
            Box::new(TcpEnvelopeWriter {
                write_half,
                frame_size_bytes_max: self.frame_size_bytes_max,
            }),
        ))
    }

    fn endpoint(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// Gateway side of the handshake: read the client's metadata frame
///
/// Returns the metadata and the stream as an envelope [`Connection`].
pub async fn accept_connection(
    stream: TcpStream,
    frame_size_bytes_max: usize,
) -> TransportResult<(ConnectionMetadata, Connection)> {
    let (mut read_half, write_half) = stream.into_split();
    let metadata: ConnectionMetadata = read_frame(&mut read_half, frame_size_bytes_max)
        .await?
        .ok_or(TransportError::ConnectionClosed)?;

    let connection = Connection::new(
        Box::new(TcpEnvelopeReader {
            read_half,
            frame_size_bytes_max,
        }),
        Box::new(TcpEnvelopeWriter {
            write_half,
            frame_size_bytes_max,
        }),
    );
    Ok((metadata, connection))
}

struct TcpEnvelopeReader {
    read_half: OwnedReadHalf,
    frame_size_bytes_max: usize,
}

#[async_trait]
impl EnvelopeReader for TcpEnvelopeReader {
    async fn read(&mut self) -> TransportResult<Option<Envelope>> {
        read_frame(&mut self.read_half, self.frame_size_bytes_max).await
    }
}

struct TcpEnvelopeWriter {
    write_half: OwnedWriteHalf,
    frame_size_bytes_max: usize,
}

#[async_trait]
impl EnvelopeWriter for TcpEnvelopeWriter {
    async fn write(&mut self, envelope: &Envelope) -> TransportResult<()> {
        write_frame(&mut self.write_half, envelope, self.frame_size_bytes_max).await
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.write_half.shutdown().await?;
        Ok(())
    }
}
