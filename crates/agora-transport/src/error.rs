//! Transport error types
//!
//! TigerStyle: Explicit error variants with context.

use thiserror::Error;

/// Transport-specific errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Router already started
    #[error("router already started")]
    AlreadyStarted,

    /// Router or channel stopped
    #[error("transport stopped")]
    Stopped,

    /// Connecting to the gateway failed
    #[error("connect to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    /// Every reconnect attempt failed
    #[error("reconnect abandoned after {attempts} attempts: {reason}")]
    ReconnectExhausted { attempts: u32, reason: String },

    /// The stream was closed by the peer
    #[error("connection closed")]
    ConnectionClosed,

    /// Stream-level I/O fault
    #[error("I/O error: {reason}")]
    Io { reason: String },

    /// Frame above the size limit
    #[error("frame too large: {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    /// Frame body could not be encoded or decoded
    #[error("codec error: {reason}")]
    Codec { reason: String },

    /// A write kept failing after the allowed retries
    #[error("write failed after {attempts} attempts: {reason}")]
    WriteFailed { attempts: u32, reason: String },

    /// The outbound queue no longer accepts envelopes
    #[error("outbound queue closed")]
    QueueClosed,

    /// The operation was cancelled by shutdown
    #[error("cancelled")]
    Cancelled,

    /// Invalid router or connector configuration
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// Core error
    #[error("core error: {0}")]
    Core(#[from] agora_core::Error),

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl TransportError {
    /// Create an I/O error
    pub fn io(reason: impl Into<String>) -> Self {
        Self::Io {
            reason: reason.into(),
        }
    }

    /// Create a connect failed error
    pub fn connect_failed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a codec error
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }

    /// Whether the fault is a broken stream that a fresh connection may cure
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::ConnectionClosed | Self::ConnectFailed { .. }
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::io(e.to_string()),
        }
    }
}

impl From<TransportError> for agora_core::Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Core(inner) => inner,
            TransportError::Cancelled => agora_core::Error::cancelled("delivery"),
            other @ (TransportError::QueueClosed
            | TransportError::Stopped
            | TransportError::WriteFailed { .. }
            | TransportError::FrameTooLarge { .. }) => {
                agora_core::Error::delivery(other.to_string())
            }
            TransportError::Codec { reason } => agora_core::Error::protocol(reason),
            TransportError::InvalidConfiguration { reason } => {
                agora_core::Error::invalid_configuration("router", reason)
            }
            other => agora_core::Error::transport(other.to_string()),
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;
