//! Opaque wire payloads
//!
//! A payload is the encoded form of one application message, tagged with the
//! logical type name used to find its codec on the receiving side.

use crate::constants::PAYLOAD_SIZE_BYTES_MAX;
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Content type for JSON encoded payloads
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type for payloads whose bytes are passed through untouched
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// Encoded application message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Logical message type name
    pub type_name: String,
    /// Encoding of `data`
    pub content_type: String,
    /// Encoded message bytes
    pub data: Bytes,
}

impl Payload {
    /// Create a payload
    pub fn new(
        type_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Create a JSON payload
    pub fn json(type_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(type_name, JSON_CONTENT_TYPE, data)
    }

    /// Size of the encoded message in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the encoded message is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check the payload against the size limit
    pub fn validate(&self) -> Result<()> {
        if self.data.len() > PAYLOAD_SIZE_BYTES_MAX {
            return Err(Error::serialization(
                &self.type_name,
                format!(
                    "payload of {} bytes exceeds limit of {} bytes",
                    self.data.len(),
                    PAYLOAD_SIZE_BYTES_MAX
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_json() {
        let payload = Payload::json("Person", &b"{}"[..]);
        assert_eq!(payload.content_type, JSON_CONTENT_TYPE);
        assert_eq!(payload.len(), 2);
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_payload_too_large() {
        let payload = Payload::new(
            "Blob",
            OCTET_STREAM_CONTENT_TYPE,
            vec![0u8; PAYLOAD_SIZE_BYTES_MAX + 1],
        );
        assert!(matches!(
            payload.validate(),
            Err(Error::Serialization { .. })
        ));
    }
}
