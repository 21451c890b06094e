//! Serialization registry
//!
//! TigerStyle: One codec per message type name, single winner on first use.

use crate::message::{AnyMessage, Message};
use agora_core::{Error, Payload, Result, JSON_CONTENT_TYPE};
use bytes::Bytes;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Converts one message type to and from its wire payload
pub trait MessageCodec: Send + Sync {
    /// Content type of the encoded data
    fn content_type(&self) -> &str;

    /// Encode an erased message value
    fn encode(&self, value: &(dyn Any + Send + Sync)) -> Result<Bytes>;

    /// Decode wire data into an erased message
    fn decode(&self, data: &[u8]) -> Result<AnyMessage>;
}

/// JSON codec for a [`Message`] type
pub struct JsonCodec<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M: Message> JsonCodec<M> {
    /// Create the codec
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M: Message> Default for JsonCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> MessageCodec for JsonCodec<M> {
    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn encode(&self, value: &(dyn Any + Send + Sync)) -> Result<Bytes> {
        let message = value.downcast_ref::<M>().ok_or_else(|| {
            Error::serialization(M::TYPE_NAME, "value does not have the codec's type")
        })?;
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| Error::serialization(M::TYPE_NAME, e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<AnyMessage> {
        serde_json::from_slice::<M>(data)
            .map(AnyMessage::new)
            .map_err(|e| Error::serialization(M::TYPE_NAME, e.to_string()))
    }
}

/// Message type name to codec
#[derive(Default)]
pub struct SerializationRegistry {
    codecs: RwLock<HashMap<String, Arc<dyn MessageCodec>>>,
}

impl SerializationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec under a type name
    ///
    /// Fails with `DuplicateSerializer` if the name is taken; the existing
    /// codec stays in effect.
    pub fn register_serializer(
        &self,
        type_name: impl Into<String>,
        codec: Arc<dyn MessageCodec>,
    ) -> Result<()> {
        let type_name = type_name.into();
        let mut codecs = self.codecs.write().unwrap_or_else(PoisonError::into_inner);
        if codecs.contains_key(&type_name) {
            return Err(Error::DuplicateSerializer { type_name });
        }
        debug!(type_name = %type_name, "Registered serializer");
        codecs.insert(type_name, codec);
        Ok(())
    }

    /// Register the JSON codec for `M`
    pub fn register<M: Message>(&self) -> Result<()> {
        self.register_serializer(M::TYPE_NAME, Arc::new(JsonCodec::<M>::new()))
    }

    /// Check if a codec is registered for the type name
    pub fn exists(&self, type_name: &str) -> bool {
        self.codecs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(type_name)
    }

    /// Codec registered for the type name
    pub fn get_serializer(&self, type_name: &str) -> Option<Arc<dyn MessageCodec>> {
        self.codecs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .cloned()
    }

    /// Codec for `M`, registering the JSON codec if there is none
    pub fn ensure<M: Message>(&self) -> Arc<dyn MessageCodec> {
        self.get_or_insert_with(M::TYPE_NAME, || Arc::new(JsonCodec::<M>::new()))
    }

    /// Register `codec` for `type_name` unless a codec is already there
    ///
    /// Returns the codec in effect for the type name.
    pub fn ensure_serializer(
        &self,
        type_name: &str,
        codec: Arc<dyn MessageCodec>,
    ) -> Arc<dyn MessageCodec> {
        self.get_or_insert_with(type_name, || codec)
    }

    /// All registered type names, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .codecs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Encode a typed message, registering its codec on first use
    pub fn object_to_payload<M: Message>(&self, message: &M) -> Result<Payload> {
        let codec = self.ensure::<M>();
        let data = codec.encode(message)?;
        let payload = Payload::new(M::TYPE_NAME, codec.content_type(), data);
        payload.validate()?;
        Ok(payload)
    }

    /// Encode an erased message
    ///
    /// A message built from a typed value registers its JSON codec on first
    /// use. A message built from raw parts needs a registered codec.
    pub fn any_to_payload(&self, message: &AnyMessage) -> Result<Payload> {
        let type_name = message.type_name();
        let codec = match self.get_serializer(type_name) {
            Some(codec) => codec,
            None => match message.default_codec() {
                Some(codec) => self.get_or_insert_with(type_name, move || codec),
                None => {
                    return Err(Error::serialization(
                        type_name,
                        "no serializer registered for message type",
                    ))
                }
            },
        };

        let data = codec.encode(message.value())?;
        let payload = Payload::new(type_name, codec.content_type(), data);
        payload.validate()?;
        Ok(payload)
    }

    /// Decode a payload with the codec registered for its type name
    pub fn payload_to_object(&self, payload: &Payload) -> Result<AnyMessage> {
        let codec = self.get_serializer(&payload.type_name).ok_or_else(|| {
            Error::serialization(
                payload.type_name.clone(),
                "no serializer registered for message type",
            )
        })?;
        if codec.content_type() != payload.content_type {
            return Err(Error::serialization(
                payload.type_name.clone(),
                format!(
                    "content type {} does not match registered {}",
                    payload.content_type,
                    codec.content_type()
                ),
            ));
        }
        codec.decode(&payload.data)
    }

    fn get_or_insert_with(
        &self,
        type_name: &str,
        make: impl FnOnce() -> Arc<dyn MessageCodec>,
    ) -> Arc<dyn MessageCodec> {
        if let Some(codec) = self.get_serializer(type_name) {
            return codec;
        }
        // Racing first uses all observe whichever codec landed first
        let mut codecs = self.codecs.write().unwrap_or_else(PoisonError::into_inner);
        codecs
            .entry(type_name.to_string())
            .or_insert_with(make)
            .clone()
    }
}

impl std::fmt::Debug for SerializationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializationRegistry")
            .field("type_names", &self.type_names())
            .finish()
    }
}
