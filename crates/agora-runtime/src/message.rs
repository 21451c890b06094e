//! Messages exchanged between agents
//!
//! TigerStyle: Every message type has an explicit, stable wire name.

use crate::serialization::{JsonCodec, MessageCodec};
use serde::{de::DeserializeOwned, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A message type that can travel through the runtime
///
/// `TYPE_NAME` is the logical name used on the wire and as the key of the
/// serialization registry. It must be the same in every process that
/// exchanges the message.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Wire name of the message type
    const TYPE_NAME: &'static str;
}

fn json_codec<M: Message>() -> Arc<dyn MessageCodec> {
    Arc::new(JsonCodec::<M>::new())
}

/// A type-erased message
///
/// Built from a concrete [`Message`] with [`AnyMessage::new`], in which case
/// it remembers how to build a JSON codec for its type, or from raw parts with
/// [`AnyMessage::from_parts`], in which case a codec must already be
/// registered under its type name before it can be sent.
pub struct AnyMessage {
    type_name: String,
    value: Box<dyn Any + Send + Sync>,
    default_codec: Option<fn() -> Arc<dyn MessageCodec>>,
}

impl AnyMessage {
    /// Wrap a typed message
    pub fn new<M: Message>(message: M) -> Self {
        Self {
            type_name: M::TYPE_NAME.to_string(),
            value: Box::new(message),
            default_codec: Some(json_codec::<M>),
        }
    }

    /// Wrap an already erased value under an explicit type name
    pub fn from_parts(type_name: impl Into<String>, value: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            type_name: type_name.into(),
            value,
            default_codec: None,
        }
    }

    /// Wire name of the message type
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Check if the message holds an `M`
    pub fn is<M: 'static>(&self) -> bool {
        self.value.is::<M>()
    }

    /// Borrow the message as an `M`
    pub fn downcast_ref<M: 'static>(&self) -> Option<&M> {
        self.value.downcast_ref::<M>()
    }

    /// Take the message as an `M`, or get it back unchanged
    pub fn downcast<M: 'static>(self) -> std::result::Result<M, Self> {
        let Self {
            type_name,
            value,
            default_codec,
        } = self;
        match value.downcast::<M>() {
            Ok(message) => Ok(*message),
            Err(value) => Err(Self {
                type_name,
                value,
                default_codec,
            }),
        }
    }

    /// Take the erased value
    pub fn into_inner(self) -> Box<dyn Any + Send + Sync> {
        self.value
    }

    pub(crate) fn value(&self) -> &(dyn Any + Send + Sync) {
        self.value.as_ref()
    }

    pub(crate) fn default_codec(&self) -> Option<Arc<dyn MessageCodec>> {
        self.default_codec.map(|make| make())
    }
}

impl fmt::Debug for AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    impl Message for Ping {
        const TYPE_NAME: &'static str = "Ping";
    }

    #[test]
    fn test_any_message_downcast() {
        let message = AnyMessage::new(Ping { n: 3 });
        assert_eq!(message.type_name(), "Ping");
        assert!(message.is::<Ping>());
        assert!(!message.is::<String>());
        assert_eq!(message.downcast_ref::<Ping>(), Some(&Ping { n: 3 }));

        let message = message.downcast::<String>().unwrap_err();
        assert_eq!(message.type_name(), "Ping");
        assert_eq!(message.downcast::<Ping>().unwrap(), Ping { n: 3 });
    }

    #[test]
    fn test_any_message_default_codec() {
        assert!(AnyMessage::new(Ping { n: 1 }).default_codec().is_some());

        let erased = AnyMessage::from_parts("Ping", Box::new(Ping { n: 1 }));
        assert!(erased.default_codec().is_none());
        assert!(erased.is::<Ping>());
    }
}
