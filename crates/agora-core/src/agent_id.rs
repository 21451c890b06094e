//! Agent and topic addressing
//!
//! TigerStyle: Explicit validation on construction, immutable after creation.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters allowed in agent type names
fn is_type_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || c == '.' || c == ':'
}

// =============================================================================
// AgentId
// =============================================================================

/// Logical address of an agent: `(type, key)`
///
/// The type selects the factory that constructs the agent; the key selects
/// one instance of that type. At most one instance per id lives in a
/// runtime process.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AgentId {
    #[serde(rename = "type")]
    agent_type: String,
    key: String,
}

impl AgentId {
    /// Create a new AgentId with validation
    ///
    /// # Errors
    /// Returns error if the type is empty, either part exceeds its length
    /// limit, the type contains characters outside `[A-Za-z0-9-_.:]`, or the
    /// key contains control characters.
    pub fn new(agent_type: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let agent_type = agent_type.into();
        let key = key.into();

        let invalid = |reason: String| Error::InvalidAgentId {
            id: format!("{}/{}", agent_type, key),
            reason,
        };

        if agent_type.is_empty() {
            return Err(invalid("agent type must not be empty".into()));
        }
        if agent_type.len() > AGENT_TYPE_LENGTH_BYTES_MAX {
            return Err(invalid(format!(
                "agent type length {} exceeds limit {}",
                agent_type.len(),
                AGENT_TYPE_LENGTH_BYTES_MAX
            )));
        }
        if !agent_type.chars().all(is_type_char) {
            return Err(invalid("agent type contains invalid characters".into()));
        }
        if key.len() > AGENT_KEY_LENGTH_BYTES_MAX {
            return Err(invalid(format!(
                "key length {} exceeds limit {}",
                key.len(),
                AGENT_KEY_LENGTH_BYTES_MAX
            )));
        }
        if key.chars().any(char::is_control) {
            return Err(invalid("key contains control characters".into()));
        }

        Ok(Self { agent_type, key })
    }

    /// Get the agent type
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Get the key
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.agent_type, self.key)
    }
}

impl std::str::FromStr for AgentId {
    type Err = Error;

    /// Parse `type/key`; the key may itself contain `/`
    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((agent_type, key)) => Self::new(agent_type, key),
            None => Err(Error::InvalidAgentId {
                id: s.to_string(),
                reason: "expected format type/key".into(),
            }),
        }
    }
}

// =============================================================================
// AgentType
// =============================================================================

/// Name of a registered agent type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentType(String);

impl AgentType {
    /// Create a validated agent type name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        // Reuse AgentId validation for the type half
        AgentId::new(name.as_str(), "")?;
        Ok(Self(name))
    }

    /// Get the type name
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TopicId
// =============================================================================

/// Address of a published event: `(type, source)`
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct TopicId {
    #[serde(rename = "type")]
    topic_type: String,
    source: String,
}

impl TopicId {
    /// Create a new TopicId with validation
    pub fn new(topic_type: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        let topic_type = topic_type.into();
        let source = source.into();

        let invalid = |reason: String| Error::InvalidTopic {
            topic: format!("{}/{}", topic_type, source),
            reason,
        };

        if topic_type.is_empty() {
            return Err(invalid("topic type must not be empty".into()));
        }
        if topic_type.len() > TOPIC_TYPE_LENGTH_BYTES_MAX {
            return Err(invalid(format!(
                "topic type length {} exceeds limit {}",
                topic_type.len(),
                TOPIC_TYPE_LENGTH_BYTES_MAX
            )));
        }
        if source.len() > TOPIC_SOURCE_LENGTH_BYTES_MAX {
            return Err(invalid(format!(
                "source length {} exceeds limit {}",
                source.len(),
                TOPIC_SOURCE_LENGTH_BYTES_MAX
            )));
        }

        Ok(Self { topic_type, source })
    }

    /// Get the topic type
    pub fn topic_type(&self) -> &str {
        &self.topic_type
    }

    /// Get the topic source
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic_type, self.source)
    }
}
