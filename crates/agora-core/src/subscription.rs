//! Topic subscriptions
//!
//! TigerStyle: Subscriptions are plain data. Matching and mapping are pure
//! functions of `(subscription, topic)`, so a definition can cross the wire to
//! the gateway unchanged.

use crate::agent_id::{AgentId, TopicId};
use crate::constants::SUBSCRIPTION_ID_LENGTH_BYTES_MAX;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Predicate over a topic's type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TopicMatcher {
    /// Topic type equals the value
    Exact(String),
    /// Topic type starts with the value
    Prefix(String),
}

impl TopicMatcher {
    fn matches(&self, topic_type: &str) -> bool {
        match self {
            Self::Exact(expected) => topic_type == expected,
            Self::Prefix(prefix) => topic_type.starts_with(prefix.as_str()),
        }
    }
}

/// How the target agent key is derived from a matched topic
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum KeyMapping {
    /// Use the topic source as the agent key
    Source,
    /// Always use the given key
    Fixed(String),
}

/// Rule routing matching topics to an agent identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionDefinition {
    id: String,
    matcher: TopicMatcher,
    agent_type: String,
    key: KeyMapping,
}

impl SubscriptionDefinition {
    /// Subscribe `agent_type` to topics whose type equals `topic_type`
    ///
    /// The agent key is the topic source. The id is derived from the rule, so
    /// adding the same rule twice is reported as a duplicate.
    pub fn type_subscription(topic_type: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self::build(TopicMatcher::Exact(topic_type.into()), agent_type.into())
    }

    /// Subscribe `agent_type` to topics whose type starts with `prefix`
    pub fn type_prefix_subscription(
        prefix: impl Into<String>,
        agent_type: impl Into<String>,
    ) -> Self {
        Self::build(TopicMatcher::Prefix(prefix.into()), agent_type.into())
    }

    fn build(matcher: TopicMatcher, agent_type: String) -> Self {
        let mut def = Self {
            id: String::new(),
            matcher,
            agent_type,
            key: KeyMapping::Source,
        };
        def.id = def.derived_id();
        def
    }

    fn derived_id(&self) -> String {
        let matcher = match &self.matcher {
            TopicMatcher::Exact(t) => format!("type={}", t),
            TopicMatcher::Prefix(p) => format!("prefix={}", p),
        };
        let key = match &self.key {
            KeyMapping::Source => "source".to_string(),
            KeyMapping::Fixed(k) => format!("key={}", k),
        };
        format!("{}->{}:{}", matcher, self.agent_type, key)
    }

    /// Route every match to the agent with this fixed key
    pub fn with_fixed_key(mut self, key: impl Into<String>) -> Self {
        let derived = self.id == self.derived_id();
        self.key = KeyMapping::Fixed(key.into());
        if derived {
            self.id = self.derived_id();
        }
        self
    }

    /// Override the subscription id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Subscription id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Topic predicate
    pub fn matcher(&self) -> &TopicMatcher {
        &self.matcher
    }

    /// Target agent type
    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    /// Key mapping
    pub fn key_mapping(&self) -> &KeyMapping {
        &self.key
    }

    /// Check that the definition can be installed
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.id.len() > SUBSCRIPTION_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidTopic {
                topic: self.id.clone(),
                reason: format!(
                    "subscription id must be 1..={} bytes",
                    SUBSCRIPTION_ID_LENGTH_BYTES_MAX
                ),
            });
        }
        let key = match &self.key {
            KeyMapping::Source => "",
            KeyMapping::Fixed(k) => k.as_str(),
        };
        AgentId::new(self.agent_type.as_str(), key)?;
        Ok(())
    }

    /// Whether this subscription routes `topic`
    pub fn matches(&self, topic: &TopicId) -> bool {
        self.matcher.matches(topic.topic_type())
    }

    /// Compute the agent a matched topic is delivered to
    ///
    /// # Errors
    /// Returns error if the topic does not match or the derived key is not a
    /// valid agent key.
    pub fn map_to_agent(&self, topic: &TopicId) -> Result<AgentId> {
        if !self.matches(topic) {
            return Err(Error::InvalidTopic {
                topic: topic.to_string(),
                reason: format!("does not match subscription {}", self.id),
            });
        }
        let key = match &self.key {
            KeyMapping::Source => topic.source(),
            KeyMapping::Fixed(k) => k.as_str(),
        };
        AgentId::new(self.agent_type.as_str(), key)
    }
}
