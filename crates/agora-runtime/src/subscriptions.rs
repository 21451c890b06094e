//! Subscription index
//!
//! TigerStyle: Subscriptions keyed by id, iterated in id order so dispatch is
//! deterministic.

use agora_core::{AgentId, Error, Result, SubscriptionDefinition, TopicId};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Active subscriptions of one runtime
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    subscriptions: RwLock<BTreeMap<String, SubscriptionDefinition>>,
}

impl SubscriptionIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription
    ///
    /// # Errors
    /// `DuplicateSubscription` if a subscription with the same id exists.
    pub async fn add(&self, subscription: SubscriptionDefinition) -> Result<()> {
        subscription.validate()?;
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(subscription.id()) {
            return Err(Error::DuplicateSubscription {
                id: subscription.id().to_string(),
            });
        }
        debug!(subscription_id = %subscription.id(), "Subscription added");
        subscriptions.insert(subscription.id().to_string(), subscription);
        Ok(())
    }

    /// Remove a subscription, returning it
    ///
    /// # Errors
    /// `SubscriptionNotFound` if there is no subscription with the id.
    pub async fn remove(&self, id: &str) -> Result<SubscriptionDefinition> {
        let removed = self.subscriptions.write().await.remove(id);
        match removed {
            Some(subscription) => {
                debug!(subscription_id = %id, "Subscription removed");
                Ok(subscription)
            }
            None => Err(Error::SubscriptionNotFound { id: id.to_string() }),
        }
    }

    /// All subscriptions in id order
    pub async fn list(&self) -> Vec<SubscriptionDefinition> {
        self.subscriptions.read().await.values().cloned().collect()
    }

    /// Number of subscriptions
    pub async fn len(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Whether there are no subscriptions
    pub async fn is_empty(&self) -> bool {
        self.subscriptions.read().await.is_empty()
    }

    /// Agents a published topic is delivered to
    ///
    /// With `deduplicate`, an agent reached by several subscriptions appears
    /// once; otherwise it appears once per matching subscription.
    pub async fn targets(&self, topic: &TopicId, deduplicate: bool) -> Vec<AgentId> {
        let subscriptions = self.subscriptions.read().await;
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for subscription in subscriptions.values() {
            if !subscription.matches(topic) {
                continue;
            }
            match subscription.map_to_agent(topic) {
                Ok(agent_id) => {
                    if deduplicate && !seen.insert(agent_id.clone()) {
                        continue;
                    }
                    targets.push(agent_id);
                }
                Err(e) => warn!(
                    subscription_id = %subscription.id(),
                    topic = %topic,
                    error = %e,
                    "Subscription matched but could not map topic to an agent"
                ),
            }
        }
        targets
    }
}
