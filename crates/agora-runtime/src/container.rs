//! Agent container
//!
//! TigerStyle: Single activation guarantee (one agent instance per id),
//! explicit factory registration, short critical sections.

use crate::agent::{Agent, AgentFactory};
use crate::runtime::RuntimeHandle;
use crate::subscriptions::SubscriptionIndex;
use agora_core::{metrics, AgentId, AgentType, Error, Result};
use agora_storage::StateStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

/// A live agent; the lock serializes message handling per instance
pub type AgentCell = Arc<tokio::sync::Mutex<Box<dyn Agent>>>;

/// Holds registered agent types, live agents and subscriptions
pub struct AgentContainer {
    factories: RwLock<HashMap<String, Arc<dyn AgentFactory>>>,
    /// One once-cell per id; concurrent first references share the cell
    agents: Mutex<HashMap<AgentId, Arc<OnceCell<AgentCell>>>>,
    subscriptions: SubscriptionIndex,
    state_store: Arc<dyn StateStore>,
    activations: AtomicU64,
}

impl AgentContainer {
    /// Create an empty container backed by `state_store`
    pub fn new(state_store: Arc<dyn StateStore>) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            agents: Mutex::new(HashMap::new()),
            subscriptions: SubscriptionIndex::new(),
            state_store,
            activations: AtomicU64::new(0),
        }
    }

    /// Subscriptions of this container
    pub fn subscriptions(&self) -> &SubscriptionIndex {
        &self.subscriptions
    }

    /// State store agents are restored from
    pub fn state_store(&self) -> &Arc<dyn StateStore> {
        &self.state_store
    }

    // =========================================================================
    // Agent types
    // =========================================================================

    /// Register the factory for an agent type
    ///
    /// # Errors
    /// `DuplicateAgentType` if the type is registered; the first factory stays
    /// in effect.
    pub fn register_agent_factory(
        &self,
        agent_type: impl Into<String>,
        factory: Arc<dyn AgentFactory>,
    ) -> Result<AgentType> {
        let agent_type = AgentType::new(agent_type)?;
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if factories.contains_key(agent_type.name()) {
            return Err(Error::DuplicateAgentType {
                agent_type: agent_type.name().to_string(),
            });
        }
        factories.insert(agent_type.name().to_string(), factory);
        debug!(agent_type = %agent_type, "Agent type registered");
        Ok(agent_type)
    }

    /// Remove an agent type registration
    pub fn unregister_agent_factory(&self, agent_type: &str) -> bool {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(agent_type)
            .is_some()
    }

    /// Check if an agent type is registered
    pub fn is_registered(&self, agent_type: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(agent_type)
    }

    /// Registered agent types, sorted
    pub fn agent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    fn factory(&self, agent_type: &str) -> Option<Arc<dyn AgentFactory>> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_type)
            .cloned()
    }

    // =========================================================================
    // Agents
    // =========================================================================

    /// The live agent for `agent_id`, activating it on first reference
    ///
    /// Activation creates the agent through its type's factory and restores
    /// its state from the store when a blob exists. Concurrent first
    /// references activate exactly one instance; a failed activation is
    /// retried by the next reference.
    ///
    /// # Errors
    /// `UnknownAgentType` if no factory is registered for the id's type;
    /// `AgentActivationFailed` if the factory or state restore fails.
    #[instrument(skip(self, runtime), fields(agent_id = %agent_id), level = "debug")]
    pub async fn ensure_agent(
        &self,
        agent_id: &AgentId,
        runtime: RuntimeHandle,
    ) -> Result<AgentCell> {
        let factory = self
            .factory(agent_id.agent_type())
            .ok_or_else(|| Error::unknown_agent_type(agent_id.agent_type()))?;

        let cell = {
            let mut agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
            agents
                .entry(agent_id.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        match cell
            .get_or_try_init(|| self.activate(agent_id, factory, runtime))
            .await
        {
            Ok(agent) => Ok(agent.clone()),
            Err(e) => {
                self.forget_failed(agent_id, &cell);
                Err(e)
            }
        }
    }

    /// Drop the slot of a failed activation so failing ids do not accumulate
    ///
    /// Leaves the slot alone if a concurrent reference has since activated
    /// the agent or `clear` replaced it.
    fn forget_failed(&self, agent_id: &AgentId, cell: &Arc<OnceCell<AgentCell>>) {
        let mut agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        let stale = agents
            .get(agent_id)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && !current.initialized());
        if stale {
            agents.remove(agent_id);
        }
    }

    async fn activate(
        &self,
        agent_id: &AgentId,
        factory: Arc<dyn AgentFactory>,
        runtime: RuntimeHandle,
    ) -> Result<AgentCell> {
        let activation_failed = |e: Error| Error::AgentActivationFailed {
            agent_id: agent_id.to_string(),
            reason: e.to_string(),
        };

        let mut agent = factory
            .create(agent_id, runtime)
            .await
            .map_err(activation_failed)?;

        if let Some(blob) = self
            .state_store
            .load(agent_id)
            .await
            .map_err(activation_failed)?
        {
            debug!(agent_id = %agent_id, size = blob.len(), "Restoring agent state");
            agent.load_state(blob).await.map_err(activation_failed)?;
        }

        self.activations.fetch_add(1, Ordering::Relaxed);
        metrics::record_agent_activated();
        info!(agent_id = %agent_id, "Agent activated");

        Ok(Arc::new(tokio::sync::Mutex::new(agent)))
    }

    /// The live agent for `agent_id`, without activating it
    pub fn get_agent(&self, agent_id: &AgentId) -> Option<AgentCell> {
        let agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        agents.get(agent_id).and_then(|cell| cell.get().cloned())
    }

    /// Check if an agent is active
    pub fn is_active(&self, agent_id: &AgentId) -> bool {
        self.get_agent(agent_id).is_some()
    }

    /// Number of active agents
    pub fn active_agent_count(&self) -> usize {
        let agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        agents.values().filter(|cell| cell.initialized()).count()
    }

    /// Total activations since creation
    pub fn activation_count(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    /// Drop every live agent
    pub fn clear(&self) -> usize {
        let mut agents = self.agents.lock().unwrap_or_else(PoisonError::into_inner);
        let count = agents.values().filter(|cell| cell.initialized()).count();
        agents.clear();
        count
    }
}

impl std::fmt::Debug for AgentContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContainer")
            .field("agent_types", &self.agent_types())
            .field("active_agents", &self.active_agent_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{FnAgentFactory, MessageContext};
    use crate::message::AnyMessage;
    use agora_storage::MemoryStateStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records its creation and state restores in a shared log
    struct Recorder {
        log: Log,
    }

    #[async_trait]
    impl Agent for Recorder {
        async fn on_message(
            &mut self,
            _message: AnyMessage,
            _ctx: MessageContext,
        ) -> Result<Option<AnyMessage>> {
            Ok(None)
        }

        async fn load_state(&mut self, state: Bytes) -> Result<()> {
            let state = String::from_utf8_lossy(&state).to_string();
            self.log.lock().unwrap().push(format!("restored:{}", state));
            Ok(())
        }
    }

    fn container() -> AgentContainer {
        AgentContainer::new(Arc::new(MemoryStateStore::new()))
    }

    fn recorder_factory(tag: &'static str, log: Log) -> Arc<dyn AgentFactory> {
        Arc::new(FnAgentFactory::new(move |id: &AgentId, _rt| {
            log.lock().unwrap().push(format!("{}:{}", tag, id));
            Recorder { log: log.clone() }
        }))
    }

    /// Counts how often it runs and yields so activations overlap
    struct CountingFactory {
        created: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AgentFactory for CountingFactory {
        async fn create(&self, _id: &AgentId, _runtime: RuntimeHandle) -> Result<Box<dyn Agent>> {
            self.created.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(Box::new(Recorder {
                log: Log::default(),
            }))
        }
    }

    #[tokio::test]
    async fn test_unknown_agent_type() {
        let container = container();
        let id = AgentId::new("Nobody", "k").unwrap();
        let result = container.ensure_agent(&id, RuntimeHandle::detached()).await;
        assert!(matches!(result, Err(Error::UnknownAgentType { .. })));
        assert!(!container.is_active(&id));
    }

    #[tokio::test]
    async fn test_duplicate_registration_keeps_original() {
        let container = container();
        let log = Log::default();
        container
            .register_agent_factory("Coder", recorder_factory("f1", log.clone()))
            .unwrap();
        let err = container
            .register_agent_factory("Coder", recorder_factory("f2", log.clone()))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateAgentType { .. }));

        let id = AgentId::new("Coder", "default").unwrap();
        container
            .ensure_agent(&id, RuntimeHandle::detached())
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["f1:Coder/default".to_string()]);
        assert_eq!(container.agent_types(), vec!["Coder".to_string()]);
        assert_eq!(container.activation_count(), 1);

        assert!(container.unregister_agent_factory("Coder"));
        assert!(!container.is_registered("Coder"));
    }

    #[tokio::test]
    async fn test_concurrent_first_reference_activates_once() {
        let container = Arc::new(container());
        let created = Arc::new(AtomicUsize::new(0));
        container
            .register_agent_factory(
                "Coder",
                Arc::new(CountingFactory {
                    created: created.clone(),
                }),
            )
            .unwrap();

        let id = AgentId::new("Coder", "default").unwrap();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let container = container.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    container
                        .ensure_agent(&id, RuntimeHandle::detached())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let cells: Vec<AgentCell> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(cells.iter().all(|c| Arc::ptr_eq(c, &cells[0])));
        assert_eq!(container.active_agent_count(), 1);
    }

    /// Fails its first `failures` creations
    struct FlakyFactory {
        failures: usize,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AgentFactory for FlakyFactory {
        async fn create(&self, _id: &AgentId, _runtime: RuntimeHandle) -> Result<Box<dyn Agent>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(Error::internal("factory unavailable"));
            }
            Ok(Box::new(Recorder {
                log: Log::default(),
            }))
        }
    }

    #[tokio::test]
    async fn test_failed_activation_leaves_no_slot() {
        let container = container();
        let attempts = Arc::new(AtomicUsize::new(0));
        container
            .register_agent_factory(
                "Coder",
                Arc::new(FlakyFactory {
                    failures: 2,
                    attempts: attempts.clone(),
                }),
            )
            .unwrap();

        for key in ["a", "b"] {
            let id = AgentId::new("Coder", key).unwrap();
            let result = container.ensure_agent(&id, RuntimeHandle::detached()).await;
            assert!(matches!(result, Err(Error::AgentActivationFailed { .. })));
            assert!(!container.is_active(&id));
        }
        assert!(container.agents.lock().unwrap().is_empty());
        assert_eq!(container.activation_count(), 0);

        // The next reference retries and succeeds
        let id = AgentId::new("Coder", "a").unwrap();
        container
            .ensure_agent(&id, RuntimeHandle::detached())
            .await
            .unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(container.agents.lock().unwrap().len(), 1);
        assert_eq!(container.active_agent_count(), 1);
    }

    #[tokio::test]
    async fn test_activation_restores_state() {
        let store = Arc::new(MemoryStateStore::new());
        let container = AgentContainer::new(store.clone());
        let log = Log::default();
        container
            .register_agent_factory("Coder", recorder_factory("f1", log.clone()))
            .unwrap();

        let id = AgentId::new("Coder", "default").unwrap();
        store.save(&id, Bytes::from_static(b"saved")).await.unwrap();
        container
            .ensure_agent(&id, RuntimeHandle::detached())
            .await
            .unwrap();
        assert!(container.is_active(&id));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["f1:Coder/default".to_string(), "restored:saved".to_string()]
        );

        assert_eq!(container.clear(), 1);
        assert!(!container.is_active(&id));
        assert_eq!(container.active_agent_count(), 0);
    }
}
