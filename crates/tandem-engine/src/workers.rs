//! Lazily populated worker table keyed by `(session, agent)`.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use tandem_core::agent::AgentDescriptor;
use tandem_core::errors::WorkerError;
use tandem_core::ids::{AgentId, SessionId};
use tandem_core::worker::{AgentWorker, WorkerFactory};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    pub session_id: SessionId,
    pub agent_id: AgentId,
}

impl WorkerKey {
    pub fn new(session_id: &SessionId, agent_id: &AgentId) -> Self {
        Self {
            session_id: session_id.clone(),
            agent_id: agent_id.clone(),
        }
    }
}

type Slot = Arc<OnceCell<Arc<dyn AgentWorker>>>;

/// Each key is built at most once; concurrent resolvers of the same key wait
/// on the first build. A failed build leaves the slot empty for a retry.
pub struct WorkerTable {
    slots: DashMap<WorkerKey, Slot>,
    factory: Arc<dyn WorkerFactory>,
}

impl WorkerTable {
    pub fn new(factory: Arc<dyn WorkerFactory>) -> Self {
        Self {
            slots: DashMap::new(),
            factory,
        }
    }

    pub async fn resolve(
        &self,
        key: &WorkerKey,
        descriptor: &Arc<AgentDescriptor>,
    ) -> Result<Arc<dyn AgentWorker>, WorkerError> {
        // Shard guard is dropped at the end of this statement, before any await.
        let slot: Slot = self.slots.entry(key.clone()).or_default().value().clone();

        let worker = slot
            .get_or_try_init(|| async {
                info!(session_id = %key.session_id, agent_id = %key.agent_id, "constructing worker");
                self.factory.build(Arc::clone(descriptor)).await.inspect_err(|e| {
                    warn!(
                        session_id = %key.session_id,
                        agent_id = %key.agent_id,
                        error_kind = e.error_kind(),
                        error = %e,
                        "worker construction failed"
                    );
                })
            })
            .await?;
        Ok(Arc::clone(worker))
    }

    /// The worker for `key` if it has already been built.
    pub fn get(&self, key: &WorkerKey) -> Option<Arc<dyn AgentWorker>> {
        self.slots.get(key).and_then(|slot| slot.get().cloned())
    }

    pub fn built(&self) -> Vec<Arc<dyn AgentWorker>> {
        self.slots.iter().filter_map(|slot| slot.get().cloned()).collect()
    }

    pub fn built_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.initialized()).count()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}
