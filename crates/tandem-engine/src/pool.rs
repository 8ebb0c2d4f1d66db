use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use tandem_core::ids::SessionId;
use tandem_core::worker::WorkerFactory;
use tandem_store::{MessageStore, SessionStore};

use crate::error::ManagerError;
use crate::manager::Manager;
use crate::registry::AgentRegistry;

/// Process-wide map from session to its [`Manager`].
pub struct ManagerPool {
    managers: DashMap<SessionId, Arc<Manager>>,
    registry: Arc<AgentRegistry>,
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    factory: Arc<dyn WorkerFactory>,
}

impl ManagerPool {
    pub fn new(
        registry: Arc<AgentRegistry>,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        factory: Arc<dyn WorkerFactory>,
    ) -> Self {
        Self {
            managers: DashMap::new(),
            registry,
            sessions,
            messages,
            factory,
        }
    }

    /// The session's manager, created on first reference.
    pub fn get_or_create(&self, session_id: &SessionId) -> Result<Arc<Manager>, ManagerError> {
        if let Some(existing) = self.managers.get(session_id) {
            return Ok(Arc::clone(existing.value()));
        }

        // Built outside the shard lock: construction reads the session store.
        let manager = Arc::new(Manager::new(
            session_id.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.sessions),
            Arc::clone(&self.messages),
            Arc::clone(&self.factory),
        )?);

        match self.managers.entry(session_id.clone()) {
            Entry::Occupied(entry) => {
                debug!(session_id = %session_id, "lost manager creation race");
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let _ = entry.insert(Arc::clone(&manager));
                debug!(session_id = %session_id, "manager created");
                Ok(manager)
            }
        }
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Arc<Manager>> {
        self.managers.get(session_id).map(|m| Arc::clone(m.value()))
    }

    /// Remove the session's manager and cancel its workers.
    pub fn close(&self, session_id: &SessionId) -> bool {
        match self.managers.remove(session_id) {
            Some((_, manager)) => {
                manager.close();
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&self) {
        let sessions: Vec<SessionId> = self.managers.iter().map(|e| e.key().clone()).collect();
        info!(count = sessions.len(), "shutting down session managers");
        for session_id in sessions {
            let _ = self.close(&session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }
}
