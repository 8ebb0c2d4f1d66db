//! Per-session coordinator: which agent is active, which workers exist, and
//! where each run is dispatched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use tandem_core::agent::AgentDescriptor;
use tandem_core::ids::{AgentId, SessionId};
use tandem_core::messages::Message;
use tandem_core::worker::{
    AgentWorker, Attachment, DelegationContext, RunContext, WorkerEventStream, WorkerFactory,
};
use tandem_store::{MessageStore, SessionStore, StoreError};

use crate::cycling::Direction;
use crate::error::ManagerError;
use crate::registry::AgentRegistry;
use crate::state::AgentState;
use crate::workers::{WorkerKey, WorkerTable};

pub struct Manager {
    session_id: SessionId,
    registry: Arc<AgentRegistry>,
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    workers: WorkerTable,
    state: Mutex<AgentState>,
    /// Generation of the last state written to the session store. Held for
    /// the duration of a write so writes never interleave.
    persisted: Mutex<u64>,
    closed: AtomicBool,
}

impl Manager {
    /// Restore the session's agent selection, or fall back to the default
    /// agent. No worker is built here.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub fn new(
        session_id: SessionId,
        registry: Arc<AgentRegistry>,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        factory: Arc<dyn WorkerFactory>,
    ) -> Result<Self, ManagerError> {
        let default = registry.default_agent().cloned().ok_or(ManagerError::NoAgentsConfigured)?;

        let restored = match sessions.load_agent_state(&session_id) {
            Ok(persisted) => {
                let active = persisted.active_agent_id.clone();
                let restored = AgentState::restore(persisted, &registry);
                if restored.is_none() {
                    debug!(agent_id = %active, "persisted agent no longer configured");
                }
                restored
            }
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(error = %e, "failed to load agent state, using default agent");
                None
            }
        };
        let state = restored.unwrap_or_else(|| AgentState::fresh(default));
        debug!(active = %state.active, "manager ready");

        Ok(Self {
            session_id,
            registry,
            sessions,
            messages,
            workers: WorkerTable::new(factory),
            state: Mutex::new(state),
            persisted: Mutex::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn active_agent_id(&self) -> AgentId {
        self.state.lock().active.clone()
    }

    /// Visited agents, oldest first; the last entry is the active agent.
    pub fn agent_history(&self) -> Vec<AgentId> {
        self.state.lock().history.clone()
    }

    /// Enabled agents, sorted by id.
    pub fn available_agents(&self) -> Vec<Arc<AgentDescriptor>> {
        self.registry.descriptors().cloned().collect()
    }

    pub fn descriptor(&self, agent_id: &AgentId) -> Option<Arc<AgentDescriptor>> {
        self.registry.get(agent_id).cloned()
    }

    /// Make `agent_id` the active agent.
    ///
    /// A `PersistenceFailed` error means the switch happened but was not
    /// written to the store.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub fn switch_agent(&self, agent_id: &AgentId) -> Result<(), ManagerError> {
        if !self.registry.contains(agent_id) {
            return Err(ManagerError::AgentNotFound(agent_id.clone()));
        }
        self.state.lock().promote(agent_id);
        debug!(agent_id = %agent_id, "switched agent");
        self.persist().inspect_err(|e| warn!(error = %e, "agent switch not persisted"))
    }

    pub fn cycle_next(&self) -> Result<AgentId, ManagerError> {
        self.cycle(Direction::Next)
    }

    pub fn cycle_previous(&self) -> Result<AgentId, ManagerError> {
        self.cycle(Direction::Previous)
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    fn cycle(&self, direction: Direction) -> Result<AgentId, ManagerError> {
        let target = {
            let mut state = self.state.lock();
            let target = state
                .peek_cycle(&self.registry, direction)
                .ok_or(ManagerError::NoAgentsConfigured)?;
            if target == state.active {
                return Ok(target);
            }
            state.promote(&target);
            target
        };
        debug!(agent_id = %target, "cycled agent");
        self.persist().inspect_err(|e| warn!(error = %e, "agent switch not persisted"))?;
        Ok(target)
    }

    /// Worker for the active agent, built on first use.
    pub async fn current_agent(&self) -> Result<Arc<dyn AgentWorker>, ManagerError> {
        let agent_id = self.active_agent_id();
        self.worker(&agent_id).await
    }

    /// Worker for any configured agent, built on first use.
    pub async fn worker(&self, agent_id: &AgentId) -> Result<Arc<dyn AgentWorker>, ManagerError> {
        self.ensure_open()?;
        let descriptor = self
            .registry
            .get(agent_id)
            .ok_or_else(|| ManagerError::AgentNotFound(agent_id.clone()))?;
        let worker = self
            .workers
            .resolve(&WorkerKey::new(&self.session_id, agent_id), descriptor)
            .await
            .map_err(|source| ManagerError::WorkerConstructionFailed {
                agent_id: agent_id.clone(),
                source,
            })?;

        // close() may have run while the factory was building.
        if self.is_closed() {
            debug!(agent_id = %agent_id, "discarding worker built after close");
            worker.cancel_all();
            self.workers.clear();
            return Err(ManagerError::Closed(self.session_id.clone()));
        }
        Ok(worker)
    }

    /// Run on the agent active at call time. Everything the run produces is
    /// attributed to that agent even if the session switches mid-run.
    #[instrument(skip_all, fields(session_id = %self.session_id))]
    pub async fn run(
        &self,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<WorkerEventStream, ManagerError> {
        self.ensure_open()?;
        let agent_id = self.active_agent_id();

        if let Err(e) = self.persist() {
            warn!(agent_id = %agent_id, error = %e, "agent state checkpoint failed, running anyway");
        }

        let worker = self.worker(&agent_id).await?;
        debug!(agent_id = %agent_id, "dispatching run");
        let ctx = RunContext::direct(self.session_id.clone(), agent_id.clone());
        self.dispatch(worker, ctx, content.into(), attachments).await
    }

    /// Run `sub_agent_id` (or the parent's default sub-agent) on behalf of
    /// `parent_agent_id`. The active agent and history are left alone.
    #[instrument(skip(self, content, attachments), fields(session_id = %self.session_id))]
    pub async fn run_as(
        &self,
        parent_agent_id: &AgentId,
        sub_agent_id: Option<&AgentId>,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<WorkerEventStream, ManagerError> {
        self.ensure_open()?;
        let parent = self
            .registry
            .get(parent_agent_id)
            .ok_or_else(|| ManagerError::AgentNotFound(parent_agent_id.clone()))?;

        let sub_agent_id = match sub_agent_id.or(parent.subagents.default.as_ref()) {
            Some(id) => id.clone(),
            None => {
                return Err(ManagerError::AgentNotAvailable {
                    parent: parent_agent_id.clone(),
                    sub: None,
                })
            }
        };
        if !parent.subagents.permits(&sub_agent_id) {
            return Err(ManagerError::AgentNotAvailable {
                parent: parent_agent_id.clone(),
                sub: Some(sub_agent_id),
            });
        }

        let worker = self.worker(&sub_agent_id).await?;
        debug!(parent = %parent_agent_id, agent_id = %sub_agent_id, "dispatching delegated run");
        let ctx = RunContext::delegated(DelegationContext {
            parent_agent_id: parent_agent_id.clone(),
            sub_agent_id,
            session_id: self.session_id.clone(),
        });
        self.dispatch(worker, ctx, content.into(), attachments).await
    }

    async fn dispatch(
        &self,
        worker: Arc<dyn AgentWorker>,
        ctx: RunContext,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<WorkerEventStream, ManagerError> {
        let agent_id = ctx.agent_id.clone();
        let stream = worker
            .run(ctx, content, attachments)
            .await
            .map_err(|source| ManagerError::RunFailed {
                agent_id: agent_id.clone(),
                source,
            })?;

        // A close() that raced the dispatch has already swept the table.
        if self.is_closed() {
            debug!(agent_id = %agent_id, "cancelling run dispatched during close");
            worker.cancel(&self.session_id);
            return Err(ManagerError::Closed(self.session_id.clone()));
        }
        Ok(stream)
    }

    /// Cancel the active agent's run for `session_id`. Never builds a worker.
    pub fn cancel(&self, session_id: &SessionId) {
        if let Some(worker) = self.active_worker() {
            worker.cancel(session_id);
        }
    }

    pub fn cancel_all(&self) {
        for worker in self.workers.built() {
            worker.cancel_all();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.workers.built().iter().any(|w| w.is_busy())
    }

    pub fn is_session_busy(&self, session_id: &SessionId) -> bool {
        self.active_worker()
            .is_some_and(|worker| worker.is_session_busy(session_id))
    }

    /// The session's shared message history across all agents.
    pub fn messages(&self) -> Result<Vec<Message>, StoreError> {
        self.messages.list(&self.session_id)
    }

    pub fn messages_by_agent(&self, agent_id: &AgentId) -> Result<Vec<Message>, StoreError> {
        self.messages.list_by_agent(&self.session_id, agent_id)
    }

    /// Cancel everything and release all workers. Later runs and worker
    /// lookups fail with `Closed`.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancel_all();
        self.workers.clear();
        debug!("manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), ManagerError> {
        if self.is_closed() {
            return Err(ManagerError::Closed(self.session_id.clone()));
        }
        Ok(())
    }

    pub fn built_workers(&self) -> usize {
        self.workers.built_count()
    }

    fn active_worker(&self) -> Option<Arc<dyn AgentWorker>> {
        let agent_id = self.active_agent_id();
        self.workers.get(&WorkerKey::new(&self.session_id, &agent_id))
    }

    /// Write the current state if it is newer than what was last written.
    /// The state snapshot is taken under the write gate, so the store always
    /// converges to the latest mutation.
    fn persist(&self) -> Result<(), ManagerError> {
        let mut persisted = self.persisted.lock();
        let snapshot = self.state.lock().clone();
        if snapshot.generation <= *persisted {
            return Ok(());
        }

        let result = serde_json::to_string(&snapshot.history)
            .map_err(StoreError::from)
            .and_then(|history| {
                self.sessions
                    .update_agent_state(&self.session_id, &snapshot.active, &history)
            });

        result.map_err(|source| ManagerError::PersistenceFailed {
            session_id: self.session_id.clone(),
            source,
        })?;
        *persisted = snapshot.generation;
        Ok(())
    }
}
