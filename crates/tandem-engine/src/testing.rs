//! Shared fixtures for engine tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tandem_core::agent::AgentDescriptor;
use tandem_core::errors::WorkerError;
use tandem_core::ids::{AgentId, SessionId};
use tandem_core::worker::{AgentWorker, WorkerFactory};
use tandem_store::{Database, MessageRepo, SessionAgentState, SessionRepo, SessionStore, StoreError};

use crate::echo::EchoWorkerFactory;
use crate::manager::Manager;
use crate::registry::AgentRegistry;

/// Session store whose writes can be switched off.
pub struct FlakySessionStore {
    inner: SessionRepo,
    pub fail_writes: AtomicBool,
    pub writes: AtomicUsize,
}

impl FlakySessionStore {
    pub fn new(inner: SessionRepo) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }
}

impl SessionStore for FlakySessionStore {
    fn load_agent_state(&self, session_id: &SessionId) -> Result<SessionAgentState, StoreError> {
        self.inner.load_agent_state(session_id)
    }

    fn update_agent_state(
        &self,
        session_id: &SessionId,
        active_agent_id: &AgentId,
        agent_history_json: &str,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("disk I/O error".into()));
        }
        let _ = self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_agent_state(session_id, active_agent_id, agent_history_json)
    }
}

/// Echo factory that counts builds, can fail on demand, and can be slowed
/// down to widen race windows.
pub struct CountingFactory {
    inner: EchoWorkerFactory,
    pub builds: AtomicUsize,
    pub failures_left: AtomicUsize,
    build_delay: Duration,
}

impl CountingFactory {
    pub fn new(inner: EchoWorkerFactory, build_delay: Duration) -> Self {
        Self {
            inner,
            builds: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            build_delay,
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerFactory for CountingFactory {
    async fn build(&self, descriptor: Arc<AgentDescriptor>) -> Result<Arc<dyn AgentWorker>, WorkerError> {
        let _ = self.builds.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.build_delay).await;
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(WorkerError::Setup(format!("no credentials for {}", descriptor.id)));
        }
        self.inner.build(descriptor).await
    }
}

/// Everything a manager test needs, backed by one in-memory database.
pub struct Fixture {
    pub db: Database,
    pub sessions: Arc<FlakySessionStore>,
    pub messages: Arc<MessageRepo>,
    pub factory: Arc<CountingFactory>,
    pub registry: Arc<AgentRegistry>,
    pub session_id: SessionId,
}

impl Fixture {
    pub fn new(registry: AgentRegistry) -> Self {
        Self::with_delays(registry, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_delays(registry: AgentRegistry, build_delay: Duration, run_delay: Duration) -> Self {
        let db = Database::in_memory().unwrap();
        let repo = SessionRepo::new(db.clone());
        let session_id = repo.create(None).unwrap().id;
        let messages = Arc::new(MessageRepo::new(db.clone()));
        let factory = Arc::new(CountingFactory::new(
            EchoWorkerFactory::new(messages.clone(), run_delay),
            build_delay,
        ));
        Self {
            db,
            sessions: Arc::new(FlakySessionStore::new(repo)),
            messages,
            factory,
            registry: Arc::new(registry),
            session_id,
        }
    }

    pub fn manager(&self) -> Manager {
        self.try_manager().unwrap()
    }

    pub fn try_manager(&self) -> Result<Manager, crate::error::ManagerError> {
        Manager::new(
            self.session_id.clone(),
            self.registry.clone(),
            self.sessions.clone(),
            self.messages.clone(),
            self.factory.clone(),
        )
    }

    pub fn persisted(&self) -> SessionAgentState {
        SessionRepo::new(self.db.clone()).load_agent_state(&self.session_id).unwrap()
    }
}

pub fn ids(raw: &[&str]) -> Vec<AgentId> {
    raw.iter().map(|s| AgentId::from(*s)).collect()
}

pub fn registry(raw: &[&str]) -> AgentRegistry {
    AgentRegistry::new(raw.iter().map(|id| AgentDescriptor::new(*id, *id)))
}

/// `coder` may delegate to `task` (its default) and `reviewer`; `docs` may
/// delegate to `archivist`, which is not configured.
pub fn delegation_registry() -> AgentRegistry {
    AgentRegistry::new([
        AgentDescriptor::new("coder", "Coder").with_subagents(&["task", "reviewer"], Some("task")),
        AgentDescriptor::new("reviewer", "Reviewer"),
        AgentDescriptor::new("docs", "Docs").with_subagents(&["archivist"], None),
        AgentDescriptor::new("task", "Task"),
    ])
}
