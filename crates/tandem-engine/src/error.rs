use tandem_core::errors::WorkerError;
use tandem_core::ids::{AgentId, SessionId};
use tandem_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),

    #[error(
        "agent {parent} may not delegate to {}",
        .sub.as_ref().map_or("<no default sub-agent>", AgentId::as_str)
    )]
    AgentNotAvailable {
        parent: AgentId,
        sub: Option<AgentId>,
    },

    #[error("no agents configured")]
    NoAgentsConfigured,

    #[error("failed to construct worker for agent {agent_id}: {source}")]
    WorkerConstructionFailed {
        agent_id: AgentId,
        #[source]
        source: WorkerError,
    },

    #[error("run failed on agent {agent_id}: {source}")]
    RunFailed {
        agent_id: AgentId,
        #[source]
        source: WorkerError,
    },

    #[error("failed to persist agent state for session {session_id}: {source}")]
    PersistenceFailed {
        session_id: SessionId,
        #[source]
        source: StoreError,
    },

    #[error("session manager closed: {0}")]
    Closed(SessionId),
}

impl ManagerError {
    /// `false` when the operation took effect in memory and only the
    /// durable write failed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PersistenceFailed { .. })
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AgentNotFound(_) => "agent_not_found",
            Self::AgentNotAvailable { .. } => "agent_not_available",
            Self::NoAgentsConfigured => "no_agents_configured",
            Self::WorkerConstructionFailed { .. } => "worker_construction_failed",
            Self::RunFailed { .. } => "run_failed",
            Self::PersistenceFailed { .. } => "persistence_failed",
            Self::Closed(_) => "closed",
        }
    }
}
