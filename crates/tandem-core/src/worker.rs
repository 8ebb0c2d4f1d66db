//! The agent worker contract and the factory that builds workers.
//!
//! A worker is bound to exactly one [`AgentDescriptor`] and may serve many
//! sessions. The coordinator never inspects what a worker streams back; it
//! only decides which worker gets the call and under which agent id the
//! resulting messages are attributed.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent::{AgentDescriptor, ModelTier};
use crate::errors::WorkerError;
use crate::events::WorkerEvent;
use crate::ids::{AgentId, SessionId};

pub type WorkerEventStream = Pin<Box<dyn Stream<Item = WorkerEvent> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub tier: ModelTier,
    pub provider: String,
    pub model: String,
}

/// Ephemeral pairing for one sub-agent invocation. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegationContext {
    pub parent_agent_id: AgentId,
    pub sub_agent_id: AgentId,
    pub session_id: SessionId,
}

/// Who a run belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunContext {
    pub session_id: SessionId,
    /// Agent the produced messages are attributed to.
    pub agent_id: AgentId,
    pub delegation: Option<DelegationContext>,
}

impl RunContext {
    pub fn direct(session_id: SessionId, agent_id: AgentId) -> Self {
        Self {
            session_id,
            agent_id,
            delegation: None,
        }
    }

    pub fn delegated(delegation: DelegationContext) -> Self {
        Self {
            session_id: delegation.session_id.clone(),
            agent_id: delegation.sub_agent_id.clone(),
            delegation: Some(delegation),
        }
    }

    pub fn parent_agent_id(&self) -> Option<&AgentId> {
        self.delegation.as_ref().map(|d| &d.parent_agent_id)
    }
}

#[async_trait]
pub trait AgentWorker: Send + Sync {
    fn agent_id(&self) -> &AgentId;

    /// Start a run. The returned stream ends after a terminal event.
    async fn run(
        &self,
        ctx: RunContext,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<WorkerEventStream, WorkerError>;

    /// Cooperative cancellation of the in-flight run for `session_id`.
    fn cancel(&self, session_id: &SessionId);
    fn cancel_all(&self);
    fn is_busy(&self) -> bool;
    fn is_session_busy(&self, session_id: &SessionId) -> bool;

    /// Every event this worker emits, across all sessions.
    fn subscribe(&self) -> broadcast::Receiver<WorkerEvent>;
    fn model(&self) -> ModelInfo;
}

/// Builds workers from descriptors. Construction may be slow (client setup),
/// so it is async. Callers guarantee at most one concurrent build per agent id
/// within a session.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    async fn build(&self, descriptor: Arc<AgentDescriptor>) -> Result<Arc<dyn AgentWorker>, WorkerError>;
}
