use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, MessageId, SessionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One message in a session's shared history, attributed to the agent that
/// was serving the run that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub agent_id: AgentId,
    /// Set when the message came from a delegated (sub-agent) run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<AgentId>,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

impl Message {
    pub fn new(session_id: SessionId, agent_id: AgentId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            agent_id,
            parent_agent_id: None,
            role,
            content: content.into(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_parent(mut self, parent: Option<AgentId>) -> Self {
        self.parent_agent_id = parent;
        self
    }

    pub fn is_delegated(&self) -> bool {
        self.parent_agent_id.is_some()
    }
}
