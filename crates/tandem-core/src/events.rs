use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, MessageId, RunId, SessionId};

/// Events a worker emits while serving one run.
///
/// Every event carries the agent id the run is attributed to, which is the
/// agent captured at dispatch time (or the sub-agent for a delegated run).
/// Ordering per run: `RunStarted → (TextDelta | MessageStored)* → terminal`,
/// where terminal is one of `RunComplete`, `RunCancelled`, `RunFailed`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerEvent {
    #[serde(rename = "run_started")]
    RunStarted {
        session_id: SessionId,
        agent_id: AgentId,
        run_id: RunId,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_agent_id: Option<AgentId>,
    },

    #[serde(rename = "text_delta")]
    TextDelta {
        session_id: SessionId,
        agent_id: AgentId,
        delta: String,
    },

    #[serde(rename = "message_stored")]
    MessageStored {
        session_id: SessionId,
        agent_id: AgentId,
        message_id: MessageId,
    },

    #[serde(rename = "run_complete")]
    RunComplete {
        session_id: SessionId,
        agent_id: AgentId,
        run_id: RunId,
    },

    #[serde(rename = "run_cancelled")]
    RunCancelled {
        session_id: SessionId,
        agent_id: AgentId,
        run_id: RunId,
    },

    #[serde(rename = "run_failed")]
    RunFailed {
        session_id: SessionId,
        agent_id: AgentId,
        run_id: RunId,
        error: String,
    },
}

impl WorkerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::TextDelta { .. } => "text_delta",
            Self::MessageStored { .. } => "message_stored",
            Self::RunComplete { .. } => "run_complete",
            Self::RunCancelled { .. } => "run_cancelled",
            Self::RunFailed { .. } => "run_failed",
        }
    }

    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::RunStarted { session_id, .. }
            | Self::TextDelta { session_id, .. }
            | Self::MessageStored { session_id, .. }
            | Self::RunComplete { session_id, .. }
            | Self::RunCancelled { session_id, .. }
            | Self::RunFailed { session_id, .. } => session_id,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        match self {
            Self::RunStarted { agent_id, .. }
            | Self::TextDelta { agent_id, .. }
            | Self::MessageStored { agent_id, .. }
            | Self::RunComplete { agent_id, .. }
            | Self::RunCancelled { agent_id, .. }
            | Self::RunFailed { agent_id, .. } => agent_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunComplete { .. } | Self::RunCancelled { .. } | Self::RunFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let evt = WorkerEvent::TextDelta {
            session_id: SessionId::from_raw("sess_1"),
            agent_id: AgentId::from("coder"),
            delta: "hi".into(),
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "text_delta");
        assert_eq!(json["agent_id"], "coder");
    }

    #[test]
    fn parent_omitted_when_not_delegated() {
        let evt = WorkerEvent::RunStarted {
            session_id: SessionId::from_raw("sess_1"),
            agent_id: AgentId::from("coder"),
            run_id: RunId::from_raw("run_1"),
            parent_agent_id: None,
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert!(json.get("parent_agent_id").is_none());
    }

    #[test]
    fn terminal_classification() {
        let done = WorkerEvent::RunComplete {
            session_id: SessionId::new(),
            agent_id: AgentId::from("coder"),
            run_id: RunId::new(),
        };
        assert!(done.is_terminal());
        assert_eq!(done.event_type(), "run_complete");
        assert_eq!(done.agent_id().as_str(), "coder");

        let delta = WorkerEvent::TextDelta {
            session_id: SessionId::new(),
            agent_id: AgentId::from("coder"),
            delta: "x".into(),
        };
        assert!(!delta.is_terminal());
    }
}
