//! In-memory agent selection for one session.

use tracing::debug;

use tandem_core::ids::AgentId;
use tandem_store::SessionAgentState;

use crate::cycling::{self, Direction};
use crate::registry::AgentRegistry;

/// Active agent plus visit history. Invariant: `history` is duplicate-free
/// and its last element is `active`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AgentState {
    pub active: AgentId,
    pub history: Vec<AgentId>,
    /// Bumped on every accepted mutation; orders persistence writes.
    pub generation: u64,
}

impl AgentState {
    pub fn fresh(default: AgentId) -> Self {
        Self {
            history: vec![default.clone()],
            active: default,
            generation: 1,
        }
    }

    /// Rebuild from persisted state. Returns `None` when the persisted active
    /// agent is no longer configured. Generation is 0 when nothing had to be
    /// repaired, so an unchanged state is not written back.
    pub fn restore(persisted: SessionAgentState, registry: &AgentRegistry) -> Option<Self> {
        if !registry.contains(&persisted.active_agent_id) {
            return None;
        }
        let history = sanitize(&persisted.agent_history, &persisted.active_agent_id, registry);
        let generation = u64::from(history != persisted.agent_history);
        if generation > 0 {
            debug!(session_id = %persisted.session_id, "repaired persisted agent history");
        }
        Some(Self {
            active: persisted.active_agent_id,
            history,
            generation,
        })
    }

    /// Make `agent_id` active and move it to the most-recent end of history.
    pub fn promote(&mut self, agent_id: &AgentId) {
        self.history.retain(|id| id != agent_id);
        self.history.push(agent_id.clone());
        self.active = agent_id.clone();
        self.generation += 1;
    }

    /// The agent cycling would land on, without applying it.
    pub fn peek_cycle(&self, registry: &AgentRegistry, direction: Direction) -> Option<AgentId> {
        let order = cycling::cycle_order(&self.history, registry);
        cycling::step(&order, &self.active, direction).cloned()
    }
}

/// Drop unconfigured ids, keep the last occurrence of duplicates, and move
/// `active` to the tail.
fn sanitize(history: &[AgentId], active: &AgentId, registry: &AgentRegistry) -> Vec<AgentId> {
    let mut out: Vec<AgentId> = Vec::with_capacity(history.len() + 1);
    for id in history.iter().rev() {
        if id != active && registry.contains(id) && !out.contains(id) {
            out.push(id.clone());
        }
    }
    out.reverse();
    out.push(active.clone());
    out
}
