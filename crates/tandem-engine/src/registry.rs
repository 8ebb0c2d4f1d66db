use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use tandem_core::agent::AgentDescriptor;
use tandem_core::ids::AgentId;

/// Read-only set of enabled agent descriptors, ordered by id.
///
/// Shared through `Arc` by every session manager in the process.
#[derive(Clone, Debug, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentId, Arc<AgentDescriptor>>,
}

impl AgentRegistry {
    /// Disabled descriptors are dropped. A later descriptor with the same id
    /// replaces an earlier one.
    pub fn new(descriptors: impl IntoIterator<Item = AgentDescriptor>) -> Self {
        let mut agents = BTreeMap::new();
        for descriptor in descriptors {
            let descriptor = descriptor.normalized();
            if descriptor.disabled {
                debug!(agent_id = %descriptor.id, "skipping disabled agent");
                continue;
            }
            let _ = agents.insert(descriptor.id.clone(), Arc::new(descriptor));
        }
        Self { agents }
    }

    pub fn get(&self, id: &AgentId) -> Option<&Arc<AgentDescriptor>> {
        self.agents.get(id)
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    /// Sorted lexicographically.
    pub fn ids(&self) -> impl Iterator<Item = &AgentId> {
        self.agents.keys()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<AgentDescriptor>> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// `coder` when configured, otherwise the smallest id.
    pub fn default_agent(&self) -> Option<&AgentId> {
        self.agents
            .get_key_value(&AgentId::from("coder"))
            .map(|(id, _)| id)
            .or_else(|| self.agents.keys().next())
    }
}
