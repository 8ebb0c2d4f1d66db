//! History-aware agent cycling.
//!
//! The order is the visit history (oldest first) followed by every configured
//! agent not yet visited, sorted by id. Stepping wraps around both ends.

use tandem_core::ids::AgentId;

use crate::registry::AgentRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

pub fn cycle_order(history: &[AgentId], registry: &AgentRegistry) -> Vec<AgentId> {
    let mut order: Vec<AgentId> = history.iter().filter(|id| registry.contains(id)).cloned().collect();
    order.extend(registry.ids().filter(|id| !history.contains(id)).cloned());
    order
}

/// The agent one step away from `current`. Starts from the front when
/// `current` is not in `order`. `None` only for an empty order.
pub fn step<'a>(order: &'a [AgentId], current: &AgentId, direction: Direction) -> Option<&'a AgentId> {
    if order.is_empty() {
        return None;
    }
    let len = order.len();
    let idx = order.iter().position(|id| id == current).unwrap_or(0);
    let next = match direction {
        Direction::Next => (idx + 1) % len,
        Direction::Previous => (idx + len - 1) % len,
    };
    order.get(next)
}
