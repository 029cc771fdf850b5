// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Gridmesh Negotiation Engine - Neighbor Cache

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{dot, AgentId, AgentSnapshot, Vec3};
use crate::variant::view_coupling_gradients;

/// Last exchanged snapshot of every neighbor that has joined the current
/// session. Keys double as the session acceptance set.
#[derive(Debug, Clone, Default)]
pub struct NeighborCache {
    entries: BTreeMap<AgentId, AgentSnapshot>,
}

impl NeighborCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: AgentId, snapshot: AgentSnapshot) {
        self.entries.insert(id, snapshot);
    }

    pub fn get(&self, id: &AgentId) -> Option<&AgentSnapshot> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AgentId, &AgentSnapshot)> {
        self.entries.iter()
    }

    /// True once every id in `ids` has an entry.
    pub fn covers(&self, ids: &BTreeSet<AgentId>) -> bool {
        ids.iter().all(|id| self.entries.contains_key(id))
    }

    /// Advance each cached neighbor's (g+, g−) by the first-order effect of
    /// this agent moving by `delta`. Exact, since a neighbor's residuals are
    /// linear in this agent's state.
    pub fn patch_constraints(&mut self, delta: &Vec3, conductances: &BTreeMap<AgentId, f64>) {
        for (id, entry) in self.entries.iter_mut() {
            let Some(&conductance) = conductances.get(id) else {
                continue;
            };
            let (dp, dm) = view_coupling_gradients(&*entry, conductance);
            entry.g_plus += dot(&dp, delta);
            entry.g_minus += dot(&dm, delta);
        }
    }
}
