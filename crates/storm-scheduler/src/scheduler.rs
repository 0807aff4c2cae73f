//! Node selection and cluster saturation.
//!
//! Candidates are HEALTHY nodes with room for the requested slots.
//! A preferred node that is itself a candidate wins outright; otherwise the
//! lowest-saturation candidate is picked, ties resolved by node-id order so
//! placements are reproducible.

use storm_core::NodeView;
use storm_registry::{MatchRegistry, NodeRegistry};
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};

/// Placement constraints for a new match.
#[derive(Debug, Clone, Default)]
pub struct PlacementRequest {
    /// Module names the match will run.
    pub modules: Vec<String>,
    /// Affinity hint; ignored when the node is not a candidate.
    pub preferred_node: Option<String>,
    /// Slots to reserve on the target; 0 is treated as 1.
    pub reserved_slots: u32,
}

impl PlacementRequest {
    fn slots(&self) -> u32 {
        self.reserved_slots.max(1)
    }
}

/// Selects target nodes for new matches and reports cluster saturation.
#[derive(Clone)]
pub struct Scheduler {
    nodes: NodeRegistry,
    matches: MatchRegistry,
}

impl Scheduler {
    pub fn new(nodes: NodeRegistry, matches: MatchRegistry) -> Self {
        Self { nodes, matches }
    }

    /// Select a node for the request, or fail with `NoHealthyNodes` /
    /// `NoCapacity`.
    pub fn select_node(&self, request: &PlacementRequest) -> SchedulerResult<NodeView> {
        let healthy: Vec<NodeView> = self
            .nodes
            .list()?
            .into_iter()
            .filter(NodeView::is_healthy)
            .collect();
        if healthy.is_empty() {
            return Err(SchedulerError::NoHealthyNodes);
        }

        let active = self.matches.active_by_node()?;
        let slots = request.slots();
        // list() is id-sorted, so equal saturation resolves to the
        // lexicographically smallest node.
        let mut candidates: Vec<(NodeView, u32)> = healthy
            .into_iter()
            .map(|view| {
                let used = active.get(&view.node.id).copied().unwrap_or(0);
                (view, used)
            })
            .filter(|(view, used)| used + slots <= view.node.capacity)
            .collect();
        if candidates.is_empty() {
            return Err(SchedulerError::NoCapacity);
        }

        if let Some(preferred) = &request.preferred_node
            && let Some(pos) = candidates.iter().position(|(v, _)| v.node.id == *preferred)
        {
            let (view, used) = candidates.swap_remove(pos);
            debug!(node_id = %view.node.id, used, "preferred node selected");
            return Ok(view);
        }

        let (selected, used) = candidates
            .into_iter()
            .min_by(|(a, a_used), (b, b_used)| {
                let a_sat = saturation_of(*a_used, a.node.capacity);
                let b_sat = saturation_of(*b_used, b.node.capacity);
                a_sat
                    .partial_cmp(&b_sat)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.node.id.cmp(&b.node.id))
            })
            .ok_or(SchedulerError::NoCapacity)?;
        debug!(node_id = %selected.node.id, used, "least-loaded node selected");
        Ok(selected)
    }

    /// Active matches over total capacity, across HEALTHY nodes.
    /// Defined as 1.0 when no HEALTHY node exists.
    pub fn cluster_saturation(&self) -> SchedulerResult<f64> {
        let nodes = self.nodes.list()?;
        let active = self.matches.active_by_node()?;
        let mut used: u64 = 0;
        let mut capacity: u64 = 0;
        for view in nodes.iter().filter(|v| v.is_healthy()) {
            used += u64::from(active.get(&view.node.id).copied().unwrap_or(0));
            capacity += u64::from(view.node.capacity);
        }
        if capacity == 0 {
            return Ok(1.0);
        }
        Ok((used as f64 / capacity as f64).min(1.0))
    }

    /// Number of HEALTHY nodes right now.
    pub fn healthy_node_count(&self) -> SchedulerResult<u32> {
        Ok(self
            .nodes
            .list()?
            .iter()
            .filter(|v| v.is_healthy())
            .count() as u32)
    }

}

fn saturation_of(used: u32, capacity: u32) -> f64 {
    if capacity == 0 {
        1.0
    } else {
        f64::from(used) / f64::from(capacity)
    }
}
