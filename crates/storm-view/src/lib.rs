//! storm-view — read-only aggregation over the registries.
//!
//! The cluster view owns nothing: every value it returns is computed from
//! the node and match registries and the autoscaler's persisted state.
//! Listings paginate with offset + page size and carry explicit
//! has-next/has-previous indicators for the dashboard.

use std::collections::BTreeMap;

use serde::Serialize;
use storm_autoscale::Autoscaler;
use storm_core::{Match, NodeStatus, NodeView, ScaleRecommendation};
use storm_registry::{MatchRegistry, NodeRegistry, RegistryResult};
use storm_state::KvStore;

/// Aggregate cluster counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub total_nodes: u32,
    pub healthy_nodes: u32,
    pub draining_nodes: u32,
    pub total_matches: u32,
    pub running_matches: u32,
    pub total_capacity: u32,
    pub available_capacity: u32,
}

/// Dashboard overview: counters plus autoscaler state and per-status
/// match counts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub status: ClusterStatus,
    pub matches_by_status: BTreeMap<String, u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_recommendation: Option<ScaleRecommendation>,
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub offset: usize,
    pub page_size: usize,
    pub total: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

fn paginate<T>(items: Vec<T>, offset: usize, page_size: usize) -> Page<T> {
    let total = items.len();
    let page_size = page_size.max(1);
    let items: Vec<T> = items.into_iter().skip(offset).take(page_size).collect();
    Page {
        has_next: offset + items.len() < total,
        has_previous: offset > 0 && total > 0,
        items,
        offset,
        page_size,
        total,
    }
}

/// Read-only aggregator over the registries.
#[derive(Clone)]
pub struct ClusterView {
    nodes: NodeRegistry,
    matches: MatchRegistry,
    store: KvStore,
}

impl ClusterView {
    pub fn new(nodes: NodeRegistry, matches: MatchRegistry, store: KvStore) -> Self {
        Self {
            nodes,
            matches,
            store,
        }
    }

    pub fn cluster_status(&self) -> RegistryResult<ClusterStatus> {
        let nodes = self.nodes.list()?;
        let rows = self.matches.find_all()?;
        let active = self.matches.active_by_node()?;

        let healthy: Vec<&NodeView> =
            nodes.iter().filter(|v| v.status == NodeStatus::Healthy).collect();
        let total_capacity: u32 = healthy.iter().map(|v| v.node.capacity).sum();
        let used_on_healthy: u32 = healthy
            .iter()
            .map(|v| active.get(&v.node.id).copied().unwrap_or(0))
            .sum();

        Ok(ClusterStatus {
            total_nodes: nodes.len() as u32,
            healthy_nodes: healthy.len() as u32,
            draining_nodes: nodes
                .iter()
                .filter(|v| v.status == NodeStatus::Draining)
                .count() as u32,
            total_matches: rows.len() as u32,
            running_matches: rows
                .iter()
                .filter(|m| m.status == storm_core::MatchStatus::Running)
                .count() as u32,
            total_capacity,
            available_capacity: total_capacity.saturating_sub(used_on_healthy),
        })
    }

    pub fn overview(&self) -> RegistryResult<Overview> {
        let status = self.cluster_status()?;
        let mut matches_by_status = BTreeMap::new();
        for row in self.matches.find_all()? {
            *matches_by_status.entry(row.status.to_string()).or_insert(0) += 1;
        }
        Ok(Overview {
            status,
            matches_by_status,
            last_recommendation: Autoscaler::last_recommendation(&self.store),
        })
    }

    pub fn nodes_page(&self, offset: usize, page_size: usize) -> RegistryResult<Page<NodeView>> {
        Ok(paginate(self.nodes.list()?, offset, page_size))
    }

    pub fn matches_page(&self, offset: usize, page_size: usize) -> RegistryResult<Page<Match>> {
        Ok(paginate(self.matches.find_all()?, offset, page_size))
    }
}
