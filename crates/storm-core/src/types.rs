//! Domain types for the StormStack control plane.
//!
//! These types represent the persisted state of nodes, matches, and module
//! artifacts, plus the autoscaler's recommendation value. All persisted
//! types serialize to JSON; field names follow the wire contract
//! (camelCase), statuses the wire contract's SCREAMING_SNAKE spelling.

use serde::{Deserialize, Serialize};

use crate::id::ClusterMatchId;

/// Unique identifier for a node in the cluster. Opaque, may contain hyphens.
pub type NodeId = String;

// ── Node ──────────────────────────────────────────────────────────

/// A registered execution node.
///
/// The status is not persisted: it is derived per read from the entry's
/// remaining TTL and the drain flag (see the node registry).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(rename = "nodeId")]
    pub id: NodeId,
    /// Base URL used to reach the node's engine.
    pub address: String,
    /// Maximum concurrent matches this node accepts.
    pub capacity: u32,
    pub metrics: NodeMetrics,
    /// Administrative drain flag; a draining node keeps serving existing
    /// matches but receives no new placements.
    pub draining: bool,
    pub registered_at: u64,
    pub last_heartbeat: u64,
}

/// Last-writer-wins metrics reported by node heartbeats.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    pub match_count: u32,
    pub container_count: u32,
    /// CPU usage in [0, 1].
    pub cpu_usage: f64,
    /// Memory usage in [0, 1].
    pub memory_usage: f64,
}

/// Derived node status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Healthy,
    Draining,
    Unhealthy,
}

/// A node together with its status as derived at read time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeView {
    #[serde(flatten)]
    pub node: Node,
    pub status: NodeStatus,
}

impl NodeView {
    pub fn is_healthy(&self) -> bool {
        self.status == NodeStatus::Healthy
    }
}

// ── Match ─────────────────────────────────────────────────────────

/// A stateful match workload placed on a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    #[serde(rename = "matchId")]
    pub id: ClusterMatchId,
    pub status: MatchStatus,
    /// Module names this match runs, resolved against the module registry.
    pub modules: Vec<String>,
    pub created_at: u64,
    pub updated_at: u64,
    pub player_count: u32,
    pub player_limit: u32,
    /// Set when the engine acknowledges the match (CREATING → RUNNING).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<MatchEndpoints>,
}

impl Match {
    /// The node that owns this match.
    pub fn node_id(&self) -> &str {
        &self.id.node_id
    }
}

/// Advertise endpoints for a running match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchEndpoints {
    pub http_base: String,
    pub ws_base: String,
}

/// Match lifecycle status. Transitions are monotone:
/// CREATING → RUNNING → FINISHED, with ERROR reachable from any
/// non-terminal state. Terminal states are immutable except for deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Creating,
    Running,
    Finished,
    Error,
}

impl MatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }

    /// CREATING or RUNNING — counts against node capacity.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Creating | Self::Running)
    }

    /// Whether `self → next` is a legal forward transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Creating, Self::Running) => true,
            (Self::Running, Self::Finished) => true,
            (Self::Creating | Self::Running, Self::Error) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creating => "CREATING",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATING" => Ok(Self::Creating),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown match status: {other:?}")),
        }
    }
}

// ── Module ────────────────────────────────────────────────────────

/// Metadata for a versioned module artifact.
///
/// Artifact bytes are stored separately, content-addressed by `hash`
/// (SHA-256, hex). Given (name, version) the hash and bytes never change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMeta {
    pub name: String,
    pub version: String,
    pub description: String,
    pub file_name: String,
    pub file_size: u64,
    pub hash: String,
    pub uploaded_by: String,
    pub uploaded_at: u64,
}

impl ModuleMeta {
    /// Composite registry key component: `{name}:{version}`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }
}

// ── Scaling ───────────────────────────────────────────────────────

/// Autoscaler action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScalingAction {
    None,
    ScaleUp,
    ScaleDown,
}

/// A fleet-size recommendation produced by the autoscaler.
///
/// Applying it is out of scope for the control plane; an external executor
/// consumes these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleRecommendation {
    pub action: ScalingAction,
    pub current_nodes: u32,
    pub target_nodes: u32,
    /// Observed cluster saturation in [0, 1].
    pub saturation: f64,
    pub reason: String,
    pub produced_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            address: format!("http://{id}:8080"),
            capacity: 10,
            metrics: NodeMetrics::default(),
            draining: false,
            registered_at: 1000,
            last_heartbeat: 1000,
        }
    }

    #[test]
    fn node_round_trips_through_json() {
        let node = test_node("node-1");
        let json = serde_json::to_string(&node).unwrap();
        let back: Node = serde_json::from_str(&json).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn node_serializes_wire_field_names() {
        let json = serde_json::to_value(test_node("n1")).unwrap();
        assert!(json.get("nodeId").is_some());
        assert!(json.get("lastHeartbeat").is_some());
    }

    #[test]
    fn match_round_trips_through_json() {
        let m = Match {
            id: ClusterMatchId::new("node-1", "c0", "m1"),
            status: MatchStatus::Running,
            modules: vec!["entity-module".to_string()],
            created_at: 1000,
            updated_at: 1001,
            player_count: 3,
            player_limit: 16,
            endpoints: Some(MatchEndpoints {
                http_base: "http://n1:8080/matches/m1".to_string(),
                ws_base: "ws://n1:8080/matches/m1".to_string(),
            }),
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: Match = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn module_meta_round_trips_through_json() {
        let meta = ModuleMeta {
            name: "entity-module".to_string(),
            version: "1.0.0".to_string(),
            description: "entity logic".to_string(),
            file_name: "entity-module.wasm".to_string(),
            file_size: 42,
            hash: "ab".repeat(32),
            uploaded_by: "ops".to_string(),
            uploaded_at: 1000,
        };
        let back: ModuleMeta =
            serde_json::from_str(&serde_json::to_string(&meta).unwrap()).unwrap();
        assert_eq!(back, meta);
        assert_eq!(meta.key(), "entity-module:1.0.0");
    }

    #[test]
    fn statuses_use_screaming_snake_case() {
        assert_eq!(
            serde_json::to_string(&MatchStatus::Creating).unwrap(),
            "\"CREATING\""
        );
        assert_eq!(
            serde_json::to_string(&NodeStatus::Unhealthy).unwrap(),
            "\"UNHEALTHY\""
        );
        assert_eq!(
            serde_json::to_string(&ScalingAction::ScaleUp).unwrap(),
            "\"SCALE_UP\""
        );
    }

    #[test]
    fn transitions_are_monotone() {
        use MatchStatus::*;
        assert!(Creating.can_transition_to(Running));
        assert!(Creating.can_transition_to(Error));
        assert!(Running.can_transition_to(Finished));
        assert!(Running.can_transition_to(Error));
        // No backward or out-of-terminal transitions.
        assert!(!Running.can_transition_to(Creating));
        assert!(!Finished.can_transition_to(Running));
        assert!(!Finished.can_transition_to(Error));
        assert!(!Error.can_transition_to(Running));
    }

    #[test]
    fn active_and_terminal_partition_statuses() {
        use MatchStatus::*;
        for s in [Creating, Running, Finished, Error] {
            assert_ne!(s.is_active(), s.is_terminal());
        }
    }

    #[test]
    fn match_status_parses_wire_spelling() {
        assert_eq!("RUNNING".parse::<MatchStatus>().unwrap(), MatchStatus::Running);
        assert!("running".parse::<MatchStatus>().is_err());
    }
}
