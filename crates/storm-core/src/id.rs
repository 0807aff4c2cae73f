//! Cluster-wide match identifier.
//!
//! A match is addressed by the tuple (node, container, local match id) and
//! serialized on the wire as `{nodeId}-{containerId}-{localMatchId}`. Node
//! ids are opaque and may themselves contain hyphens, so parsing splits on
//! the last two hyphens. Container and local ids are minted by the control
//! plane (`c{n}`, `m{seq}`) and never contain one.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::types::NodeId;

/// A malformed match id string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cluster match id: {0:?}")]
pub struct ParseMatchIdError(pub String);

/// Globally unique match identifier: (node, container, local match id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterMatchId {
    pub node_id: NodeId,
    pub container_id: String,
    pub local_match_id: String,
}

impl ClusterMatchId {
    pub fn new(
        node_id: impl Into<NodeId>,
        container_id: impl Into<String>,
        local_match_id: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            container_id: container_id.into(),
            local_match_id: local_match_id.into(),
        }
    }
}

impl fmt::Display for ClusterMatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.node_id, self.container_id, self.local_match_id
        )
    }
}

impl FromStr for ClusterMatchId {
    type Err = ParseMatchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // rsplitn yields the components right-to-left: local, container, node.
        let mut parts = s.rsplitn(3, '-');
        let local = parts.next().unwrap_or_default();
        let container = parts.next().unwrap_or_default();
        let node = parts.next().unwrap_or_default();
        if node.is_empty() || container.is_empty() || local.is_empty() {
            return Err(ParseMatchIdError(s.to_string()));
        }
        Ok(Self::new(node, container, local))
    }
}

impl Serialize for ClusterMatchId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClusterMatchId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_with_hyphens() {
        let id = ClusterMatchId::new("node-1", "c0", "m42");
        assert_eq!(id.to_string(), "node-1-c0-m42");
    }

    #[test]
    fn parse_splits_on_last_two_hyphens() {
        let id: ClusterMatchId = "node-1-c0-m42".parse().unwrap();
        assert_eq!(id.node_id, "node-1");
        assert_eq!(id.container_id, "c0");
        assert_eq!(id.local_match_id, "m42");
    }

    #[test]
    fn parse_accepts_hyphen_free_node() {
        let id: ClusterMatchId = "alpha-c3-m7".parse().unwrap();
        assert_eq!(id.node_id, "alpha");
    }

    #[test]
    fn round_trip_is_identity() {
        let id = ClusterMatchId::new("eu-west-node-2", "c1", "m9");
        let parsed: ClusterMatchId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_too_few_components() {
        assert!("node-1".parse::<ClusterMatchId>().is_err());
        assert!("only".parse::<ClusterMatchId>().is_err());
        assert!("".parse::<ClusterMatchId>().is_err());
    }

    #[test]
    fn parse_rejects_empty_components() {
        assert!("node--m1".parse::<ClusterMatchId>().is_err());
        assert!("-c0-m1".parse::<ClusterMatchId>().is_err());
        assert!("node-c0-".parse::<ClusterMatchId>().is_err());
    }

    #[test]
    fn serde_uses_wire_string() {
        let id = ClusterMatchId::new("node-1", "c0", "m1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"node-1-c0-m1\"");
        let back: ClusterMatchId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
