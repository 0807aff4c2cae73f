//! Node registry — fleet membership, heartbeats, and derived status.
//!
//! Node rows are stored under `node:{id}` with a TTL equal to the heartbeat
//! TTL. Status is never persisted; it is derived per read:
//! TTL alive and not draining → HEALTHY, TTL alive and draining → DRAINING,
//! TTL expired → UNHEALTHY. Heartbeats are last-writer-wins on metrics and
//! monotone on the TTL (refresh only). Drain flips preserve the remaining
//! TTL so an administrative flag never extends a node's lease.

use storm_core::{Node, NodeId, NodeMetrics, NodeStatus, NodeView, epoch_secs};
use storm_state::{Entry, KvStore, Update};
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::retry::with_retries;

fn node_key(id: &str) -> String {
    format!("node:{id}")
}

/// Registry of execution nodes.
#[derive(Clone)]
pub struct NodeRegistry {
    store: KvStore,
    ttl_seconds: u64,
    grace_factor: u32,
}

enum FlipOutcome {
    Missing,
    Expired,
    Updated(Node),
}

impl NodeRegistry {
    pub fn new(store: KvStore, ttl_seconds: u64, grace_factor: u32) -> Self {
        Self {
            store,
            ttl_seconds,
            grace_factor,
        }
    }

    /// Register a node, or refresh a registration with an identical address.
    ///
    /// Registration with a different address while the existing entry is
    /// still live fails with `AlreadyExists` — the lease must lapse (or the
    /// node be deleted) before the id can move.
    pub fn register(&self, id: &str, address: &str, capacity: u32) -> RegistryResult<NodeView> {
        let key = node_key(id);
        let ttl = self.ttl_seconds;
        let mut conflict = false;
        let written = with_retries("node register", || {
            conflict = false;
            let now = epoch_secs();
            self.store.update::<Node, _>(&key, |existing| {
                let fresh = Node {
                    id: id.to_string(),
                    address: address.to_string(),
                    capacity,
                    metrics: NodeMetrics::default(),
                    draining: false,
                    registered_at: now,
                    last_heartbeat: now,
                };
                match existing {
                    Some(e) if !e.is_expired(now) && e.value.address != address => {
                        conflict = true;
                        Update::Keep
                    }
                    Some(e) if !e.is_expired(now) => {
                        // Benign re-register: same address, fresh lease.
                        let node = Node {
                            registered_at: e.value.registered_at,
                            ..fresh
                        };
                        Update::WriteWithTtl(node, ttl)
                    }
                    _ => Update::WriteWithTtl(fresh, ttl),
                }
            })
        })?;
        if conflict {
            return Err(RegistryError::AlreadyExists(id.to_string()));
        }
        let node = written.ok_or_else(|| {
            RegistryError::StoreUnavailable("register produced no write".to_string())
        })?;
        info!(node_id = %id, %address, capacity, "node registered");
        Ok(healthy_view(node))
    }

    /// Record a heartbeat: last-writer-wins metrics, refreshed TTL.
    pub fn heartbeat(&self, id: &str, metrics: NodeMetrics) -> RegistryResult<NodeView> {
        let key = node_key(id);
        let ttl = self.ttl_seconds;
        let mut missing = false;
        let written = with_retries("node heartbeat", || {
            missing = false;
            let now = epoch_secs();
            let metrics = metrics.clone();
            self.store.update::<Node, _>(&key, |existing| match existing {
                None => {
                    missing = true;
                    Update::Keep
                }
                Some(e) => {
                    let mut node = e.value;
                    node.metrics = metrics;
                    node.last_heartbeat = now;
                    Update::WriteWithTtl(node, ttl)
                }
            })
        })?;
        match written {
            Some(node) => {
                debug!(node_id = %id, "heartbeat");
                Ok(healthy_view(node))
            }
            None if missing => Err(RegistryError::NotRegistered(id.to_string())),
            None => Err(RegistryError::StoreUnavailable(
                "heartbeat produced no write".to_string(),
            )),
        }
    }

    /// Get a node with its derived status.
    pub fn get(&self, id: &str) -> RegistryResult<Option<NodeView>> {
        let entry = with_retries("node get", || self.store.get::<Node>(&node_key(id)))?;
        Ok(entry.map(|e| derive_view(&e)))
    }

    /// List all nodes with derived status, sorted by id.
    pub fn list(&self) -> RegistryResult<Vec<NodeView>> {
        let entries = with_retries("node list", || self.store.list_by_prefix::<Node>("node:"))?;
        let mut views: Vec<NodeView> = entries.iter().map(|(_, e)| derive_view(e)).collect();
        views.sort_by(|a, b| a.node.id.cmp(&b.node.id));
        Ok(views)
    }

    /// Exclude a node from scheduling while it keeps serving existing
    /// matches. Drain on an UNHEALTHY node is a no-op.
    pub fn drain(&self, id: &str) -> RegistryResult<NodeView> {
        self.flip_drain(id, true)
    }

    /// Return a drained node to the scheduling pool.
    pub fn undrain(&self, id: &str) -> RegistryResult<NodeView> {
        self.flip_drain(id, false)
    }

    fn flip_drain(&self, id: &str, draining: bool) -> RegistryResult<NodeView> {
        let key = node_key(id);
        let mut outcome = FlipOutcome::Missing;
        with_retries("node drain flip", || {
            outcome = FlipOutcome::Missing;
            let now = epoch_secs();
            self.store.update::<Node, _>(&key, |existing| match existing {
                None => Update::Keep,
                Some(e) if e.is_expired(now) => {
                    outcome = FlipOutcome::Expired;
                    Update::Keep
                }
                Some(e) => {
                    let mut node = e.value;
                    node.draining = draining;
                    outcome = FlipOutcome::Updated(node.clone());
                    Update::Write(node)
                }
            })
        })?;
        match outcome {
            FlipOutcome::Missing => Err(RegistryError::NodeNotFound(id.to_string())),
            FlipOutcome::Expired => {
                // Terminal transition rejected; report the node as-is.
                self.get(id)?
                    .ok_or_else(|| RegistryError::NodeNotFound(id.to_string()))
            }
            FlipOutcome::Updated(node) => {
                info!(node_id = %id, draining, "node drain flag updated");
                Ok(NodeView {
                    status: if draining {
                        NodeStatus::Draining
                    } else {
                        NodeStatus::Healthy
                    },
                    node,
                })
            }
        }
    }

    /// Remove a node row. Callers must independently clean up the node's
    /// matches (the orphan sweeper does this for TTL-reaped nodes).
    pub fn delete(&self, id: &str) -> RegistryResult<bool> {
        let existed = with_retries("node delete", || self.store.delete(&node_key(id)))?;
        if existed {
            info!(node_id = %id, "node deleted");
        }
        Ok(existed)
    }

    /// Delete nodes whose last heartbeat is older than `grace_factor × ttl`
    /// and return their ids, so the caller can sweep orphaned matches.
    pub fn reap_expired(&self) -> RegistryResult<Vec<NodeId>> {
        let grace = self.ttl_seconds * u64::from(self.grace_factor);
        let now = epoch_secs();
        let entries = with_retries("node reap scan", || {
            self.store.list_by_prefix::<Node>("node:")
        })?;
        let mut reaped = Vec::new();
        for (key, entry) in entries {
            if now.saturating_sub(entry.value.last_heartbeat) > grace {
                with_retries("node reap delete", || self.store.delete(&key))?;
                info!(node_id = %entry.value.id, "node lease lapsed past grace, removed");
                reaped.push(entry.value.id);
            }
        }
        Ok(reaped)
    }

    /// Heartbeat TTL this registry applies to node rows.
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }
}

fn derive_view(entry: &Entry<Node>) -> NodeView {
    let status = if entry.is_expired(epoch_secs()) {
        NodeStatus::Unhealthy
    } else if entry.value.draining {
        NodeStatus::Draining
    } else {
        NodeStatus::Healthy
    };
    NodeView {
        node: entry.value.clone(),
        status,
    }
}

fn healthy_view(node: Node) -> NodeView {
    NodeView {
        status: if node.draining {
            NodeStatus::Draining
        } else {
            NodeStatus::Healthy
        },
        node,
    }
}
