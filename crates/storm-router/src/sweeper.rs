//! Background sweepers.
//!
//! Node removal propagates as a message on a bounded channel drained by a
//! single orphan sweeper worker — no callbacks across component
//! boundaries. The reaper deletes nodes whose lease lapsed past the grace
//! window and enqueues a removal for each; the sweeper flips the node's
//! active matches to ERROR and, on a slower cadence, deletes terminal rows
//! owned by nonexistent nodes once their retention lapses.

use std::collections::HashSet;
use std::time::Duration;

use storm_core::{NodeId, epoch_secs};
use storm_registry::{MatchRegistry, NodeRegistry};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// A node left the cluster (reaped or administratively deleted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRemoval {
    pub node_id: NodeId,
}

/// Periodically removes nodes whose lease lapsed past the grace window.
pub struct NodeReaper {
    nodes: NodeRegistry,
    removals: mpsc::Sender<NodeRemoval>,
    interval: Duration,
}

impl NodeReaper {
    pub fn new(
        nodes: NodeRegistry,
        removals: mpsc::Sender<NodeRemoval>,
        interval: Duration,
    ) -> Self {
        Self {
            nodes,
            removals,
            interval,
        }
    }

    /// One reap pass: delete lapsed nodes and enqueue their removals.
    pub async fn tick(&self) {
        let reaped = match self.nodes.reap_expired() {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "node reap pass failed");
                return;
            }
        };
        for node_id in reaped {
            if let Err(e) = self.removals.send(NodeRemoval { node_id }).await {
                // Receiver gone; the process is shutting down.
                warn!(error = %e, "removal channel closed");
                return;
            }
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "node reaper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => self.tick().await,
                _ = shutdown.changed() => {
                    info!("node reaper shutting down");
                    break;
                }
            }
        }
    }
}

/// Drains node removals and keeps the match table free of orphans.
pub struct OrphanSweeper {
    matches: MatchRegistry,
    nodes: NodeRegistry,
    retention_seconds: u64,
    removals: mpsc::Receiver<NodeRemoval>,
}

impl OrphanSweeper {
    pub fn new(
        matches: MatchRegistry,
        nodes: NodeRegistry,
        retention_seconds: u64,
        removals: mpsc::Receiver<NodeRemoval>,
    ) -> Self {
        Self {
            matches,
            nodes,
            retention_seconds,
            removals,
        }
    }

    /// Flip a removed node's active matches to ERROR. Terminal rows stay
    /// for observability until the retention pass reaps them.
    pub fn sweep_node(&self, node_id: &str) {
        let rows = match self.matches.find_by_node(node_id) {
            Ok(rows) => rows,
            Err(e) => {
                error!(%node_id, error = %e, "orphan sweep scan failed");
                return;
            }
        };
        let mut flipped = 0;
        for row in rows.iter().filter(|m| m.status.is_active()) {
            match self.matches.to_error(&row.id) {
                Ok(Some(_)) => flipped += 1,
                Ok(None) => {}
                Err(e) => error!(match_id = %row.id, error = %e, "orphan ERROR write failed"),
            }
        }
        info!(%node_id, flipped, total = rows.len(), "node swept");
    }

    /// Delete rows owned by nonexistent nodes once past retention; flip any
    /// stray active orphans (e.g. from a missed removal message) to ERROR.
    pub fn retention_pass(&self) {
        let known: HashSet<NodeId> = match self.nodes.list() {
            Ok(views) => views.into_iter().map(|v| v.node.id).collect(),
            Err(e) => {
                error!(error = %e, "retention pass node scan failed");
                return;
            }
        };
        let rows = match self.matches.find_all() {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "retention pass match scan failed");
                return;
            }
        };
        let now = epoch_secs();
        for row in rows {
            if known.contains(&row.id.node_id) {
                continue;
            }
            if row.status.is_active() {
                if let Err(e) = self.matches.to_error(&row.id) {
                    error!(match_id = %row.id, error = %e, "stray orphan ERROR write failed");
                }
            } else if now.saturating_sub(row.updated_at) > self.retention_seconds {
                match self.matches.delete_by_id(&row.id) {
                    Ok(_) => debug!(match_id = %row.id, "retired orphan row deleted"),
                    Err(e) => error!(match_id = %row.id, error = %e, "orphan row delete failed"),
                }
            }
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let tick = Duration::from_secs(self.retention_seconds.clamp(10, 60));
        info!(
            retention_secs = self.retention_seconds,
            "orphan sweeper started"
        );
        loop {
            tokio::select! {
                removal = self.removals.recv() => match removal {
                    Some(removal) => self.sweep_node(&removal.node_id),
                    None => {
                        info!("removal channel closed, orphan sweeper stopping");
                        break;
                    }
                },
                _ = tokio::time::sleep(tick) => self.retention_pass(),
                _ = shutdown.changed() => {
                    info!("orphan sweeper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storm_core::{ClusterMatchId, Match, MatchStatus, Node};
    use storm_state::{KvStore, Update};

    struct Fixture {
        store: KvStore,
        nodes: NodeRegistry,
        matches: MatchRegistry,
    }

    fn fixture() -> Fixture {
        let store = KvStore::open_in_memory().unwrap();
        Fixture {
            nodes: NodeRegistry::new(store.clone(), 30, 3),
            matches: MatchRegistry::new(store.clone()),
            store,
        }
    }

    fn sweeper(fx: &Fixture, retention: u64) -> (OrphanSweeper, mpsc::Sender<NodeRemoval>) {
        let (tx, rx) = mpsc::channel(16);
        (
            OrphanSweeper::new(fx.matches.clone(), fx.nodes.clone(), retention, rx),
            tx,
        )
    }

    fn place(fx: &Fixture, node: &str, seq: u64, status: MatchStatus) -> ClusterMatchId {
        let id = ClusterMatchId::new(node, "c0", format!("m{seq}"));
        fx.matches
            .insert(&Match {
                id: id.clone(),
                status,
                modules: vec![],
                created_at: 1000,
                updated_at: 1000,
                player_count: 0,
                player_limit: 16,
                endpoints: None,
            })
            .unwrap();
        id
    }

    #[test]
    fn sweep_flips_active_rows_and_preserves_terminal() {
        let fx = fixture();
        let running = place(&fx, "node-1", 1, MatchStatus::Running);
        let creating = place(&fx, "node-1", 2, MatchStatus::Creating);
        let finished = place(&fx, "node-1", 3, MatchStatus::Finished);
        let (sweeper, _tx) = sweeper(&fx, 300);

        sweeper.sweep_node("node-1");

        assert_eq!(
            fx.matches.find_by_id(&running).unwrap().unwrap().status,
            MatchStatus::Error
        );
        assert_eq!(
            fx.matches.find_by_id(&creating).unwrap().unwrap().status,
            MatchStatus::Error
        );
        // Terminal rows stay observable.
        assert_eq!(
            fx.matches.find_by_id(&finished).unwrap().unwrap().status,
            MatchStatus::Finished
        );
    }

    #[test]
    fn retention_pass_deletes_expired_orphans_only() {
        let fx = fixture();
        // node-1 exists; node-gone does not.
        fx.nodes.register("node-1", "http://n1:8080", 10).unwrap();
        let kept = place(&fx, "node-1", 1, MatchStatus::Finished);
        let orphan_fresh = place(&fx, "node-gone", 1, MatchStatus::Finished);
        let orphan_old = place(&fx, "node-gone", 2, MatchStatus::Error);
        // Backdate the old orphan beyond retention.
        fx.store
            .update::<Match, _>(&format!("match:{orphan_old}"), |e| {
                let mut m = e.unwrap().value;
                m.updated_at = 1;
                Update::Write(m)
            })
            .unwrap();

        let (sweeper, _tx) = sweeper(&fx, 300);
        sweeper.retention_pass();

        assert!(fx.matches.find_by_id(&kept).unwrap().is_some());
        assert!(fx.matches.find_by_id(&orphan_fresh).unwrap().is_some());
        assert!(fx.matches.find_by_id(&orphan_old).unwrap().is_none());
    }

    #[test]
    fn retention_pass_flips_stray_active_orphans() {
        let fx = fixture();
        let stray = place(&fx, "node-gone", 1, MatchStatus::Running);

        let (sweeper, _tx) = sweeper(&fx, 300);
        sweeper.retention_pass();

        assert_eq!(
            fx.matches.find_by_id(&stray).unwrap().unwrap().status,
            MatchStatus::Error
        );
    }

    #[tokio::test]
    async fn reaper_enqueues_removals_for_lapsed_nodes() {
        let fx = fixture();
        // Grace factor 0 with TTL 0: backdated heartbeat lapses instantly.
        let nodes = NodeRegistry::new(fx.store.clone(), 0, 0);
        nodes.register("node-1", "http://n1:8080", 10).unwrap();
        fx.store
            .update::<Node, _>("node:node-1", |e| {
                let mut node = e.unwrap().value;
                node.last_heartbeat = 1;
                Update::Write(node)
            })
            .unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let reaper = NodeReaper::new(nodes.clone(), tx, Duration::from_secs(5));
        reaper.tick().await;

        let removal = rx.recv().await.unwrap();
        assert_eq!(removal.node_id, "node-1");
        assert!(nodes.get("node-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn run_drains_removal_messages() {
        let fx = fixture();
        let active = place(&fx, "node-1", 1, MatchStatus::Running);
        let (sweeper, tx) = sweeper(&fx, 300);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(sweeper.run(shutdown_rx));
        tx.send(NodeRemoval {
            node_id: "node-1".to_string(),
        })
        .await
        .unwrap();

        // Give the worker a moment to drain, then stop it.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(
            fx.matches.find_by_id(&active).unwrap().unwrap().status,
            MatchStatus::Error
        );
    }
}
