//! Match registry — relational CRUD over match rows plus the hot-query
//! indices: by-node (drain and failure handling), by-status (metrics), and
//! active counts (scheduler saturation).
//!
//! Rows live under `match:{clusterMatchId}`; a `match-by-node:{nodeId}` set
//! backs the by-node query, while by-status and the active counts go
//! through prefix scans. Status transitions are compare-and-set inside a
//! single write transaction so a creator and a parallel sweeper cannot
//! lose updates to each other.

use std::collections::HashMap;

use storm_core::{ClusterMatchId, Match, MatchEndpoints, MatchStatus, NodeId, epoch_secs};
use storm_state::{KvStore, Update};
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::retry::with_retries;

fn match_key(id: &ClusterMatchId) -> String {
    format!("match:{id}")
}

fn index_key(node_id: &str) -> String {
    format!("match-by-node:{node_id}")
}

fn seq_key(node_id: &str) -> String {
    format!("node-seq:{node_id}")
}

/// Registry of match rows.
#[derive(Clone)]
pub struct MatchRegistry {
    store: KvStore,
}

enum CasOutcome {
    Missing,
    WrongState(MatchStatus),
    Done(Match),
}

impl MatchRegistry {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Insert a fresh row; fails if the id is already taken.
    pub fn insert(&self, m: &Match) -> RegistryResult<()> {
        let key = match_key(&m.id);
        let inserted = with_retries("match insert", || self.store.put_if_absent(&key, m, None))?;
        if !inserted {
            return Err(RegistryError::MatchExists(m.id.to_string()));
        }
        self.index_add(m.node_id(), &m.id)?;
        debug!(match_id = %m.id, "match row inserted");
        Ok(())
    }

    pub fn find_by_id(&self, id: &ClusterMatchId) -> RegistryResult<Option<Match>> {
        let entry = with_retries("match get", || self.store.get::<Match>(&match_key(id)))?;
        Ok(entry.map(|e| e.value))
    }

    /// All rows, sorted by id for deterministic listings.
    pub fn find_all(&self) -> RegistryResult<Vec<Match>> {
        let entries = with_retries("match scan", || self.store.list_by_prefix::<Match>("match:"))?;
        let mut rows: Vec<Match> = entries.into_iter().map(|(_, e)| e.value).collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    pub fn find_by_status(&self, status: MatchStatus) -> RegistryResult<Vec<Match>> {
        Ok(self
            .find_all()?
            .into_iter()
            .filter(|m| m.status == status)
            .collect())
    }

    /// Rows owned by a node, resolved through the by-node index.
    pub fn find_by_node(&self, node_id: &str) -> RegistryResult<Vec<Match>> {
        let ids = self.indexed_ids(node_id)?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Ok(parsed) = id.parse::<ClusterMatchId>()
                && let Some(m) = self.find_by_id(&parsed)?
            {
                rows.push(m);
            }
        }
        Ok(rows)
    }

    /// CREATING + RUNNING across the cluster.
    pub fn count_active(&self) -> RegistryResult<u32> {
        Ok(self
            .find_all()?
            .iter()
            .filter(|m| m.status.is_active())
            .count() as u32)
    }

    pub fn count_active_by_node(&self, node_id: &str) -> RegistryResult<u32> {
        Ok(self
            .find_by_node(node_id)?
            .iter()
            .filter(|m| m.status.is_active())
            .count() as u32)
    }

    /// Active-match counts grouped by owning node, in one scan.
    pub fn active_by_node(&self) -> RegistryResult<HashMap<NodeId, u32>> {
        let mut counts = HashMap::new();
        for m in self.find_all()? {
            if m.status.is_active() {
                *counts.entry(m.id.node_id.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// CREATING → RUNNING, recording the advertise endpoints.
    pub fn mark_running(
        &self,
        id: &ClusterMatchId,
        endpoints: MatchEndpoints,
    ) -> RegistryResult<Match> {
        self.transition(id, MatchStatus::Creating, MatchStatus::Running, move |m| {
            m.endpoints = Some(endpoints.clone());
        })
    }

    /// RUNNING → FINISHED.
    pub fn finish(&self, id: &ClusterMatchId) -> RegistryResult<Match> {
        self.transition(id, MatchStatus::Running, MatchStatus::Finished, |_| {})
    }

    /// Transition any active row to ERROR. Terminal rows are left untouched
    /// (idempotent); returns the row if a write happened.
    pub fn to_error(&self, id: &ClusterMatchId) -> RegistryResult<Option<Match>> {
        let key = match_key(id);
        let now = epoch_secs();
        let written = with_retries("match to-error", || {
            self.store.update::<Match, _>(&key, |existing| match existing {
                Some(e) if e.value.status.is_active() => {
                    let mut m = e.value;
                    m.status = MatchStatus::Error;
                    m.updated_at = now;
                    Update::Write(m)
                }
                _ => Update::Keep,
            })
        })?;
        if written.is_some() {
            info!(match_id = %id, "match marked ERROR");
        }
        Ok(written)
    }

    /// Compare-and-set status transition with a row mutation applied under
    /// the same write transaction.
    pub fn transition(
        &self,
        id: &ClusterMatchId,
        from: MatchStatus,
        to: MatchStatus,
        mutate: impl Fn(&mut Match),
    ) -> RegistryResult<Match> {
        let key = match_key(id);
        let now = epoch_secs();
        let mut outcome = CasOutcome::Missing;
        with_retries("match transition", || {
            outcome = CasOutcome::Missing;
            let mutate = &mutate;
            self.store.update::<Match, _>(&key, |existing| match existing {
                None => Update::Keep,
                Some(e) if e.value.status == from && from.can_transition_to(to) => {
                    let mut m = e.value;
                    m.status = to;
                    m.updated_at = now;
                    mutate(&mut m);
                    outcome = CasOutcome::Done(m.clone());
                    Update::Write(m)
                }
                Some(e) => {
                    outcome = CasOutcome::WrongState(e.value.status);
                    Update::Keep
                }
            })
        })?;
        match outcome {
            CasOutcome::Done(m) => {
                info!(match_id = %id, %from, %to, "match transitioned");
                Ok(m)
            }
            CasOutcome::Missing => Err(RegistryError::MatchNotFound(id.to_string())),
            CasOutcome::WrongState(current) => Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from: current,
                to,
            }),
        }
    }

    /// Atomic player-count update; rejected on terminal rows.
    pub fn update_player_count(&self, id: &ClusterMatchId, count: u32) -> RegistryResult<Match> {
        let key = match_key(id);
        let now = epoch_secs();
        let mut terminal = false;
        let written = with_retries("match player count", || {
            terminal = false;
            self.store.update::<Match, _>(&key, |existing| match existing {
                Some(e) if e.value.status.is_active() => {
                    let mut m = e.value;
                    m.player_count = count;
                    m.updated_at = now;
                    Update::Write(m)
                }
                Some(_) => {
                    terminal = true;
                    Update::Keep
                }
                None => Update::Keep,
            })
        })?;
        match written {
            Some(m) => Ok(m),
            None if terminal => Err(RegistryError::TerminalState(id.to_string())),
            None => Err(RegistryError::MatchNotFound(id.to_string())),
        }
    }

    /// Delete one row (idempotent). Returns true if it existed.
    pub fn delete_by_id(&self, id: &ClusterMatchId) -> RegistryResult<bool> {
        let existed = with_retries("match delete", || self.store.delete(&match_key(id)))?;
        if existed {
            self.index_remove(&id.node_id, id)?;
            info!(match_id = %id, "match deleted");
        }
        Ok(existed)
    }

    /// Delete every row owned by a node, atomically over the indexed set.
    pub fn delete_by_node(&self, node_id: &str) -> RegistryResult<u32> {
        let ids = self.indexed_ids(node_id)?;
        let mut keys: Vec<String> = ids
            .iter()
            .filter_map(|id| id.parse::<ClusterMatchId>().ok())
            .map(|id| match_key(&id))
            .collect();
        keys.push(index_key(node_id));
        let removed = with_retries("match delete by node", || self.store.delete_many(&keys))?;
        // The index key itself is part of the batch.
        let rows = removed.saturating_sub(1).min(ids.len() as u32);
        if rows > 0 {
            info!(%node_id, rows, "matches deleted for node");
        }
        Ok(rows)
    }

    /// Next value of the per-node match sequence.
    pub fn next_sequence(&self, node_id: &str) -> RegistryResult<u64> {
        let key = seq_key(node_id);
        let written = with_retries("match sequence", || {
            self.store.update::<u64, _>(&key, |existing| {
                Update::Write(existing.map(|e| e.value).unwrap_or(0) + 1)
            })
        })?;
        written.ok_or_else(|| RegistryError::StoreUnavailable("sequence produced no write".into()))
    }

    // ── Index maintenance ──────────────────────────────────────────

    fn indexed_ids(&self, node_id: &str) -> RegistryResult<Vec<String>> {
        let entry = with_retries("index get", || {
            self.store.get::<Vec<String>>(&index_key(node_id))
        })?;
        Ok(entry.map(|e| e.value).unwrap_or_default())
    }

    fn index_add(&self, node_id: &str, id: &ClusterMatchId) -> RegistryResult<()> {
        let key = index_key(node_id);
        let id = id.to_string();
        with_retries("index add", || {
            let id = id.clone();
            self.store
                .update::<Vec<String>, _>(&key, move |existing| {
                    let mut ids = existing.map(|e| e.value).unwrap_or_default();
                    if ids.contains(&id) {
                        Update::Keep
                    } else {
                        ids.push(id);
                        Update::Write(ids)
                    }
                })
        })?;
        Ok(())
    }

    fn index_remove(&self, node_id: &str, id: &ClusterMatchId) -> RegistryResult<()> {
        let key = index_key(node_id);
        let id = id.to_string();
        with_retries("index remove", || {
            let id = id.clone();
            self.store
                .update::<Vec<String>, _>(&key, move |existing| match existing {
                    Some(e) if e.value.contains(&id) => {
                        let ids: Vec<String> =
                            e.value.into_iter().filter(|x| *x != id).collect();
                        Update::Write(ids)
                    }
                    _ => Update::Keep,
                })
        })?;
        Ok(())
    }
}
