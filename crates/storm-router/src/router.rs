//! The match router.
//!
//! `create_match` publishes CREATING → RUNNING or CREATING → ERROR exactly
//! once per id, and no RUNNING row is observable before the engine has
//! acknowledged. The engine call and the follow-up bookkeeping run inside a
//! spawned task the handler awaits, so a cancelled request cannot leave a
//! CREATING row without a terminal successor.

use storm_core::{ClusterMatchId, Match, MatchStatus, NodeView, epoch_secs};
use storm_auth::{AuthBroker, MatchToken, MatchTokenRequest, MatchTokenResult};
use storm_distributor::ModuleDistributor;
use storm_engine::EngineClient;
use storm_registry::{MatchRegistry, ModuleRegistry, NodeRegistry, RegistryError};
use storm_scheduler::{PlacementRequest, Scheduler};
use tracing::{error, info, warn};

use crate::error::{RouterError, RouterResult};

const DEFAULT_PLAYER_LIMIT: u32 = 16;
const MATCH_TOKEN_SCOPES: &[&str] = &["match:join"];

/// The player a match token should be brokered for.
#[derive(Debug, Clone)]
pub struct PlayerRef {
    pub id: String,
    pub name: String,
}

/// Inputs to `create_match`.
#[derive(Debug, Clone, Default)]
pub struct CreateMatchRequest {
    pub modules: Vec<String>,
    pub preferred_node: Option<String>,
    pub reserved_slots: Option<u32>,
    pub player_limit: Option<u32>,
    /// When present (and the broker is enabled), a match token is brokered
    /// for this player and returned with the response.
    pub player: Option<PlayerRef>,
}

/// A created match, with the brokered token when one could be obtained.
#[derive(Debug, Clone)]
pub struct CreatedMatch {
    pub record: Match,
    pub token: Option<MatchToken>,
}

/// Orchestrates match lifecycle across scheduler, registries, and engines.
#[derive(Clone)]
pub struct MatchRouter {
    nodes: NodeRegistry,
    matches: MatchRegistry,
    modules: ModuleRegistry,
    scheduler: Scheduler,
    distributor: ModuleDistributor,
    engine: EngineClient,
    auth: AuthBroker,
    max_containers: u32,
}

impl MatchRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        nodes: NodeRegistry,
        matches: MatchRegistry,
        modules: ModuleRegistry,
        scheduler: Scheduler,
        distributor: ModuleDistributor,
        engine: EngineClient,
        auth: AuthBroker,
        max_containers: u32,
    ) -> Self {
        Self {
            nodes,
            matches,
            modules,
            scheduler,
            distributor,
            engine,
            auth,
            max_containers: max_containers.max(1),
        }
    }

    /// Place and start a new match.
    pub async fn create_match(&self, request: CreateMatchRequest) -> RouterResult<CreatedMatch> {
        // Unknown modules are a caller error, caught before any placement.
        let mut module_versions = Vec::with_capacity(request.modules.len());
        for name in &request.modules {
            let meta = self
                .modules
                .latest(name)?
                .ok_or_else(|| RouterError::UnknownModule(name.clone()))?;
            module_versions.push((meta.name, meta.version));
        }

        let placement = PlacementRequest {
            modules: request.modules.clone(),
            preferred_node: request.preferred_node.clone(),
            reserved_slots: request.reserved_slots.unwrap_or(0),
        };
        let target = self.scheduler.select_node(&placement)?;

        let id = self.mint_id(&target)?;
        let now = epoch_secs();
        let row = Match {
            id: id.clone(),
            status: MatchStatus::Creating,
            modules: request.modules.clone(),
            created_at: now,
            updated_at: now,
            player_count: 0,
            player_limit: request.player_limit.unwrap_or(DEFAULT_PLAYER_LIMIT),
            endpoints: None,
        };
        self.matches
            .insert(&row)
            .map_err(|e| RouterError::Internal(format!("CREATING row rejected: {e}")))?;
        info!(match_id = %id, node_id = %target.node.id, "match placement started");

        // The engine call and its bookkeeping run in a spawned task: if the
        // caller goes away mid-flight, the CREATING row still reaches a
        // terminal state.
        let worker = self.clone();
        let task_id = id.clone();
        let task_target = target.clone();
        let handle = tokio::spawn(async move {
            worker
                .start_on_engine(task_id, task_target, module_versions)
                .await
        });
        let record = handle
            .await
            .map_err(|e| RouterError::Internal(format!("create task failed for {id}: {e}")))??;

        let token = self.broker_token(&record, request.player.as_ref()).await;
        Ok(CreatedMatch { record, token })
    }

    /// Drive the engine and publish the terminal transition for a CREATING
    /// row. Every failure path compensates with ERROR before returning.
    async fn start_on_engine(
        self,
        id: ClusterMatchId,
        target: NodeView,
        module_versions: Vec<(String, String)>,
    ) -> RouterResult<Match> {
        for (name, version) in &module_versions {
            if let Err(e) = self
                .distributor
                .distribute_to_node(name, version, &target.node.id)
                .await
            {
                self.compensate(&id);
                return Err(RouterError::Distribution {
                    id: id.to_string(),
                    source: e,
                });
            }
        }

        let module_names: Vec<String> =
            module_versions.iter().map(|(n, _)| n.clone()).collect();
        let ack = match self
            .engine
            .create_match(
                &target.node.address,
                &id.container_id,
                &id.local_match_id,
                &module_names,
            )
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                self.compensate(&id);
                return Err(RouterError::Engine {
                    id: id.to_string(),
                    source: e,
                });
            }
        };

        match self.matches.mark_running(&id, ack.endpoints) {
            Ok(record) => {
                info!(match_id = %id, "match running");
                Ok(record)
            }
            Err(e) => {
                // Lost the CAS (a parallel sweeper got there first). The
                // engine-side match must not outlive the row.
                warn!(match_id = %id, error = %e, "RUNNING publication lost, tearing down");
                if let Err(te) = self
                    .engine
                    .delete_match(&target.node.address, &id.container_id, &id.local_match_id)
                    .await
                {
                    error!(match_id = %id, error = %te, "engine teardown after lost CAS failed");
                }
                Err(e.into())
            }
        }
    }

    /// Compensating write: CREATING → ERROR. Best-effort; the retention
    /// sweeper catches anything this misses.
    fn compensate(&self, id: &ClusterMatchId) {
        if let Err(e) = self.matches.to_error(id) {
            error!(match_id = %id, error = %e, "compensating ERROR write failed");
        }
    }

    async fn broker_token(
        &self,
        record: &Match,
        player: Option<&PlayerRef>,
    ) -> Option<MatchToken> {
        let player = player?;
        if !self.auth.validation_enabled() {
            return None;
        }
        let request = MatchTokenRequest {
            match_id: record.id.to_string(),
            container_id: record.id.container_id.clone(),
            player_id: player.id.clone(),
            player_name: player.name.clone(),
            scopes: MATCH_TOKEN_SCOPES.iter().map(|s| s.to_string()).collect(),
        };
        match self.auth.issue_match_token(request).await {
            MatchTokenResult::Success(token) => Some(token),
            MatchTokenResult::Failure { status, message } => {
                // Token failures never fail match creation.
                warn!(match_id = %record.id, status, %message, "match token unavailable");
                None
            }
        }
    }

    fn mint_id(&self, target: &NodeView) -> RouterResult<ClusterMatchId> {
        let sequence = self.matches.next_sequence(&target.node.id)?;
        let active = self.matches.count_active_by_node(&target.node.id)?;
        let container = format!("c{}", active % self.max_containers);
        Ok(ClusterMatchId::new(
            target.node.id.clone(),
            container,
            format!("m{sequence}"),
        ))
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn find_by_id(&self, id: &ClusterMatchId) -> RouterResult<Match> {
        self.matches
            .find_by_id(id)?
            .ok_or_else(|| RouterError::NotFound(id.to_string()))
    }

    pub fn find_all(&self) -> RouterResult<Vec<Match>> {
        Ok(self.matches.find_all()?)
    }

    pub fn find_by_status(&self, status: MatchStatus) -> RouterResult<Vec<Match>> {
        Ok(self.matches.find_by_status(status)?)
    }

    pub fn find_by_node(&self, node_id: &str) -> RouterResult<Vec<Match>> {
        Ok(self.matches.find_by_node(node_id)?)
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Tear the match down on its engine, then publish FINISHED.
    /// Finishing an already-finished match is idempotent.
    pub async fn finish_match(&self, id: &ClusterMatchId) -> RouterResult<Match> {
        let record = self.find_by_id(id)?;
        match record.status {
            MatchStatus::Finished => return Ok(record),
            MatchStatus::Running => {}
            other => {
                return Err(RegistryError::InvalidTransition {
                    id: id.to_string(),
                    from: other,
                    to: MatchStatus::Finished,
                }
                .into());
            }
        }

        if let Some(view) = self.nodes.get(&id.node_id)? {
            self.engine
                .finish_match(&view.node.address, &id.container_id, &id.local_match_id)
                .await
                .map_err(|e| RouterError::Engine {
                    id: id.to_string(),
                    source: e,
                })?;
        } else {
            // Owner node is gone; nothing to tear down.
            warn!(match_id = %id, "finishing match whose node is no longer registered");
        }
        Ok(self.matches.finish(id)?)
    }

    /// Remove a match row, tearing down engine state best-effort. Returns
    /// false when the id is unknown (a 404 to callers, a no-op internally).
    pub async fn delete_match(&self, id: &ClusterMatchId) -> RouterResult<bool> {
        let Some(_record) = self.matches.find_by_id(id)? else {
            return Ok(false);
        };
        if let Some(view) = self.nodes.get(&id.node_id)?
            && let Err(e) = self
                .engine
                .delete_match(&view.node.address, &id.container_id, &id.local_match_id)
                .await
        {
            // Deletion is idempotent on the engine side; a failed teardown
            // must not block removing the row.
            warn!(match_id = %id, error = %e, "engine teardown during delete failed");
        }
        Ok(self.matches.delete_by_id(id)?)
    }

    pub fn update_player_count(&self, id: &ClusterMatchId, count: u32) -> RouterResult<Match> {
        Ok(self.matches.update_player_count(id, count)?)
    }
}
