//! Node and match handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use storm_core::{ClusterMatchId, Match, MatchStatus, NodeMetrics, NodeView};
use storm_router::{CreateMatchRequest, NodeRemoval, PlayerRef};
use tracing::warn;

use crate::ApiState;
use crate::error::ApiError;

// ── Nodes ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterNodeRequest {
    pub node_id: String,
    pub address: String,
    pub capacity: u32,
}

/// POST /nodes
pub async fn register_node(
    State(state): State<ApiState>,
    Json(body): Json<RegisterNodeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.node_id.is_empty() || body.address.is_empty() {
        return Err(ApiError::validation("nodeId and address are required"));
    }
    if body.capacity == 0 {
        return Err(ApiError::validation("capacity must be at least 1"));
    }
    let view = state
        .nodes
        .register(&body.node_id, &body.address, body.capacity)?;
    let location = format!("/nodes/{}", view.node.id);
    Ok((
        StatusCode::CREATED,
        [(axum::http::header::LOCATION, location)],
        Json(view),
    ))
}

/// POST /nodes/{id}/heartbeat
pub async fn heartbeat(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(metrics): Json<NodeMetrics>,
) -> Result<Json<NodeView>, ApiError> {
    Ok(Json(state.nodes.heartbeat(&id, metrics)?))
}

/// GET /nodes
pub async fn list_nodes(
    State(state): State<ApiState>,
) -> Result<Json<Vec<NodeView>>, ApiError> {
    Ok(Json(state.nodes.list()?))
}

/// GET /nodes/{id}
pub async fn get_node(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<NodeView>, ApiError> {
    state.nodes.get(&id)?.map(Json).ok_or_else(|| {
        ApiError::not_found("NODE_NOT_FOUND", format!("node not found: {id}"))
    })
}

/// GET /nodes/{id}/matches
pub async fn node_matches(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Match>>, ApiError> {
    if state.nodes.get(&id)?.is_none() {
        return Err(ApiError::not_found(
            "NODE_NOT_FOUND",
            format!("node not found: {id}"),
        ));
    }
    Ok(Json(state.router.find_by_node(&id)?))
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAction {
    Drain,
    Undrain,
}

#[derive(Deserialize)]
pub struct PatchNodeRequest {
    pub action: NodeAction,
}

/// PATCH /nodes/{id}
pub async fn patch_node(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<PatchNodeRequest>,
) -> Result<Json<NodeView>, ApiError> {
    let view = match body.action {
        NodeAction::Drain => state.nodes.drain(&id)?,
        NodeAction::Undrain => state.nodes.undrain(&id)?,
    };
    Ok(Json(view))
}

/// DELETE /nodes/{id}
pub async fn delete_node(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.nodes.delete(&id)? {
        return Err(ApiError::not_found("NODE_NOT_FOUND", format!("node not found: {id}")));
    }
    // The orphan sweeper takes care of the node's matches.
    if let Err(e) = state.removals.try_send(NodeRemoval { node_id: id }) {
        warn!(error = %e, "removal channel full, retention pass will catch up");
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Matches ────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMatchBody {
    pub modules: Vec<String>,
    #[serde(default)]
    pub preferred_node: Option<String>,
    #[serde(default)]
    pub reserved_slots: Option<u32>,
    #[serde(default)]
    pub player_limit: Option<u32>,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub player_name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMatchResponse {
    #[serde(flatten)]
    pub record: Match,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_expires_at: Option<u64>,
}

/// POST /matches
pub async fn create_match(
    State(state): State<ApiState>,
    Json(body): Json<CreateMatchBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.modules.is_empty() {
        return Err(ApiError::validation("at least one module is required"));
    }
    let player = match (body.player_id, body.player_name) {
        (Some(id), Some(name)) => Some(PlayerRef { id, name }),
        (None, None) => None,
        _ => {
            return Err(ApiError::validation(
                "playerId and playerName must be provided together",
            ));
        }
    };
    let created = state
        .router
        .create_match(CreateMatchRequest {
            modules: body.modules,
            preferred_node: body.preferred_node,
            reserved_slots: body.reserved_slots,
            player_limit: body.player_limit,
            player,
        })
        .await?;

    let location = format!("/matches/{}", created.record.id);
    let (match_token, token_expires_at) = match created.token {
        Some(token) => (Some(token.token), Some(token.expires_at)),
        None => (None, None),
    };
    Ok((
        StatusCode::CREATED,
        [(axum::http::header::LOCATION, location)],
        Json(CreateMatchResponse {
            record: created.record,
            match_token,
            token_expires_at,
        }),
    ))
}

#[derive(Deserialize)]
pub struct MatchFilter {
    pub status: Option<String>,
}

/// GET /matches
pub async fn list_matches(
    State(state): State<ApiState>,
    Query(filter): Query<MatchFilter>,
) -> Result<Json<Vec<Match>>, ApiError> {
    let rows = match filter.status {
        Some(raw) => {
            let status: MatchStatus = raw.parse().map_err(ApiError::validation)?;
            state.router.find_by_status(status)?
        }
        None => state.router.find_all()?,
    };
    Ok(Json(rows))
}

fn parse_id(raw: &str) -> Result<ClusterMatchId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::validation(format!("malformed match id: {raw:?}")))
}

/// GET /matches/{id}
pub async fn get_match(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(state.router.find_by_id(&parse_id(&id)?)?))
}

/// POST /matches/{id}/finish
pub async fn finish_match(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(state.router.finish_match(&parse_id(&id)?).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerCountBody {
    pub player_count: u32,
}

/// PATCH /matches/{id}/playerCount
pub async fn update_player_count(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(body): Json<PlayerCountBody>,
) -> Result<Json<Match>, ApiError> {
    Ok(Json(
        state
            .router
            .update_player_count(&parse_id(&id)?, body.player_count)?,
    ))
}

/// DELETE /matches/{id}
pub async fn delete_match(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    if !state.router.delete_match(&id).await? {
        return Err(ApiError::not_found(
            "MATCH_NOT_FOUND",
            format!("match not found: {id}"),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}
