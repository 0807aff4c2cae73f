//! Dashboard handlers — read-only aggregation for the GUI.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use storm_core::{Match, NodeView};
use storm_view::{Overview, Page};

use crate::ApiState;
use crate::error::ApiError;

const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub page_size: Option<usize>,
}

impl PageQuery {
    fn page_size(&self) -> usize {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

/// GET /dashboard/overview
pub async fn overview(State(state): State<ApiState>) -> Result<Json<Overview>, ApiError> {
    Ok(Json(state.view.overview()?))
}

/// GET /dashboard/nodes
pub async fn nodes_page(
    State(state): State<ApiState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<NodeView>>, ApiError> {
    Ok(Json(state.view.nodes_page(query.offset, query.page_size())?))
}

/// GET /dashboard/matches
pub async fn matches_page(
    State(state): State<ApiState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Match>>, ApiError> {
    Ok(Json(
        state.view.matches_page(query.offset, query.page_size())?,
    ))
}
