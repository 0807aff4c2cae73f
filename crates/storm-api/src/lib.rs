//! storm-api — the administrative HTTP surface.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/nodes` | Register a node |
//! | GET | `/nodes` | List nodes with derived status |
//! | GET | `/nodes/{id}` | Get one node |
//! | GET | `/nodes/{id}/matches` | Matches owned by a node |
//! | POST | `/nodes/{id}/heartbeat` | Heartbeat with metrics |
//! | PATCH | `/nodes/{id}` | Drain / undrain |
//! | DELETE | `/nodes/{id}` | Remove a node (matches are swept) |
//! | POST | `/matches` | Create a match |
//! | GET | `/matches` | List matches, optional `?status=` filter |
//! | GET | `/matches/{id}` | Get one match |
//! | POST | `/matches/{id}/finish` | Finish a running match |
//! | PATCH | `/matches/{id}/playerCount` | Update player count |
//! | DELETE | `/matches/{id}` | Delete a match |
//! | POST | `/modules` | Multipart artifact upload |
//! | GET | `/modules[/{name}[/{version}]]` | Module listings |
//! | GET | `/modules/{name}/{version}/download` | Artifact bytes |
//! | DELETE | `/modules/{name}/{version}` | Delete a version |
//! | POST | `/modules/{name}/{version}/distribute[/{nodeId}]` | Push to nodes |
//! | GET | `/dashboard/overview` | Aggregated cluster overview |
//! | GET | `/dashboard/nodes`, `/dashboard/matches` | Paged listings |
//! | GET | `/healthz` | Liveness probe (unauthenticated) |
//!
//! When an API secret is configured, every route but `/healthz` requires a
//! bearer token minted by `issue-api-token`; mutating verbs additionally
//! require the `admin` role.

mod auth;
mod dashboard_handlers;
mod error;
mod handlers;
mod module_handlers;

pub use error::{ApiError, ErrorBody};

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use storm_distributor::ModuleDistributor;
use storm_registry::{ModuleRegistry, NodeRegistry};
use storm_router::{MatchRouter, NodeRemoval};
use storm_view::ClusterView;
use tokio::sync::mpsc;

/// Artifact uploads are capped at 64 MiB.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub nodes: NodeRegistry,
    pub modules: ModuleRegistry,
    pub router: MatchRouter,
    pub distributor: ModuleDistributor,
    pub view: ClusterView,
    /// Node removals flow to the orphan sweeper through this channel.
    pub removals: mpsc::Sender<NodeRemoval>,
    /// Secret for operator-token verification; `None` disables API auth.
    pub api_secret: Option<String>,
}

/// Build the complete admin router.
pub fn build_router(state: ApiState) -> Router {
    let api = Router::new()
        .route(
            "/nodes",
            post(handlers::register_node).get(handlers::list_nodes),
        )
        .route(
            "/nodes/{id}",
            get(handlers::get_node)
                .patch(handlers::patch_node)
                .delete(handlers::delete_node),
        )
        .route("/nodes/{id}/heartbeat", post(handlers::heartbeat))
        .route("/nodes/{id}/matches", get(handlers::node_matches))
        .route(
            "/matches",
            post(handlers::create_match).get(handlers::list_matches),
        )
        .route(
            "/matches/{id}",
            get(handlers::get_match).delete(handlers::delete_match),
        )
        .route("/matches/{id}/finish", post(handlers::finish_match))
        .route(
            "/matches/{id}/playerCount",
            patch(handlers::update_player_count),
        )
        .route(
            "/modules",
            post(module_handlers::upload_module).get(module_handlers::list_modules),
        )
        .route("/modules/{name}", get(module_handlers::list_versions))
        .route(
            "/modules/{name}/{version}",
            get(module_handlers::get_module).delete(module_handlers::delete_module),
        )
        .route(
            "/modules/{name}/{version}/download",
            get(module_handlers::download_module),
        )
        .route(
            "/modules/{name}/{version}/distribute",
            post(module_handlers::distribute_all),
        )
        .route(
            "/modules/{name}/{version}/distribute/{node_id}",
            post(module_handlers::distribute_node),
        )
        .route("/dashboard/overview", get(dashboard_handlers::overview))
        .route("/dashboard/nodes", get(dashboard_handlers::nodes_page))
        .route("/dashboard/matches", get(dashboard_handlers::matches_page))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state);

    Router::new()
        .route("/healthz", get(healthz))
        .merge(api)
}

async fn healthz() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use storm_auth::AuthBroker;
    use storm_core::{ControlPlaneConfig, HttpTimeouts};
    use storm_engine::EngineClient;
    use storm_registry::MatchRegistry;
    use storm_scheduler::Scheduler;
    use storm_state::KvStore;

    pub struct TestContext {
        pub state: ApiState,
        pub removals_rx: mpsc::Receiver<NodeRemoval>,
    }

    /// Fully wired in-memory control plane. `node_ttl` 0 makes every node
    /// UNHEALTHY immediately (for expiry scenarios).
    pub fn context(node_ttl: u64, api_secret: Option<String>) -> TestContext {
        let store = KvStore::open_in_memory().unwrap();
        let nodes = NodeRegistry::new(store.clone(), node_ttl, 3);
        let matches = MatchRegistry::new(store.clone());
        let modules = ModuleRegistry::new(store.clone());
        let scheduler = Scheduler::new(nodes.clone(), matches.clone());
        let engine = EngineClient::new(&HttpTimeouts::default(), None).unwrap();
        let distributor = ModuleDistributor::new(modules.clone(), nodes.clone(), engine.clone());
        let auth = AuthBroker::new(&ControlPlaneConfig::default());
        let router = MatchRouter::new(
            nodes.clone(),
            matches.clone(),
            modules.clone(),
            scheduler,
            distributor.clone(),
            engine,
            auth,
            4,
        );
        let view = ClusterView::new(nodes.clone(), matches.clone(), store);
        let (removals, removals_rx) = mpsc::channel(16);
        TestContext {
            state: ApiState {
                nodes,
                modules,
                router,
                distributor,
                view,
                removals,
                api_secret,
            },
            removals_rx,
        }
    }
}
