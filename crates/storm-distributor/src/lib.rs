//! storm-distributor — ensures module artifacts are present on nodes.
//!
//! Artifacts are content-addressed: a node that already reports the hash is
//! skipped and never re-receives bytes. Per-node push failures are recorded
//! and do not stop distribution to the remaining nodes. The distributor
//! never touches match rows; it is invoked by the match router as a
//! placement side-effect and directly by operators.

use storm_core::{NodeId, NodeView};
use storm_engine::{EngineClient, EngineError};
use storm_registry::{ModuleRegistry, NodeRegistry, RegistryError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from distribution operations.
#[derive(Debug, Error)]
pub enum DistributorError {
    #[error("module not found: {name}:{version}")]
    ModuleNotFound { name: String, version: String },

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Single-node distribution surfaces the engine failure directly.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type DistributorResult<T> = Result<T, DistributorError>;

/// Outcome of a fleet-wide distribution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionReport {
    /// Nodes the artifact was pushed to (the spec's success count).
    pub pushed: u32,
    /// Nodes that already held the hash.
    pub already_present: u32,
    /// Per-node failures: (node id, diagnostic).
    pub failures: Vec<(NodeId, String)>,
}

/// Pushes module artifacts to node engines.
#[derive(Clone)]
pub struct ModuleDistributor {
    modules: ModuleRegistry,
    nodes: NodeRegistry,
    engine: EngineClient,
}

impl ModuleDistributor {
    pub fn new(modules: ModuleRegistry, nodes: NodeRegistry, engine: EngineClient) -> Self {
        Self {
            modules,
            nodes,
            engine,
        }
    }

    /// Ensure every HEALTHY node holds the artifact. DRAINING and UNHEALTHY
    /// nodes are skipped: they accept no new placements.
    pub async fn distribute_to_all_nodes(
        &self,
        name: &str,
        version: &str,
    ) -> DistributorResult<DistributionReport> {
        let (meta, bytes) = self.load(name, version)?;
        let targets: Vec<NodeView> = self
            .nodes
            .list()?
            .into_iter()
            .filter(NodeView::is_healthy)
            .collect();

        let mut report = DistributionReport::default();
        for view in &targets {
            match self.push_if_absent(view, &meta, &bytes).await {
                Ok(true) => report.pushed += 1,
                Ok(false) => report.already_present += 1,
                Err(e) => {
                    warn!(
                        node_id = %view.node.id,
                        module = %meta.key(),
                        error = %e,
                        "module distribution failed"
                    );
                    report.failures.push((view.node.id.clone(), e.to_string()));
                }
            }
        }
        info!(
            module = %meta.key(),
            pushed = report.pushed,
            skipped = report.already_present,
            failed = report.failures.len(),
            "distribution pass complete"
        );
        Ok(report)
    }

    /// Ensure one node holds the artifact; engine failures propagate.
    pub async fn distribute_to_node(
        &self,
        name: &str,
        version: &str,
        node_id: &str,
    ) -> DistributorResult<()> {
        let (meta, bytes) = self.load(name, version)?;
        let view = self
            .nodes
            .get(node_id)?
            .ok_or_else(|| DistributorError::NodeNotFound(node_id.to_string()))?;
        self.push_if_absent(&view, &meta, &bytes).await?;
        Ok(())
    }

    fn load(
        &self,
        name: &str,
        version: &str,
    ) -> DistributorResult<(storm_core::ModuleMeta, Vec<u8>)> {
        let meta =
            self.modules
                .find(name, version)?
                .ok_or_else(|| DistributorError::ModuleNotFound {
                    name: name.to_string(),
                    version: version.to_string(),
                })?;
        let bytes = self.modules.open(name, version)?;
        Ok((meta, bytes))
    }

    /// Push unless the node already reports the hash. Returns true when
    /// bytes were actually transferred.
    async fn push_if_absent(
        &self,
        view: &NodeView,
        meta: &storm_core::ModuleMeta,
        bytes: &[u8],
    ) -> Result<bool, EngineError> {
        let address = &view.node.address;
        if self.engine.has_module(address, &meta.hash).await? {
            debug!(node_id = %view.node.id, module = %meta.key(), "artifact already present");
            return Ok(false);
        }
        self.engine
            .distribute_module(address, meta, bytes.to_vec())
            .await?;
        Ok(true)
    }
}
