//! Match router error types.

use storm_engine::EngineError;
use thiserror::Error;

/// Result type alias for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors from match lifecycle operations.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("match not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Scheduler(#[from] storm_scheduler::SchedulerError),

    #[error(transparent)]
    Registry(#[from] storm_registry::RegistryError),

    #[error("engine call failed for match {id}: {source}")]
    Engine {
        id: String,
        #[source]
        source: EngineError,
    },

    #[error("module distribution failed for match {id}: {source}")]
    Distribution {
        id: String,
        #[source]
        source: storm_distributor::DistributorError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}
