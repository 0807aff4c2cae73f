//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during node selection.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no healthy nodes in the cluster")]
    NoHealthyNodes,

    #[error("no node has capacity for the requested placement")]
    NoCapacity,

    #[error(transparent)]
    Registry(#[from] storm_registry::RegistryError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
