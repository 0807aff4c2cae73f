//! Registry error types.

use storm_core::{MatchStatus, NodeId};
use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("node {0} already registered with a different address")]
    AlreadyExists(NodeId),

    #[error("node not registered: {0}")]
    NotRegistered(NodeId),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("match not found: {0}")]
    MatchNotFound(String),

    #[error("match already exists: {0}")]
    MatchExists(String),

    #[error("illegal transition {from} -> {to} for match {id}")]
    InvalidTransition {
        id: String,
        from: MatchStatus,
        to: MatchStatus,
    },

    #[error("match {0} is in a terminal state")]
    TerminalState(String),

    #[error("module not found: {name}:{version}")]
    ModuleNotFound { name: String, version: String },

    #[error("module {name}:{version} already uploaded with different content")]
    ModuleConflict { name: String, version: String },

    #[error("artifact for {name}:{version} failed hash verification")]
    CorruptArtifact { name: String, version: String },

    #[error("state store unavailable: {0}")]
    StoreUnavailable(String),
}
