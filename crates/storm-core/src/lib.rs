//! storm-core — shared domain types for the StormStack control plane.
//!
//! Everything the control-plane crates agree on lives here: node and match
//! records, module metadata, the `ClusterMatchId` wire format, scaling
//! recommendations, and the typed configuration struct built from the
//! environment.

pub mod config;
pub mod id;
pub mod types;

pub use config::{AutoscalerConfig, ControlPlaneConfig, HttpTimeouts};
pub use id::{ClusterMatchId, ParseMatchIdError};
pub use types::*;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
