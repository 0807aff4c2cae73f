//! storm-scheduler — node selection for new matches.
//!
//! Least-loaded placement with a preferred-node affinity short-circuit and
//! a deterministic lexicographic tie-break. Also exposes the cluster
//! saturation signal the autoscaler consumes.

mod error;
mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{PlacementRequest, Scheduler};
