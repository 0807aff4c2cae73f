//! storm-router — match lifecycle orchestration.
//!
//! The router composes the scheduler, registries, engine client, module
//! distributor, and auth broker into the control plane's canonical path:
//! place a match, publish CREATING, ensure modules on the target, drive the
//! engine, and publish RUNNING or compensate with ERROR. It also hosts the
//! background sweepers: the node reaper (TTL grace enforcement) and the
//! orphan sweeper draining node-removal messages from a bounded channel.

mod error;
mod router;
mod sweeper;

pub use error::{RouterError, RouterResult};
pub use router::{CreateMatchRequest, CreatedMatch, MatchRouter, PlayerRef};
pub use sweeper::{NodeReaper, NodeRemoval, OrphanSweeper};
