//! storm-state — the shared state store for the StormStack control plane.
//!
//! All durable control-plane state (nodes, matches, module metadata and
//! artifacts, autoscaler bookkeeping) lives behind [`KvStore`]: a keyed map
//! with TTL envelopes, atomic put-if-absent and read-modify-write, prefix
//! scans, and a separate blob table for content-addressed artifact bytes.
//! Values are JSON-serialized. The store supports on-disk and in-memory
//! backends (the latter for testing).

mod error;
mod store;
mod tables;

pub use error::{StateError, StateResult};
pub use store::{Entry, KvStore, Update};
