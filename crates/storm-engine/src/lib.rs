//! storm-engine — HTTP client for the per-node engine RPC surface.
//!
//! The control plane consumes five engine operations: create, finish, and
//! delete a match inside a container, probe for a module by content hash,
//! and push a module artifact. Calls carry the control-plane bearer token
//! and bounded connect/read timeouts; callers treat transport failures and
//! engine 5xx responses as upstream-unavailable.

mod client;
mod error;

pub use client::{EngineClient, EngineMatch};
pub use error::{EngineError, EngineResult};
