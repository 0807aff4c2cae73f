//! redb table definitions for the shared state store.
//!
//! A single keyed table holds every envelope-wrapped JSON value; keys are
//! prefixed per kind (`node:`, `match:`, `match-by-node:`, `module:`,
//! `autoscaler:`). Artifact bytes live in a separate blob table keyed by
//! content hash.

use redb::TableDefinition;

/// Envelope-wrapped JSON values keyed by `{kind}:{id}`.
pub const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

/// Raw artifact bytes keyed by content hash.
pub const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");
