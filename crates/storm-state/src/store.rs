//! KvStore — TTL-aware key/value storage backed by redb.
//!
//! Every value is wrapped in an envelope carrying an optional absolute
//! expiry (epoch seconds). Expired entries are surfaced to callers rather
//! than silently dropped: registries derive status from expiry and a
//! background sweeper reaps entries past their grace window. Write
//! transactions in redb are single-writer, which makes [`KvStore::update`]
//! and [`KvStore::put_if_absent`] genuinely atomic.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use storm_core::epoch_secs;

use crate::error::{StateError, StateResult};
use crate::tables::{BLOBS, KV};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// On-disk wrapper: the stored value plus its optional absolute expiry.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    expires_at: Option<u64>,
    value: T,
}

/// A value read from the store together with its expiry metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    pub value: T,
    /// Absolute expiry (epoch seconds); `None` for entries without TTL.
    pub expires_at: Option<u64>,
}

impl<T> Entry<T> {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Seconds until expiry; negative when already expired, `None` when the
    /// entry carries no TTL.
    pub fn ttl_remaining(&self, now: u64) -> Option<i64> {
        self.expires_at.map(|at| at as i64 - now as i64)
    }
}

/// Outcome of an [`KvStore::update`] closure.
pub enum Update<T> {
    /// Leave the entry untouched.
    Keep,
    /// Write the value, preserving the existing expiry (if any).
    Write(T),
    /// Write the value with a fresh TTL in seconds.
    WriteWithTtl(T, u64),
}

/// Thread-safe, clonable handle to the shared state store.
#[derive(Clone)]
pub struct KvStore {
    db: Arc<Database>,
}

impl KvStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(KV).map_err(map_err!(Table))?;
        txn.open_table(BLOBS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Keyed values ───────────────────────────────────────────────

    /// Insert or replace a value without TTL.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> StateResult<()> {
        self.write_envelope(key, value, None)
    }

    /// Insert or replace a value that expires `ttl_seconds` from now.
    pub fn put_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: u64,
    ) -> StateResult<()> {
        self.write_envelope(key, value, Some(epoch_secs() + ttl_seconds))
    }

    /// Atomically insert the value unless a live entry already exists.
    ///
    /// Returns `true` if the write happened. An expired entry under the key
    /// does not block the insert.
    pub fn put_if_absent<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> StateResult<bool> {
        let now = epoch_secs();
        let expires_at = ttl_seconds.map(|ttl| now + ttl);
        let bytes = encode(value, expires_at)?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            let live = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    let env: Envelope<serde_json::Value> =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    !env.expires_at.is_some_and(|at| now >= at)
                }
                None => false,
            };
            if live {
                inserted = false;
            } else {
                table
                    .insert(key, bytes.as_slice())
                    .map_err(map_err!(Write))?;
                inserted = true;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(inserted)
    }

    /// Get a value by key, including expired entries.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> StateResult<Option<Entry<T>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let env: Envelope<T> =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(Entry {
                    value: env.value,
                    expires_at: env.expires_at,
                }))
            }
            None => Ok(None),
        }
    }

    /// Remaining TTL for a key: `None` when the key is absent or carries no
    /// TTL, negative when already expired.
    pub fn ttl_remaining(&self, key: &str) -> StateResult<Option<i64>> {
        let entry = self.get::<serde_json::Value>(key)?;
        Ok(entry.and_then(|e| e.ttl_remaining(epoch_secs())))
    }

    /// Delete a key. Returns true if it existed.
    pub fn delete(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Delete a set of keys in a single write transaction.
    pub fn delete_many(&self, keys: &[String]) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            for key in keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    removed += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }

    /// List all entries whose key starts with the prefix, expired included.
    pub fn list_by_prefix<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> StateResult<Vec<(String, Entry<T>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(KV).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for item in table.iter().map_err(map_err!(Read))? {
            let (key, value) = item.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let env: Envelope<T> =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push((
                    key.value().to_string(),
                    Entry {
                        value: env.value,
                        expires_at: env.expires_at,
                    },
                ));
            }
        }
        Ok(results)
    }

    /// Atomic read-modify-write on a single key.
    ///
    /// The closure observes the current entry (expired included) and decides
    /// what to do; the whole operation runs inside one write transaction.
    /// Returns the written value, or `None` when the closure kept the entry.
    pub fn update<T, F>(&self, key: &str, f: F) -> StateResult<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<Entry<T>>) -> Update<T>,
    {
        let now = epoch_secs();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let written;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            let current = match table.get(key).map_err(map_err!(Read))? {
                Some(guard) => {
                    let env: Envelope<T> =
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                    Some(Entry {
                        value: env.value,
                        expires_at: env.expires_at,
                    })
                }
                None => None,
            };
            let prior_expiry = current.as_ref().and_then(|e| e.expires_at);
            match f(current) {
                Update::Keep => written = None,
                Update::Write(value) => {
                    let bytes = encode(&value, prior_expiry)?;
                    table
                        .insert(key, bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    written = Some(value);
                }
                Update::WriteWithTtl(value, ttl) => {
                    let bytes = encode(&value, Some(now + ttl))?;
                    table
                        .insert(key, bytes.as_slice())
                        .map_err(map_err!(Write))?;
                    written = Some(value);
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(written)
    }

    // ── Blobs ──────────────────────────────────────────────────────

    /// Store artifact bytes under a content-hash key. Writes are
    /// put-if-absent: a live blob under the same hash is left untouched.
    pub fn put_blob(&self, key: &str, bytes: &[u8]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            if table.get(key).map_err(map_err!(Read))?.is_none() {
                table.insert(key, bytes).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn get_blob(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
        Ok(table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec()))
    }

    pub fn blob_exists(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
        Ok(table.get(key).map_err(map_err!(Read))?.is_some())
    }

    pub fn delete_blob(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(BLOBS).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Internal ───────────────────────────────────────────────────

    fn write_envelope<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expires_at: Option<u64>,
    ) -> StateResult<()> {
        let bytes = encode(value, expires_at)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(KV).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T, expires_at: Option<u64>) -> StateResult<Vec<u8>> {
    serde_json::to_vec(&Envelope { expires_at, value }).map_err(map_err!(Serialize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_and_get() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("node:a", &"hello".to_string()).unwrap();

        let entry = store.get::<String>("node:a").unwrap().unwrap();
        assert_eq!(entry.value, "hello");
        assert_eq!(entry.expires_at, None);
    }

    #[test]
    fn get_missing_returns_none() {
        let store = KvStore::open_in_memory().unwrap();
        assert!(store.get::<String>("nope").unwrap().is_none());
    }

    #[test]
    fn put_with_ttl_sets_expiry() {
        let store = KvStore::open_in_memory().unwrap();
        store.put_with_ttl("node:a", &1u32, 30).unwrap();

        let entry = store.get::<u32>("node:a").unwrap().unwrap();
        assert!(!entry.is_expired(epoch_secs()));
        let remaining = store.ttl_remaining("node:a").unwrap().unwrap();
        assert!((29..=30).contains(&remaining));
    }

    #[test]
    fn zero_ttl_is_immediately_expired() {
        let store = KvStore::open_in_memory().unwrap();
        store.put_with_ttl("node:a", &1u32, 0).unwrap();

        let entry = store.get::<u32>("node:a").unwrap().unwrap();
        assert!(entry.is_expired(epoch_secs()));
    }

    #[test]
    fn ttl_remaining_absent_and_no_ttl() {
        let store = KvStore::open_in_memory().unwrap();
        assert!(store.ttl_remaining("absent").unwrap().is_none());

        store.put("forever", &true).unwrap();
        assert!(store.ttl_remaining("forever").unwrap().is_none());
    }

    #[test]
    fn put_if_absent_blocks_live_entries() {
        let store = KvStore::open_in_memory().unwrap();
        assert!(store.put_if_absent("k", &"first".to_string(), None).unwrap());
        assert!(!store.put_if_absent("k", &"second".to_string(), None).unwrap());

        let entry = store.get::<String>("k").unwrap().unwrap();
        assert_eq!(entry.value, "first");
    }

    #[test]
    fn put_if_absent_replaces_expired_entries() {
        let store = KvStore::open_in_memory().unwrap();
        store.put_with_ttl("k", &"stale".to_string(), 0).unwrap();

        assert!(store.put_if_absent("k", &"fresh".to_string(), Some(30)).unwrap());
        let entry = store.get::<String>("k").unwrap().unwrap();
        assert_eq!(entry.value, "fresh");
    }

    #[test]
    fn delete_is_idempotent() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("k", &1u8).unwrap();

        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
    }

    #[test]
    fn delete_many_removes_all_in_one_pass() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("match:a", &1u8).unwrap();
        store.put("match:b", &2u8).unwrap();
        store.put("match:c", &3u8).unwrap();

        let keys = vec![
            "match:a".to_string(),
            "match:b".to_string(),
            "match:missing".to_string(),
        ];
        assert_eq!(store.delete_many(&keys).unwrap(), 2);
        assert!(store.get::<u8>("match:a").unwrap().is_none());
        assert!(store.get::<u8>("match:c").unwrap().is_some());
    }

    #[test]
    fn list_by_prefix_filters_kinds() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("node:a", &1u8).unwrap();
        store.put("node:b", &2u8).unwrap();
        store.put("match:x", &3u8).unwrap();

        let nodes = store.list_by_prefix::<u8>("node:").unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|(k, _)| k.starts_with("node:")));
    }

    #[test]
    fn update_writes_through_closure() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("counter", &1u32).unwrap();

        let written = store
            .update::<u32, _>("counter", |entry| {
                Update::Write(entry.map(|e| e.value).unwrap_or(0) + 1)
            })
            .unwrap();
        assert_eq!(written, Some(2));
        assert_eq!(store.get::<u32>("counter").unwrap().unwrap().value, 2);
    }

    #[test]
    fn update_keep_leaves_entry_untouched() {
        let store = KvStore::open_in_memory().unwrap();
        store.put("k", &7u32).unwrap();

        let written = store.update::<u32, _>("k", |_| Update::Keep).unwrap();
        assert!(written.is_none());
        assert_eq!(store.get::<u32>("k").unwrap().unwrap().value, 7);
    }

    #[test]
    fn update_write_preserves_expiry() {
        let store = KvStore::open_in_memory().unwrap();
        store.put_with_ttl("k", &1u32, 1000).unwrap();
        let before = store.get::<u32>("k").unwrap().unwrap().expires_at;

        store.update::<u32, _>("k", |_| Update::Write(2)).unwrap();
        let after = store.get::<u32>("k").unwrap().unwrap();
        assert_eq!(after.value, 2);
        assert_eq!(after.expires_at, before);
    }

    #[test]
    fn update_with_ttl_refreshes_expiry() {
        let store = KvStore::open_in_memory().unwrap();
        store.put_with_ttl("k", &1u32, 0).unwrap();

        store
            .update::<u32, _>("k", |_| Update::WriteWithTtl(2, 60))
            .unwrap();
        let entry = store.get::<u32>("k").unwrap().unwrap();
        assert!(!entry.is_expired(epoch_secs()));
    }

    #[test]
    fn update_on_absent_key_can_initialize() {
        let store = KvStore::open_in_memory().unwrap();
        let written = store
            .update::<u64, _>("node-seq:n1", |entry| {
                Update::Write(entry.map(|e| e.value).unwrap_or(0) + 1)
            })
            .unwrap();
        assert_eq!(written, Some(1));
    }

    #[test]
    fn blob_put_is_content_addressed_idempotent() {
        let store = KvStore::open_in_memory().unwrap();
        store.put_blob("hash-a", b"bytes").unwrap();
        store.put_blob("hash-a", b"other").unwrap();

        // First write wins; identical hash implies identical content.
        assert_eq!(store.get_blob("hash-a").unwrap().unwrap(), b"bytes");
        assert!(store.blob_exists("hash-a").unwrap());
        assert!(!store.blob_exists("hash-b").unwrap());
    }

    #[test]
    fn blob_delete() {
        let store = KvStore::open_in_memory().unwrap();
        store.put_blob("h", b"x").unwrap();

        assert!(store.delete_blob("h").unwrap());
        assert!(!store.delete_blob("h").unwrap());
        assert!(store.get_blob("h").unwrap().is_none());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.redb");

        {
            let store = KvStore::open(&path).unwrap();
            store.put("node:a", &"durable".to_string()).unwrap();
            store.put_blob("h", b"artifact").unwrap();
        }

        let store = KvStore::open(&path).unwrap();
        assert_eq!(
            store.get::<String>("node:a").unwrap().unwrap().value,
            "durable"
        );
        assert_eq!(store.get_blob("h").unwrap().unwrap(), b"artifact");
    }
}
