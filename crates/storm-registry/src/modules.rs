//! Module registry — content-addressed artifact store.
//!
//! Metadata lives under `module:{name}:{version}`; artifact bytes under
//! `module-blob:{hash}` in the blob table. Given (name, version) the hash
//! and bytes never change: re-uploading identical content is idempotent,
//! different content is a conflict. Nodes that already report the hash
//! never re-receive bytes (see the distributor).

use sha2::{Digest, Sha256};
use storm_core::{ModuleMeta, epoch_secs};
use storm_state::KvStore;
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::retry::with_retries;

fn meta_key(name: &str, version: &str) -> String {
    format!("module:{name}:{version}")
}

fn blob_key(hash: &str) -> String {
    format!("module-blob:{hash}")
}

/// SHA-256 content hash, hex-encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Upload request fields; size, hash, and timestamp are computed.
#[derive(Debug, Clone)]
pub struct ModuleUpload {
    pub name: String,
    pub version: String,
    pub description: String,
    pub file_name: String,
    pub uploaded_by: String,
}

/// Registry of module artifacts and metadata.
#[derive(Clone)]
pub struct ModuleRegistry {
    store: KvStore,
}

impl ModuleRegistry {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Store an artifact. Identical re-upload is idempotent; an upload with
    /// the same (name, version) but different content is a conflict.
    pub fn upload(&self, upload: ModuleUpload, bytes: &[u8]) -> RegistryResult<ModuleMeta> {
        let hash = content_hash(bytes);
        if let Some(existing) = self.find(&upload.name, &upload.version)? {
            if existing.hash == hash {
                debug!(name = %upload.name, version = %upload.version, "identical re-upload");
                return Ok(existing);
            }
            return Err(RegistryError::ModuleConflict {
                name: upload.name,
                version: upload.version,
            });
        }

        let meta = ModuleMeta {
            name: upload.name,
            version: upload.version,
            description: upload.description,
            file_name: upload.file_name,
            file_size: bytes.len() as u64,
            hash: hash.clone(),
            uploaded_by: upload.uploaded_by,
            uploaded_at: epoch_secs(),
        };

        // Bytes first so a metadata row never points at a missing blob.
        with_retries("module blob put", || {
            self.store.put_blob(&blob_key(&hash), bytes)
        })?;
        let key = meta_key(&meta.name, &meta.version);
        let inserted =
            with_retries("module meta put", || self.store.put_if_absent(&key, &meta, None))?;
        if !inserted {
            // Lost a concurrent upload race; converge on what landed.
            let landed = self.find(&meta.name, &meta.version)?.ok_or_else(|| {
                RegistryError::ModuleNotFound {
                    name: meta.name.clone(),
                    version: meta.version.clone(),
                }
            })?;
            if landed.hash == hash {
                return Ok(landed);
            }
            return Err(RegistryError::ModuleConflict {
                name: meta.name,
                version: meta.version,
            });
        }
        info!(name = %meta.name, version = %meta.version, size = meta.file_size, "module uploaded");
        Ok(meta)
    }

    pub fn find(&self, name: &str, version: &str) -> RegistryResult<Option<ModuleMeta>> {
        let entry = with_retries("module get", || {
            self.store.get::<ModuleMeta>(&meta_key(name, version))
        })?;
        Ok(entry.map(|e| e.value))
    }

    /// All versions of a module, sorted ascending by version.
    pub fn find_by_name(&self, name: &str) -> RegistryResult<Vec<ModuleMeta>> {
        let prefix = format!("module:{name}:");
        let entries = with_retries("module scan", || {
            self.store.list_by_prefix::<ModuleMeta>(&prefix)
        })?;
        let mut metas: Vec<ModuleMeta> = entries.into_iter().map(|(_, e)| e.value).collect();
        metas.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(metas)
    }

    /// Highest version of a module, if any version is registered.
    pub fn latest(&self, name: &str) -> RegistryResult<Option<ModuleMeta>> {
        Ok(self.find_by_name(name)?.pop())
    }

    pub fn find_all(&self) -> RegistryResult<Vec<ModuleMeta>> {
        let entries = with_retries("module scan all", || {
            self.store.list_by_prefix::<ModuleMeta>("module:")
        })?;
        let mut metas: Vec<ModuleMeta> = entries.into_iter().map(|(_, e)| e.value).collect();
        metas.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(metas)
    }

    pub fn exists(&self, name: &str, version: &str) -> RegistryResult<bool> {
        Ok(self.find(name, version)?.is_some())
    }

    /// Delete a version. The blob is removed only when no other version
    /// shares its hash. Returns true if the metadata existed.
    pub fn delete(&self, name: &str, version: &str) -> RegistryResult<bool> {
        let Some(meta) = self.find(name, version)? else {
            return Ok(false);
        };
        with_retries("module meta delete", || {
            self.store.delete(&meta_key(name, version))
        })?;
        let still_referenced = self
            .find_all()?
            .iter()
            .any(|m| m.hash == meta.hash);
        if !still_referenced {
            with_retries("module blob delete", || {
                self.store.delete_blob(&blob_key(&meta.hash))
            })?;
        }
        info!(%name, %version, "module deleted");
        Ok(true)
    }

    /// Read the artifact bytes, verifying them against the stored hash.
    pub fn open(&self, name: &str, version: &str) -> RegistryResult<Vec<u8>> {
        let meta = self
            .find(name, version)?
            .ok_or_else(|| RegistryError::ModuleNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })?;
        let bytes = with_retries("module blob get", || self.store.get_blob(&blob_key(&meta.hash)))?
            .ok_or_else(|| RegistryError::ModuleNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })?;
        if content_hash(&bytes) != meta.hash {
            return Err(RegistryError::CorruptArtifact {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModuleRegistry {
        ModuleRegistry::new(KvStore::open_in_memory().unwrap())
    }

    fn upload_req(name: &str, version: &str) -> ModuleUpload {
        ModuleUpload {
            name: name.to_string(),
            version: version.to_string(),
            description: "test module".to_string(),
            file_name: format!("{name}.wasm"),
            uploaded_by: "ops".to_string(),
        }
    }

    #[test]
    fn upload_computes_hash_and_size() {
        let reg = registry();
        let bytes = b"module bytes: 42 of them, more or less....";
        let meta = reg.upload(upload_req("entity-module", "1.0.0"), bytes).unwrap();

        assert_eq!(meta.file_size, bytes.len() as u64);
        assert_eq!(meta.hash, content_hash(bytes));
        assert!(reg.exists("entity-module", "1.0.0").unwrap());
    }

    #[test]
    fn identical_reupload_is_idempotent() {
        let reg = registry();
        let first = reg.upload(upload_req("m", "1"), b"same bytes").unwrap();
        let second = reg.upload(upload_req("m", "1"), b"same bytes").unwrap();

        assert_eq!(first, second);
        assert_eq!(reg.find_all().unwrap().len(), 1);
    }

    #[test]
    fn conflicting_reupload_is_rejected() {
        let reg = registry();
        reg.upload(upload_req("m", "1"), b"bytes").unwrap();

        let result = reg.upload(upload_req("m", "1"), b"different bytes");
        assert!(matches!(result, Err(RegistryError::ModuleConflict { .. })));
        // Original bytes untouched.
        assert_eq!(reg.open("m", "1").unwrap(), b"bytes");
    }

    #[test]
    fn versions_sort_and_latest_wins() {
        let reg = registry();
        reg.upload(upload_req("m", "1.0.0"), b"one").unwrap();
        reg.upload(upload_req("m", "1.2.0"), b"three").unwrap();
        reg.upload(upload_req("m", "1.1.0"), b"two").unwrap();

        let versions: Vec<_> = reg
            .find_by_name("m")
            .unwrap()
            .into_iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(versions, vec!["1.0.0", "1.1.0", "1.2.0"]);
        assert_eq!(reg.latest("m").unwrap().unwrap().version, "1.2.0");
    }

    #[test]
    fn find_by_name_does_not_cross_modules() {
        let reg = registry();
        reg.upload(upload_req("game", "1"), b"a").unwrap();
        reg.upload(upload_req("game-extras", "1"), b"b").unwrap();

        assert_eq!(reg.find_by_name("game").unwrap().len(), 1);
    }

    #[test]
    fn open_returns_verified_bytes() {
        let reg = registry();
        reg.upload(upload_req("m", "1"), b"artifact").unwrap();
        assert_eq!(reg.open("m", "1").unwrap(), b"artifact");
    }

    #[test]
    fn open_missing_module_fails() {
        let reg = registry();
        assert!(matches!(
            reg.open("ghost", "1"),
            Err(RegistryError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn delete_removes_meta_and_unshared_blob() {
        let reg = registry();
        reg.upload(upload_req("m", "1"), b"bytes").unwrap();

        assert!(reg.delete("m", "1").unwrap());
        assert!(!reg.delete("m", "1").unwrap());
        assert!(!reg.exists("m", "1").unwrap());
        assert!(matches!(
            reg.open("m", "1"),
            Err(RegistryError::ModuleNotFound { .. })
        ));
    }

    #[test]
    fn delete_keeps_blob_shared_by_other_version() {
        let reg = registry();
        reg.upload(upload_req("m", "1"), b"shared").unwrap();
        reg.upload(upload_req("m", "2"), b"shared").unwrap();

        reg.delete("m", "1").unwrap();
        // Version 2 still opens fine off the shared blob.
        assert_eq!(reg.open("m", "2").unwrap(), b"shared");
    }

    #[test]
    fn latest_of_unknown_module_is_none() {
        let reg = registry();
        assert!(reg.latest("ghost").unwrap().is_none());
    }
}
