//! Cross-session disk tier of the symbol cache.
//!
//! One JSON document per path under `cache/symbols/`, named by a hash of the
//! path. Writes go through `write_json_atomic`, so a reader never observes a
//! half-written entry.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::CacheEntry;
use crate::errors::{GuardError, StoreError, StoreResult};
use crate::store::write_json_atomic;

#[derive(Debug, Clone)]
pub struct PersistentCache {
    dir: PathBuf,
}

impl PersistentCache {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, rel_path: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(rel_path.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.dir.join(format!("{}.json", &digest[..16]))
    }

    /// Read the entry for `rel_path`. A file that exists but cannot be decoded
    /// is reported as `CacheCorruption`.
    pub fn get(&self, rel_path: &str) -> Result<Option<CacheEntry>, GuardError> {
        let path = self.entry_path(rel_path);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GuardError::CacheCorruption {
                    path: rel_path.to_string(),
                    detail: e.to_string(),
                });
            }
        };
        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|e| GuardError::CacheCorruption {
                path: rel_path.to_string(),
                detail: e.to_string(),
            })?;
        // Key collision or a hand-copied file: not ours.
        if entry.path != rel_path {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub fn put(&self, entry: &CacheEntry) -> StoreResult<()> {
        write_json_atomic(&self.entry_path(&entry.path), entry)
    }

    /// Remove the entry for `rel_path`. Returns whether one existed.
    pub fn remove(&self, rel_path: &str) -> StoreResult<bool> {
        let path = self.entry_path(rel_path);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = rel_path, "persistent cache entry removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path)(e)),
        }
    }

    /// Number of entry files on disk.
    pub fn len(&self) -> usize {
        std::fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{Symbol, SymbolKind};
    use tempfile::tempdir;

    fn entry(path: &str, fingerprint: &str) -> CacheEntry {
        CacheEntry::new(
            path,
            fingerprint,
            "test",
            vec![Symbol {
                name: "main".to_string(),
                kind: SymbolKind::Function,
                line: 1,
                indent: 0,
                scope: None,
                signature: "fn main()".to_string(),
            }],
        )
    }

    #[test]
    fn test_put_get_remove() {
        let dir = tempdir().unwrap();
        let cache = PersistentCache::new(dir.path());
        assert!(cache.get("src/main.rs").unwrap().is_none());

        cache.put(&entry("src/main.rs", "f1")).unwrap();
        let loaded = cache.get("src/main.rs").unwrap().unwrap();
        assert_eq!(loaded.fingerprint, "f1");
        assert_eq!(cache.len(), 1);

        assert!(cache.remove("src/main.rs").unwrap());
        assert!(!cache.remove("src/main.rs").unwrap());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupt_entry_reported() {
        let dir = tempdir().unwrap();
        let cache = PersistentCache::new(dir.path());
        std::fs::write(cache.entry_path("a.rs"), b"{\"path\": \"a.rs\", trunc").unwrap();
        assert!(matches!(
            cache.get("a.rs"),
            Err(GuardError::CacheCorruption { .. })
        ));
    }

    #[test]
    fn test_entry_for_other_path_is_ignored() {
        let dir = tempdir().unwrap();
        let cache = PersistentCache::new(dir.path());
        let other = entry("b.rs", "f");
        let bytes = serde_json::to_vec(&other).unwrap();
        std::fs::write(cache.entry_path("a.rs"), bytes).unwrap();
        assert!(cache.get("a.rs").unwrap().is_none());
    }
}
