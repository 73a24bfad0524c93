//! Two-tier symbol cache.
//!
//! Lookup order is session memory, then the persistent disk tier, then a cold
//! extraction that populates both. Every entry carries the content fingerprint
//! it was extracted from and is only served while that fingerprint matches.

pub mod persistent;

pub use persistent::PersistentCache;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::symbols::{Symbol, SymbolExtractor};

/// SHA-256 hex of file content.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: String,
    pub fingerprint: String,
    /// Extractor id that produced `symbols`.
    pub extractor: String,
    pub symbols: Vec<Symbol>,
    pub captured_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        path: impl Into<String>,
        fingerprint: impl Into<String>,
        extractor: impl Into<String>,
        symbols: Vec<Symbol>,
    ) -> Self {
        Self {
            path: path.into(),
            fingerprint: fingerprint.into(),
            extractor: extractor.into(),
            symbols,
            captured_at: Utc::now(),
        }
    }

    fn is_valid_for(&self, fingerprint: &str, extractor: &str) -> bool {
        self.fingerprint == fingerprint && self.extractor == extractor
    }
}

/// Where a lookup was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Session,
    Persistent,
    Cold,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Distinct paths looked up.
    pub scanned: usize,
    /// Scanned paths with a valid persistent entry right now.
    pub cached: usize,
}

pub struct SymbolCache {
    extractor: Arc<dyn SymbolExtractor>,
    persistent: PersistentCache,
    session: HashMap<String, CacheEntry>,
    /// Path → fingerprint seen at its latest lookup.
    scanned: BTreeMap<String, String>,
    hits: u64,
    misses: u64,
}

impl SymbolCache {
    pub fn new(extractor: Arc<dyn SymbolExtractor>, persistent: PersistentCache) -> Self {
        Self {
            extractor,
            persistent,
            session: HashMap::new(),
            scanned: BTreeMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn extractor(&self) -> &Arc<dyn SymbolExtractor> {
        &self.extractor
    }

    pub fn persistent(&self) -> &PersistentCache {
        &self.persistent
    }

    /// Symbols defined in `path`, whose current content is `content`.
    pub fn symbols(&mut self, path: &str, content: &str) -> Vec<Symbol> {
        self.lookup(path, content).0
    }

    pub fn lookup(&mut self, path: &str, content: &str) -> (Vec<Symbol>, CacheTier) {
        let fp = fingerprint(content.as_bytes());
        let extractor_id = self.extractor.id().to_string();
        self.scanned.insert(path.to_string(), fp.clone());

        if let Some(entry) = self.session.get(path) {
            if entry.is_valid_for(&fp, &extractor_id) {
                self.hits += 1;
                return (entry.symbols.clone(), CacheTier::Session);
            }
            debug!(path, "session cache entry stale");
            self.session.remove(path);
        }

        match self.persistent.get(path) {
            Ok(Some(entry)) if entry.is_valid_for(&fp, &extractor_id) => {
                self.hits += 1;
                let symbols = entry.symbols.clone();
                self.session.insert(path.to_string(), entry);
                return (symbols, CacheTier::Persistent);
            }
            Ok(Some(_)) => {
                debug!(path, "persistent cache entry stale, evicting");
                self.evict_persistent(path);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "falling back to cold extraction");
                self.evict_persistent(path);
            }
        }

        self.misses += 1;
        let symbols = self.extractor.extract(path, content);
        let entry = CacheEntry::new(path, fp, extractor_id, symbols.clone());
        if let Err(e) = self.persistent.put(&entry) {
            warn!(path, error = %e, "failed to persist cache entry");
        }
        self.session.insert(path.to_string(), entry);
        (symbols, CacheTier::Cold)
    }

    /// Drop both tiers for `path`.
    pub fn invalidate(&mut self, path: &str) {
        self.session.remove(path);
        self.evict_persistent(path);
    }

    /// Forget the session tier. Persistent entries survive.
    pub fn end_session(&mut self) {
        self.session.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let extractor_id = self.extractor.id();
        let cached = self
            .scanned
            .iter()
            .filter(|(path, fp)| {
                matches!(
                    self.persistent.get(path),
                    Ok(Some(entry)) if entry.is_valid_for(fp, extractor_id)
                )
            })
            .count();
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            scanned: self.scanned.len(),
            cached,
        }
    }

    fn evict_persistent(&self, path: &str) {
        if let Err(e) = self.persistent.remove(path) {
            warn!(path, error = %e, "failed to evict persistent cache entry");
        }
    }
}
