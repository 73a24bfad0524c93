//! Incremental corpus sync and staleness assessment.
//!
//! Ordering: the Forest and then the manifest are written durably before any
//! cache entry is invalidated, so an interrupted sync never leaves the cache
//! pointing at a fingerprint the manifest does not know.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::embedding::Embedder;
use super::forest::{Forest, chunk_file};
use crate::cache::{PersistentCache, fingerprint};
use crate::errors::StoreResult;
use crate::scanner::FileScanner;
use crate::store::{Manifest, RepoStore};
use crate::symbols::SymbolExtractor;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
    pub chunks: usize,
    pub invalidated: usize,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn changed(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StaleReason {
    ManifestMissing,
    Elapsed { age_secs: u64 },
}

/// Why the index should be re-synced, if at all.
pub fn assess_staleness(
    manifest: Option<&Manifest>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Option<StaleReason> {
    let Some(manifest) = manifest else {
        return Some(StaleReason::ManifestMissing);
    };
    let age_secs = (now - manifest.synced_at).num_seconds().max(0) as u64;
    (age_secs > stale_after.as_secs()).then_some(StaleReason::Elapsed { age_secs })
}

pub struct CorpusSync<'a> {
    store: &'a RepoStore,
    scanner: &'a FileScanner,
    extractor: &'a dyn SymbolExtractor,
    embedder: &'a dyn Embedder,
}

impl<'a> CorpusSync<'a> {
    pub fn new(
        store: &'a RepoStore,
        scanner: &'a FileScanner,
        extractor: &'a dyn SymbolExtractor,
        embedder: &'a dyn Embedder,
    ) -> Self {
        Self {
            store,
            scanner,
            extractor,
            embedder,
        }
    }

    pub fn run(&self) -> StoreResult<SyncReport> {
        let started = Instant::now();
        let previous = self.store.load_manifest()?;
        let previous_files = previous.map(|m| m.files).unwrap_or_default();
        let mut forest = Forest::load_or_empty(&self.store.forest_path(), self.embedder)?;

        let mut report = SyncReport::default();
        let mut current: BTreeMap<String, String> = BTreeMap::new();

        for file in self.scanner.scan() {
            let Some(content) = self.scanner.read(&file) else {
                debug!(file, "skipping unreadable file");
                continue;
            };
            let fp = fingerprint(content.as_bytes());
            let known = previous_files.get(&file);
            let needs_embedding = known != Some(&fp) || !forest.contains_file(&file);

            match known {
                None => report.added.push(file.clone()),
                Some(old) if *old != fp => report.modified.push(file.clone()),
                Some(_) => report.unchanged += 1,
            }

            if needs_embedding {
                let symbols = self.extractor.extract(&file, &content);
                let chunks = chunk_file(&file, &content, &fp, &symbols, self.embedder);
                forest.set_file(&file, chunks);
            }
            current.insert(file, fp);
        }

        for file in previous_files.keys() {
            if !current.contains_key(file) {
                forest.remove_file(file);
                report.deleted.push(file.clone());
            }
        }
        // Forest entries for files no longer scanned at all (config change).
        let orphaned: Vec<String> = forest
            .chunk_files()
            .filter(|f| !current.contains_key(*f))
            .map(str::to_string)
            .collect();
        for file in orphaned {
            forest.remove_file(&file);
        }

        report.chunks = forest.chunk_count();
        forest.save(&self.store.forest_path())?;
        self.store.save_manifest(&Manifest::new(current))?;

        let cache = PersistentCache::new(self.store.symbol_cache_dir());
        for file in report.modified.iter().chain(&report.deleted).chain(&report.added) {
            match cache.remove(file) {
                Ok(true) => report.invalidated += 1,
                Ok(false) => {}
                Err(e) => warn!(file, error = %e, "failed to invalidate cache entry"),
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            added = report.added.len(),
            modified = report.modified.len(),
            deleted = report.deleted.len(),
            unchanged = report.unchanged,
            chunks = report.chunks,
            invalidated = report.invalidated,
            "corpus sync complete"
        );
        Ok(report)
    }
}
