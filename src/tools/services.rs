//! The per-repository components a session or CLI command works against.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{PersistentCache, SymbolCache};
use crate::config::Config;
use crate::explore::Explorer;
use crate::isolation::IsolationManager;
use crate::scanner::FileScanner;
use crate::search::{
    CorpusSync, Embedder, HashingEmbedder, SearchEngine, StaleReason, SyncReport, assess_staleness,
};
use crate::session::SessionArchive;
use crate::store::RepoStore;
use crate::symbols::{RegexSymbolExtractor, SymbolExtractor};

pub struct Services {
    pub config: Config,
    pub store: RepoStore,
    pub explorer: Explorer,
    pub engine: SearchEngine,
    pub isolation: IsolationManager,
    pub archive: SessionArchive,
    extractor: Arc<dyn SymbolExtractor>,
}

impl Services {
    /// Open the store (bootstrapping it on first use) and wire every
    /// component with the default extractor and embedder.
    pub fn open(config: Config) -> Result<Self> {
        let extractor: Arc<dyn SymbolExtractor> = Arc::new(RegexSymbolExtractor::new());
        let embedder: Arc<dyn Embedder> =
            Arc::new(HashingEmbedder::new(config.settings.search.embedding_dimension));
        Self::with_components(config, extractor, embedder)
    }

    pub fn with_components(
        config: Config,
        extractor: Arc<dyn SymbolExtractor>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        config.ensure_directories()?;
        let store = RepoStore::open(&config.state_dir).context("Failed to open state store")?;
        let scanner = FileScanner::new(&config.repo_root, &config.settings.search);
        let cache = SymbolCache::new(
            Arc::clone(&extractor),
            PersistentCache::new(store.symbol_cache_dir()),
        );
        let engine = SearchEngine::open(&store, embedder, config.settings.search.clone())
            .context("Failed to load search index")?;
        let isolation = IsolationManager::new(&config, &store);
        let archive = SessionArchive::new(&store.sessions_dir());
        debug!(state = %store.root().display(), "services opened");

        Ok(Self {
            config,
            store,
            explorer: Explorer::new(scanner, cache),
            engine,
            isolation,
            archive,
            extractor,
        })
    }

    /// Why the index needs a sync, if it does.
    pub fn staleness(&self) -> Result<Option<StaleReason>> {
        let manifest = self.store.load_manifest().context("Failed to read manifest")?;
        let stale_after = Duration::from_secs(self.config.settings.search.stale_after_secs);
        Ok(assess_staleness(manifest.as_ref(), Utc::now(), stale_after))
    }

    /// Bring the Forest in line with the working tree, then reload the
    /// engine and drop session-tier cache entries the sync invalidated.
    pub fn sync(&mut self) -> Result<SyncReport> {
        let report = CorpusSync::new(
            &self.store,
            self.explorer.scanner(),
            self.extractor.as_ref(),
            self.engine.embedder().as_ref(),
        )
        .run()
        .context("Corpus sync failed")?;

        for file in report.modified.iter().chain(&report.deleted) {
            self.explorer.cache_mut().invalidate(file);
        }
        let embedder = Arc::clone(self.engine.embedder());
        self.engine = SearchEngine::open(&self.store, embedder, self.config.settings.search.clone())
            .context("Failed to reload search index")?;
        Ok(report)
    }
}
