//! Unified Map-then-Forest search with short-circuit, and symbol relevance
//! scoring in the same embedding space.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::embedding::{Embedder, cosine};
use super::forest::Forest;
use super::map::AgreementMap;
use crate::errors::StoreResult;
use crate::guard_config::SearchSection;
use crate::store::{Agreement, RepoStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Map,
    Forest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub source: HitSource,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// Agreement phrase for Map hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phrase: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub query: String,
    pub hits: Vec<SearchHit>,
    pub short_circuited: bool,
    pub forest_queried: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceVerdict {
    /// Auto-approved; recorded as fact.
    Fact,
    /// Approved, but the session risk is raised to HIGH.
    ApprovedHighRisk,
    /// Rejected; the caller should go back to exploration.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Relevance {
    pub score: f32,
    pub verdict: RelevanceVerdict,
}

pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
    forest: Forest,
    map: AgreementMap,
    settings: SearchSection,
}

impl SearchEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        forest: Forest,
        map: AgreementMap,
        settings: SearchSection,
    ) -> Self {
        Self {
            embedder,
            forest,
            map,
            settings,
        }
    }

    /// Load Forest and Map from the store.
    pub fn open(
        store: &RepoStore,
        embedder: Arc<dyn Embedder>,
        settings: SearchSection,
    ) -> StoreResult<Self> {
        let forest = Forest::load_or_empty(&store.forest_path(), embedder.as_ref())?;
        let map = AgreementMap::load(store, embedder.as_ref())?;
        Ok(Self::new(embedder, forest, map, settings))
    }

    pub fn forest(&self) -> &Forest {
        &self.forest
    }

    pub fn map(&self) -> &AgreementMap {
        &self.map
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Query the Map; a hit at or above the short-circuit threshold skips the
    /// Forest entirely. Otherwise both result sets are merged by score.
    pub fn search(&self, query: &str) -> SearchOutcome {
        let vector = self.embedder.embed(query);

        let mut hits: Vec<SearchHit> = self
            .map
            .query(&vector, self.settings.map_limit)
            .into_iter()
            .filter(|(score, _)| *score > 0.0)
            .map(|(score, agreement)| SearchHit {
                source: HitSource::Map,
                score,
                file: agreement.file.clone(),
                symbol: Some(agreement.symbol.clone()),
                line: None,
                phrase: Some(agreement.phrase.clone()),
            })
            .collect();

        let short_circuited = hits
            .iter()
            .any(|hit| hit.score >= self.settings.short_circuit_threshold);
        if short_circuited {
            debug!(query, map_hits = hits.len(), "map short-circuit");
            return SearchOutcome {
                query: query.to_string(),
                hits,
                short_circuited: true,
                forest_queried: false,
            };
        }

        hits.extend(
            self.forest
                .query(&vector, self.settings.forest_limit)
                .into_iter()
                .filter(|(score, _)| *score > 0.0)
                .map(|(score, chunk)| SearchHit {
                    source: HitSource::Forest,
                    score,
                    file: Some(chunk.file.clone()),
                    symbol: chunk.symbol.clone(),
                    line: Some(chunk.start_line),
                    phrase: None,
                }),
        );
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(query, hits = hits.len(), "map+forest search");

        SearchOutcome {
            query: query.to_string(),
            hits,
            short_circuited: false,
            forest_queried: true,
        }
    }

    pub fn similarity(&self, a: &str, b: &str) -> f32 {
        cosine(&self.embedder.embed(a), &self.embedder.embed(b))
    }

    /// Score how well `symbol_text` matches the request phrase.
    pub fn confirm_relevance(&self, phrase: &str, symbol_text: &str) -> Relevance {
        let score = self.similarity(phrase, symbol_text);
        let verdict = if score > self.settings.relevance_fact_threshold {
            RelevanceVerdict::Fact
        } else if score >= self.settings.relevance_reject_threshold {
            RelevanceVerdict::ApprovedHighRisk
        } else {
            RelevanceVerdict::Rejected
        };
        Relevance { score, verdict }
    }

    /// Append agreements from a successful session to the Map.
    pub fn record_agreements(
        &mut self,
        store: &RepoStore,
        agreements: Vec<Agreement>,
    ) -> StoreResult<usize> {
        let count = agreements.len();
        for agreement in agreements {
            self.map.record(store, agreement, self.embedder.as_ref())?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::embedding::HashingEmbedder;
    use crate::search::forest::chunk_file;
    use crate::symbols::{RegexSymbolExtractor, SymbolExtractor};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn engine_with_forest(dir: &std::path::Path) -> (SearchEngine, RepoStore) {
        let store = RepoStore::open(dir).unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(128));
        let mut forest = Forest::new(embedder.as_ref());
        let source = "fn validate_password(p: &str) -> bool {\n    !p.is_empty()\n}\n\nfn render_header() {}\n";
        let symbols = RegexSymbolExtractor::new().extract("src/auth.rs", source);
        forest.set_file(
            "src/auth.rs",
            chunk_file("src/auth.rs", source, "fp", &symbols, embedder.as_ref()),
        );
        let engine = SearchEngine::new(
            embedder,
            forest,
            AgreementMap::new(),
            SearchSection::default(),
        );
        (engine, store)
    }

    #[test]
    fn test_map_hit_short_circuits_forest() {
        let dir = tempdir().unwrap();
        let (mut engine, store) = engine_with_forest(dir.path());
        engine
            .record_agreements(
                &store,
                vec![Agreement::new(
                    "empty password error",
                    "validate_password",
                    Some("src/auth.rs".to_string()),
                    "",
                    Uuid::new_v4(),
                )],
            )
            .unwrap();

        let outcome = engine.search("empty password error");
        assert!(outcome.short_circuited);
        assert!(!outcome.forest_queried);
        assert_eq!(engine.forest().query_count(), 0);
        assert!(outcome.hits.iter().all(|h| h.source == HitSource::Map));
        assert_eq!(outcome.hits[0].symbol.as_deref(), Some("validate_password"));
    }

    #[test]
    fn test_weak_map_hit_merges_both_sources() {
        let dir = tempdir().unwrap();
        let (mut engine, store) = engine_with_forest(dir.path());
        engine
            .record_agreements(
                &store,
                vec![Agreement::new(
                    "password",
                    "validate_password",
                    None,
                    "",
                    Uuid::new_v4(),
                )],
            )
            .unwrap();

        let outcome = engine.search("render the header password");
        assert!(!outcome.short_circuited);
        assert!(outcome.forest_queried);
        assert_eq!(engine.forest().query_count(), 1);
        assert!(outcome.hits.iter().any(|h| h.source == HitSource::Map));
        assert!(outcome.hits.iter().any(|h| h.source == HitSource::Forest));
        assert!(outcome.hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_empty_map_queries_forest() {
        let dir = tempdir().unwrap();
        let (engine, _store) = engine_with_forest(dir.path());
        let outcome = engine.search("validate password");
        assert!(outcome.forest_queried);
        assert_eq!(outcome.hits[0].symbol.as_deref(), Some("validate_password"));
        assert_eq!(outcome.hits[0].line, Some(1));
    }

    #[test]
    fn test_relevance_bands() {
        let dir = tempdir().unwrap();
        let (engine, _store) = engine_with_forest(dir.path());
        let same = engine.confirm_relevance("login button", "LoginButton");
        assert_eq!(same.verdict, RelevanceVerdict::Fact);
        let unrelated = engine.confirm_relevance("login button", "database migration rollback");
        assert_eq!(unrelated.verdict, RelevanceVerdict::Rejected);
    }
}
