//! Map: the curated index of confirmed phrase → symbol agreements.
//!
//! Fed one way from successful sessions through the append-only agreement
//! log. For each phrase the agreements recorded by the most recent session
//! supersede older ones.

use std::collections::HashMap;
use uuid::Uuid;

use super::embedding::{Embedder, cosine};
use crate::errors::StoreResult;
use crate::store::{Agreement, RepoStore};

#[derive(Debug, Clone)]
struct MapEntry {
    agreement: Agreement,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct AgreementMap {
    /// Normalised phrase → (recording session, its agreements).
    phrases: HashMap<String, (Uuid, Vec<MapEntry>)>,
}

fn phrase_key(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl AgreementMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(store: &RepoStore, embedder: &dyn Embedder) -> StoreResult<Self> {
        let mut map = Self::new();
        for agreement in store.load_agreements()? {
            map.insert(agreement, embedder);
        }
        Ok(map)
    }

    /// Persist `agreement` to the log, then index it.
    pub fn record(
        &mut self,
        store: &RepoStore,
        agreement: Agreement,
        embedder: &dyn Embedder,
    ) -> StoreResult<()> {
        store.append_agreement(&agreement)?;
        self.insert(agreement, embedder);
        Ok(())
    }

    fn insert(&mut self, agreement: Agreement, embedder: &dyn Embedder) {
        let key = phrase_key(&agreement.phrase);
        let vector = embedder.embed(&agreement.phrase);
        let session = agreement.session_id;
        let entry = MapEntry { agreement, vector };
        match self.phrases.get_mut(&key) {
            Some((owner, entries)) if *owner == session => entries.push(entry),
            _ => {
                self.phrases.insert(key, (session, vec![entry]));
            }
        }
    }

    /// Number of live (non-superseded) agreements.
    pub fn len(&self) -> usize {
        self.phrases.values().map(|(_, entries)| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top `limit` live agreements by phrase similarity to `vector`.
    pub fn query(&self, vector: &[f32], limit: usize) -> Vec<(f32, &Agreement)> {
        let mut scored: Vec<(f32, &Agreement)> = self
            .phrases
            .values()
            .flat_map(|(_, entries)| entries.iter())
            .map(|entry| (cosine(vector, &entry.vector), &entry.agreement))
            .collect();
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        });
        scored.truncate(limit);
        scored
    }
}
