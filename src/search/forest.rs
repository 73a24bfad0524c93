//! Forest: the full-corpus chunk index.
//!
//! Chunks are cut per definition (from its line to the line before the next
//! definition). Files without definitions become a single chunk. Only corpus
//! sync mutates the Forest.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

use super::embedding::{Embedder, cosine};
use crate::errors::{StoreError, StoreResult};
use crate::store::{read_json, write_json_atomic};
use crate::symbols::{Symbol, SymbolKind};

pub const FOREST_SCHEMA_VERSION: u32 = 1;

/// Lines of a chunk fed to the embedder.
const EMBED_LINES: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestChunk {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SymbolKind>,
    pub start_line: usize,
    pub end_line: usize,
    /// Fingerprint of the whole file the chunk was cut from.
    pub fingerprint: String,
    pub text: String,
    pub vector: Vec<f32>,
}

impl ForestChunk {
    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.file, self.start_line, self.end_line)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedForest {
    schema_version: u32,
    embedder: String,
    dimension: usize,
    files: BTreeMap<String, Vec<ForestChunk>>,
}

#[derive(Debug, Default)]
pub struct Forest {
    embedder: String,
    dimension: usize,
    files: BTreeMap<String, Vec<ForestChunk>>,
    queries: AtomicUsize,
}

impl Forest {
    pub fn new(embedder: &dyn Embedder) -> Self {
        Self {
            embedder: embedder.id().to_string(),
            dimension: embedder.dimension(),
            files: BTreeMap::new(),
            queries: AtomicUsize::new(0),
        }
    }

    /// Load the persisted Forest. A missing file, or one built by a different
    /// embedder, yields an empty Forest.
    pub fn load_or_empty(path: &Path, embedder: &dyn Embedder) -> StoreResult<Self> {
        if !path.exists() {
            return Ok(Self::new(embedder));
        }
        let persisted: PersistedForest = read_json(path)?;
        if persisted.schema_version != FOREST_SCHEMA_VERSION {
            return Err(StoreError::Schema {
                path: path.to_path_buf(),
                found: persisted.schema_version,
                expected: FOREST_SCHEMA_VERSION,
            });
        }
        if persisted.embedder != embedder.id() || persisted.dimension != embedder.dimension() {
            warn!(
                found = %persisted.embedder,
                expected = embedder.id(),
                "forest built by a different embedder, starting empty"
            );
            return Ok(Self::new(embedder));
        }
        Ok(Self {
            embedder: persisted.embedder,
            dimension: persisted.dimension,
            files: persisted.files,
            queries: AtomicUsize::new(0),
        })
    }

    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let persisted = PersistedForest {
            schema_version: FOREST_SCHEMA_VERSION,
            embedder: self.embedder.clone(),
            dimension: self.dimension,
            files: self.files.clone(),
        };
        write_json_atomic(path, &persisted)
    }

    pub fn set_file(&mut self, file: &str, chunks: Vec<ForestChunk>) {
        self.files.insert(file.to_string(), chunks);
    }

    pub fn remove_file(&mut self, file: &str) -> bool {
        self.files.remove(file).is_some()
    }

    pub fn contains_file(&self, file: &str) -> bool {
        self.files.contains_key(file)
    }

    pub fn chunk_files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    pub fn chunks(&self, file: &str) -> &[ForestChunk] {
        self.files.get(file).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Top `limit` chunks by cosine similarity to `vector`.
    pub fn query(&self, vector: &[f32], limit: usize) -> Vec<(f32, &ForestChunk)> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let mut scored: Vec<(f32, &ForestChunk)> = self
            .files
            .values()
            .flatten()
            .map(|chunk| (cosine(vector, &chunk.vector), chunk))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(limit);
        scored
    }

    /// How many times `query` ran on this instance.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

/// Cut `content` into chunks at the given definitions and embed each one.
pub fn chunk_file(
    file: &str,
    content: &str,
    fingerprint: &str,
    symbols: &[Symbol],
    embedder: &dyn Embedder,
) -> Vec<ForestChunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut starts: Vec<&Symbol> = symbols.iter().filter(|s| s.line >= 1).collect();
    starts.sort_by_key(|s| s.line);
    starts.dedup_by_key(|s| s.line);

    let mut spans: Vec<(Option<&Symbol>, usize, usize)> = Vec::new();
    if starts.is_empty() {
        spans.push((None, 1, lines.len()));
    } else {
        if starts[0].line > 1 {
            spans.push((None, 1, starts[0].line - 1));
        }
        for (idx, sym) in starts.iter().enumerate() {
            let end = starts
                .get(idx + 1)
                .map(|next| next.line - 1)
                .unwrap_or(lines.len());
            spans.push((Some(sym), sym.line, end.max(sym.line)));
        }
    }

    spans
        .into_iter()
        .filter_map(|(sym, start, end)| {
            let end = end.min(lines.len());
            let text = lines[start - 1..end].join("\n");
            if text.trim().is_empty() {
                return None;
            }
            let head: String = lines[start - 1..end.min(start - 1 + EMBED_LINES)].join("\n");
            let embed_text = match sym {
                Some(s) => format!("{} {} {}", file, s.name, head),
                None => format!("{} {}", file, head),
            };
            Some(ForestChunk {
                file: file.to_string(),
                symbol: sym.map(|s| s.name.clone()),
                kind: sym.map(|s| s.kind),
                start_line: start,
                end_line: end,
                fingerprint: fingerprint.to_string(),
                text,
                vector: embedder.embed(&embed_text),
            })
        })
        .collect()
}
