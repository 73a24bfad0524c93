//! Forest/Map semantic search.
//!
//! - `embedding`: the `Embedder` seam and a deterministic hashing embedder
//! - `forest`: full-corpus chunk index, rebuilt incrementally by `sync`
//! - `map`: curated agreements fed from successful sessions
//! - `engine`: unified Map-then-Forest query with short-circuit
//! - `sync`: fingerprint manifest diffing and staleness

pub mod embedding;
pub mod engine;
pub mod forest;
pub mod map;
pub mod sync;

pub use embedding::{Embedder, HashingEmbedder, cosine};
pub use engine::{HitSource, Relevance, RelevanceVerdict, SearchEngine, SearchHit, SearchOutcome};
pub use forest::{Forest, ForestChunk};
pub use map::AgreementMap;
pub use sync::{CorpusSync, StaleReason, SyncReport, assess_staleness};
