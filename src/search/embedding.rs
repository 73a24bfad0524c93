//! Embedding seam and the built-in deterministic embedder.

/// Maps text into a fixed-dimension vector space shared by Forest and Map.
pub trait Embedder: Send + Sync {
    /// Identifier persisted with the Forest; a different id forces re-embedding.
    fn id(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Feature-hashing embedder over identifier sub-words and character
/// trigrams. Deterministic and offline; vectors are L2-normalised and
/// non-negative, so cosine similarity lies in `0.0..=1.0`.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            id: format!("hashing-{}", dimension),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashingEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in tokenize(text) {
            vector[bucket(word.as_bytes(), self.dimension)] += 1.0;
            let padded: Vec<char> = format!("^{}$", word).chars().collect();
            for tri in padded.windows(3) {
                let tri: String = tri.iter().collect();
                vector[bucket(tri.as_bytes(), self.dimension)] += 0.5;
            }
        }
        normalize(&mut vector);
        vector
    }
}

/// Lower-cased sub-words, splitting on non-alphanumerics, `snake_case` and
/// `camelCase` boundaries.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let mut current = String::new();
        let mut prev_lower = false;
        for c in raw.chars() {
            if c.is_uppercase() && prev_lower && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
            current.extend(c.to_lowercase());
        }
        if !current.is_empty() {
            words.push(current);
        }
    }
    words
}

fn bucket(bytes: &[u8], dimension: usize) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % dimension as u64) as usize
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity; `0.0` for mismatched or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_identifiers() {
        assert_eq!(
            tokenize("LoginButton handle_submit HTTPServer v2"),
            vec!["login", "button", "handle", "submit", "httpserver", "v2"]
        );
    }

    #[test]
    fn test_identical_text_scores_one() {
        let e = HashingEmbedder::new(128);
        let a = e.embed("password validation");
        assert_eq!(a.len(), 128);
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_identifier_forms_are_close() {
        let e = HashingEmbedder::default();
        let phrase = e.embed("login button");
        let ident = e.embed("LoginButton");
        let unrelated = e.embed("database migration rollback");
        assert!(cosine(&phrase, &ident) > 0.9);
        assert!(cosine(&phrase, &unrelated) < 0.3);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(16);
        let v = e.embed("  ,, ");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine(&v, &e.embed("x")), 0.0);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
