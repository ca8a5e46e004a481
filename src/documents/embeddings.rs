// Embedding engines for the vector index
//
// The hashing engine needs no model files; it is the offline fallback and
// what the tests run against.

use anyhow::Result;

/// Trait for embedding engines
pub trait EmbeddingEngine: Send + Sync {
    /// Generate embedding vector for text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Bag-of-words feature hashing into a fixed-size unit vector
pub struct HashingEmbedding {
    dimension: usize,
}

impl HashingEmbedding {
    pub fn new() -> Self {
        Self::with_dimension(384)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { dimension }
    }

    fn hash_embed(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut embedding = vec![0.0; self.dimension];

        let words = text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty());

        for word in words {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let hash = hasher.finish();

            // Spread each word over several dimensions
            for j in 0..4 {
                let idx = (hash >> (j * 16)) as usize % self.dimension;
                embedding[idx] += 1.0;
            }
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        embedding
    }
}

impl EmbeddingEngine for HashingEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.hash_embed(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

impl Default for HashingEmbedding {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_dimension() {
        let engine = HashingEmbedding::new();
        assert_eq!(engine.embed("Hello world").unwrap().len(), 384);
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let engine = HashingEmbedding::new();
        let a = engine.embed("Morning run!").unwrap();
        let b = engine.embed("morning RUN").unwrap();
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_related_text_scores_higher() {
        let engine = HashingEmbedding::new();
        let query = engine.embed("evening run in the park").unwrap();
        let related = engine.embed("run in the park").unwrap();
        let unrelated = engine.embed("quarterly budget spreadsheet").unwrap();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let engine = HashingEmbedding::new();
        let emb = engine.embed("   ").unwrap();
        assert!(emb.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&emb, &emb), 0.0);
    }

    #[test]
    fn test_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
