use super::{EmbeddingModel, ModelLoader};
use crate::error::EmbeddingError;

const DEFAULT: usize = 384;
const MODEL_VERSION: &str = "char-ngram-v1";

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Hashed character-trigram embedder. Deterministic, dependency free and
/// fast enough for tests and offline use; its vectors are L2-normalized.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl EmbeddingModel for CharacterNgramEmbedder {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed(text)).collect())
    }
}

impl ModelLoader for CharacterNgramEmbedder {
    type Model = Self;

    fn model_version(&self) -> &str {
        MODEL_VERSION
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn load(&self) -> Result<Self::Model, EmbeddingError> {
        Ok(*self)
    }
}
