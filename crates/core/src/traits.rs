use crate::error::{EmbeddingError, ExtractionError};
use crate::extractor::ExtractedText;
use async_trait::async_trait;

/// Maps an ordered batch of strings to vectors of one fixed dimension.
///
/// Implementations return exactly one vector per input, in input order, and
/// fail with [`EmbeddingError::EmptyBatch`] or
/// [`EmbeddingError::InputTooLong`] for invalid batches.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_version(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

pub trait TextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractionError>;
}
