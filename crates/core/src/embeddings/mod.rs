pub mod ngram;
pub mod remote;

pub use ngram::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use remote::{RemoteEmbeddingConfig, RemoteEmbeddingModel};

use crate::error::EmbeddingError;
use crate::traits::EmbeddingProvider;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// A loaded model. Shared read-only across concurrent inference calls.
pub trait EmbeddingModel: Send + Sync + 'static {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Knows the identity of a model before it is loaded, and how to load it.
pub trait ModelLoader: Send + Sync + 'static {
    type Model: EmbeddingModel;

    fn model_version(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn load(&self) -> Result<Self::Model, EmbeddingError>;
}

/// Lazily initialized embedding model.
///
/// The first `embed` call loads the model; concurrent callers wait for that
/// single load and then share the model without further locking.
pub struct EmbeddingHandle<L: ModelLoader> {
    loader: Arc<L>,
    model: OnceCell<Arc<L::Model>>,
    max_input_chars: usize,
}

impl<L: ModelLoader> EmbeddingHandle<L> {
    pub fn new(loader: L, max_input_chars: usize) -> Self {
        Self {
            loader: Arc::new(loader),
            model: OnceCell::new(),
            max_input_chars,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn model(&self) -> Result<Arc<L::Model>, EmbeddingError> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                info!(model = loader.model_version(), "loading embedding model");
                let loaded = tokio::task::spawn_blocking(move || loader.load())
                    .await
                    .map_err(|error| EmbeddingError::Load(error.to_string()))??;
                Ok::<_, EmbeddingError>(Arc::new(loaded))
            })
            .await?;
        Ok(Arc::clone(model))
    }
}

#[async_trait]
impl<L: ModelLoader> EmbeddingProvider for EmbeddingHandle<L> {
    fn model_version(&self) -> &str {
        self.loader.model_version()
    }

    fn dimensions(&self) -> usize {
        self.loader.dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        validate_batch(texts, self.max_input_chars)?;
        let model = self.model().await?;

        let batch = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || model.embed_batch(&batch))
            .await
            .map_err(|error| EmbeddingError::Inference(error.to_string()))??;

        check_output(texts.len(), self.dimensions(), &vectors)?;
        debug!(inputs = texts.len(), "embedded batch");
        Ok(vectors)
    }
}

pub fn validate_batch(texts: &[String], max_input_chars: usize) -> Result<(), EmbeddingError> {
    if texts.is_empty() {
        return Err(EmbeddingError::EmptyBatch);
    }
    for (index, text) in texts.iter().enumerate() {
        let len = text.chars().count();
        if len > max_input_chars {
            return Err(EmbeddingError::InputTooLong {
                index,
                len,
                max: max_input_chars,
            });
        }
    }
    Ok(())
}

pub fn check_output(
    expected_count: usize,
    dimensions: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbeddingError> {
    if vectors.len() != expected_count {
        return Err(EmbeddingError::CountMismatch {
            expected: expected_count,
            actual: vectors.len(),
        });
    }
    if let Some(vector) = vectors.iter().find(|vector| vector.len() != dimensions) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimensions,
            actual: vector.len(),
        });
    }
    Ok(())
}
