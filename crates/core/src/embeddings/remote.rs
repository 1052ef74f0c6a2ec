use super::{EmbeddingModel, ModelLoader};
use crate::error::EmbeddingError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::runtime::Handle;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RemoteEmbeddingConfig {
    pub endpoint: Url,
    pub api_key: Option<String>,
    pub model: String,
    pub dimensions: usize,
    version: String,
}

impl RemoteEmbeddingConfig {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        dimensions: usize,
    ) -> Result<Self, EmbeddingError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|error| EmbeddingError::Load(format!("invalid endpoint {endpoint}: {error}")))?;
        let model = model.into();
        Ok(Self {
            endpoint,
            api_key,
            version: format!("remote:{model}"),
            model,
            dimensions,
        })
    }

    /// Reads `EMBEDDING_ENDPOINT`, `EMBEDDING_API_KEY`, `EMBEDDING_MODEL`
    /// and `EMBEDDING_DIMENSIONS`. Returns `None` when no endpoint is set.
    pub fn from_env() -> Option<Result<Self, EmbeddingError>> {
        let endpoint = non_empty_env("EMBEDDING_ENDPOINT")?;
        let api_key = non_empty_env("EMBEDDING_API_KEY");
        let model =
            non_empty_env("EMBEDDING_MODEL").unwrap_or_else(|| "all-MiniLM-L6-v2".to_string());
        let dimensions = match non_empty_env("EMBEDDING_DIMENSIONS") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(value) if value > 0 => value,
                _ => {
                    return Some(Err(EmbeddingError::Load(format!(
                        "EMBEDDING_DIMENSIONS must be a positive integer, got {raw}"
                    ))))
                }
            },
            None => super::DEFAULT_EMBEDDING_DIMENSIONS,
        };

        Some(Self::new(&endpoint, api_key, model, dimensions))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let value = value.trim().to_string();
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    })
}

impl ModelLoader for RemoteEmbeddingConfig {
    type Model = RemoteEmbeddingModel;

    fn model_version(&self) -> &str {
        &self.version
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn load(&self) -> Result<Self::Model, EmbeddingError> {
        let runtime = Handle::try_current().map_err(|error| EmbeddingError::Load(error.to_string()))?;
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(RemoteEmbeddingModel {
            client,
            runtime,
            config: self.clone(),
        })
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct RemoteEmbeddingModel {
    client: Client,
    runtime: Handle,
    config: RemoteEmbeddingConfig,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl RemoteEmbeddingModel {
    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self
            .client
            .post(self.config.endpoint.clone())
            .header("content-type", "application/json")
            .json(&EmbeddingRequest {
                model: &self.config.model,
                input: texts,
            });

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EmbeddingError::Inference(format!(
                "embedding request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: EmbeddingResponse = response.json().await?;
        payload_to_vectors(payload, texts.len())
    }
}

impl EmbeddingModel for RemoteEmbeddingModel {
    // Blocks on the runtime captured at load; only call from a blocking
    // thread (EmbeddingHandle uses spawn_blocking).
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.runtime.block_on(self.request(texts))
    }
}

fn payload_to_vectors(
    payload: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if payload.data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: payload.data.len(),
        });
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (position, datum) in payload.data.into_iter().enumerate() {
        let index = datum.index.unwrap_or(position);
        let Some(slot) = slots.get_mut(index).filter(|slot| slot.is_none()) else {
            return Err(EmbeddingError::Inference(format!(
                "response index {index} is out of range or repeated"
            )));
        };
        *slot = Some(datum.embedding);
    }

    Ok(slots.into_iter().flatten().collect())
}
