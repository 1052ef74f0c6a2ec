use crate::state::IngestStage;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("invalid page map: {0}")]
    InvalidPageMap(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("invalid chunking config: {0}")]
    InvalidConfig(String),

    #[error("normalized text is empty or whitespace-only")]
    EmptyText,
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding batch is empty")]
    EmptyBatch,

    #[error("input {index} has {len} characters, limit is {max}")]
    InputTooLong { index: usize, len: usize, max: usize },

    #[error("embedding model failed to load: {0}")]
    Load(String),

    #[error("embedding inference failed: {0}")]
    Inference(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("provider returned a {actual}-dimensional vector, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("vector has {actual} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("chunk id already indexed: {0}")]
    DuplicateId(String),

    #[error("vector for {0} contains a non-finite component")]
    NonFiniteVector(String),

    #[error("index dimension must be at least 1")]
    ZeroDimension,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot move ingestion from {from:?} to {to:?}")]
    Invalid { from: IngestStage, to: IngestStage },

    #[error("ingestion already failed during {stage:?}")]
    AlreadyFailed { stage: IngestStage },

    #[error("ingestion already complete")]
    AlreadyComplete,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error(transparent)]
    Chunking(#[from] ChunkingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("embedding provider failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("query embedding timed out after {0:?}")]
    Timeout(Duration),

    #[error("search worker failed: {0}")]
    Worker(String),
}

impl SearchError {
    /// Provider outages, timeouts and worker failures may succeed on retry;
    /// argument and contract violations will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Embedding(error) => matches!(
                error,
                EmbeddingError::Inference(_) | EmbeddingError::Http(_) | EmbeddingError::Load(_)
            ),
            Self::Timeout(_) | Self::Worker(_) => true,
            Self::InvalidArgument(_) | Self::UnknownCollection(_) | Self::Index(_) => false,
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
