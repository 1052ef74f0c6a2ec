pub mod chunking;
pub mod config;
pub mod dedup;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod latency;
pub mod models;
pub mod normalize;
pub mod persist;
pub mod provenance;
pub mod state;
pub mod traits;

pub use chunking::{build_chunks, make_chunk_id, Chunker, TextSpan};
pub use config::{ChunkingConfig, EngineConfig, DEFAULT_COLLECTION};
pub use dedup::{ContentDeduplicator, Registration};
pub use embeddings::{
    CharacterNgramEmbedder, EmbeddingHandle, RemoteEmbeddingConfig, RemoteEmbeddingModel,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use engine::SearchEngine;
pub use error::{
    ChunkingError, EmbeddingError, ExtractionError, IndexError, IngestError, SearchError,
    TransitionError,
};
pub use extractor::{ExtractedText, LopdfExtractor, PlainTextExtractor};
pub use index::{IndexEntry, ScoredChunk, VectorIndex};
pub use ingest::{content_digest, discover_datasheets, load_datasheet};
pub use latency::LatencySnapshot;
pub use models::{
    ChunkId, ChunkMetadata, CollectionStats, ComponentMetadata, DeleteReport, IngestReport,
    IngestRequest, IngestStatus, MetadataFilter, PageMap, Provenance, SearchOutcome, SearchResult,
};
pub use normalize::TextNormalizer;
pub use provenance::ProvenanceCatalog;
pub use state::{IngestStage, IngestTracker};
pub use traits::{EmbeddingProvider, TextExtractor};
