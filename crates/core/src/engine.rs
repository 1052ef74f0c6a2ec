//! Collection registry plus the ingestion and search pipelines.
//!
//! Ingestion is serialized per collection by an async mutex that also guards
//! the deduplicator. Searches never take that mutex: they only read the
//! vector index and the provenance catalog.

use crate::chunking::{build_chunks, Chunker, DocumentContext};
use crate::config::EngineConfig;
use crate::dedup::{ContentDeduplicator, Registration};
use crate::error::{ChunkingError, EmbeddingError, IndexError, IngestError, SearchError};
use crate::index::{IndexEntry, VectorIndex};
use crate::ingest::content_digest;
use crate::latency::{LatencySnapshot, LatencyTracker};
use crate::models::{
    Chunk, ChunkId, CollectionStats, DeleteReport, DocumentRecord, IngestReport, IngestRequest,
    IngestStatus, MetadataFilter, SearchOutcome, SearchResult,
};
use crate::normalize::TextNormalizer;
use crate::provenance::{CatalogEntry, ProvenanceCatalog};
use crate::state::{IngestStage, IngestTracker};
use crate::traits::EmbeddingProvider;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub(crate) struct Collection {
    pub(crate) name: String,
    pub(crate) model_version: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) vectors: VectorIndex,
    pub(crate) provenance: ProvenanceCatalog,
    pub(crate) ingest: Mutex<ContentDeduplicator>,
    /// Mirrors the deduplicator's record count so stats never wait on an
    /// ingestion in flight.
    documents: AtomicUsize,
    mismatch_warned: AtomicBool,
}

impl Collection {
    pub(crate) fn new(
        name: String,
        dimension: usize,
        model_version: String,
        created_at: DateTime<Utc>,
    ) -> Result<Self, IndexError> {
        Ok(Self {
            name,
            model_version,
            created_at,
            vectors: VectorIndex::new(dimension)?,
            provenance: ProvenanceCatalog::new(),
            ingest: Mutex::new(ContentDeduplicator::new()),
            documents: AtomicUsize::new(0),
            mismatch_warned: AtomicBool::new(false),
        })
    }

    /// Call with the ingestion lock held, after the deduplicator changed.
    pub(crate) fn set_document_count(&self, count: usize) {
        self.documents.store(count, Ordering::Release);
    }

    fn document_count(&self) -> usize {
        self.documents.load(Ordering::Acquire)
    }

    fn version_mismatch(&self, provider_version: &str) -> bool {
        let mismatch = self.model_version != provider_version;
        if mismatch && !self.mismatch_warned.swap(true, Ordering::Relaxed) {
            warn!(
                collection = %self.name,
                stored = %self.model_version,
                provider = %provider_version,
                "embedding model version differs from the one this collection was built with"
            );
        }
        mismatch
    }
}

pub struct SearchEngine<P: EmbeddingProvider + ?Sized = dyn EmbeddingProvider> {
    provider: Arc<P>,
    config: EngineConfig,
    normalizer: TextNormalizer,
    chunker: Chunker,
    pub(crate) collections: RwLock<HashMap<String, Arc<Collection>>>,
    latency: LatencyTracker,
}

impl<P: EmbeddingProvider + ?Sized> SearchEngine<P> {
    pub fn new(provider: Arc<P>, config: EngineConfig) -> Result<Self, IngestError> {
        config.validate()?;
        let chunker = Chunker::new(config.chunking)?;
        let latency = LatencyTracker::new(config.search_budget(), config.latency_window);

        Ok(Self {
            provider,
            normalizer: TextNormalizer::new()?,
            chunker,
            collections: RwLock::new(HashMap::new()),
            latency,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Creates the collection if it does not exist yet. Its dimension and
    /// model version come from the current provider.
    ///
    /// Names are limited to ASCII letters, digits, `_` and `-` since they
    /// double as snapshot file names.
    pub fn create_collection(&self, name: &str) -> Result<(), IngestError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|character| character.is_ascii_alphanumeric() || matches!(character, '_' | '-'));
        if !valid {
            return Err(IngestError::InvalidArgument(format!(
                "invalid collection name {name:?}"
            )));
        }

        let mut collections = self.collections.write();
        if !collections.contains_key(name) {
            let collection = Collection::new(
                name.to_string(),
                self.provider.dimensions(),
                self.provider.model_version().to_string(),
                Utc::now(),
            )?;
            info!(
                collection = name,
                dimension = collection.vectors.dimension(),
                model_version = %collection.model_version,
                "created collection"
            );
            collections.insert(name.to_string(), Arc::new(collection));
        }
        Ok(())
    }

    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn drop_collection(&self, name: &str) -> bool {
        let removed = self.collections.write().remove(name).is_some();
        if removed {
            info!(collection = name, "dropped collection");
        }
        removed
    }

    pub fn latency(&self) -> LatencySnapshot {
        self.latency.snapshot()
    }

    pub(crate) fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    /// Runs one document through normalize, chunk, dedup, embed and index.
    ///
    /// Embedding failures are reported in the returned report with
    /// `IngestStatus::Failed`; index contract violations are returned as
    /// errors. Either way nothing of the document becomes searchable.
    pub async fn ingest(
        &self,
        collection: &str,
        request: IngestRequest,
    ) -> Result<IngestReport, IngestError> {
        let target = self
            .collection(collection)
            .ok_or_else(|| IngestError::UnknownCollection(collection.to_string()))?;
        request.metadata.validate()?;
        target.version_mismatch(self.provider.model_version());

        let IngestRequest {
            document_id,
            raw_text,
            page_map,
            metadata,
        } = request;
        let digest = content_digest(raw_text.as_bytes());
        let mut tracker = IngestTracker::new(document_id.clone());

        let normalized = self.normalizer.normalize(&raw_text, &page_map);
        tracker.advance(IngestStage::Normalized)?;

        let context = DocumentContext {
            document_id: &document_id,
            digest: &digest,
            metadata: &metadata,
        };
        let chunks = build_chunks(&context, &normalized, &self.chunker);
        if chunks.is_empty() {
            warn!(
                collection,
                document_id = %document_id,
                reason = %ChunkingError::EmptyText,
                "document produced no chunks"
            );
        }
        tracker.advance(IngestStage::Chunked)?;

        let mut dedup = target.ingest.lock().await;
        if let Registration::AlreadyIndexed(chunk_ids) = dedup.register(&digest) {
            tracker.advance(IngestStage::DedupChecked)?;
            tracker.advance(IngestStage::Complete)?;
            info!(collection, document_id = %document_id, digest = %digest, "document already indexed");
            return Ok(IngestReport {
                document_id,
                digest,
                chunk_ids,
                status: IngestStatus::AlreadyIndexed,
                history: tracker.into_history(),
            });
        }
        tracker.advance(IngestStage::DedupChecked)?;

        let chunk_ids: Vec<ChunkId> = chunks.iter().map(|chunk| chunk.chunk_id.clone()).collect();
        if !chunks.is_empty() {
            let vectors = match self.embed_chunks(&chunks).await {
                Ok(vectors) => vectors,
                Err(failure) => {
                    let reason = failure.to_string();
                    error!(
                        collection,
                        document_id = %document_id,
                        error = %reason,
                        "embedding failed, document not indexed"
                    );
                    tracker.fail(IngestStage::Embedded, reason.clone())?;
                    return Ok(IngestReport {
                        document_id,
                        digest,
                        chunk_ids: Vec::new(),
                        status: IngestStatus::Failed {
                            stage: IngestStage::Embedded,
                            reason,
                        },
                        history: tracker.into_history(),
                    });
                }
            };
            tracker.advance(IngestStage::Embedded)?;

            publish(&target, chunks, vectors)?;
            tracker.advance(IngestStage::Indexed)?;
        }

        dedup.record(DocumentRecord {
            document_id: document_id.clone(),
            digest: digest.clone(),
            metadata,
            chunk_ids: chunk_ids.clone(),
            ingested_at: Utc::now(),
        });
        target.set_document_count(dedup.len());
        drop(dedup);
        tracker.advance(IngestStage::Complete)?;

        info!(
            collection,
            document_id = %document_id,
            digest = %digest,
            chunks = chunk_ids.len(),
            "document indexed"
        );
        Ok(IngestReport {
            document_id,
            digest,
            chunk_ids,
            status: IngestStatus::Complete,
            history: tracker.into_history(),
        })
    }

    /// Ingests documents one after another. A failing document does not stop
    /// the rest; its error is kept in its slot.
    pub async fn ingest_batch(
        &self,
        collection: &str,
        requests: Vec<IngestRequest>,
    ) -> Vec<Result<IngestReport, IngestError>> {
        let mut reports = Vec::with_capacity(requests.len());
        for request in requests {
            reports.push(self.ingest(collection, request).await);
        }
        reports
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embedded = self.provider.embed(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: texts.len(),
                    actual: embedded.len(),
                });
            }
            vectors.extend(embedded);
        }
        debug!(chunks = chunks.len(), "embedded document chunks");
        Ok(vectors)
    }

    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        category: Option<&str>,
    ) -> Result<SearchOutcome, SearchError> {
        let filter = category.map(MetadataFilter::category).unwrap_or_default();
        self.search_with_filter(collection, query, k, filter).await
    }

    pub async fn search_with_filter(
        &self,
        collection: &str,
        query: &str,
        k: usize,
        filter: MetadataFilter,
    ) -> Result<SearchOutcome, SearchError> {
        if k == 0 {
            return Err(SearchError::InvalidArgument("k must be positive".to_string()));
        }
        if query.trim().is_empty() {
            return Err(SearchError::InvalidArgument("query is empty".to_string()));
        }

        let target = self
            .collection(collection)
            .ok_or_else(|| SearchError::UnknownCollection(collection.to_string()))?;
        target.version_mismatch(self.provider.model_version());

        let timeout = self.config.query_timeout();
        let texts = [query.to_string()];
        let embedded = tokio::time::timeout(timeout, self.provider.embed(&texts))
            .await
            .map_err(|_| SearchError::Timeout(timeout))??;
        let [query_vector] = <[Vec<f32>; 1]>::try_from(embedded).map_err(|vectors| {
            EmbeddingError::CountMismatch {
                expected: 1,
                actual: vectors.len(),
            }
        })?;

        let started = Instant::now();
        let searcher = Arc::clone(&target);
        let hits = tokio::task::spawn_blocking(move || {
            searcher.vectors.search(&query_vector, k, Some(&filter))
        })
        .await
        .map_err(|failure| SearchError::Worker(failure.to_string()))??;
        self.latency.record(collection, started.elapsed());

        let chunk_ids: Vec<ChunkId> = hits.iter().map(|hit| hit.chunk_id.clone()).collect();
        let entries = target.provenance.get_many(&chunk_ids);

        let results = hits
            .into_iter()
            .zip(entries)
            .filter_map(|(hit, entry)| match entry {
                Some(entry) => Some((hit, entry)),
                None => {
                    warn!(collection, chunk_id = %hit.chunk_id, "hit has no provenance entry");
                    None
                }
            })
            .enumerate()
            .map(|(position, (hit, entry))| SearchResult {
                chunk_id: hit.chunk_id,
                text: entry.text,
                metadata: hit.metadata,
                provenance: entry.provenance,
                score: hit.score,
                rank: position + 1,
            })
            .collect();

        Ok(SearchOutcome::from_results(results))
    }

    /// Removes every chunk stored for `digest`. An unknown digest removes
    /// nothing.
    pub async fn delete_document(
        &self,
        collection: &str,
        digest: &str,
    ) -> Result<DeleteReport, IngestError> {
        let target = self
            .collection(collection)
            .ok_or_else(|| IngestError::UnknownCollection(collection.to_string()))?;

        let mut dedup = target.ingest.lock().await;
        let Some(record) = dedup.forget(digest) else {
            debug!(collection, digest, "delete of unknown digest");
            return Ok(DeleteReport {
                digest: digest.to_string(),
                removed_chunk_count: 0,
            });
        };

        let removed_chunk_count = target.vectors.delete(&record.chunk_ids);
        target.provenance.remove(&record.chunk_ids);
        target.set_document_count(dedup.len());
        drop(dedup);

        info!(
            collection,
            digest,
            document_id = %record.document_id,
            chunks = removed_chunk_count,
            "document deleted"
        );
        Ok(DeleteReport {
            digest: digest.to_string(),
            removed_chunk_count,
        })
    }

    pub async fn stats(&self, collection: &str) -> Result<CollectionStats, IngestError> {
        let target = self
            .collection(collection)
            .ok_or_else(|| IngestError::UnknownCollection(collection.to_string()))?;

        let provider_model_version = self.provider.model_version().to_string();
        let model_version_mismatch = target.version_mismatch(&provider_model_version);
        let document_count = target.document_count();

        Ok(CollectionStats {
            name: target.name.clone(),
            chunk_count: target.vectors.len(),
            document_count,
            dimension: target.vectors.dimension(),
            embedding_model_version: target.model_version.clone(),
            provider_model_version,
            model_version_mismatch,
        })
    }
}

/// Catalog entries go in first so that every hit visible to search can be
/// enriched; the single `insert_batch` then publishes the whole document.
fn publish(
    collection: &Collection,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
) -> Result<(), IngestError> {
    let chunk_ids: Vec<ChunkId> = chunks.iter().map(|chunk| chunk.chunk_id.clone()).collect();
    collection.provenance.record_batch(chunks.iter().map(|chunk| {
        (
            chunk.chunk_id.clone(),
            CatalogEntry {
                provenance: chunk.provenance.clone(),
                text: chunk.text.clone(),
            },
        )
    }));

    let entries = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexEntry {
            chunk_id: chunk.chunk_id,
            vector,
            metadata: chunk.metadata,
        })
        .collect();

    if let Err(failure) = collection.vectors.insert_batch(entries) {
        collection.provenance.remove(&chunk_ids);
        error!(collection = %collection.name, error = %failure, "index rejected document");
        return Err(failure.into());
    }
    Ok(())
}
