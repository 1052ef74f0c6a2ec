//! JSON snapshots of collections, one `<name>.json` file per collection.

use crate::engine::{Collection, SearchEngine};
use crate::error::IngestError;
use crate::index::IndexEntry;
use crate::models::{ChunkId, ChunkMetadata, DocumentRecord};
use crate::provenance::CatalogEntry;
use crate::traits::EmbeddingProvider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

const SNAPSHOT_EXTENSION: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct CollectionSnapshot {
    name: String,
    dimension: usize,
    model_version: String,
    created_at: DateTime<Utc>,
    documents: Vec<DocumentRecord>,
    chunks: Vec<ChunkSnapshot>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkSnapshot {
    chunk_id: ChunkId,
    vector: Vec<f32>,
    metadata: ChunkMetadata,
    entry: CatalogEntry,
}

impl<P: EmbeddingProvider + ?Sized> SearchEngine<P> {
    /// Writes every collection to `dir`. Returns how many were written.
    pub async fn save_snapshots(&self, dir: &Path) -> Result<usize, IngestError> {
        fs::create_dir_all(dir).await?;

        let collections: Vec<Arc<Collection>> =
            self.collections.read().values().cloned().collect();

        for collection in &collections {
            let snapshot = snapshot_of(collection).await;
            let bytes = serde_json::to_vec(&snapshot)?;

            let path = dir.join(format!("{}.{SNAPSHOT_EXTENSION}", collection.name));
            let staging = dir.join(format!("{}.{SNAPSHOT_EXTENSION}.tmp", collection.name));
            fs::write(&staging, bytes).await?;
            fs::rename(&staging, &path).await?;

            info!(
                collection = %collection.name,
                chunks = snapshot.chunks.len(),
                documents = snapshot.documents.len(),
                path = %path.display(),
                "saved collection snapshot"
            );
        }
        Ok(collections.len())
    }

    /// Restores every snapshot in `dir`, replacing collections of the same
    /// name. A missing directory restores nothing.
    pub async fn load_snapshots(&self, dir: &Path) -> Result<usize, IngestError> {
        if !fs::try_exists(dir).await? {
            return Ok(0);
        }

        let mut loaded = 0;
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_snapshot = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == SNAPSHOT_EXTENSION);
            if !is_snapshot {
                continue;
            }

            let bytes = fs::read(&path).await?;
            let snapshot: CollectionSnapshot = serde_json::from_slice(&bytes)?;
            let collection = restore(snapshot)?;

            if collection.vectors.dimension() != self.provider().dimensions() {
                warn!(
                    collection = %collection.name,
                    stored = collection.vectors.dimension(),
                    provider = self.provider().dimensions(),
                    "snapshot dimension differs from the embedding provider"
                );
            }
            info!(
                collection = %collection.name,
                chunks = collection.vectors.len(),
                path = %path.display(),
                "loaded collection snapshot"
            );

            self.collections
                .write()
                .insert(collection.name.clone(), Arc::new(collection));
            loaded += 1;
        }
        Ok(loaded)
    }
}

async fn snapshot_of(collection: &Collection) -> CollectionSnapshot {
    // Holding the ingestion lock keeps documents and chunks consistent.
    let dedup = collection.ingest.lock().await;
    let documents: Vec<DocumentRecord> = dedup.records().cloned().collect();

    let indexed = collection.vectors.entries();
    let ids: Vec<ChunkId> = indexed.iter().map(|entry| entry.chunk_id.clone()).collect();
    let catalog = collection.provenance.get_many(&ids);
    drop(dedup);

    let chunks = indexed
        .into_iter()
        .zip(catalog)
        .filter_map(|(indexed, entry)| match entry {
            Some(entry) => Some(ChunkSnapshot {
                chunk_id: indexed.chunk_id,
                vector: indexed.vector,
                metadata: indexed.metadata,
                entry,
            }),
            None => {
                warn!(
                    collection = %collection.name,
                    chunk_id = %indexed.chunk_id,
                    "indexed chunk has no provenance entry, left out of snapshot"
                );
                None
            }
        })
        .collect();

    CollectionSnapshot {
        name: collection.name.clone(),
        dimension: collection.vectors.dimension(),
        model_version: collection.model_version.clone(),
        created_at: collection.created_at,
        documents,
        chunks,
    }
}

fn restore(snapshot: CollectionSnapshot) -> Result<Collection, IngestError> {
    let CollectionSnapshot {
        name,
        dimension,
        model_version,
        created_at,
        documents,
        chunks,
    } = snapshot;

    let mut collection = Collection::new(name, dimension, model_version, created_at)?;

    let mut catalog = Vec::with_capacity(chunks.len());
    let mut entries = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        catalog.push((chunk.chunk_id.clone(), chunk.entry));
        entries.push(IndexEntry {
            chunk_id: chunk.chunk_id,
            vector: chunk.vector,
            metadata: chunk.metadata,
        });
    }
    collection.vectors.insert_batch(entries)?;
    collection.provenance.record_batch(catalog);

    let dedup = collection.ingest.get_mut();
    for record in documents {
        dedup.record(record);
    }
    let document_count = dedup.len();
    collection.set_document_count(document_count);
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use crate::config::{ChunkingConfig, EngineConfig};
    use crate::embeddings::{CharacterNgramEmbedder, EmbeddingHandle};
    use crate::engine::SearchEngine;
    use crate::models::{ComponentMetadata, IngestRequest, IngestStatus};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn engine() -> SearchEngine<EmbeddingHandle<CharacterNgramEmbedder>> {
        let config = EngineConfig {
            chunking: ChunkingConfig::new(40, 120, 10),
            ..EngineConfig::default()
        };
        let provider = EmbeddingHandle::new(CharacterNgramEmbedder::default(), config.max_input_chars);
        SearchEngine::new(Arc::new(provider), config).unwrap()
    }

    fn request() -> IngestRequest {
        IngestRequest::new(
            "bme280.pdf",
            "The BME280 measures humidity, pressure and temperature.\n\n\
             It communicates over I2C and SPI interfaces.\n\n\
             Typical supply current is 3.6 uA at 1 Hz sampling.",
        )
        .with_metadata(ComponentMetadata {
            category: Some("sensor".to_string()),
            manufacturer: Some("Bosch".to_string()),
            mpn: Some("BME280".to_string()),
        })
    }

    #[tokio::test]
    async fn snapshot_round_trip_preserves_search_results() {
        let dir = tempdir().unwrap();
        let saved = engine();
        saved.create_collection("sensors").unwrap();
        let report = saved.ingest("sensors", request()).await.unwrap();
        let before = saved
            .search("sensors", "humidity sensor over I2C", 3, Some("sensor"))
            .await
            .unwrap();

        assert_eq!(saved.save_snapshots(dir.path()).await.unwrap(), 1);

        let restored = engine();
        assert_eq!(restored.load_snapshots(dir.path()).await.unwrap(), 1);
        let after = restored
            .search("sensors", "humidity sensor over I2C", 3, Some("sensor"))
            .await
            .unwrap();

        let ids = |outcome: &crate::models::SearchOutcome| {
            outcome
                .results()
                .iter()
                .map(|result| result.chunk_id.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&before), ids(&after));
        assert_eq!(
            before.results()[0].provenance,
            after.results()[0].provenance
        );

        let stats = restored.stats("sensors").await.unwrap();
        assert_eq!(stats.chunk_count, report.chunk_ids.len());
        assert_eq!(stats.document_count, 1);

        let again = restored.ingest("sensors", request()).await.unwrap();
        assert_eq!(again.status, IngestStatus::AlreadyIndexed);
    }

    #[tokio::test]
    async fn missing_directory_loads_nothing() {
        let dir = tempdir().unwrap();
        let engine = engine();
        let loaded = engine
            .load_snapshots(&dir.path().join("absent"))
            .await
            .unwrap();
        assert_eq!(loaded, 0);
        assert!(engine.collections().is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_a_serialization_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();

        let result = engine().load_snapshots(dir.path()).await;
        assert!(matches!(
            result,
            Err(crate::error::IngestError::Serialization(_))
        ));
    }
}
