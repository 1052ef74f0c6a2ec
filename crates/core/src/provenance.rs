use crate::models::{ChunkId, Provenance};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub provenance: Provenance,
    pub text: String,
}

/// Chunk id → origin and text. Only used to enrich search hits.
#[derive(Debug, Default)]
pub struct ProvenanceCatalog {
    entries: RwLock<HashMap<ChunkId, CatalogEntry>>,
}

impl ProvenanceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, chunk_id: ChunkId, entry: CatalogEntry) {
        self.entries.write().insert(chunk_id, entry);
    }

    pub fn record_batch(&self, entries: impl IntoIterator<Item = (ChunkId, CatalogEntry)>) {
        self.entries.write().extend(entries);
    }

    pub fn get(&self, chunk_id: &str) -> Option<CatalogEntry> {
        self.entries.read().get(chunk_id).cloned()
    }

    /// Looks up several ids under one read lock, preserving order.
    pub fn get_many(&self, chunk_ids: &[ChunkId]) -> Vec<Option<CatalogEntry>> {
        let entries = self.entries.read();
        chunk_ids.iter().map(|id| entries.get(id).cloned()).collect()
    }

    pub fn remove(&self, chunk_ids: &[ChunkId]) -> usize {
        let mut entries = self.entries.write();
        chunk_ids
            .iter()
            .filter(|id| entries.remove(id.as_str()).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
