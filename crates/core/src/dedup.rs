use crate::models::{ChunkId, DocumentRecord};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The digest is already indexed; carries the stored chunk ids.
    AlreadyIndexed(Vec<ChunkId>),
    Accepted,
}

/// Whole-document dedup keyed by content digest.
///
/// Not synchronized on its own: each collection keeps it behind the
/// ingestion lock so registration, publish and record happen as one step.
#[derive(Debug, Default)]
pub struct ContentDeduplicator {
    documents: HashMap<String, DocumentRecord>,
}

impl ContentDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, digest: &str) -> Registration {
        match self.documents.get(digest) {
            Some(record) => Registration::AlreadyIndexed(record.chunk_ids.clone()),
            None => Registration::Accepted,
        }
    }

    pub fn record(&mut self, record: DocumentRecord) {
        self.documents.insert(record.digest.clone(), record);
    }

    pub fn forget(&mut self, digest: &str) -> Option<DocumentRecord> {
        self.documents.remove(digest)
    }

    pub fn get(&self, digest: &str) -> Option<&DocumentRecord> {
        self.documents.get(digest)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.documents.values()
    }
}
