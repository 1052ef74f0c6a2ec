//! Exact cosine k-NN over one collection.
//!
//! Vectors are L2-normalized on insert and stored row-major in one
//! contiguous buffer, so a query is a parallel dot-product scan. Writes take
//! the table lock once per batch; readers see a batch entirely or not at all.

use crate::error::IndexError;
use crate::models::{ChunkId, ChunkMetadata, MetadataFilter};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Below this many rows per task rayon keeps the scan on one thread.
const PARALLEL_MIN_ROWS: usize = 2_048;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: ChunkId,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Default)]
struct VectorTable {
    ids: Vec<ChunkId>,
    metadata: Vec<ChunkMetadata>,
    vectors: Vec<f32>,
    positions: HashMap<ChunkId, usize>,
}

impl VectorTable {
    fn remove_row(&mut self, row: usize, dimension: usize) {
        let last = self.ids.len() - 1;
        if row != last {
            self.vectors
                .copy_within(last * dimension..(last + 1) * dimension, row * dimension);
            if let Some(position) = self.positions.get_mut(&self.ids[last]) {
                *position = row;
            }
        }
        self.vectors.truncate(last * dimension);
        self.ids.swap_remove(row);
        self.metadata.swap_remove(row);
    }
}

pub struct VectorIndex {
    dimension: usize,
    table: RwLock<VectorTable>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        Ok(Self {
            dimension,
            table: RwLock::new(VectorTable::default()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.table.read().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.table.read().positions.contains_key(chunk_id)
    }

    pub fn insert(
        &self,
        chunk_id: ChunkId,
        vector: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> Result<(), IndexError> {
        self.insert_batch(vec![IndexEntry {
            chunk_id,
            vector,
            metadata,
        }])
        .map(|_| ())
    }

    /// Validates every entry before writing any of them.
    pub fn insert_batch(&self, entries: Vec<IndexEntry>) -> Result<usize, IndexError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            self.check_vector(&entry.vector)?;
            if entry.vector.iter().any(|value| !value.is_finite()) {
                return Err(IndexError::NonFiniteVector(entry.chunk_id.clone()));
            }
            if !seen.insert(entry.chunk_id.as_str()) {
                return Err(IndexError::DuplicateId(entry.chunk_id.clone()));
            }
        }

        let mut table = self.table.write();
        if let Some(existing) = entries
            .iter()
            .find(|entry| table.positions.contains_key(&entry.chunk_id))
        {
            return Err(IndexError::DuplicateId(existing.chunk_id.clone()));
        }

        let inserted = entries.len();
        table.vectors.reserve(inserted * self.dimension);
        for entry in entries {
            let row = table.ids.len();
            let mut vector = entry.vector;
            l2_normalize(&mut vector);
            table.vectors.extend_from_slice(&vector);
            table.positions.insert(entry.chunk_id.clone(), row);
            table.ids.push(entry.chunk_id);
            table.metadata.push(entry.metadata);
        }
        Ok(inserted)
    }

    /// Up to `k` chunks by descending cosine similarity, ties broken by
    /// ascending chunk id. The filter is applied before ranking.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        self.check_vector(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        // A direction-less query is equally similar to everything.
        let mut query = query.to_vec();
        if !l2_normalize(&mut query) {
            return Ok(Vec::new());
        }
        let filter = filter.filter(|filter| !filter.is_empty());

        let guard = self.table.read();
        let table: &VectorTable = &guard;

        let mut scored: Vec<(usize, f32)> = table
            .vectors
            .par_chunks_exact(self.dimension)
            .with_min_len(PARALLEL_MIN_ROWS)
            .enumerate()
            .filter(|(row, _)| filter.map_or(true, |filter| filter.matches(&table.metadata[*row])))
            .map(|(row, vector)| (row, dot(&query, vector).clamp(-1.0, 1.0)))
            .collect();

        let order = |left: &(usize, f32), right: &(usize, f32)| -> Ordering {
            right
                .1
                .total_cmp(&left.1)
                .then_with(|| table.ids[left.0].cmp(&table.ids[right.0]))
        };

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, order);
            scored.truncate(k);
        }
        scored.sort_unstable_by(order);

        Ok(scored
            .into_iter()
            .map(|(row, score)| ScoredChunk {
                chunk_id: table.ids[row].clone(),
                score,
                metadata: table.metadata[row].clone(),
            })
            .collect())
    }

    /// Removes the given ids, ignoring unknown ones. Returns how many were
    /// removed.
    pub fn delete(&self, chunk_ids: &[ChunkId]) -> usize {
        let mut table = self.table.write();
        let mut removed = 0;
        for chunk_id in chunk_ids {
            if let Some(row) = table.positions.remove(chunk_id) {
                table.remove_row(row, self.dimension);
                removed += 1;
            }
        }
        removed
    }

    pub fn get(&self, chunk_id: &str) -> Option<IndexEntry> {
        let table = self.table.read();
        let row = *table.positions.get(chunk_id)?;
        let offset = row * self.dimension;
        Some(IndexEntry {
            chunk_id: table.ids[row].clone(),
            vector: table.vectors[offset..offset + self.dimension].to_vec(),
            metadata: table.metadata[row].clone(),
        })
    }

    /// Copies every stored entry (vectors are the normalized form).
    pub fn entries(&self) -> Vec<IndexEntry> {
        let table = self.table.read();
        table
            .ids
            .iter()
            .zip(&table.metadata)
            .zip(table.vectors.chunks_exact(self.dimension))
            .map(|((chunk_id, metadata), vector)| IndexEntry {
                chunk_id: chunk_id.clone(),
                vector: vector.to_vec(),
                metadata: metadata.clone(),
            })
            .collect()
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

/// Scales `vector` to unit length. Returns false for a zero vector, which
/// is left untouched.
fn l2_normalize(vector: &mut [f32]) -> bool {
    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
    norm > 0.0
}
