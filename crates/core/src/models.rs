use crate::error::{ExtractionError, IngestError};
use crate::state::IngestStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ChunkId = String;

const MAX_CATEGORY_CHARS: usize = 50;
const MAX_NAME_CHARS: usize = 100;

/// Character offsets into the raw text at which each page starts.
///
/// Page numbers are 1-based; the first page always starts at offset 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPageMap")]
pub struct PageMap {
    starts: Vec<usize>,
}

#[derive(Deserialize)]
struct RawPageMap {
    starts: Vec<usize>,
}

impl TryFrom<RawPageMap> for PageMap {
    type Error = ExtractionError;

    fn try_from(raw: RawPageMap) -> Result<Self, Self::Error> {
        Self::new(raw.starts)
    }
}

impl PageMap {
    pub fn new(starts: Vec<usize>) -> Result<Self, ExtractionError> {
        if starts.first() != Some(&0) {
            return Err(ExtractionError::InvalidPageMap(
                "first page must start at offset 0".to_string(),
            ));
        }
        if starts.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ExtractionError::InvalidPageMap(
                "page offsets must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { starts })
    }

    pub fn single_page() -> Self {
        Self { starts: vec![0] }
    }

    /// Derives page starts from form-feed page breaks, the convention most
    /// text extractors use.
    pub fn from_form_feeds(text: &str) -> Self {
        let mut starts = vec![0];
        for (position, character) in text.chars().enumerate() {
            if character == '\u{000c}' {
                starts.push(position + 1);
            }
        }
        starts.dedup();
        Self { starts }
    }

    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    pub fn page_count(&self) -> usize {
        self.starts.len()
    }

    pub fn page_of(&self, raw_offset: usize) -> u32 {
        let index = self
            .starts
            .partition_point(|start| *start <= raw_offset)
            .max(1);
        index as u32
    }
}

impl Default for PageMap {
    fn default() -> Self {
        Self::single_page()
    }
}

/// Structured metadata supplied with a document at ingestion time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentMetadata {
    #[serde(default)]
    pub mpn: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl ComponentMetadata {
    pub fn validate(&self) -> Result<(), IngestError> {
        check_field("category", self.category.as_deref(), MAX_CATEGORY_CHARS)?;
        check_field("manufacturer", self.manufacturer.as_deref(), MAX_NAME_CHARS)?;
        check_field("mpn", self.mpn.as_deref(), MAX_NAME_CHARS)
    }
}

fn check_field(name: &str, value: Option<&str>, max_chars: usize) -> Result<(), IngestError> {
    let Some(value) = value else {
        return Ok(());
    };
    if value.trim().is_empty() {
        return Err(IngestError::InvalidArgument(format!("{name} must not be blank")));
    }
    if value.chars().count() > max_chars {
        return Err(IngestError::InvalidArgument(format!(
            "{name} exceeds {max_chars} characters"
        )));
    }
    Ok(())
}

/// Flat metadata attached to every indexed chunk. Filtering only, never
/// part of the similarity computation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub mpn: Option<String>,
    pub source_document: String,
    pub page_number: u32,
    pub chunk_index: u64,
}

/// Exact-match predicate over [`ChunkMetadata`]; every populated field must
/// match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub mpn: Option<String>,
    pub source_document: Option<String>,
}

impl MetadataFilter {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.manufacturer.is_none()
            && self.mpn.is_none()
            && self.source_document.is_none()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        field_matches(&self.category, &metadata.category)
            && field_matches(&self.manufacturer, &metadata.manufacturer)
            && field_matches(&self.mpn, &metadata.mpn)
            && self
                .source_document
                .as_ref()
                .map_or(true, |wanted| *wanted == metadata.source_document)
    }
}

fn field_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
    match wanted {
        Some(wanted) => actual.as_deref() == Some(wanted.as_str()),
        None => true,
    }
}

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub document_id: String,
    pub document_digest: String,
    pub chunk_index: u64,
    /// Character range in the normalized text.
    pub normalized_range: (usize, usize),
    /// Approximate character range in the raw extracted text.
    pub raw_range: (usize, usize),
    pub page_number: u32,
}

/// A passage staged for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub chunk_index: u64,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub digest: String,
    pub metadata: ComponentMetadata,
    pub chunk_ids: Vec<ChunkId>,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub document_id: String,
    pub raw_text: String,
    pub page_map: PageMap,
    pub metadata: ComponentMetadata,
}

impl IngestRequest {
    pub fn new(document_id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        Self {
            document_id: document_id.into(),
            page_map: PageMap::from_form_feeds(&raw_text),
            raw_text,
            metadata: ComponentMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ComponentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_page_map(mut self, page_map: PageMap) -> Self {
        self.page_map = page_map;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestStatus {
    Complete,
    AlreadyIndexed,
    Failed { stage: IngestStage, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: String,
    pub digest: String,
    pub chunk_ids: Vec<ChunkId>,
    pub status: IngestStatus,
    pub history: Vec<IngestStage>,
}

impl IngestReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, IngestStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: ChunkId,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub provenance: Provenance,
    pub score: f32,
    /// 1-based position in the result list.
    pub rank: usize,
}

/// Outcome of a search that reached the index. Provider and contract
/// failures are reported through `Err` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SearchOutcome {
    Found(Vec<SearchResult>),
    Empty,
}

impl SearchOutcome {
    pub fn from_results(results: Vec<SearchResult>) -> Self {
        if results.is_empty() {
            Self::Empty
        } else {
            Self::Found(results)
        }
    }

    pub fn results(&self) -> &[SearchResult] {
        match self {
            Self::Found(results) => results,
            Self::Empty => &[],
        }
    }

    pub fn into_results(self) -> Vec<SearchResult> {
        match self {
            Self::Found(results) => results,
            Self::Empty => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub digest: String,
    pub removed_chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub name: String,
    pub chunk_count: usize,
    pub document_count: usize,
    pub dimension: usize,
    pub embedding_model_version: String,
    pub provider_model_version: String,
    pub model_version_mismatch: bool,
}
