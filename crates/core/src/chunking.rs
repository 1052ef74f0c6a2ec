use crate::config::ChunkingConfig;
use crate::error::ChunkingError;
use crate::models::{Chunk, ChunkId, ChunkMetadata, ComponentMetadata, Provenance};
use crate::normalize::NormalizedText;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// A passage of normalized text, in character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan<'a> {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: &'a str,
}

impl TextSpan<'_> {
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkingError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Lazily splits `text` into overlapping, sentence-aligned spans.
    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks::new(text, self.config)
    }
}

/// Iterator over the spans of one text. Cloning restarts from the clone's
/// position without recomputing sentence boundaries.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    config: ChunkingConfig,
    byte_offsets: Arc<[usize]>,
    sentence_ends: Arc<[usize]>,
    start: usize,
    index: usize,
    finished: bool,
}

impl<'a> Chunks<'a> {
    fn new(text: &'a str, config: ChunkingConfig) -> Self {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut byte_offsets: Vec<usize> = chars.iter().map(|(offset, _)| *offset).collect();
        byte_offsets.push(text.len());

        let sentence_ends: Vec<usize> = chars
            .iter()
            .enumerate()
            .filter(|(position, (_, character))| {
                matches!(character, '.' | '!' | '?')
                    && chars
                        .get(position + 1)
                        .map_or(true, |(_, next)| next.is_whitespace())
            })
            .map(|(position, _)| position + 1)
            .collect();

        Self {
            text,
            config,
            byte_offsets: byte_offsets.into(),
            sentence_ends: sentence_ends.into(),
            start: 0,
            index: 0,
            finished: text.trim().is_empty(),
        }
    }

    fn total_chars(&self) -> usize {
        self.byte_offsets.len() - 1
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.byte_offsets[start]..self.byte_offsets[end]]
    }

    fn is_whitespace_at(&self, position: usize) -> bool {
        self.slice(position, position + 1)
            .chars()
            .next()
            .is_some_and(char::is_whitespace)
    }

    fn last_boundary_within(&self, low: usize, high: usize) -> Option<usize> {
        let count = self.sentence_ends.partition_point(|end| *end <= high);
        count
            .checked_sub(1)
            .map(|index| self.sentence_ends[index])
            .filter(|end| *end >= low)
    }

    fn next_start(&self, start: usize, end: usize) -> usize {
        let target = end - self.config.overlap_chars;
        let window_low = target
            .saturating_sub(self.config.snap_tolerance)
            .max(start + 1);

        let first = self.sentence_ends.partition_point(|end| *end < window_low);
        let Some(mut snapped) = self
            .sentence_ends
            .get(first)
            .copied()
            .filter(|boundary| *boundary <= target)
        else {
            return target;
        };

        while snapped < target && self.is_whitespace_at(snapped) {
            snapped += 1;
        }
        snapped
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = TextSpan<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.total_chars();
        if self.finished || self.start >= total {
            return None;
        }

        let start = self.start;
        let is_last = total - start <= self.config.max_chars;
        let end = if is_last {
            total
        } else {
            let high = start + self.config.max_chars;
            self.last_boundary_within(start + self.config.min_chars, high)
                .unwrap_or(high)
        };

        let span = TextSpan {
            index: self.index,
            start,
            end,
            text: self.slice(start, end),
        };

        self.index += 1;
        if is_last {
            self.finished = true;
        } else {
            self.start = self.next_start(start, end);
        }
        Some(span)
    }
}

/// Deterministic chunk identifier derived from the document digest and the
/// chunk position.
pub fn make_chunk_id(document_digest: &str, chunk_index: u64) -> ChunkId {
    let mut hasher = Sha256::new();
    hasher.update(document_digest.as_bytes());
    hasher.update(chunk_index.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct DocumentContext<'a> {
    pub document_id: &'a str,
    pub digest: &'a str,
    pub metadata: &'a ComponentMetadata,
}

pub fn build_chunks(
    document: &DocumentContext<'_>,
    normalized: &NormalizedText,
    chunker: &Chunker,
) -> Vec<Chunk> {
    chunker
        .chunks(&normalized.text)
        .map(|span| {
            let chunk_index = span.index as u64;
            let page_number = normalized.page_at(span.start);
            let raw_start = normalized.raw_offset_at(span.start);
            let raw_end = normalized.raw_offset_at(span.end).max(raw_start);

            Chunk {
                chunk_id: make_chunk_id(document.digest, chunk_index),
                chunk_index,
                text: span.text.to_string(),
                metadata: ChunkMetadata {
                    category: document.metadata.category.clone(),
                    manufacturer: document.metadata.manufacturer.clone(),
                    mpn: document.metadata.mpn.clone(),
                    source_document: document.document_id.to_string(),
                    page_number,
                    chunk_index,
                },
                provenance: Provenance {
                    document_id: document.document_id.to_string(),
                    document_digest: document.digest.to_string(),
                    chunk_index,
                    normalized_range: (span.start, span.end),
                    raw_range: (raw_start, raw_end),
                    page_number,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageMap;
    use crate::normalize::TextNormalizer;

    /// 90 sentences of exactly 50 characters each (49 + a separating space).
    fn datasheet_body() -> String {
        (0..90)
            .map(|index| format!("Register {index:02} controls the GPIO matrix routing now. "))
            .map(|sentence| {
                assert_eq!(sentence.chars().count(), 50);
                sentence
            })
            .collect()
    }

    fn reconstruct(spans: &[TextSpan<'_>]) -> String {
        let mut rebuilt = String::new();
        let mut covered: usize = 0;
        for span in spans {
            let skip = covered.saturating_sub(span.start);
            rebuilt.extend(span.text.chars().skip(skip));
            covered = span.end;
        }
        rebuilt
    }

    #[test]
    fn datasheet_scenario_yields_three_chunks() {
        let text = datasheet_body();
        assert_eq!(text.chars().count(), 4_500);

        let chunker = Chunker::new(ChunkingConfig::new(1_000, 2_000, 200)).unwrap();
        let spans: Vec<_> = chunker.chunks(&text).collect();

        assert_eq!(spans.len(), 3);
        assert!(spans[1].start <= spans[0].end - 200);
        assert!(spans[2].start <= spans[1].end - 200);
        for span in &spans[..2] {
            assert!((1_000..=2_000).contains(&span.char_len()));
            assert!(span.text.ends_with('.'));
        }
        assert_eq!(spans[2].end, 4_500);
    }

    #[test]
    fn chunks_reconstruct_source_exactly() {
        let text = datasheet_body();
        let chunker = Chunker::new(ChunkingConfig::new(300, 700, 80)).unwrap();
        let spans: Vec<_> = chunker.chunks(&text).collect();

        assert!(spans.len() > 5);
        assert_eq!(reconstruct(&spans), text);
        for pair in spans.windows(2) {
            assert!(pair[1].start > pair[0].start);
            assert!(pair[1].start <= pair[0].end - 80);
        }
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = Chunker::new(ChunkingConfig::default()).unwrap();
        let spans: Vec<_> = chunker.chunks("Tiny datasheet. Two sentences.").collect();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "Tiny datasheet. Two sentences.");
    }

    #[test]
    fn whitespace_only_text_has_no_chunks() {
        let chunker = Chunker::new(ChunkingConfig::default()).unwrap();
        assert_eq!(chunker.chunks("   \n\n  ").count(), 0);
        assert_eq!(chunker.chunks("").count(), 0);
    }

    #[test]
    fn oversized_sentence_is_hard_split() {
        let text = "a".repeat(5_000);
        let chunker = Chunker::new(ChunkingConfig::new(1_000, 2_000, 200)).unwrap();
        let spans: Vec<_> = chunker.chunks(&text).collect();

        assert_eq!(
            spans.iter().map(|span| (span.start, span.end)).collect::<Vec<_>>(),
            vec![(0, 2_000), (1_800, 3_800), (3_600, 5_000)]
        );
        assert_eq!(reconstruct(&spans), text);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "Ω µA °C ±5%. ".repeat(200);
        let chunker = Chunker::new(ChunkingConfig::new(100, 250, 30)).unwrap();
        let spans: Vec<_> = chunker.chunks(&text).collect();
        assert_eq!(reconstruct(&spans), text);
    }

    #[test]
    fn iteration_is_restartable() {
        let text = datasheet_body();
        let chunker = Chunker::new(ChunkingConfig::new(300, 700, 80)).unwrap();
        let mut chunks = chunker.chunks(&text);
        let first = chunks.next().unwrap();
        let resumed = chunks.clone();

        assert_eq!(chunks.collect::<Vec<_>>(), resumed.collect::<Vec<_>>());
        assert_eq!(chunker.chunks(&text).next(), Some(first));
    }

    #[test]
    fn chunk_ids_are_deterministic() {
        assert_eq!(make_chunk_id("digest", 3), make_chunk_id("digest", 3));
        assert_ne!(make_chunk_id("digest", 3), make_chunk_id("digest", 4));
        assert_ne!(make_chunk_id("digest", 3), make_chunk_id("other", 3));
    }

    #[test]
    fn built_chunks_carry_metadata_and_pages() {
        let raw = format!("{}\u{000c}{}", datasheet_body(), datasheet_body());
        let normalizer = TextNormalizer::new().unwrap();
        let normalized = normalizer.normalize(&raw, &PageMap::from_form_feeds(&raw));
        let metadata = ComponentMetadata {
            category: Some("microcontroller".to_string()),
            ..ComponentMetadata::default()
        };
        let document = DocumentContext {
            document_id: "esp32.pdf",
            digest: "abc",
            metadata: &metadata,
        };

        let chunks = build_chunks(
            &document,
            &normalized,
            &Chunker::new(ChunkingConfig::default()).unwrap(),
        );

        assert!(chunks.len() >= 5);
        assert_eq!(chunks[0].metadata.page_number, 1);
        assert_eq!(chunks.last().map(|chunk| chunk.metadata.page_number), Some(2));
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, position as u64);
            assert_eq!(chunk.chunk_id, make_chunk_id("abc", position as u64));
            assert_eq!(chunk.metadata.category.as_deref(), Some("microcontroller"));
            assert!(chunk.provenance.raw_range.0 <= chunk.provenance.raw_range.1);
        }
    }
}
