use crate::models::PageMap;
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// Lines repeated verbatim on at least this many pages are treated as
/// running headers or footers.
const MIN_REPEAT_PAGES: usize = 3;

const URL_PATTERN: &str = r"(?i)\b(?:https?://|www\.)\S+";
/// `Page 7`, `page 7 of 40`: dropped wherever they appear.
const PAGE_LABEL_PATTERN: &str = r"(?i)^page\s*\d+(?:\s*(?:/|of)\s*\d+)?$";
/// `7`, `7/40`: only a footer when it opens or closes a page.
const BARE_PAGE_NUMBER_PATTERN: &str = r"(?i)^\d+(?:\s*(?:/|of)\s*\d+)?$";

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetAnchor {
    pub normalized: usize,
    pub raw: usize,
    pub page: u32,
}

/// Normalized document text plus a monotonic anchor list that traces
/// positions back to the raw text and page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    pub text: String,
    anchors: Vec<OffsetAnchor>,
    raw_len: usize,
}

impl NormalizedText {
    pub fn anchors(&self) -> &[OffsetAnchor] {
        &self.anchors
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn anchor_for(&self, position: usize) -> Option<&OffsetAnchor> {
        let index = self
            .anchors
            .partition_point(|anchor| anchor.normalized <= position);
        index.checked_sub(1).and_then(|index| self.anchors.get(index))
    }

    /// Best-effort page number for a normalized character offset.
    pub fn page_at(&self, position: usize) -> u32 {
        self.anchor_for(position).map_or(1, |anchor| anchor.page)
    }

    /// Approximate raw character offset for a normalized character offset.
    pub fn raw_offset_at(&self, position: usize) -> usize {
        self.anchor_for(position)
            .map_or(0, |anchor| anchor.raw + (position - anchor.normalized))
            .min(self.raw_len)
    }
}

pub struct TextNormalizer {
    url_re: Regex,
    page_label_re: Regex,
    bare_page_number_re: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            url_re: Regex::new(URL_PATTERN)?,
            page_label_re: Regex::new(PAGE_LABEL_PATTERN)?,
            bare_page_number_re: Regex::new(BARE_PAGE_NUMBER_PATTERN)?,
        })
    }

    pub fn normalize(&self, raw: &str, page_map: &PageMap) -> NormalizedText {
        let pages = split_pages(raw, page_map);
        let boilerplate = repeated_lines(&pages);

        let mut builder = Builder::default();
        for page in &pages {
            let lines: Vec<&str> = page.text.split('\n').collect();
            let is_content = |line: &&str| {
                let trimmed = line.trim();
                !trimmed.is_empty() && !boilerplate.contains(trimmed)
            };
            let first = lines.iter().position(is_content);
            let last = lines.iter().rposition(is_content);

            let mut raw_position = page.raw_start;
            for (index, line) in lines.iter().copied().enumerate() {
                let line_start = raw_position;
                raw_position += line.chars().count() + 1;

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    self.flush(&mut builder, page.number);
                    continue;
                }
                let at_edge = Some(index) == first || Some(index) == last;
                if boilerplate.contains(trimmed) || self.is_page_number(trimmed, at_edge) {
                    continue;
                }
                if builder.pending.is_empty() {
                    builder.pending_raw_start = line_start;
                }
                builder.pending.push(trimmed);
            }
            self.flush(&mut builder, page.number);
        }

        NormalizedText {
            text: builder.text,
            anchors: builder.anchors,
            raw_len: raw.chars().count(),
        }
    }

    fn is_page_number(&self, line: &str, at_page_edge: bool) -> bool {
        self.page_label_re.is_match(line)
            || (at_page_edge && self.bare_page_number_re.is_match(line))
    }

    fn flush(&self, builder: &mut Builder<'_>, page: u32) {
        if builder.pending.is_empty() {
            return;
        }
        let joined = builder.pending.join(" ");
        builder.pending.clear();

        let paragraph = collapse_whitespace(&self.url_re.replace_all(&joined, ""));
        if paragraph.is_empty() {
            return;
        }

        if !builder.text.is_empty() {
            builder.text.push_str("\n\n");
            builder.chars += 2;
        }
        builder.anchors.push(OffsetAnchor {
            normalized: builder.chars,
            raw: builder.pending_raw_start,
            page,
        });
        builder.chars += paragraph.chars().count();
        builder.text.push_str(&paragraph);
    }
}

#[derive(Default)]
struct Builder<'a> {
    text: String,
    chars: usize,
    anchors: Vec<OffsetAnchor>,
    pending: Vec<&'a str>,
    pending_raw_start: usize,
}

struct PageSlice<'a> {
    number: u32,
    raw_start: usize,
    text: &'a str,
}

fn split_pages<'a>(raw: &'a str, page_map: &PageMap) -> Vec<PageSlice<'a>> {
    let mut byte_offsets: Vec<usize> = raw.char_indices().map(|(offset, _)| offset).collect();
    let total_chars = byte_offsets.len();
    byte_offsets.push(raw.len());

    let starts = page_map.starts();
    starts
        .iter()
        .enumerate()
        .filter(|(_, start)| **start < total_chars || (**start == 0 && total_chars == 0))
        .map(|(index, start)| {
            let end = starts
                .get(index + 1)
                .copied()
                .unwrap_or(total_chars)
                .clamp(*start, total_chars);
            PageSlice {
                number: index as u32 + 1,
                raw_start: *start,
                text: &raw[byte_offsets[*start]..byte_offsets[end]],
            }
        })
        .collect()
}

fn repeated_lines<'a>(pages: &[PageSlice<'a>]) -> HashSet<&'a str> {
    if pages.len() < MIN_REPEAT_PAGES {
        return HashSet::new();
    }

    let mut counts: HashMap<&'a str, usize> = HashMap::new();
    for page in pages {
        let distinct: HashSet<&'a str> = page
            .text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        for line in distinct {
            *counts.entry(line).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .filter(|(_, count)| *count >= MIN_REPEAT_PAGES)
        .map(|(line, _)| line)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> TextNormalizer {
        TextNormalizer::new().expect("patterns compile")
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(collapse_whitespace("A  \t  lot\nof   spacing"), "A lot of spacing");
    }

    #[test]
    fn paragraph_breaks_survive_normalization() {
        let raw = "First   line\ncontinues here.\n\n\n   Second\tparagraph.";
        let normalized = normalizer().normalize(raw, &PageMap::single_page());
        assert_eq!(
            normalized.text,
            "First line continues here.\n\nSecond paragraph."
        );
    }

    #[test]
    fn running_headers_and_page_numbers_are_removed() {
        let raw = "ESP32 Series Datasheet v3.4\nThe chip integrates WiFi.\nPage 1 of 3\u{000c}\
                   ESP32 Series Datasheet v3.4\nBluetooth LE is supported.\nPage 2 of 3\u{000c}\
                   ESP32 Series Datasheet v3.4\nDeep sleep draws 10 uA.\n3";
        let normalized = normalizer().normalize(raw, &PageMap::from_form_feeds(raw));

        assert!(!normalized.text.contains("Datasheet v3.4"));
        assert!(!normalized.text.contains("Page"));
        assert!(normalized.text.contains("The chip integrates WiFi."));
        assert!(normalized.text.contains("Deep sleep draws 10 uA."));
    }

    #[test]
    fn numeric_table_cells_are_kept() {
        let raw = "Pin assignment table.\nPin\n1\nGND\n2\n3V3\nSupply current\n240\nmA";
        let normalized = normalizer().normalize(raw, &PageMap::single_page());
        assert_eq!(
            normalized.text,
            "Pin assignment table. Pin 1 GND 2 3V3 Supply current 240 mA"
        );
    }

    #[test]
    fn bare_numbers_closing_a_page_are_footers() {
        let raw = "Absolute maximum ratings.\nVDD 3.6 V\n12\u{000c}\
                   Recommended operating range.\n13 / 40";
        let normalized = normalizer().normalize(raw, &PageMap::from_form_feeds(raw));
        assert_eq!(
            normalized.text,
            "Absolute maximum ratings. VDD 3.6 V\n\nRecommended operating range."
        );
    }

    #[test]
    fn page_starts_past_the_text_are_ignored() {
        let page_map = PageMap::new(vec![0, 10]).expect("valid page map");
        let normalized = normalizer().normalize("short", &page_map);
        assert_eq!(normalized.text, "short");
    }

    #[test]
    fn lines_on_two_pages_are_kept() {
        let raw = "Shared line\nalpha.\u{000c}Shared line\nbeta.";
        let normalized = normalizer().normalize(raw, &PageMap::from_form_feeds(raw));
        assert_eq!(normalized.text.matches("Shared line").count(), 2);
    }

    #[test]
    fn bare_urls_are_stripped() {
        let raw = "Visit www.espressif.com or https://docs.example.com/esp32 for details.";
        let normalized = normalizer().normalize(raw, &PageMap::single_page());
        assert_eq!(normalized.text, "Visit or for details.");
    }

    #[test]
    fn offsets_trace_back_to_pages() {
        let raw = "Page one body.\u{000c}Page two body.\u{000c}Page three body.";
        let normalized = normalizer().normalize(raw, &PageMap::from_form_feeds(raw));

        assert_eq!(normalized.page_at(0), 1);
        let second = normalized.text.find("Page two").expect("second page text");
        let third = normalized.text.find("Page three").expect("third page text");
        assert_eq!(normalized.page_at(second), 2);
        assert_eq!(normalized.page_at(third + 3), 3);
        assert_eq!(normalized.raw_offset_at(third), 30);

        let mut previous = 0;
        for position in 0..normalized.text.chars().count() {
            let page = normalized.page_at(position);
            assert!(page >= previous);
            previous = page;
        }
    }

    #[test]
    fn whitespace_only_input_is_blank() {
        let normalized = normalizer().normalize(" \n\t\n ", &PageMap::single_page());
        assert!(normalized.is_blank());
        assert!(normalized.anchors().is_empty());
    }
}
