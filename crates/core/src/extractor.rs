use crate::error::ExtractionError;
use crate::models::PageMap;
use crate::traits::TextExtractor;
use lopdf::Document;

const PAGE_BREAK: char = '\u{000c}';

/// Plain text of a document with its page boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub page_map: PageMap,
}

impl ExtractedText {
    /// Joins per-page texts with form feeds and records where each page
    /// starts.
    pub fn from_pages(pages: &[String]) -> Result<Self, ExtractionError> {
        let mut text = String::new();
        let mut starts = Vec::with_capacity(pages.len());
        let mut position = 0;

        for (index, page) in pages.iter().enumerate() {
            if index > 0 {
                text.push(PAGE_BREAK);
                position += 1;
            }
            starts.push(position);
            text.push_str(page);
            position += page.chars().count();
        }

        if starts.is_empty() {
            starts.push(0);
        }
        Ok(Self {
            text,
            page_map: PageMap::new(starts)?,
        })
    }
}

#[derive(Default)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
        let document =
            Document::load_mem(bytes).map_err(|error| ExtractionError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for page_no in document.get_pages().keys() {
            let text = document
                .extract_text(&[*page_no])
                .map_err(|error| ExtractionError::PdfParse(error.to_string()))?;
            pages.push(text);
        }

        if pages.iter().all(|page| page.trim().is_empty()) {
            return Err(ExtractionError::PdfParse(
                "pdf had no readable page text".to_string(),
            ));
        }

        ExtractedText::from_pages(&pages)
    }
}

/// UTF-8 text where form feeds separate pages.
#[derive(Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
        let text = String::from_utf8_lossy(bytes).into_owned();
        Ok(ExtractedText {
            page_map: PageMap::from_form_feeds(&text),
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_joined_with_form_feeds() {
        let pages = vec!["first".to_string(), String::new(), "third".to_string()];
        let extracted = ExtractedText::from_pages(&pages).unwrap();
        assert_eq!(extracted.text, "first\u{000c}\u{000c}third");
        assert_eq!(extracted.page_map.starts(), &[0, 6, 7]);
        assert_eq!(extracted.page_map.page_of(8), 3);
    }

    #[test]
    fn plain_text_pages_follow_form_feeds() {
        let extracted = PlainTextExtractor.extract(b"one\x0ctwo").unwrap();
        assert_eq!(extracted.page_map.page_count(), 2);
        assert_eq!(extracted.text, "one\u{000c}two");
    }

    #[test]
    fn unreadable_pdf_is_a_parse_error() {
        let result = LopdfExtractor.extract(b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(ExtractionError::PdfParse(_))));
    }
}
