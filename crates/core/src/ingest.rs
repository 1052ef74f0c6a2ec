use crate::error::ExtractionError;
use crate::extractor::{ExtractedText, LopdfExtractor, PlainTextExtractor};
use crate::traits::TextExtractor;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const DATASHEET_EXTENSIONS: [&str; 2] = ["pdf", "txt"];

pub fn discover_datasheets(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_datasheet = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                DATASHEET_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });

        if is_datasheet {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// SHA-256 of the content, lowercase hex. This is the dedup key.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Reads a datasheet from disk, picking the extractor from the extension.
pub fn load_datasheet(path: &Path) -> Result<ExtractedText, ExtractionError> {
    let bytes = fs::read(path)?;
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        LopdfExtractor.extract(&bytes)
    } else {
        PlainTextExtractor.extract(&bytes)
    }
}
