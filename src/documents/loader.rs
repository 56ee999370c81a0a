//! Document Loading
//!
//! Reads a corpus directory into per-page records. Each page keeps the path of
//! the document it came from and its zero-based page number, which are the
//! only provenance fields surfaced in citations.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Page separator for paginated plain-text documents
const FORM_FEED: char = '\u{000C}';

/// Maximum file size (200 MB) accepted by the loader.
const MAX_FILE_SIZE: u64 = 200 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No documents found in '{0}'. Put your documents in {0}/")]
    NoDocumentsFound(String),
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("Text extraction failed for {path}: {message}")]
    Extraction { path: String, message: String },
    #[error("File too large: {0} bytes (max {1} bytes)")]
    FileTooLarge(u64, u64),
}

impl Serialize for LoaderError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Supported paginated document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    /// Plain text with form-feed page breaks
    Text,
}

impl DocumentFormat {
    pub fn from_extension(extension: &str) -> Result<Self, LoaderError> {
        match extension {
            "pdf" => Ok(DocumentFormat::Pdf),
            "txt" => Ok(DocumentFormat::Text),
            other => Err(LoaderError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// One page of a source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Path of the originating document
    pub source: String,
    /// Zero-based page number
    pub page: u32,
    pub text: String,
}

/// List the documents in `dir` with the given extension, sorted by file name.
pub fn discover_documents(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, LoaderError> {
    let mut paths = Vec::new();

    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .map(|e| e.to_string_lossy() == extension)
                .unwrap_or(false);
            if matches {
                paths.push(path);
            }
        }
    }

    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if paths.is_empty() {
        return Err(LoaderError::NoDocumentsFound(dir.display().to_string()));
    }

    Ok(paths)
}

/// Load every page of every matching document, in file order then page order.
pub fn load_pages(dir: &Path, extension: &str) -> Result<Vec<Page>, LoaderError> {
    let format = DocumentFormat::from_extension(extension)?;
    let paths = discover_documents(dir, extension)?;

    let mut pages = Vec::new();
    for path in &paths {
        let file_pages = load_document(path, format)?;
        if file_pages.is_empty() {
            warn!(path = %path.display(), "Document has no pages");
        }
        pages.extend(file_pages);
    }

    info!(documents = paths.len(), pages = pages.len(), dir = %dir.display(), "Loaded corpus");
    Ok(pages)
}

/// Split a single document into pages.
pub fn load_document(path: &Path, format: DocumentFormat) -> Result<Vec<Page>, LoaderError> {
    let file_size = fs::metadata(path)?.len();
    if file_size > MAX_FILE_SIZE {
        return Err(LoaderError::FileTooLarge(file_size, MAX_FILE_SIZE));
    }

    let source = path.to_string_lossy().to_string();
    let texts = match format {
        DocumentFormat::Pdf => pdf_extract::extract_text_by_pages(path).map_err(|e| {
            LoaderError::Extraction {
                path: source.clone(),
                message: e.to_string(),
            }
        })?,
        DocumentFormat::Text => split_form_feed(&fs::read_to_string(path)?),
    };

    debug!(path = %source, pages = texts.len(), "Extracted document pages");

    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page {
            source: source.clone(),
            page: i as u32,
            text,
        })
        .collect())
}

/// Split paginated text on form feeds. A trailing form feed does not open an
/// extra empty page.
fn split_form_feed(content: &str) -> Vec<String> {
    let trimmed = content.strip_suffix(FORM_FEED).unwrap_or(content);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split(FORM_FEED).map(|p| p.to_string()).collect()
}
