//! Document Chunking
//!
//! Splits page text into overlapping passages for embedding and retrieval.
//! Splitting is recursive over a ladder of separators (paragraph, line,
//! word, character) so passage boundaries land on the coarsest break that
//! still keeps every passage within the size limit.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use super::loader::Page;

/// Separators tried in order; the empty separator splits into characters.
pub const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Error, Debug)]
pub enum ChunkerError {
    #[error("Invalid chunker config: {0}")]
    InvalidConfig(String),
}

impl Serialize for ChunkerError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Passage size limits, in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 150,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ChunkerError> {
        if self.chunk_size == 0 {
            return Err(ChunkerError::InvalidConfig("chunk size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkerError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A retrievable passage of page text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passage {
    pub text: String,
    /// Path of the originating document
    pub source: String,
    /// Zero-based page number
    pub page: u32,
    /// Position within the page
    pub chunk_index: u32,
}

impl Passage {
    /// File name of the source document, as shown in citations
    pub fn file_name(&self) -> String {
        Path::new(&self.source)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.source.clone())
    }

    /// One-based page number for display
    pub fn display_page(&self) -> u32 {
        self.page + 1
    }
}

/// Split every page into passages, in page order then position order.
pub fn split_pages(pages: &[Page], config: &ChunkerConfig) -> Result<Vec<Passage>, ChunkerError> {
    config.validate()?;

    let mut passages = Vec::new();
    for page in pages {
        let chunks = split_text(&page.text, config);
        debug!(source = %page.source, page = page.page, chunks = chunks.len(), "Chunked page");

        passages.extend(chunks.into_iter().enumerate().map(|(i, text)| Passage {
            text,
            source: page.source.clone(),
            page: page.page,
            chunk_index: i as u32,
        }));
    }

    info!(pages = pages.len(), passages = passages.len(), "Split pages into passages");
    Ok(passages)
}

/// Split a text into trimmed, non-empty chunks of at most `chunk_size` characters.
pub fn split_text(text: &str, config: &ChunkerConfig) -> Vec<String> {
    let mut chunks = Vec::new();
    split_recursive(text, &SEPARATORS, config, &mut chunks);
    chunks
}

fn split_recursive(text: &str, separators: &[&str], config: &ChunkerConfig, out: &mut Vec<String>) {
    // Coarsest separator present in the text; finer ones are kept for oversized pieces
    let mut separator = "";
    let mut finer: &[&str] = &[];
    for (i, &sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            separator = sep;
            if !sep.is_empty() {
                finer = &separators[i + 1..];
            }
            break;
        }
    }

    let mut fitting: Vec<&str> = Vec::new();
    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < config.chunk_size {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            merge_pieces(&fitting, config, out);
            fitting.clear();
        }

        if finer.is_empty() {
            push_trimmed(piece.to_string(), out);
        } else {
            split_recursive(piece, finer, config, out);
        }
    }

    if !fitting.is_empty() {
        merge_pieces(&fitting, config, out);
    }
}

/// Split on `separator`, attaching each separator to the start of the piece
/// that follows it. Empty pieces are dropped.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0usize;
    for (idx, _) in text.match_indices(separator) {
        pieces.push(&text[start..idx]);
        start = idx;
    }
    pieces.push(&text[start..]);
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Greedily pack pieces into chunks. After each emitted chunk, the tail that
/// fits within `chunk_overlap` is carried into the next one.
fn merge_pieces(pieces: &[&str], config: &ChunkerConfig, out: &mut Vec<String>) {
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);

        if total + len > config.chunk_size && !window.is_empty() {
            push_trimmed(join(&window), out);

            while total > config.chunk_overlap || (total + len > config.chunk_size && total > 0) {
                match window.pop_front() {
                    Some((_, dropped)) => total -= dropped,
                    None => break,
                }
            }
        }

        window.push_back((piece, len));
        total += len;
    }

    if !window.is_empty() {
        push_trimmed(join(&window), out);
    }
}

fn join(window: &VecDeque<(&str, usize)>) -> String {
    window.iter().map(|(piece, _)| *piece).collect()
}

fn push_trimmed(chunk: String, out: &mut Vec<String>) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
