//! Retrieval Reports
//!
//! Plain-text rendering of query results, for the console and for the
//! report file written after each query.

use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

use super::chunker::Passage;
use super::index::SearchHit;

pub const RULE_WIDTH: usize = 90;
/// Longest snippet shown per hit, in characters
pub const SNIPPET_MAX_CHARS: usize = 700;
const ELLIPSIS: &str = " ...";

/// Single-line preview of a passage
pub fn snippet(text: &str) -> String {
    let flat = text.trim().replace('\n', " ");
    if flat.chars().count() <= SNIPPET_MAX_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(SNIPPET_MAX_CHARS).collect();
    cut.push_str(ELLIPSIS);
    cut
}

/// `SOURCE: handbook.pdf, p.3`
pub fn citation(passage: &Passage) -> String {
    format!("SOURCE: {}, p.{}", passage.file_name(), passage.display_page())
}

fn banner() -> String {
    "=".repeat(RULE_WIDTH)
}

fn divider() -> String {
    "-".repeat(RULE_WIDTH)
}

/// Report file contents for one query.
pub fn render_report(query: &str, hits: &[SearchHit]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\nQUERY: {}\n{}\n\n", banner(), query, banner()));

    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {}\n{}\n{}\n\n",
            i + 1,
            citation(&hit.passage),
            divider(),
            snippet(&hit.passage.text)
        ));
    }

    out.push_str(&banner());
    out.push('\n');
    out
}

/// Interactive rendering; same content as the report with looser spacing.
pub fn render_console(query: &str, hits: &[SearchHit]) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{}\nQUERY: {}\n{}\n", banner(), query, banner()));

    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "\n[{}] {}\n{}\n{}\n",
            i + 1,
            citation(&hit.passage),
            divider(),
            snippet(&hit.passage.text)
        ));
    }

    out.push_str(&format!("\n{}\n", banner()));
    out
}

/// Overwrite `path` with the report for `query`.
pub fn save_report(path: &Path, query: &str, hits: &[SearchHit]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_report(query, hits))?;
    info!(path = %path.display(), hits = hits.len(), "Saved retrieval report");
    Ok(())
}
