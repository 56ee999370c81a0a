//! Vector Index
//!
//! Holds (embedding, passage) pairs and answers exact nearest-neighbour
//! queries by cosine similarity. An index persists as a directory with two
//! JSON files:
//! - `manifest.json`: format version, model id, dimension, entry count
//! - `entries.json`: passages with their vectors, in insertion order
//!
//! Persisting writes a sibling temp directory and renames it into place, so
//! readers see either no index or a complete one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};
use ulid::Ulid;

use super::chunker::Passage;
use super::embeddings::{cosine_similarity, Embedding};

/// On-disk format version; bumped on incompatible layout changes
pub const INDEX_FORMAT_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const ENTRIES_FILE: &str = "entries.json";

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Got {embeddings} embeddings for {passages} passages")]
    LengthMismatch { passages: usize, embeddings: usize },
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Cannot build an index without passages")]
    Empty,
    #[error("Index corrupt or incompatible: {0}")]
    CorruptOrIncompatible(String),
    #[error("Invalid index path: {0}")]
    InvalidPath(String),
    #[error("Top-k must be positive")]
    InvalidTopK,
}

impl Serialize for IndexError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Index metadata persisted alongside the entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    pub format_version: u32,
    /// Embedding model the vectors were produced with
    pub model_id: String,
    pub dimension: usize,
    pub count: usize,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexEntry {
    passage: Passage,
    vector: Embedding,
}

/// A passage matched by a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub passage: Passage,
    /// Cosine similarity to the query
    pub score: f32,
}

/// In-memory vector index
#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Build an index from parallel passages and embeddings.
    pub fn build(
        passages: Vec<Passage>,
        embeddings: Vec<Embedding>,
        model_id: &str,
    ) -> Result<Self, IndexError> {
        if passages.len() != embeddings.len() {
            return Err(IndexError::LengthMismatch {
                passages: passages.len(),
                embeddings: embeddings.len(),
            });
        }

        let dimension = match embeddings.first() {
            Some(first) => first.len(),
            None => return Err(IndexError::Empty),
        };
        if dimension == 0 {
            return Err(IndexError::DimensionMismatch { expected: 1, actual: 0 });
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let entries: Vec<IndexEntry> = passages
            .into_iter()
            .zip(embeddings)
            .map(|(passage, vector)| IndexEntry { passage, vector })
            .collect();

        info!(count = entries.len(), dimension = dimension, model = %model_id, "Built vector index");

        Ok(Self {
            manifest: IndexManifest {
                format_version: INDEX_FORMAT_VERSION,
                model_id: model_id.to_string(),
                dimension,
                count: entries.len(),
                built_at: Utc::now(),
            },
            entries,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn dimension(&self) -> usize {
        self.manifest.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Passages in insertion order
    pub fn passages(&self) -> impl Iterator<Item = &Passage> {
        self.entries.iter().map(|e| &e.passage)
    }

    /// Top-k passages by descending cosine similarity. Equal scores keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidTopK);
        }
        if query.len() != self.manifest.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.manifest.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(query, &entry.vector)))
            .collect();

        // sort_by is stable, so ties stay in insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        debug!(k = k, hits = scored.len(), "Searched vector index");

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                passage: self.entries[i].passage.clone(),
                score,
            })
            .collect())
    }

    /// Write the index to `dir`, replacing any index already there.
    pub fn persist(&self, dir: &Path) -> Result<(), IndexError> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| IndexError::InvalidPath(dir.display().to_string()))?;

        if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let staging = dir.with_file_name(format!(".{}.tmp-{}", name, Ulid::new()));
        if let Err(e) = self.write_files(&staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        if dir.exists() {
            let retired = dir.with_file_name(format!(".{}.old-{}", name, Ulid::new()));
            if let Err(e) = fs::rename(dir, &retired) {
                let _ = fs::remove_dir_all(&staging);
                return Err(e.into());
            }
            replace_dir(&staging, dir, &retired)?;
        } else if let Err(e) = fs::rename(&staging, dir) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e.into());
        }

        info!(path = %dir.display(), count = self.len(), "Persisted vector index");
        Ok(())
    }

    fn write_files(&self, staging: &Path) -> Result<(), IndexError> {
        fs::create_dir_all(staging)?;
        fs::write(
            staging.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&self.manifest)?,
        )?;
        fs::write(staging.join(ENTRIES_FILE), serde_json::to_string(&self.entries)?)?;
        Ok(())
    }

    /// Read an index previously written by [`VectorIndex::persist`].
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let manifest: IndexManifest = read_json(&dir.join(MANIFEST_FILE))?;

        if manifest.format_version != INDEX_FORMAT_VERSION {
            return Err(IndexError::CorruptOrIncompatible(format!(
                "unsupported format version {} (expected {})",
                manifest.format_version, INDEX_FORMAT_VERSION
            )));
        }
        if manifest.dimension == 0 {
            return Err(IndexError::CorruptOrIncompatible("zero dimension".to_string()));
        }

        let entries: Vec<IndexEntry> = read_json(&dir.join(ENTRIES_FILE))?;

        if entries.len() != manifest.count {
            return Err(IndexError::CorruptOrIncompatible(format!(
                "manifest lists {} entries, found {}",
                manifest.count,
                entries.len()
            )));
        }
        if let Some((i, entry)) = entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.vector.len() != manifest.dimension)
        {
            return Err(IndexError::CorruptOrIncompatible(format!(
                "entry {} has dimension {}, manifest says {}",
                i,
                entry.vector.len(),
                manifest.dimension
            )));
        }

        info!(path = %dir.display(), count = entries.len(), model = %manifest.model_id, "Loaded vector index");
        Ok(Self { manifest, entries })
    }
}

/// Move `staging` to `dir`, where the previous index already sits aside at
/// `retired`. On failure the previous index is moved back.
fn replace_dir(staging: &Path, dir: &Path, retired: &Path) -> Result<(), IndexError> {
    if let Err(e) = fs::rename(staging, dir) {
        if let Err(restore) = fs::rename(retired, dir) {
            warn!(path = %retired.display(), error = %restore, "Failed to restore previous index");
        }
        let _ = fs::remove_dir_all(staging);
        return Err(e.into());
    }

    if let Err(e) = fs::remove_dir_all(retired) {
        warn!(path = %retired.display(), error = %e, "Failed to remove replaced index");
    }
    Ok(())
}

/// Whether an index directory is present. Presence alone decides build vs load.
pub fn index_exists(dir: &Path) -> bool {
    dir.exists()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, IndexError> {
    let content = fs::read_to_string(path).map_err(|e| {
        IndexError::CorruptOrIncompatible(format!("cannot read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        IndexError::CorruptOrIncompatible(format!("cannot parse {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn passage(text: &str, page: u32) -> Passage {
        Passage {
            text: text.to_string(),
            source: "data/policy.pdf".to_string(),
            page,
            chunk_index: 0,
        }
    }

    fn sample_index() -> VectorIndex {
        let passages = vec![
            passage("east", 0),
            passage("north", 1),
            passage("north-east", 2),
            passage("also east", 3),
        ];
        let embeddings = vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.7, 0.7],
            vec![2.0, 0.0],
        ];
        VectorIndex::build(passages, embeddings, "test-model").unwrap()
    }

    #[test]
    fn test_build_length_mismatch() {
        let err = VectorIndex::build(vec![passage("a", 0)], vec![], "m").unwrap_err();
        assert!(matches!(err, IndexError::LengthMismatch { passages: 1, embeddings: 0 }));
    }

    #[test]
    fn test_build_dimension_mismatch() {
        let err = VectorIndex::build(
            vec![passage("a", 0), passage("b", 1)],
            vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]],
            "m",
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_build_empty() {
        assert!(matches!(VectorIndex::build(vec![], vec![], "m"), Err(IndexError::Empty)));
    }

    #[test]
    fn test_search_orders_by_score_with_stable_ties() {
        let index = sample_index();
        let hits = index.search(&[1.0, 0.0], 4).unwrap();

        let texts: Vec<&str> = hits.iter().map(|h| h.passage.text.as_str()).collect();
        // "east" and "also east" both score 1.0; insertion order decides
        assert_eq!(texts, vec!["east", "also east", "north-east", "north"]);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_search_truncates_to_k() {
        let index = sample_index();
        assert_eq!(index.search(&[0.0, 1.0], 2).unwrap().len(), 2);
        assert_eq!(index.search(&[0.0, 1.0], 50).unwrap().len(), 4);
        assert_eq!(index.search(&[0.0, 1.0], 1).unwrap()[0].passage.text, "north");
    }

    #[test]
    fn test_search_rejects_bad_input() {
        let index = sample_index();
        assert!(matches!(index.search(&[1.0, 0.0], 0), Err(IndexError::InvalidTopK)));
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 3),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_persist_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("vector_index");
        let index = sample_index();
        index.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.manifest(), index.manifest());
        assert_eq!(loaded.len(), 4);

        for query in [[1.0, 0.0], [0.0, 1.0], [0.3, 0.9]] {
            assert_eq!(loaded.search(&query, 3).unwrap(), index.search(&query, 3).unwrap());
        }
    }

    #[test]
    fn test_persist_replaces_and_leaves_no_staging() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector_index");
        sample_index().persist(&path).unwrap();

        let smaller = VectorIndex::build(vec![passage("only", 0)], vec![vec![1.0, 0.0]], "m2").unwrap();
        smaller.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.manifest().model_id, "m2");

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["vector_index".to_string()]);
    }

    #[test]
    fn test_load_empty_directory_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let err = VectorIndex::load(dir.path()).unwrap_err();
        assert!(matches!(err, IndexError::CorruptOrIncompatible(_)));
    }

    #[test]
    fn test_load_garbage_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector_index");
        sample_index().persist(&path).unwrap();
        fs::write(path.join(ENTRIES_FILE), "{not json").unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::CorruptOrIncompatible(_)));
    }

    #[test]
    fn test_load_inconsistent_dimension_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector_index");
        sample_index().persist(&path).unwrap();

        let mut manifest: IndexManifest =
            serde_json::from_str(&fs::read_to_string(path.join(MANIFEST_FILE)).unwrap()).unwrap();
        manifest.dimension = 3;
        fs::write(path.join(MANIFEST_FILE), serde_json::to_string(&manifest).unwrap()).unwrap();

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::CorruptOrIncompatible(_)));
    }

    #[test]
    fn test_load_unknown_version_is_incompatible() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector_index");
        sample_index().persist(&path).unwrap();

        let mut manifest: IndexManifest =
            serde_json::from_str(&fs::read_to_string(path.join(MANIFEST_FILE)).unwrap()).unwrap();
        manifest.format_version = INDEX_FORMAT_VERSION + 1;
        fs::write(path.join(MANIFEST_FILE), serde_json::to_string(&manifest).unwrap()).unwrap();

        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::CorruptOrIncompatible(_))
        ));
    }

    #[test]
    fn test_search_survives_overflowing_vectors() {
        let passages = vec![passage("huge", 0), passage("east", 1), passage("north", 2)];
        let embeddings = vec![vec![f32::INFINITY, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        let index = VectorIndex::build(passages, embeddings, "m").unwrap();

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.passage.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "huge", "north"]);
        assert!(hits.iter().all(|h| !h.score.is_nan()));
    }

    #[test]
    fn test_failed_swap_restores_previous_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector_index");
        sample_index().persist(&path).unwrap();

        let retired = dir.path().join(".vector_index.old-test");
        fs::rename(&path, &retired).unwrap();
        let missing_staging = dir.path().join(".vector_index.tmp-missing");

        let err = replace_dir(&missing_staging, &path, &retired).unwrap_err();
        assert!(matches!(err, IndexError::Io(_)));

        assert!(!retired.exists());
        assert_eq!(VectorIndex::load(&path).unwrap().len(), 4);
    }

    #[test]
    fn test_swap_discards_previous_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vector_index");
        let staging = dir.path().join(".vector_index.tmp-test");
        let retired = dir.path().join(".vector_index.old-test");
        sample_index().persist(&staging).unwrap();
        sample_index().persist(&retired).unwrap();

        replace_dir(&staging, &path, &retired).unwrap();
        assert!(!staging.exists());
        assert!(!retired.exists());
        assert!(VectorIndex::load(&path).is_ok());
    }
}
