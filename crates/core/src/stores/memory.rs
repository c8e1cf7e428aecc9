//! In-process keyword and vector stores with optional JSON snapshots.

use crate::error::SearchError;
use crate::models::{DocumentChunk, IndexedFile, StoreHit, StoreQuery};
use crate::traits::{KeywordIndex, VectorIndex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    chunks: Vec<DocumentChunk>,
    #[serde(default)]
    empty_files: Vec<IndexedFile>,
}

#[derive(Debug, Default)]
struct TableState {
    /// Chunks grouped by file path, ordered by chunk index.
    chunks: BTreeMap<String, Vec<DocumentChunk>>,
    /// Files that produced no chunks.
    empty_files: BTreeMap<String, IndexedFile>,
}

#[derive(Debug, Default)]
struct ChunkTable {
    state: RwLock<TableState>,
    snapshot: Option<PathBuf>,
}

impl ChunkTable {
    fn open(path: &Path) -> Result<Self, SearchError> {
        let mut state = TableState::default();
        if path.exists() {
            let raw = fs::read_to_string(path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw)?;
            for chunk in snapshot.chunks {
                state.chunks.entry(chunk.file_path.clone()).or_default().push(chunk);
            }
            for chunks in state.chunks.values_mut() {
                chunks.sort_by_key(|chunk| chunk.chunk_index);
            }
            state.empty_files = snapshot
                .empty_files
                .into_iter()
                .map(|file| (file.file_path.clone(), file))
                .collect();
            debug!(
                path = %path.display(),
                files = state.chunks.len() + state.empty_files.len(),
                "loaded store snapshot"
            );
        }
        Ok(Self {
            state: RwLock::new(state),
            snapshot: Some(path.to_path_buf()),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, TableState>, SearchError> {
        self.state
            .read()
            .map_err(|_| SearchError::Request("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, TableState>, SearchError> {
        self.state
            .write()
            .map_err(|_| SearchError::Request("store lock poisoned".to_string()))
    }

    fn upsert(&self, chunks: &[DocumentChunk]) -> Result<(), SearchError> {
        let mut state = self.write()?;
        for chunk in chunks {
            state.empty_files.remove(&chunk.file_path);
            let entries = state.chunks.entry(chunk.file_path.clone()).or_default();
            match entries.iter_mut().find(|existing| existing.id == chunk.id) {
                Some(existing) => *existing = chunk.clone(),
                None => entries.push(chunk.clone()),
            }
            entries.sort_by_key(|entry| entry.chunk_index);
        }
        Ok(())
    }

    fn record(&self, file: &IndexedFile) -> Result<(), SearchError> {
        let mut state = self.write()?;
        if state.chunks.contains_key(&file.file_path) {
            return Err(SearchError::Request(format!(
                "{} still has chunks, delete them before recording it as empty",
                file.file_path
            )));
        }
        let record = IndexedFile {
            chunk_count: 0,
            ..file.clone()
        };
        state.empty_files.insert(file.file_path.clone(), record);
        Ok(())
    }

    fn delete(&self, vault: &str, file_path: &str) -> Result<(), SearchError> {
        let mut state = self.write()?;
        let owned = state
            .chunks
            .get(file_path)
            .is_some_and(|chunks| chunks.iter().all(|chunk| chunk.vault == vault));
        if owned {
            state.chunks.remove(file_path);
        }
        if state
            .empty_files
            .get(file_path)
            .is_some_and(|file| file.vault == vault)
        {
            state.empty_files.remove(file_path);
        }
        Ok(())
    }

    fn indexed_files(&self, vault: &str) -> Result<Vec<IndexedFile>, SearchError> {
        let state = self.read()?;
        let mut files = state
            .chunks
            .values()
            .filter_map(|chunks| chunks.first().map(|first| (first, chunks.len())))
            .filter(|(first, _)| first.vault == vault)
            .map(|(first, chunk_count)| IndexedFile {
                file_path: first.file_path.clone(),
                vault: first.vault.clone(),
                mtime: first.mtime,
                file_hash: first.file_hash.clone(),
                chunk_count,
            })
            .collect::<Vec<_>>();
        files.extend(
            state
                .empty_files
                .values()
                .filter(|file| file.vault == vault)
                .cloned(),
        );
        files.sort_by(|left, right| left.file_path.cmp(&right.file_path));
        Ok(files)
    }

    fn chunks_for_path(&self, vault: &str, file_path: &str) -> Result<Vec<DocumentChunk>, SearchError> {
        let state = self.read()?;
        Ok(state
            .chunks
            .get(file_path)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter(|chunk| chunk.vault == vault)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn touch(&self, vault: &str, file_path: &str, mtime: f64) -> Result<(), SearchError> {
        let mut state = self.write()?;
        if let Some(chunks) = state.chunks.get_mut(file_path) {
            for chunk in chunks.iter_mut().filter(|chunk| chunk.vault == vault) {
                chunk.mtime = mtime;
            }
        }
        if let Some(file) = state
            .empty_files
            .get_mut(file_path)
            .filter(|file| file.vault == vault)
        {
            file.mtime = mtime;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), SearchError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let snapshot = {
            let state = self.read()?;
            Snapshot {
                chunks: state.chunks.values().flatten().cloned().collect(),
                empty_files: state.empty_files.values().cloned().collect(),
            }
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_vec(&snapshot)?)?;
        fs::rename(&staging, path)?;
        Ok(())
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn into_hits(mut scored: Vec<(f64, DocumentChunk)>, limit: usize) -> Vec<StoreHit> {
    scored.sort_by(|left, right| {
        right
            .0
            .total_cmp(&left.0)
            .then_with(|| left.1.id.cmp(&right.1.id))
    });
    scored
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(rank, (score, chunk))| StoreHit { rank, score, chunk })
        .collect()
}

/// BM25 over chunk titles and content.
#[derive(Debug, Default)]
pub struct MemoryKeywordIndex {
    table: ChunkTable,
}

impl MemoryKeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, SearchError> {
        Ok(Self {
            table: ChunkTable::open(path.as_ref())?,
        })
    }

    fn bm25(&self, query: &StoreQuery) -> Result<Vec<StoreHit>, SearchError> {
        let terms = tokenize(&query.text)
            .into_iter()
            .collect::<HashSet<_>>();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let state = self.table.read()?;
        let documents = state
            .chunks
            .values()
            .flatten()
            .map(|chunk| {
                let tokens = tokenize(&format!("{} {}", chunk.title, chunk.content));
                (chunk, tokens)
            })
            .collect::<Vec<_>>();
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let total = documents.len() as f64;
        let average_length =
            documents.iter().map(|(_, tokens)| tokens.len()).sum::<usize>() as f64 / total;
        let mut document_frequency = HashMap::<&str, usize>::new();
        for (_, tokens) in &documents {
            let unique = tokens.iter().map(String::as_str).collect::<HashSet<_>>();
            for term in unique.into_iter().filter(|term| terms.contains(*term)) {
                *document_frequency.entry(term).or_default() += 1;
            }
        }

        let scored = documents
            .iter()
            .filter(|(chunk, _)| query.matches(chunk))
            .filter_map(|(chunk, tokens)| {
                let length = tokens.len() as f64;
                let score = terms
                    .iter()
                    .map(|term| {
                        let frequency = tokens.iter().filter(|token| *token == term).count() as f64;
                        if frequency == 0.0 {
                            return 0.0;
                        }
                        let df = document_frequency.get(term.as_str()).copied().unwrap_or(0) as f64;
                        let idf = (1.0 + (total - df + 0.5) / (df + 0.5)).ln();
                        let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * length / average_length.max(1.0));
                        idf * frequency * (BM25_K1 + 1.0) / (frequency + norm)
                    })
                    .sum::<f64>();
                (score > 0.0).then(|| (score, (*chunk).without_vector()))
            })
            .collect::<Vec<_>>();

        Ok(into_hits(scored, query.limit))
    }

    pub fn flush(&self) -> Result<(), SearchError> {
        self.table.flush()
    }
}

#[async_trait]
impl KeywordIndex for MemoryKeywordIndex {
    async fn upsert_keyword_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), SearchError> {
        let stripped = chunks.iter().map(DocumentChunk::without_vector).collect::<Vec<_>>();
        self.table.upsert(&stripped)
    }

    async fn delete_keyword_path(&self, vault: &str, file_path: &str) -> Result<(), SearchError> {
        self.table.delete(vault, file_path)
    }

    async fn search_keyword(&self, query: &StoreQuery) -> Result<Vec<StoreHit>, SearchError> {
        self.bm25(query)
    }

    async fn keyword_files(&self, vault: &str) -> Result<Vec<IndexedFile>, SearchError> {
        self.table.indexed_files(vault)
    }

    async fn record_keyword_file(&self, file: &IndexedFile) -> Result<(), SearchError> {
        self.table.record(file)
    }

    async fn keyword_chunks_for_path(
        &self,
        vault: &str,
        file_path: &str,
    ) -> Result<Vec<DocumentChunk>, SearchError> {
        self.table.chunks_for_path(vault, file_path)
    }

    async fn touch_keyword_mtime(
        &self,
        vault: &str,
        file_path: &str,
        mtime: f64,
    ) -> Result<(), SearchError> {
        self.table.touch(vault, file_path, mtime)
    }

    async fn flush_keyword(&self) -> Result<(), SearchError> {
        self.table.flush()
    }
}

/// Exhaustive cosine similarity over stored chunk vectors.
#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    table: ChunkTable,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, SearchError> {
        Ok(Self {
            table: ChunkTable::open(path.as_ref())?,
        })
    }

    pub fn flush(&self) -> Result<(), SearchError> {
        self.table.flush()
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut left_norm = 0.0f64;
    let mut right_norm = 0.0f64;
    for (a, b) in left.iter().zip(right) {
        dot += f64::from(*a) * f64::from(*b);
        left_norm += f64::from(*a) * f64::from(*a);
        right_norm += f64::from(*b) * f64::from(*b);
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert_vector_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), SearchError> {
        if let Some(missing) = chunks.iter().find(|chunk| chunk.vector.is_empty()) {
            return Err(SearchError::Request(format!(
                "chunk {} has no embedding",
                missing.id
            )));
        }
        self.table.upsert(chunks)
    }

    async fn delete_vector_path(&self, vault: &str, file_path: &str) -> Result<(), SearchError> {
        self.table.delete(vault, file_path)
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        query: &StoreQuery,
    ) -> Result<Vec<StoreHit>, SearchError> {
        let state = self.table.read()?;
        let scored = state
            .chunks
            .values()
            .flatten()
            .filter(|chunk| query.matches(chunk))
            .filter(|chunk| chunk.vector.len() == query_vector.len())
            .map(|chunk| (cosine_similarity(query_vector, &chunk.vector), chunk.without_vector()))
            .collect::<Vec<_>>();
        Ok(into_hits(scored, query.limit))
    }

    async fn vector_files(&self, vault: &str) -> Result<Vec<IndexedFile>, SearchError> {
        self.table.indexed_files(vault)
    }

    async fn record_vector_file(&self, file: &IndexedFile) -> Result<(), SearchError> {
        self.table.record(file)
    }

    async fn vector_chunks_for_path(
        &self,
        vault: &str,
        file_path: &str,
    ) -> Result<Vec<DocumentChunk>, SearchError> {
        self.table.chunks_for_path(vault, file_path)
    }

    async fn touch_vector_mtime(
        &self,
        vault: &str,
        file_path: &str,
        mtime: f64,
    ) -> Result<(), SearchError> {
        self.table.touch(vault, file_path, mtime)
    }

    async fn flush_vector(&self) -> Result<(), SearchError> {
        self.table.flush()
    }
}
