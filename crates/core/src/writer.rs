use crate::cancel::CancellationToken;
use crate::change::TouchedFile;
use crate::chunking::{ChunkText, ChunkingConfig, SourceContent};
use crate::config::RecallConfig;
use crate::error::{IndexError, SearchError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::metadata::{markdown_metadata, pdf_metadata, DocumentMetadata};
use crate::models::{chunk_id, DocumentChunk, IndexedFile, SourceType};
use crate::retry::with_retries;
use crate::sources::{digest_bytes, modified_seconds, SourceFile};
use crate::traits::{Embedder, KeywordIndex, VectorIndex};
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct WriterOptions {
    pub chunking: ChunkingConfig,
    pub batch_size: usize,
    pub store_attempts: usize,
    pub retry_backoff: Duration,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            batch_size: 16,
            store_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl From<&RecallConfig> for WriterOptions {
    fn from(config: &RecallConfig) -> Self {
        Self {
            chunking: config.chunking.into(),
            batch_size: config.embedding.batch_size,
            store_attempts: config.store_attempts,
            ..Self::default()
        }
    }
}

/// One async mutex per file path, created on demand.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    pub async fn lock(&self, file_path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(file_path.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Both stores' chunks for one path, taken before a write.
#[derive(Debug, Clone, Default)]
struct PathSnapshot {
    keyword: Vec<DocumentChunk>,
    vector: Vec<DocumentChunk>,
}

struct ParsedFile {
    metadata: DocumentMetadata,
    chunks: Vec<ChunkText>,
    file_hash: String,
    mtime: f64,
}

/// Embedded chunks plus the change-detection state they were built from.
struct PreparedFile {
    state: IndexedFile,
    chunks: Vec<DocumentChunk>,
}

/// Applies change sets to the keyword and vector stores.
///
/// Every mutation of a path happens under that path's lock and is preceded
/// by a snapshot of both stores, which is restored if the write fails or the
/// job is cancelled while the file is in flight.
pub struct IndexWriter<K: ?Sized, V: ?Sized> {
    keyword: Arc<K>,
    vector: Arc<V>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn PdfExtractor>,
    options: WriterOptions,
    locks: PathLocks,
}

impl<K, V> IndexWriter<K, V>
where
    K: KeywordIndex + ?Sized,
    V: VectorIndex + ?Sized,
{
    pub fn new(keyword: Arc<K>, vector: Arc<V>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            keyword,
            vector,
            embedder,
            extractor: Arc::new(LopdfExtractor),
            options: WriterOptions::default(),
            locks: PathLocks::default(),
        }
    }

    pub fn with_options(mut self, options: WriterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PdfExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn keyword(&self) -> &Arc<K> {
        &self.keyword
    }

    pub fn vector(&self) -> &Arc<V> {
        &self.vector
    }

    /// Replaces every chunk of `file` in both stores. Returns the new chunk count.
    ///
    /// Nothing is touched when reading, parsing or embedding fails.
    pub async fn index_file(
        &self,
        file: &SourceFile,
        cancel: &CancellationToken,
    ) -> Result<usize, IndexError> {
        let key = file.key();
        let prepared = self.prepare(file).await?;
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled);
        }

        let _guard = self.locks.lock(&key).await;
        let snapshot = self.snapshot(&file.vault, &key).await?;

        let (vault, path, new_file) = (file.vault.as_str(), key.as_str(), &prepared);
        let written = with_retries(path, self.options.store_attempts, self.options.retry_backoff, move || {
            self.replace(vault, path, new_file)
        })
        .await;

        if let Err(error) = written {
            self.restore_or_warn(&file.vault, &key, &snapshot).await;
            return Err(error.into());
        }
        if cancel.is_cancelled() {
            self.restore_or_warn(&file.vault, &key, &snapshot).await;
            return Err(IndexError::Cancelled);
        }

        let count = prepared.chunks.len();
        if count == 0 {
            info!(path = %key, "indexed file with no text");
        } else {
            info!(path = %key, chunks = count, "indexed file");
        }
        Ok(count)
    }

    /// Removes all chunks of a path from both stores. A failed attempt
    /// restores the pre-deletion state before retrying.
    pub async fn delete_file(&self, vault: &str, file_path: &str) -> Result<(), IndexError> {
        let _guard = self.locks.lock(file_path).await;
        let snapshot = &self.snapshot(vault, file_path).await?;

        with_retries(file_path, self.options.store_attempts, self.options.retry_backoff, move || async move {
            let deleted = async {
                self.keyword.delete_keyword_path(vault, file_path).await?;
                self.vector.delete_vector_path(vault, file_path).await
            }
            .await;
            if deleted.is_err() {
                self.restore_or_warn(vault, file_path, snapshot).await;
            }
            deleted
        })
        .await?;

        info!(path = file_path, "removed file from index");
        Ok(())
    }

    /// Records a new mtime for a file whose content did not change.
    pub async fn touch_file(&self, vault: &str, touched: &TouchedFile) -> Result<(), IndexError> {
        let _guard = self.locks.lock(&touched.file_path).await;
        self.keyword
            .touch_keyword_mtime(vault, &touched.file_path, touched.mtime)
            .await?;
        self.vector
            .touch_vector_mtime(vault, &touched.file_path, touched.mtime)
            .await?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<(), IndexError> {
        self.keyword.flush_keyword().await?;
        self.vector.flush_vector().await?;
        Ok(())
    }

    /// Reads, chunks and embeds a file without touching the stores.
    async fn prepare(&self, file: &SourceFile) -> Result<PreparedFile, IndexError> {
        let parsed = {
            let file = file.clone();
            let extractor = Arc::clone(&self.extractor);
            let chunking = self.options.chunking;
            tokio::task::spawn_blocking(move || parse_file(&file, extractor.as_ref(), chunking))
                .await
                .map_err(|error| IndexError::Io(std::io::Error::other(error.to_string())))??
        };

        let texts = parsed
            .chunks
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.options.batch_size.max(1)) {
            vectors.extend(self.embedder.embed(batch).await?);
        }
        if vectors.len() != texts.len() {
            return Err(IndexError::Embedding(crate::error::EmbedError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            }));
        }
        debug!(path = %file.path.display(), chunks = texts.len(), "embedded file");

        let key = file.key();
        let state = IndexedFile {
            file_path: key.clone(),
            vault: file.vault.clone(),
            mtime: parsed.mtime,
            file_hash: parsed.file_hash.clone(),
            chunk_count: texts.len(),
        };
        let metadata = parsed.metadata;
        let chunks = parsed
            .chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (chunk, vector))| DocumentChunk {
                id: chunk_id(&key, index as u32),
                vector,
                file_path: key.clone(),
                file_hash: parsed.file_hash.clone(),
                mtime: parsed.mtime,
                title: metadata.title.clone(),
                category: metadata.category.clone(),
                date: metadata.date,
                vault: file.vault.clone(),
                people: metadata.people.clone(),
                projects: metadata.projects.clone(),
                chunk_index: index as u32,
                content: chunk.text,
                source_type: file.source_type,
                page_number: chunk.page_number,
            })
            .collect();
        Ok(PreparedFile { state, chunks })
    }

    async fn snapshot(&self, vault: &str, file_path: &str) -> Result<PathSnapshot, SearchError> {
        let (keyword, vector) = tokio::try_join!(
            self.keyword.keyword_chunks_for_path(vault, file_path),
            self.vector.vector_chunks_for_path(vault, file_path)
        )?;
        Ok(PathSnapshot { keyword, vector })
    }

    /// Swaps the stored chunks of a path for `prepared`. A file without
    /// chunks leaves only its state record behind.
    async fn replace(
        &self,
        vault: &str,
        file_path: &str,
        prepared: &PreparedFile,
    ) -> Result<(), SearchError> {
        self.keyword.delete_keyword_path(vault, file_path).await?;
        self.vector.delete_vector_path(vault, file_path).await?;
        if prepared.chunks.is_empty() {
            self.keyword.record_keyword_file(&prepared.state).await?;
            return self.vector.record_vector_file(&prepared.state).await;
        }
        self.keyword.upsert_keyword_chunks(&prepared.chunks).await?;
        self.vector.upsert_vector_chunks(&prepared.chunks).await
    }

    async fn restore_or_warn(&self, vault: &str, file_path: &str, snapshot: &PathSnapshot) {
        let restored = async {
            self.keyword.delete_keyword_path(vault, file_path).await?;
            self.vector.delete_vector_path(vault, file_path).await?;
            if !snapshot.keyword.is_empty() {
                self.keyword.upsert_keyword_chunks(&snapshot.keyword).await?;
            }
            if !snapshot.vector.is_empty() {
                self.vector.upsert_vector_chunks(&snapshot.vector).await?;
            }
            Ok::<_, SearchError>(())
        }
        .await;

        match restored {
            Ok(()) => debug!(path = file_path, "restored previous index state"),
            Err(error) => warn!(
                path = file_path,
                error = %error,
                "could not restore previous index state, path will be re-indexed next run"
            ),
        }
    }
}

fn parse_file(
    file: &SourceFile,
    extractor: &dyn PdfExtractor,
    chunking: ChunkingConfig,
) -> Result<ParsedFile, IndexError> {
    let bytes = fs::read(&file.path)?;
    let file_hash = digest_bytes(&bytes);
    let mtime = modified_seconds(&file.path)?;

    let (metadata, content) = match file.source_type {
        SourceType::Markdown => {
            let raw = String::from_utf8_lossy(&bytes);
            let (metadata, body) = markdown_metadata(&file.path, &file.root, &raw);
            (metadata, SourceContent::Markdown(body))
        }
        SourceType::Pdf => {
            let pages = extractor.extract_pages(&file.path)?;
            (pdf_metadata(&file.path, &file.root), SourceContent::Pdf(pages))
        }
    };

    Ok(ParsedFile {
        metadata,
        chunks: content.chunks(chunking).collect(),
        file_hash,
        mtime,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::EmbedError;
    use crate::extractor::PageText;
    use crate::models::{StoreHit, StoreQuery, VaultFilter};
    use crate::stores::{MemoryKeywordIndex, MemoryVectorIndex};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Memory vector store that fails a set number of upserts or deletes.
    #[derive(Default)]
    struct FlakyVectorIndex {
        inner: MemoryVectorIndex,
        failing_upserts: AtomicUsize,
        failing_deletes: AtomicUsize,
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl VectorIndex for FlakyVectorIndex {
        async fn upsert_vector_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), SearchError> {
            if take_failure(&self.failing_upserts) {
                return Err(SearchError::Request("vector store unavailable".to_string()));
            }
            self.inner.upsert_vector_chunks(chunks).await
        }

        async fn delete_vector_path(&self, vault: &str, file_path: &str) -> Result<(), SearchError> {
            if take_failure(&self.failing_deletes) {
                return Err(SearchError::Request("vector store unavailable".to_string()));
            }
            self.inner.delete_vector_path(vault, file_path).await
        }

        async fn search_vector(
            &self,
            query_vector: &[f32],
            query: &StoreQuery,
        ) -> Result<Vec<StoreHit>, SearchError> {
            self.inner.search_vector(query_vector, query).await
        }

        async fn vector_files(&self, vault: &str) -> Result<Vec<IndexedFile>, SearchError> {
            self.inner.vector_files(vault).await
        }

        async fn record_vector_file(&self, file: &IndexedFile) -> Result<(), SearchError> {
            self.inner.record_vector_file(file).await
        }

        async fn vector_chunks_for_path(
            &self,
            vault: &str,
            file_path: &str,
        ) -> Result<Vec<DocumentChunk>, SearchError> {
            self.inner.vector_chunks_for_path(vault, file_path).await
        }

        async fn touch_vector_mtime(
            &self,
            vault: &str,
            file_path: &str,
            mtime: f64,
        ) -> Result<(), SearchError> {
            self.inner.touch_vector_mtime(vault, file_path, mtime).await
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        fn name(&self) -> &str {
            "down"
        }

        fn dimensions(&self) -> usize {
            32
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Response {
                provider: "down".to_string(),
                details: "connection refused".to_string(),
            })
        }
    }

    struct StaticPages;

    impl PdfExtractor for StaticPages {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IndexError> {
            Ok(vec![
                PageText {
                    number: 1,
                    text: "Invoice summary".to_string(),
                },
                PageText {
                    number: 2,
                    text: "Payment terms".to_string(),
                },
            ])
        }
    }

    fn embedder() -> Arc<dyn Embedder> {
        Arc::new(CharacterNgramEmbedder { dimensions: 32 })
    }

    fn note(dir: &Path, name: &str, body: &str) -> SourceFile {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        SourceFile {
            path,
            root: dir.to_path_buf(),
            vault: "work".to_string(),
            source_type: SourceType::Markdown,
        }
    }

    fn writer(
        vector: Arc<FlakyVectorIndex>,
    ) -> IndexWriter<MemoryKeywordIndex, FlakyVectorIndex> {
        IndexWriter::new(Arc::new(MemoryKeywordIndex::new()), vector, embedder()).with_options(
            WriterOptions {
                store_attempts: 1,
                retry_backoff: Duration::ZERO,
                ..WriterOptions::default()
            },
        )
    }

    async fn contents(
        writer: &IndexWriter<MemoryKeywordIndex, FlakyVectorIndex>,
        path: &str,
    ) -> (Vec<String>, Vec<String>) {
        let keyword = writer.keyword().keyword_chunks_for_path("work", path).await.unwrap();
        let vector = writer.vector().vector_chunks_for_path("work", path).await.unwrap();
        (
            keyword.into_iter().map(|chunk| chunk.content).collect(),
            vector.into_iter().map(|chunk| chunk.content).collect(),
        )
    }

    #[tokio::test]
    async fn indexes_markdown_into_both_stores() {
        let dir = tempdir().unwrap();
        let file = note(
            dir.path(),
            "2026-02-10 sync.md",
            "---\ntitle: Weekly sync\npeople: [Jordan]\n---\n# Agenda\n\npricing review",
        );
        let writer = writer(Arc::new(FlakyVectorIndex::default()));

        let count = writer.index_file(&file, &CancellationToken::new()).await.unwrap();
        assert_eq!(count, 1);

        let chunks = writer.vector().vector_chunks_for_path("work", &file.key()).await.unwrap();
        assert_eq!(chunks[0].id, chunk_id(&file.key(), 0));
        assert_eq!(chunks[0].title, "Weekly sync");
        assert_eq!(chunks[0].people, vec!["Jordan".to_string()]);
        assert_eq!(chunks[0].vector.len(), 32);
        assert_eq!(chunks[0].file_hash, digest_bytes(&fs::read(&file.path).unwrap()));
        assert!(!chunks[0].content.contains("title:"));
    }

    #[tokio::test]
    async fn pdf_chunks_keep_page_numbers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invoice.pdf");
        fs::write(&path, b"%PDF-1.4").unwrap();
        let file = SourceFile {
            path,
            root: dir.path().to_path_buf(),
            vault: "work".to_string(),
            source_type: SourceType::Pdf,
        };
        let writer = writer(Arc::new(FlakyVectorIndex::default())).with_extractor(Arc::new(StaticPages));

        assert_eq!(writer.index_file(&file, &CancellationToken::new()).await.unwrap(), 2);
        let chunks = writer.keyword().keyword_chunks_for_path("work", &file.key()).await.unwrap();
        let pages: Vec<_> = chunks.iter().map(|chunk| chunk.page_number).collect();
        assert_eq!(pages, vec![Some(1), Some(2)]);
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[tokio::test]
    async fn embedding_failure_leaves_old_entries() {
        let dir = tempdir().unwrap();
        let vector = Arc::new(FlakyVectorIndex::default());
        let healthy = writer(Arc::clone(&vector));
        let file = note(dir.path(), "a.md", "first version");
        healthy.index_file(&file, &CancellationToken::new()).await.unwrap();

        fs::write(&file.path, "second version").unwrap();
        let broken = IndexWriter::new(Arc::clone(healthy.keyword()), vector, Arc::new(DownEmbedder));
        let result = broken.index_file(&file, &CancellationToken::new()).await;

        assert!(matches!(result, Err(IndexError::Embedding(_))));
        let (keyword, vector) = contents(&healthy, &file.key()).await;
        assert_eq!(keyword, vec!["first version".to_string()]);
        assert_eq!(vector, vec!["first version".to_string()]);
    }

    #[tokio::test]
    async fn failed_store_write_restores_previous_chunks() {
        let dir = tempdir().unwrap();
        let vector = Arc::new(FlakyVectorIndex::default());
        let writer = writer(Arc::clone(&vector));
        let file = note(dir.path(), "a.md", "first version");
        writer.index_file(&file, &CancellationToken::new()).await.unwrap();

        fs::write(&file.path, "second version").unwrap();
        vector.failing_upserts.store(1, Ordering::SeqCst);
        let result = writer.index_file(&file, &CancellationToken::new()).await;

        assert!(matches!(result, Err(IndexError::Store(_))));
        let (keyword, vector) = contents(&writer, &file.key()).await;
        assert_eq!(keyword, vec!["first version".to_string()]);
        assert_eq!(vector, vec!["first version".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_file_is_rolled_back() {
        let dir = tempdir().unwrap();
        let writer = writer(Arc::new(FlakyVectorIndex::default()));
        let file = note(dir.path(), "a.md", "first version");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = writer.index_file(&file, &cancel).await;
        assert!(matches!(result, Err(IndexError::Cancelled)));
        let (keyword, vector) = contents(&writer, &file.key()).await;
        assert!(keyword.is_empty() && vector.is_empty());
    }

    #[tokio::test]
    async fn delete_retries_after_restoring_both_stores() {
        let dir = tempdir().unwrap();
        let vector = Arc::new(FlakyVectorIndex::default());
        let writer = writer(Arc::clone(&vector)).with_options(WriterOptions {
            store_attempts: 2,
            retry_backoff: Duration::ZERO,
            ..WriterOptions::default()
        });
        let file = note(dir.path(), "a.md", "doomed note");
        writer.index_file(&file, &CancellationToken::new()).await.unwrap();

        vector.failing_deletes.store(1, Ordering::SeqCst);
        writer.delete_file("work", &file.key()).await.unwrap();

        let (keyword, vector_contents) = contents(&writer, &file.key()).await;
        assert!(keyword.is_empty() && vector_contents.is_empty());

        let query = StoreQuery {
            text: "doomed".to_string(),
            vaults: VaultFilter::All,
            date_from: None,
            date_to: None,
            person: None,
            limit: 10,
        };
        assert!(writer.keyword().search_keyword(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_failure_keeps_pre_deletion_state() {
        let dir = tempdir().unwrap();
        let vector = Arc::new(FlakyVectorIndex::default());
        let writer = writer(Arc::clone(&vector));
        let file = note(dir.path(), "a.md", "kept note");
        writer.index_file(&file, &CancellationToken::new()).await.unwrap();

        vector.failing_deletes.store(1, Ordering::SeqCst);
        assert!(writer.delete_file("work", &file.key()).await.is_err());

        let (keyword, vector_contents) = contents(&writer, &file.key()).await;
        assert_eq!(keyword, vec!["kept note".to_string()]);
        assert_eq!(vector_contents, vec!["kept note".to_string()]);
    }

    #[tokio::test]
    async fn touch_updates_both_stores() {
        let dir = tempdir().unwrap();
        let writer = writer(Arc::new(FlakyVectorIndex::default()));
        let file = note(dir.path(), "a.md", "note");
        writer.index_file(&file, &CancellationToken::new()).await.unwrap();

        let touched = TouchedFile {
            file_path: file.key(),
            mtime: 99.0,
        };
        writer.touch_file("work", &touched).await.unwrap();
        assert_eq!(writer.keyword().keyword_files("work").await.unwrap()[0].mtime, 99.0);
        assert_eq!(writer.vector().vector_files("work").await.unwrap()[0].mtime, 99.0);
    }

    #[tokio::test]
    async fn file_without_text_leaves_a_state_record() {
        let dir = tempdir().unwrap();
        let writer = writer(Arc::new(FlakyVectorIndex::default()));
        let file = note(dir.path(), "a.md", "had some text");
        writer.index_file(&file, &CancellationToken::new()).await.unwrap();

        fs::write(&file.path, "---\ntitle: Placeholder\n---\n").unwrap();
        assert_eq!(writer.index_file(&file, &CancellationToken::new()).await.unwrap(), 0);

        let (keyword, vector) = contents(&writer, &file.key()).await;
        assert!(keyword.is_empty() && vector.is_empty());
        let expected = IndexedFile {
            file_path: file.key(),
            vault: "work".to_string(),
            mtime: modified_seconds(&file.path).unwrap(),
            file_hash: digest_bytes(&fs::read(&file.path).unwrap()),
            chunk_count: 0,
        };
        assert_eq!(writer.keyword().keyword_files("work").await.unwrap(), vec![expected.clone()]);
        assert_eq!(writer.vector().vector_files("work").await.unwrap(), vec![expected]);

        writer.delete_file("work", &file.key()).await.unwrap();
        assert!(writer.keyword().keyword_files("work").await.unwrap().is_empty());
        assert!(writer.vector().vector_files("work").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn path_locks_serialize_writers() {
        let locks = Arc::new(PathLocks::default());
        let guard = locks.lock("/v/a.md").await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("/v/a.md").await;
            })
        };
        let other = locks.lock("/v/b.md").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        drop(other);
        contender.await.unwrap();
    }
}
