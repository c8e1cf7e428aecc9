use crate::error::{EmbedError, SearchError};
use crate::models::{DocumentChunk, IndexedFile, StoreHit, StoreQuery};
use async_trait::async_trait;

#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn upsert_keyword_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), SearchError>;

    async fn delete_keyword_path(&self, vault: &str, file_path: &str) -> Result<(), SearchError>;

    async fn search_keyword(&self, query: &StoreQuery) -> Result<Vec<StoreHit>, SearchError>;

    /// Change-detection state per file, including files recorded as empty.
    async fn keyword_files(&self, vault: &str) -> Result<Vec<IndexedFile>, SearchError>;

    /// Stores the state of a file that produced no chunks, so the next pass
    /// sees it as unchanged. It is listed by `keyword_files` with a zero
    /// chunk count, follows mtime touches and goes away with
    /// `delete_keyword_path`.
    async fn record_keyword_file(&self, file: &IndexedFile) -> Result<(), SearchError>;

    async fn keyword_chunks_for_path(
        &self,
        vault: &str,
        file_path: &str,
    ) -> Result<Vec<DocumentChunk>, SearchError>;

    async fn touch_keyword_mtime(
        &self,
        vault: &str,
        file_path: &str,
        mtime: f64,
    ) -> Result<(), SearchError>;

    /// Persists buffered writes. Remote backends write through.
    async fn flush_keyword(&self) -> Result<(), SearchError> {
        Ok(())
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Every chunk must carry its embedding in `vector`.
    async fn upsert_vector_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), SearchError>;

    async fn delete_vector_path(&self, vault: &str, file_path: &str) -> Result<(), SearchError>;

    async fn search_vector(
        &self,
        query_vector: &[f32],
        query: &StoreQuery,
    ) -> Result<Vec<StoreHit>, SearchError>;

    async fn vector_files(&self, vault: &str) -> Result<Vec<IndexedFile>, SearchError>;

    /// Vector-side counterpart of [`KeywordIndex::record_keyword_file`].
    async fn record_vector_file(&self, file: &IndexedFile) -> Result<(), SearchError>;

    async fn vector_chunks_for_path(
        &self,
        vault: &str,
        file_path: &str,
    ) -> Result<Vec<DocumentChunk>, SearchError>;

    async fn touch_vector_mtime(
        &self,
        vault: &str,
        file_path: &str,
        mtime: f64,
    ) -> Result<(), SearchError>;

    async fn flush_vector(&self) -> Result<(), SearchError> {
        Ok(())
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Returns one vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Returns one relevance score per candidate, in input order.
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>, EmbedError>;
}
