pub mod cancel;
pub mod change;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod fusion;
pub mod jobs;
pub mod metadata;
pub mod models;
pub mod orchestrator;
pub mod rerank;
pub mod retry;
pub mod routing;
pub mod sources;
pub mod stores;
pub mod temporal;
pub mod traits;
pub mod writer;

pub use cancel::CancellationToken;
pub use change::{detect_changes, plan_vault, ChangeSet, IndexedState, TouchedFile};
pub use chunking::{chunk_markdown, chunk_pages, ChunkText, ChunkingConfig, Chunks, SourceContent};
pub use config::{ChunkingOptions, EmbeddingConfig, RecallConfig, SearchConfig, VaultConfig};
pub use embeddings::{
    CharacterNgramEmbedder, FallbackEmbedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbedError, IndexError, QueryError, SearchError};
pub use extractor::{LopdfExtractor, PageText, PdfExtractor};
pub use fusion::{fuse, RankedList, DEFAULT_RRF_K};
pub use jobs::{IndexJobs, IndexProgress, JobInfo, JobStatus, JobSummary, VaultStatus};
pub use models::{
    parse_query_date, DateRange, DocumentChunk, IndexedFile, Query, RankedResult, SearchMode,
    SourceType, StoreHit, StoreQuery, VaultFilter,
};
pub use orchestrator::{RetrievalPlan, SearchCoordinator};
pub use rerank::{blend, OllamaReranker};
pub use routing::{route, Confidence, PersonRouter, RouteDecision};
pub use stores::{MemoryKeywordIndex, MemoryVectorIndex, OpenSearchStore, QdrantStore};
pub use traits::{Embedder, KeywordIndex, Reranker, VectorIndex};
pub use writer::{IndexWriter, WriterOptions};
