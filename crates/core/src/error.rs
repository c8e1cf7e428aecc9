use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("frontmatter error in {path}: {details}")]
    Frontmatter { path: PathBuf, details: String },

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("store error: {0}")]
    Store(#[from] SearchError),

    #[error("vault {0} already has an indexing job running")]
    VaultBusy(String),

    #[error("unknown vault: {0}")]
    UnknownVault(String),

    #[error("vault {vault} root is missing or not a directory: {path}")]
    MissingRoot { vault: String, path: PathBuf },

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("indexing cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("store not available yet: {0}")]
    NotReady(String),
}

/// Malformed query input. Rejected, never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("query is empty")]
    Empty,

    #[error("limit must be greater than zero")]
    InvalidLimit,

    #[error("date_from {from} is after date_to {to}")]
    InvalidDateRange { from: NaiveDate, to: NaiveDate },

    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("unknown search mode: {0}")]
    UnknownMode(String),

    #[error("unknown vault: {0:?}")]
    UnknownVault(String),
}

/// Failures of the embedding or reranking collaborators.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("invalid response from {provider}: {details}")]
    Response { provider: String, details: String },

    #[error("expected {expected} vectors, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("expected dimension {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
