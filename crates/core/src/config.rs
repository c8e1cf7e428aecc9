use crate::error::IndexError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_EXCLUDED_FOLDER: &str = "personal/finance";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultConfig {
    pub name: String,
    pub notes_root: PathBuf,
    #[serde(default)]
    pub pdf_root: Option<PathBuf>,
}

impl VaultConfig {
    pub fn new(name: impl Into<String>, notes_root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            notes_root: notes_root.into(),
            pdf_root: None,
        }
    }

    pub fn with_pdf_root(mut self, pdf_root: impl Into<PathBuf>) -> Self {
        self.pdf_root = Some(pdf_root.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingOptions {
    pub chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub chars_per_token: usize,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            chunk_tokens: 500,
            overlap_tokens: 50,
            chars_per_token: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub rrf_k: f64,
    pub candidate_limit: usize,
    pub default_limit: usize,
    pub rerank_top_n: usize,
    pub lookup_timeout_ms: u64,
    pub rerank_timeout_ms: u64,
    pub person_keyword_weight: f64,
    pub excerpt_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            candidate_limit: 30,
            default_limit: 10,
            rerank_top_n: 20,
            lookup_timeout_ms: 5_000,
            rerank_timeout_ms: 10_000,
            person_keyword_weight: 3.0,
            excerpt_chars: 300,
        }
    }
}

impl SearchConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub ollama_url: String,
    pub accelerator_url: Option<String>,
    pub model: String,
    pub rerank_model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub request_timeout_ms: u64,
    pub accelerator_ready_timeout_ms: u64,
    pub max_attempts: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            accelerator_url: None,
            model: "nomic-embed-text".to_string(),
            rerank_model: "llama3.2".to_string(),
            dimensions: 768,
            batch_size: 16,
            request_timeout_ms: 30_000,
            accelerator_ready_timeout_ms: 5_000,
            max_attempts: 3,
        }
    }
}

impl EmbeddingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn accelerator_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.accelerator_ready_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecallConfig {
    pub vaults: Vec<VaultConfig>,
    pub excluded_folders: Vec<String>,
    pub pdf_enabled: bool,
    pub chunking: ChunkingOptions,
    pub search: SearchConfig,
    pub embedding: EmbeddingConfig,
    pub store_attempts: usize,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            vaults: Vec::new(),
            excluded_folders: vec![DEFAULT_EXCLUDED_FOLDER.to_string()],
            pdf_enabled: true,
            chunking: ChunkingOptions::default(),
            search: SearchConfig::default(),
            embedding: EmbeddingConfig::default(),
            store_attempts: 3,
        }
    }
}

impl RecallConfig {
    /// Reads a YAML or JSON config file (chosen by extension) and validates it.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let raw = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
        let config: Self = if is_json {
            serde_json::from_str(&raw).map_err(|error| invalid_file(path, error))?
        } else {
            serde_yaml::from_str(&raw).map_err(|error| invalid_file(path, error))?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn vault(&self, name: &str) -> Option<&VaultConfig> {
        self.vaults.iter().find(|vault| vault.name == name)
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        let chunking = &self.chunking;
        if chunking.chunk_tokens == 0 || chunking.chars_per_token == 0 {
            return Err(IndexError::InvalidConfig(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if chunking.overlap_tokens >= chunking.chunk_tokens {
            return Err(IndexError::InvalidConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                chunking.overlap_tokens, chunking.chunk_tokens
            )));
        }
        if self.search.candidate_limit == 0 || self.search.default_limit == 0 {
            return Err(IndexError::InvalidConfig(
                "search limits must be greater than zero".to_string(),
            ));
        }
        if self.search.rrf_k < 0.0 {
            return Err(IndexError::InvalidConfig("rrf_k must not be negative".to_string()));
        }
        if self.embedding.batch_size == 0 || self.embedding.dimensions == 0 {
            return Err(IndexError::InvalidConfig(
                "embedding batch size and dimensions must be greater than zero".to_string(),
            ));
        }
        if self.embedding.max_attempts == 0 || self.store_attempts == 0 {
            return Err(IndexError::InvalidConfig(
                "attempt counts must be at least one".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for vault in &self.vaults {
            if vault.name.is_empty() || vault.name.eq_ignore_ascii_case("all") {
                return Err(IndexError::InvalidConfig(format!(
                    "invalid vault name {:?}",
                    vault.name
                )));
            }
            if !seen.insert(vault.name.as_str()) {
                return Err(IndexError::InvalidConfig(format!(
                    "duplicate vault name {}",
                    vault.name
                )));
            }
        }
        Ok(())
    }
}

fn invalid_file(path: &Path, error: impl std::fmt::Display) -> IndexError {
    IndexError::InvalidConfig(format!("{}: {error}", path.display()))
}
