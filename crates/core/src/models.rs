use crate::error::QueryError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Markdown,
    Pdf,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Markdown => f.write_str("markdown"),
            Self::Pdf => f.write_str("pdf"),
        }
    }
}

/// The atomic indexed unit shared by the keyword and vector stores.
///
/// `file_path`, `file_hash` and `mtime` are written together on every insert;
/// they are the only state incremental indexing needs after a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,
    pub file_path: String,
    pub file_hash: String,
    pub mtime: f64,
    pub title: String,
    pub category: String,
    pub date: Option<NaiveDate>,
    pub vault: String,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    pub chunk_index: u32,
    pub content: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub page_number: Option<u32>,
}

impl DocumentChunk {
    pub fn without_vector(&self) -> Self {
        Self {
            vector: Vec::new(),
            ..self.clone()
        }
    }

    pub fn excerpt(&self, max_chars: usize) -> String {
        excerpt(&self.content, max_chars)
    }
}

pub fn chunk_id(file_path: &str, chunk_index: u32) -> String {
    format!("{file_path}#{chunk_index}")
}

pub fn excerpt(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

/// Per-file change-detection state as recorded by a store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedFile {
    pub file_path: String,
    pub vault: String,
    pub mtime: f64,
    pub file_hash: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VaultFilter {
    #[default]
    All,
    Only(String),
}

impl VaultFilter {
    pub fn matches(&self, vault: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(name) => name == vault,
        }
    }

    pub fn overlaps(&self, other: &VaultFilter) -> bool {
        match (self, other) {
            (Self::Only(left), Self::Only(right)) => left == right,
            _ => true,
        }
    }
}

impl FromStr for VaultFilter {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(QueryError::UnknownVault(value.to_string()));
        }
        if trimmed.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            Ok(Self::Only(trimmed.to_string()))
        }
    }
}

impl fmt::Display for VaultFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Only(name) => f.write_str(name),
        }
    }
}

/// An inclusive date range resolved from a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub expression: String,
}

impl DateRange {
    pub fn single(date: NaiveDate, expression: impl Into<String>) -> Self {
        Self {
            start: date,
            end: date,
            expression: expression.into(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Bm25,
    #[default]
    Hybrid,
    Query,
}

impl SearchMode {
    pub fn uses_keyword(self) -> bool {
        !matches!(self, Self::Vector)
    }

    pub fn uses_vector(self) -> bool {
        !matches!(self, Self::Bm25)
    }

    pub fn fuses(self) -> bool {
        matches!(self, Self::Hybrid | Self::Query)
    }
}

impl FromStr for SearchMode {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vector" => Ok(Self::Vector),
            "bm25" | "keyword" => Ok(Self::Bm25),
            "hybrid" => Ok(Self::Hybrid),
            "query" => Ok(Self::Query),
            _ => Err(QueryError::UnknownMode(value.to_string())),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vector => "vector",
            Self::Bm25 => "bm25",
            Self::Hybrid => "hybrid",
            Self::Query => "query",
        };
        f.write_str(name)
    }
}

/// A search request as received from the API layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub raw_text: String,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub vault_filter: VaultFilter,
    pub person_filter: Option<String>,
    pub mode: SearchMode,
    pub limit: usize,
}

impl Query {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            date_from: None,
            date_to: None,
            vault_filter: VaultFilter::All,
            person_filter: None,
            mode: SearchMode::Hybrid,
            limit: 10,
        }
    }

    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_vault(mut self, vault: VaultFilter) -> Self {
        self.vault_filter = vault;
        self
    }

    pub fn with_dates(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn with_person(mut self, person: impl Into<String>) -> Self {
        self.person_filter = Some(person.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn has_explicit_dates(&self) -> bool {
        self.date_from.is_some() || self.date_to.is_some()
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.raw_text.trim().is_empty() {
            return Err(QueryError::Empty);
        }
        if self.limit == 0 {
            return Err(QueryError::InvalidLimit);
        }
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(QueryError::InvalidDateRange { from, to });
            }
        }
        Ok(())
    }
}

/// Parses an explicit `YYYY-MM-DD` query bound.
pub fn parse_query_date(value: &str) -> Result<NaiveDate, QueryError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| QueryError::InvalidDate(value.to_string()))
}

/// The filter and text handed to a single store lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreQuery {
    pub text: String,
    pub vaults: VaultFilter,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub person: Option<String>,
    pub limit: usize,
}

impl StoreQuery {
    pub fn date_matches(&self, date: Option<NaiveDate>) -> bool {
        if self.date_from.is_none() && self.date_to.is_none() {
            return true;
        }
        let Some(date) = date else {
            return false;
        };
        self.date_from.map_or(true, |from| date >= from) && self.date_to.map_or(true, |to| date <= to)
    }

    pub fn person_matches(&self, people: &[String]) -> bool {
        match &self.person {
            None => true,
            Some(person) => {
                let needle = person.to_lowercase();
                people
                    .iter()
                    .any(|name| name.to_lowercase().contains(&needle))
            }
        }
    }

    pub fn matches(&self, chunk: &DocumentChunk) -> bool {
        self.vaults.matches(&chunk.vault)
            && self.date_matches(chunk.date)
            && self.person_matches(&chunk.people)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    Keyword,
    Vector,
}

/// One entry of a store's ranked answer; rank 0 is the best hit.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub rank: usize,
    pub score: f64,
    pub chunk: DocumentChunk,
}

/// A file-level search result with provenance from each retrieval stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub file_path: String,
    pub title: String,
    pub excerpt: String,
    pub score: f64,
    pub bm25_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub rerank_score: Option<f64>,
    pub vault: String,
    pub category: String,
    pub date: Option<NaiveDate>,
    pub people: Vec<String>,
    pub source_type: SourceType,
    pub page_number: Option<u32>,
    #[serde(skip)]
    pub content: String,
}

impl RankedResult {
    pub fn from_hit(hit: &StoreHit, source: HitSource, rank: usize, excerpt_chars: usize) -> Self {
        let chunk = &hit.chunk;
        Self {
            file_path: chunk.file_path.clone(),
            title: chunk.title.clone(),
            excerpt: chunk.excerpt(excerpt_chars),
            score: hit.score,
            bm25_rank: (source == HitSource::Keyword).then_some(rank),
            vector_rank: (source == HitSource::Vector).then_some(rank),
            rerank_score: None,
            vault: chunk.vault.clone(),
            category: chunk.category.clone(),
            date: chunk.date,
            people: chunk.people.clone(),
            source_type: chunk.source_type,
            page_number: chunk.page_number,
            content: chunk.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("héllo wörld", 4), "héll...");
        assert_eq!(excerpt("short", 300), "short");
    }

    #[test]
    fn vault_filter_parses_all_case_insensitively() {
        assert_eq!("ALL".parse::<VaultFilter>().unwrap(), VaultFilter::All);
        assert_eq!(
            "work".parse::<VaultFilter>().unwrap(),
            VaultFilter::Only("work".to_string())
        );
        assert!("  ".parse::<VaultFilter>().is_err());
    }

    #[test]
    fn all_overlaps_every_vault() {
        let work = VaultFilter::Only("work".to_string());
        let personal = VaultFilter::Only("personal".to_string());
        assert!(VaultFilter::All.overlaps(&work));
        assert!(work.overlaps(&VaultFilter::All));
        assert!(!work.overlaps(&personal));
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let query = Query::new("notes").with_dates(Some(date("2026-02-10")), Some(date("2026-02-01")));
        assert!(matches!(
            query.validate(),
            Err(QueryError::InvalidDateRange { .. })
        ));
    }

    #[test]
    fn store_query_excludes_undated_chunks_when_bounded() {
        let query = StoreQuery {
            text: "x".to_string(),
            vaults: VaultFilter::All,
            date_from: Some(date("2026-01-01")),
            date_to: None,
            person: None,
            limit: 5,
        };
        assert!(!query.date_matches(None));
        assert!(query.date_matches(Some(date("2026-03-01"))));
        assert!(!query.date_matches(Some(date("2025-12-31"))));
    }

    #[test]
    fn person_filter_is_case_insensitive() {
        let query = StoreQuery {
            text: "x".to_string(),
            vaults: VaultFilter::All,
            date_from: None,
            date_to: None,
            person: Some("jordan".to_string()),
            limit: 5,
        };
        assert!(query.person_matches(&["Jordan Lee".to_string()]));
        assert!(!query.person_matches(&["Sam".to_string()]));
    }

    #[test]
    fn query_dates_require_iso_format() {
        assert_eq!(parse_query_date(" 2026-02-03 ").unwrap(), date("2026-02-03"));
        assert_eq!(
            parse_query_date("02/03/2026"),
            Err(QueryError::InvalidDate("02/03/2026".to_string()))
        );
    }

    #[test]
    fn mode_parsing_accepts_keyword_alias() {
        assert_eq!("keyword".parse::<SearchMode>().unwrap(), SearchMode::Bm25);
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }
}
