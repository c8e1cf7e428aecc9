use crate::config::SearchConfig;
use crate::error::QueryError;
use crate::fusion::{fuse, rank_single, RankedList};
use crate::models::{DateRange, HitSource, Query, RankedResult, SearchMode, StoreHit, StoreQuery};
use crate::rerank::rerank_results;
use crate::routing::{Confidence, PersonRouter, RouteDecision};
use crate::temporal;
use crate::traits::{Embedder, KeywordIndex, Reranker, VectorIndex};
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::{debug, warn};

/// How a query will be run: resolved filters, per-index text and weights.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalPlan {
    pub route: RouteDecision,
    pub date_range: Option<DateRange>,
    pub semantic_text: String,
    pub keyword_weight: f64,
    pub vector_weight: f64,
    pub store_query: StoreQuery,
}

pub struct SearchCoordinator<K: ?Sized, V: ?Sized> {
    keyword: Arc<K>,
    vector: Arc<V>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    router: PersonRouter,
    config: SearchConfig,
    today: Option<NaiveDate>,
}

impl<K, V> SearchCoordinator<K, V>
where
    K: KeywordIndex + ?Sized,
    V: VectorIndex + ?Sized,
{
    pub fn new(keyword: Arc<K>, vector: Arc<V>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            keyword,
            vector,
            embedder,
            reranker: None,
            router: PersonRouter::default(),
            config: SearchConfig::default(),
            today: None,
        }
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    /// Pins the reference date for relative temporal expressions.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Resolves dates, person routing and the text sent to each index.
    pub fn plan(&self, query: &Query) -> RetrievalPlan {
        let raw = query.raw_text.trim();
        let found = temporal::find(raw, self.today());

        let date_range = if query.has_explicit_dates() {
            None
        } else {
            found.as_ref().map(|found| found.range.clone())
        };
        let (date_from, date_to) = match &date_range {
            Some(range) => (Some(range.start), Some(range.end)),
            None => (query.date_from, query.date_to),
        };

        let semantic_text = found
            .as_ref()
            .filter(|_| !query.has_explicit_dates())
            .map(|found| found.strip(raw))
            .filter(|stripped| !stripped.is_empty())
            .unwrap_or_else(|| raw.to_string());

        let explicit_person = query
            .person_filter
            .as_deref()
            .map(str::trim)
            .filter(|person| !person.is_empty());
        let route = match explicit_person {
            Some(person) => RouteDecision {
                is_person_query: true,
                person: Some(person.to_string()),
                confidence: Confidence::High,
            },
            None => self.router.route(raw),
        };

        let (keyword_text, keyword_weight) = match &route.person {
            Some(person) => (person.clone(), self.config.person_keyword_weight),
            None => (semantic_text.clone(), 1.0),
        };

        RetrievalPlan {
            store_query: StoreQuery {
                text: keyword_text,
                vaults: query.vault_filter.clone(),
                date_from,
                date_to,
                person: explicit_person.map(str::to_string),
                limit: self.config.candidate_limit.max(query.limit),
            },
            route,
            date_range,
            semantic_text,
            keyword_weight,
            vector_weight: 1.0,
        }
    }

    /// Runs both lookups concurrently and merges them according to the mode.
    ///
    /// Store failures and timeouts degrade to empty lists; only malformed
    /// input is an error.
    pub async fn search(&self, query: &Query) -> Result<Vec<RankedResult>, QueryError> {
        query.validate()?;
        let plan = self.plan(query);
        debug!(
            mode = %query.mode,
            person = ?plan.route.person,
            confidence = %plan.route.confidence,
            date_from = ?plan.store_query.date_from,
            date_to = ?plan.store_query.date_to,
            keyword_text = %plan.store_query.text,
            semantic_text = %plan.semantic_text,
            "planned retrieval"
        );

        let (keyword_hits, vector_hits) = tokio::join!(
            self.keyword_lookup(&plan, query.mode),
            self.vector_lookup(&plan, query.mode)
        );
        debug!(keyword = keyword_hits.len(), vector = vector_hits.len(), "lookups finished");

        let excerpt_chars = self.config.excerpt_chars;
        let mut results = match query.mode {
            SearchMode::Bm25 => rank_single(&keyword_hits, HitSource::Keyword, excerpt_chars),
            SearchMode::Vector => rank_single(&vector_hits, HitSource::Vector, excerpt_chars),
            SearchMode::Hybrid | SearchMode::Query => fuse(
                &[
                    RankedList {
                        source: HitSource::Keyword,
                        hits: &keyword_hits,
                        weight: plan.keyword_weight,
                    },
                    RankedList {
                        source: HitSource::Vector,
                        hits: &vector_hits,
                        weight: plan.vector_weight,
                    },
                ],
                self.config.rrf_k,
                excerpt_chars,
            ),
        };

        if query.mode == SearchMode::Query {
            if let Some(reranker) = &self.reranker {
                results = rerank_results(
                    reranker.as_ref(),
                    query.raw_text.trim(),
                    results,
                    self.config.rerank_top_n,
                    self.config.rerank_timeout(),
                )
                .await;
            }
        }

        results.truncate(query.limit);
        Ok(results)
    }

    /// Alias of [`search`](Self::search).
    pub async fn retrieve(&self, query: &Query) -> Result<Vec<RankedResult>, QueryError> {
        self.search(query).await
    }

    async fn keyword_lookup(&self, plan: &RetrievalPlan, mode: SearchMode) -> Vec<StoreHit> {
        if !mode.uses_keyword() {
            return Vec::new();
        }
        let lookup = self.keyword.search_keyword(&plan.store_query);
        match tokio::time::timeout(self.config.lookup_timeout(), lookup).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(error)) => {
                warn!(error = %error, "keyword lookup failed, continuing without it");
                Vec::new()
            }
            Err(_) => {
                warn!(timeout_ms = self.config.lookup_timeout_ms, "keyword lookup timed out");
                Vec::new()
            }
        }
    }

    async fn vector_lookup(&self, plan: &RetrievalPlan, mode: SearchMode) -> Vec<StoreHit> {
        if !mode.uses_vector() {
            return Vec::new();
        }
        let lookup = async {
            let texts = [plan.semantic_text.clone()];
            let vector = match self.embedder.embed(&texts).await {
                Ok(mut vectors) if vectors.len() == 1 => vectors.remove(0),
                Ok(vectors) => {
                    warn!(count = vectors.len(), "query embedding returned wrong vector count");
                    return Ok(Vec::new());
                }
                Err(error) => {
                    warn!(error = %error, "query embedding failed, skipping vector lookup");
                    return Ok(Vec::new());
                }
            };
            self.vector.search_vector(&vector, &plan.store_query).await
        };

        match tokio::time::timeout(self.config.lookup_timeout(), lookup).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(error)) => {
                warn!(error = %error, "vector lookup failed, continuing without it");
                Vec::new()
            }
            Err(_) => {
                warn!(timeout_ms = self.config.lookup_timeout_ms, "vector lookup timed out");
                Vec::new()
            }
        }
    }
}
