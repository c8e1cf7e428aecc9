use crate::error::EmbedError;
use crate::models::RankedResult;
use crate::traits::Reranker;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

static SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("score pattern is valid"));

/// Weight of the normalized fused score at a 1-based position.
pub fn fused_weight(position: usize) -> f64 {
    match position {
        0..=3 => 0.75,
        4..=10 => 0.60,
        _ => 0.40,
    }
}

/// Min-max scaling; a constant input maps to 1.0.
fn normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    values
        .iter()
        .map(|value| if span > 0.0 { (value - min) / span } else { 1.0 })
        .collect()
}

/// Blends reranker scores into the head of `fused`, one score per head item.
///
/// Returns the list unchanged if the scores are unusable.
pub fn blend(mut fused: Vec<RankedResult>, rerank_scores: &[f32]) -> Vec<RankedResult> {
    let head_len = rerank_scores.len();
    if head_len == 0 || head_len > fused.len() {
        return fused;
    }
    if rerank_scores.iter().any(|score| !score.is_finite()) {
        return fused;
    }

    let tail = fused.split_off(head_len);
    let fused_norm = normalize(&fused.iter().map(|result| result.score).collect::<Vec<_>>());
    let rerank_raw = rerank_scores.iter().map(|score| f64::from(*score)).collect::<Vec<_>>();
    let rerank_norm = normalize(&rerank_raw);

    for (index, result) in fused.iter_mut().enumerate() {
        let weight = fused_weight(index + 1);
        result.score = weight * fused_norm[index] + (1.0 - weight) * rerank_norm[index];
        result.rerank_score = Some(rerank_raw[index]);
    }

    fused.sort_by(|left, right| right.score.total_cmp(&left.score));
    fused.extend(tail);
    fused
}

/// Scores the top `top_n` results and blends them, falling back to the fused
/// order on any reranker failure or timeout.
pub async fn rerank_results(
    reranker: &dyn Reranker,
    query: &str,
    fused: Vec<RankedResult>,
    top_n: usize,
    timeout: Duration,
) -> Vec<RankedResult> {
    let head_len = top_n.min(fused.len());
    if head_len == 0 {
        return fused;
    }

    let texts = fused[..head_len]
        .iter()
        .map(|result| {
            if result.content.is_empty() {
                result.excerpt.clone()
            } else {
                result.content.clone()
            }
        })
        .collect::<Vec<_>>();

    match tokio::time::timeout(timeout, reranker.score(query, &texts)).await {
        Ok(Ok(scores)) if scores.len() == head_len => {
            debug!(candidates = head_len, "blending reranker scores");
            blend(fused, &scores)
        }
        Ok(Ok(scores)) => {
            warn!(expected = head_len, actual = scores.len(), "reranker returned wrong score count");
            fused
        }
        Ok(Err(error)) => {
            warn!(error = %error, "reranker failed, keeping fused order");
            fused
        }
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "reranker timed out, keeping fused order");
            fused
        }
    }
}

/// Relevance scoring through an Ollama text model, one prompt per candidate.
#[derive(Debug, Clone)]
pub struct OllamaReranker {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaReranker {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, EmbedError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    async fn score_one(
        client: Client,
        endpoint: String,
        model: String,
        prompt: String,
    ) -> Result<f32, EmbedError> {
        let response = client
            .post(format!("{endpoint}/api/generate"))
            .json(&json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
                "options": {"temperature": 0.0, "num_predict": 8},
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbedError::Response {
                provider: "ollama-rerank".to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        let text = body
            .pointer("/response")
            .and_then(Value::as_str)
            .unwrap_or_default();
        parse_relevance(text).ok_or_else(|| EmbedError::Response {
            provider: "ollama-rerank".to_string(),
            details: format!("no score in {text:?}"),
        })
    }
}

fn relevance_prompt(query: &str, candidate: &str) -> String {
    format!(
        "Rate how relevant the document is to the query on a scale from 0 to 10.\n\
         Answer with a single number.\n\nQuery: {query}\n\nDocument:\n{candidate}\n\nScore:"
    )
}

/// First number in the model output, clamped to 0..=10.
fn parse_relevance(text: &str) -> Option<f32> {
    let found = SCORE_RE.find(text)?;
    let score: f32 = found.as_str().parse().ok()?;
    Some(score.clamp(0.0, 10.0))
}

#[async_trait]
impl Reranker for OllamaReranker {
    async fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>, EmbedError> {
        let mut tasks = JoinSet::new();
        for (index, candidate) in candidates.iter().enumerate() {
            let future = Self::score_one(
                self.client.clone(),
                self.endpoint.clone(),
                self.model.clone(),
                relevance_prompt(query, candidate),
            );
            tasks.spawn(async move { (index, future.await) });
        }

        let mut scores = vec![0.0f32; candidates.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, score) = joined.map_err(|error| EmbedError::Response {
                provider: "ollama-rerank".to_string(),
                details: error.to_string(),
            })?;
            scores[index] = score?;
        }
        Ok(scores)
    }
}
