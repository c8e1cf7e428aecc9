use crate::error::EmbedError;
use crate::retry::with_retries;
use crate::traits::Embedder;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;

/// Deterministic hashed character-trigram embedder. Needs no model server,
/// used offline and in tests.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for character in window {
                let mut buffer = [0u8; 4];
                for byte in character.encode_utf8(&mut buffer).bytes() {
                    hash ^= u64::from(byte);
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "ngram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Batch embeddings through Ollama's `/api/embed`.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Client,
    name: String,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            name: name.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/api/embed", self.endpoint))
            .json(&json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbedError::Response {
                provider: self.name.clone(),
                details: response.status().to_string(),
            });
        }

        let parsed: OllamaEmbedResponse = response.json().await?;
        check_shape(&parsed.embeddings, texts.len(), self.dimensions)?;
        Ok(parsed.embeddings)
    }
}

pub fn check_shape(vectors: &[Vec<f32>], expected: usize, dimensions: usize) -> Result<(), EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            actual: vectors.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimensions) {
        return Err(EmbedError::DimensionMismatch {
            expected: dimensions,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Tries a remote accelerator first, bounded by a timeout and a few retries,
/// then embeds the batch with the fallback provider.
pub struct FallbackEmbedder {
    primary: Arc<dyn Embedder>,
    fallback: Arc<dyn Embedder>,
    timeout: Duration,
    attempts: usize,
    backoff: Duration,
}

impl FallbackEmbedder {
    pub fn new(
        primary: Arc<dyn Embedder>,
        fallback: Arc<dyn Embedder>,
        timeout: Duration,
        attempts: usize,
    ) -> Result<Self, EmbedError> {
        if primary.dimensions() != fallback.dimensions() {
            return Err(EmbedError::DimensionMismatch {
                expected: primary.dimensions(),
                actual: fallback.dimensions(),
            });
        }
        Ok(Self {
            primary,
            fallback,
            timeout,
            attempts,
            backoff: Duration::from_millis(250),
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn embed_primary(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let vectors = tokio::time::timeout(self.timeout, self.primary.embed(texts))
            .await
            .map_err(|_| EmbedError::Timeout {
                provider: self.primary.name().to_string(),
                timeout: self.timeout,
            })??;
        check_shape(&vectors, texts.len(), self.primary.dimensions())?;
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for FallbackEmbedder {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn dimensions(&self) -> usize {
        self.primary.dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let primary = with_retries(self.primary.name(), self.attempts, self.backoff, || {
            self.embed_primary(texts)
        })
        .await;

        match primary {
            Ok(vectors) => Ok(vectors),
            Err(error) => {
                warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %error,
                    "embedding provider unavailable, using fallback"
                );
                let vectors = self.fallback.embed(texts).await?;
                check_shape(&vectors, texts.len(), self.fallback.dimensions())?;
                debug!(count = vectors.len(), "embedded batch with fallback provider");
                Ok(vectors)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingEmbedder {
        calls: AtomicUsize,
        dimensions: usize,
    }

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn name(&self) -> &str {
            "failing"
        }

        fn dimensions(&self) -> usize {
            self.dimensions
        }

        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(EmbedError::Response {
                provider: "failing".to_string(),
                details: "unreachable".to_string(),
            })
        }
    }

    struct StalledEmbedder;

    #[async_trait]
    impl Embedder for StalledEmbedder {
        fn name(&self) -> &str {
            "stalled"
        }

        fn dimensions(&self) -> usize {
            16
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![vec![0.0; 16]; texts.len()])
        }
    }

    fn texts(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_one("Quarterly planning with Jordan");
        assert_eq!(first, embedder.embed_one("Quarterly planning with Jordan"));
        assert_eq!(first.len(), DEFAULT_EMBEDDING_DIMENSIONS);
    }

    #[tokio::test]
    async fn batch_embedding_keeps_input_order() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vectors = embedder.embed(&texts(&["alpha", "beta"])).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], embedder.embed_one("alpha"));
        assert_eq!(vectors[1], embedder.embed_one("beta"));
    }

    #[test]
    fn shape_errors_are_reported() {
        assert!(matches!(
            check_shape(&[vec![0.0; 4]], 2, 4),
            Err(EmbedError::CountMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            check_shape(&[vec![0.0; 3]], 1, 4),
            Err(EmbedError::DimensionMismatch { expected: 4, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn failing_primary_falls_back_after_bounded_retries() {
        let primary = Arc::new(FailingEmbedder {
            calls: AtomicUsize::new(0),
            dimensions: 16,
        });
        let fallback = Arc::new(CharacterNgramEmbedder { dimensions: 16 });
        let embedder = FallbackEmbedder::new(primary.clone(), fallback, Duration::from_secs(1), 3)
            .unwrap()
            .with_backoff(Duration::ZERO);

        let vectors = embedder.embed(&texts(&["hello"])).await.unwrap();
        assert_eq!(vectors[0], CharacterNgramEmbedder { dimensions: 16 }.embed_one("hello"));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stalled_primary_times_out_to_fallback() {
        let embedder = FallbackEmbedder::new(
            Arc::new(StalledEmbedder),
            Arc::new(CharacterNgramEmbedder { dimensions: 16 }),
            Duration::from_millis(50),
            1,
        )
        .unwrap();

        let vectors = embedder.embed(&texts(&["alpha", "beta"])).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors[0].iter().any(|value| *value != 0.0));
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let result = FallbackEmbedder::new(
            Arc::new(CharacterNgramEmbedder { dimensions: 8 }),
            Arc::new(CharacterNgramEmbedder { dimensions: 16 }),
            Duration::from_secs(1),
            1,
        );
        assert!(result.is_err());
    }
}
