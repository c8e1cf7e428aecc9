use crate::error::SearchError;
use crate::models::{DocumentChunk, IndexedFile, StoreHit, StoreQuery};
use crate::traits::KeywordIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

const BACKEND: &str = "opensearch";
const MAX_FILES: usize = 65_535;
const MAX_CHUNKS_PER_FILE: usize = 10_000;
/// Marks the per-file state document kept for files without chunks.
const FILE_RECORD: &str = "file_record";

/// Keyword (BM25) store backed by one OpenSearch index.
pub struct OpenSearchStore {
    client: Arc<Client>,
    base: Url,
    index_name: String,
}

impl OpenSearchStore {
    pub fn new(endpoint: impl Into<String>, index_name: impl Into<String>) -> Result<Self, SearchError> {
        Ok(Self {
            client: Arc::new(Client::new()),
            base: base_url(endpoint.into())?,
            index_name: index_name.into(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, SearchError> {
        Ok(self.base.join(path)?)
    }

    fn index_url(&self, action: &str) -> Result<Url, SearchError> {
        self.url(&format!("{}/{action}", self.index_name))
    }

    pub async fn ensure_index(&self) -> Result<(), SearchError> {
        let response = self.client.head(self.url(&self.index_name)?).send().await?;
        if response.status() == StatusCode::OK {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(self.url(&self.index_name)?)
            .json(&index_definition())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SearchError::Request(format!(
                "open-search index setup failed with {}",
                response.status()
            )));
        }
        debug!(index = %self.index_name, "created keyword index");
        Ok(())
    }

    async fn post(&self, url: Url, body: &Value) -> Result<Value, SearchError> {
        let response = self.client.post(url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }
        Ok(response.json().await?)
    }

    async fn bulk(&self, lines: Vec<String>) -> Result<(), SearchError> {
        let payload = lines.join("\n") + "\n";
        let response = self
            .client
            .post(self.url("_bulk?refresh=true")?)
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: response.status().to_string(),
            });
        }

        let body: Value = response.json().await?;
        if body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            return Err(SearchError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "bulk request reported item errors".to_string(),
            });
        }
        Ok(())
    }
}

fn base_url(mut endpoint: String) -> Result<Url, SearchError> {
    if !endpoint.ends_with('/') {
        endpoint.push('/');
    }
    Ok(Url::parse(&endpoint)?)
}

fn index_definition() -> Value {
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0,
            "analysis": {
                "analyzer": {
                    "notes": {"type": "standard", "stopwords": "_english_"}
                }
            }
        },
        "mappings": {
            "properties": {
                "id": {"type": "keyword"},
                "file_path": {"type": "keyword"},
                "file_hash": {"type": "keyword"},
                "mtime": {"type": "double"},
                "title": {"type": "text", "analyzer": "notes"},
                "category": {"type": "keyword"},
                "date": {"type": "date", "format": "yyyy-MM-dd"},
                "vault": {"type": "keyword"},
                "people": {"type": "text", "fields": {"raw": {"type": "keyword"}}},
                "projects": {"type": "keyword"},
                "chunk_index": {"type": "integer"},
                "content": {"type": "text", "analyzer": "notes"},
                "source_type": {"type": "keyword"},
                "page_number": {"type": "integer"},
                "file_record": {"type": "boolean"}
            }
        }
    })
}

fn path_filter(vault: &str, file_path: &str) -> Value {
    json!({
        "bool": {
            "filter": [
                {"term": {"vault": vault}},
                {"term": {"file_path": file_path}}
            ]
        }
    })
}

fn is_file_record() -> Value {
    json!({"term": {FILE_RECORD: true}})
}

/// Chunks of one path, leaving out its file record.
fn chunk_filter(vault: &str, file_path: &str) -> Value {
    json!({
        "bool": {
            "filter": [
                {"term": {"vault": vault}},
                {"term": {"file_path": file_path}}
            ],
            "must_not": [is_file_record()]
        }
    })
}

fn file_record_id(file_path: &str) -> String {
    format!("{file_path}#file")
}

fn file_record_source(file: &IndexedFile) -> Value {
    json!({
        "id": file_record_id(&file.file_path),
        "file_path": file.file_path,
        "file_hash": file.file_hash,
        "mtime": file.mtime,
        "vault": file.vault,
        FILE_RECORD: true
    })
}

/// Vault, date and person constraints of a store query.
fn build_filters(query: &StoreQuery) -> Vec<Value> {
    let mut predicates = Vec::new();

    if let crate::models::VaultFilter::Only(vault) = &query.vaults {
        predicates.push(json!({"term": {"vault": vault}}));
    }
    if query.date_from.is_some() || query.date_to.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(from) = query.date_from {
            range.insert("gte".to_string(), json!(from.format("%Y-%m-%d").to_string()));
        }
        if let Some(to) = query.date_to {
            range.insert("lte".to_string(), json!(to.format("%Y-%m-%d").to_string()));
        }
        predicates.push(json!({"range": {"date": range}}));
    }
    if let Some(person) = &query.person {
        predicates.push(json!({"match_phrase": {"people": person}}));
    }

    predicates
}

fn search_body(query: &StoreQuery) -> Value {
    json!({
        "size": query.limit,
        "query": {
            "bool": {
                "must": [
                    {
                        "multi_match": {
                            "query": query.text,
                            "fields": ["title^2", "content", "people"]
                        }
                    }
                ],
                "filter": build_filters(query),
                "must_not": [is_file_record()]
            }
        }
    })
}

fn parse_hits(response: &Value) -> Result<Vec<StoreHit>, SearchError> {
    let hits = response
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    hits.into_iter()
        .enumerate()
        .map(|(rank, raw)| {
            let score = raw.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0);
            let source = raw.get("_source").cloned().unwrap_or(Value::Null);
            let chunk: DocumentChunk = serde_json::from_value(source)?;
            Ok(StoreHit { rank, score, chunk })
        })
        .collect()
}

fn parse_files(response: &Value, vault: &str) -> Vec<IndexedFile> {
    let buckets = response
        .pointer("/aggregations/files/buckets")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    buckets
        .iter()
        .filter_map(|bucket| {
            let file_path = bucket.get("key").and_then(Value::as_str)?;
            let latest = bucket.pointer("/latest/hits/hits/0/_source")?;
            Some(IndexedFile {
                file_path: file_path.to_string(),
                vault: vault.to_string(),
                mtime: latest.get("mtime").and_then(Value::as_f64).unwrap_or(0.0),
                file_hash: latest
                    .get("file_hash")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                chunk_count: bucket
                    .pointer("/chunks/doc_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize,
            })
        })
        .collect()
}

#[async_trait]
impl KeywordIndex for OpenSearchStore {
    async fn upsert_keyword_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), SearchError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let mut lines = Vec::with_capacity(chunks.len() * 2);
        for chunk in chunks {
            lines.push(serde_json::to_string(&json!({
                "index": {"_index": self.index_name, "_id": chunk.id}
            }))?);
            lines.push(serde_json::to_string(&chunk.without_vector())?);
        }
        self.bulk(lines).await
    }

    async fn delete_keyword_path(&self, vault: &str, file_path: &str) -> Result<(), SearchError> {
        self.post(
            self.index_url("_delete_by_query?refresh=true&conflicts=proceed")?,
            &json!({"query": path_filter(vault, file_path)}),
        )
        .await?;
        Ok(())
    }

    async fn search_keyword(&self, query: &StoreQuery) -> Result<Vec<StoreHit>, SearchError> {
        let response = self.post(self.index_url("_search")?, &search_body(query)).await?;
        parse_hits(&response)
    }

    async fn keyword_files(&self, vault: &str) -> Result<Vec<IndexedFile>, SearchError> {
        let body = json!({
            "size": 0,
            "query": {"term": {"vault": vault}},
            "aggs": {
                "files": {
                    "terms": {"field": "file_path", "size": MAX_FILES},
                    "aggs": {
                        "latest": {
                            "top_hits": {"size": 1, "_source": ["mtime", "file_hash"]}
                        },
                        "chunks": {
                            "filter": {"bool": {"must_not": [is_file_record()]}}
                        }
                    }
                }
            }
        });
        let response = self.post(self.index_url("_search")?, &body).await?;
        Ok(parse_files(&response, vault))
    }

    async fn record_keyword_file(&self, file: &IndexedFile) -> Result<(), SearchError> {
        let lines = vec![
            serde_json::to_string(&json!({
                "index": {"_index": self.index_name, "_id": file_record_id(&file.file_path)}
            }))?,
            serde_json::to_string(&file_record_source(file))?,
        ];
        self.bulk(lines).await
    }

    async fn keyword_chunks_for_path(
        &self,
        vault: &str,
        file_path: &str,
    ) -> Result<Vec<DocumentChunk>, SearchError> {
        let body = json!({
            "size": MAX_CHUNKS_PER_FILE,
            "query": chunk_filter(vault, file_path),
            "sort": [{"chunk_index": "asc"}]
        });
        let response = self.post(self.index_url("_search")?, &body).await?;
        Ok(parse_hits(&response)?
            .into_iter()
            .map(|hit| hit.chunk)
            .collect())
    }

    async fn touch_keyword_mtime(
        &self,
        vault: &str,
        file_path: &str,
        mtime: f64,
    ) -> Result<(), SearchError> {
        self.post(
            self.index_url("_update_by_query?refresh=true&conflicts=proceed")?,
            &json!({
                "query": path_filter(vault, file_path),
                "script": {
                    "source": "ctx._source.mtime = params.mtime",
                    "params": {"mtime": mtime}
                }
            }),
        )
        .await?;
        Ok(())
    }
}
