use crate::error::SearchError;
use crate::models::{DocumentChunk, IndexedFile, StoreHit, StoreQuery, VaultFilter};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "qdrant";
const SCROLL_PAGE: usize = 512;
/// Payload flag of the point kept for files without chunks.
const FILE_RECORD: &str = "file_record";

/// Vector store backed by one Qdrant collection with cosine distance.
pub struct QdrantStore {
    base: Url,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, SearchError> {
        let mut endpoint = endpoint.into();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Ok(Self {
            base: Url::parse(&endpoint)?,
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn url(&self, action: &str) -> Result<Url, SearchError> {
        let path = if action.is_empty() {
            format!("collections/{}", self.collection)
        } else {
            format!("collections/{}/{action}", self.collection)
        };
        Ok(self.base.join(&path)?)
    }

    pub fn check_dimensions(&self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.vector_size {
            return Err(SearchError::Request(format!(
                "embedding dimension {} != {}",
                vector.len(),
                self.vector_size
            )));
        }
        Ok(())
    }

    /// Creates the collection and its payload indexes when missing.
    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let response = self.client.get(self.url("")?).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.url("")?)
            .json(&json!({"vectors": {"size": self.vector_size, "distance": "Cosine"}}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        for (field, schema) in [
            ("vault", json!("keyword")),
            ("file_path", json!("keyword")),
            ("date", json!("datetime")),
            ("people", json!({"type": "text", "tokenizer": "word", "lowercase": true})),
            (FILE_RECORD, json!("bool")),
        ] {
            self.send(
                self.client.put(self.url("index?wait=true")?),
                &json!({"field_name": field, "field_schema": schema}),
            )
            .await?;
        }
        debug!(collection = %self.collection, "created vector collection");
        Ok(())
    }

    async fn send(&self, request: reqwest::RequestBuilder, body: &Value) -> Result<Value, SearchError> {
        let response = request.json(body).send().await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(response.json().await?)
    }

    /// Pages through every point matching `filter`.
    async fn scroll(&self, filter: Value, with_vector: bool) -> Result<Vec<Value>, SearchError> {
        let mut points = Vec::new();
        let mut offset = Value::Null;
        loop {
            let mut body = json!({
                "filter": filter,
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": with_vector,
            });
            if !offset.is_null() {
                body["offset"] = offset;
            }
            let response = self
                .send(self.client.post(self.url("points/scroll")?), &body)
                .await?;
            points.extend(
                response
                    .pointer("/result/points")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            );
            offset = response
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() {
                return Ok(points);
            }
        }
    }
}

fn backend_error(status: StatusCode) -> SearchError {
    SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

/// Qdrant ids must be integers or UUIDs; derive a stable UUID from the chunk id.
pub fn point_id(chunk_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, chunk_id.as_bytes())
}

fn match_value(key: &str, value: &str) -> Value {
    json!({"key": key, "match": {"value": value}})
}

fn path_filter(vault: &str, file_path: &str) -> Value {
    json!({"must": [match_value("vault", vault), match_value("file_path", file_path)]})
}

fn is_file_record() -> Value {
    json!({"key": FILE_RECORD, "match": {"value": true}})
}

/// Chunk points of one path, leaving out its file record.
fn chunk_filter(vault: &str, file_path: &str) -> Value {
    let mut filter = path_filter(vault, file_path);
    filter["must_not"] = json!([is_file_record()]);
    filter
}

/// Cosine distance rejects zero vectors, so the record carries a unit one.
fn file_record_point(file: &IndexedFile, vector_size: usize) -> Value {
    let mut vector = vec![0.0f32; vector_size.max(1)];
    vector[0] = 1.0;
    json!({
        "id": point_id(&format!("{}#file", file.file_path)),
        "vector": vector,
        "payload": {
            "file_path": file.file_path,
            "file_hash": file.file_hash,
            "mtime": file.mtime,
            "vault": file.vault,
            FILE_RECORD: true
        }
    })
}

fn build_filter(query: &StoreQuery) -> Value {
    let mut must = Vec::new();
    if let VaultFilter::Only(vault) = &query.vaults {
        must.push(match_value("vault", vault));
    }
    if query.date_from.is_some() || query.date_to.is_some() {
        let mut range = serde_json::Map::new();
        if let Some(from) = query.date_from {
            range.insert("gte".to_string(), json!(format!("{from}T00:00:00Z")));
        }
        if let Some(to) = query.date_to {
            range.insert("lte".to_string(), json!(format!("{to}T23:59:59Z")));
        }
        must.push(json!({"key": "date", "range": range}));
    }
    if let Some(person) = &query.person {
        must.push(json!({"key": "people", "match": {"text": person}}));
    }
    json!({ "must": must, "must_not": [is_file_record()] })
}

fn point_chunk(point: &Value) -> Result<DocumentChunk, SearchError> {
    let payload = point.get("payload").cloned().unwrap_or(Value::Null);
    let mut chunk: DocumentChunk = serde_json::from_value(payload)?;
    if let Some(vector) = point.get("vector").filter(|vector| vector.is_array()) {
        chunk.vector = serde_json::from_value(vector.clone())?;
    }
    Ok(chunk)
}

fn summarize_files(points: &[Value], vault: &str) -> Vec<IndexedFile> {
    let mut files = BTreeMap::<String, IndexedFile>::new();
    for payload in points.iter().filter_map(|point| point.get("payload")) {
        let Some(file_path) = payload.get("file_path").and_then(Value::as_str) else {
            continue;
        };
        let is_record = payload
            .get(FILE_RECORD)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        files
            .entry(file_path.to_string())
            .or_insert_with(|| IndexedFile {
                file_path: file_path.to_string(),
                vault: vault.to_string(),
                mtime: payload.get("mtime").and_then(Value::as_f64).unwrap_or(0.0),
                file_hash: payload
                    .get("file_hash")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                chunk_count: 0,
            })
            .chunk_count += usize::from(!is_record);
    }
    files.into_values().collect()
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn upsert_vector_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), SearchError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let points = chunks
            .iter()
            .map(|chunk| {
                self.check_dimensions(&chunk.vector)?;
                Ok(json!({
                    "id": point_id(&chunk.id),
                    "vector": chunk.vector,
                    "payload": serde_json::to_value(chunk.without_vector())?,
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        self.send(
            self.client.put(self.url("points?wait=true")?),
            &json!({ "points": points }),
        )
        .await?;
        Ok(())
    }

    async fn delete_vector_path(&self, vault: &str, file_path: &str) -> Result<(), SearchError> {
        self.send(
            self.client.post(self.url("points/delete?wait=true")?),
            &json!({"filter": path_filter(vault, file_path)}),
        )
        .await?;
        Ok(())
    }

    async fn search_vector(
        &self,
        query_vector: &[f32],
        query: &StoreQuery,
    ) -> Result<Vec<StoreHit>, SearchError> {
        self.check_dimensions(query_vector)?;

        let response = self
            .send(
                self.client.post(self.url("points/search")?),
                &json!({
                    "vector": query_vector,
                    "limit": query.limit,
                    "with_payload": true,
                    "filter": build_filter(query),
                }),
            )
            .await?;

        let hits = response
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut result = Vec::with_capacity(hits.len());
        for hit in &hits {
            let chunk = point_chunk(hit)?;
            // the text index tokenizes names; keep substring semantics exact
            if !query.person_matches(&chunk.people) {
                continue;
            }
            result.push(StoreHit {
                rank: result.len(),
                score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0),
                chunk,
            });
        }
        Ok(result)
    }

    async fn vector_files(&self, vault: &str) -> Result<Vec<IndexedFile>, SearchError> {
        let points = self
            .scroll(json!({"must": [match_value("vault", vault)]}), false)
            .await?;
        Ok(summarize_files(&points, vault))
    }

    async fn record_vector_file(&self, file: &IndexedFile) -> Result<(), SearchError> {
        self.send(
            self.client.put(self.url("points?wait=true")?),
            &json!({ "points": [file_record_point(file, self.vector_size)] }),
        )
        .await?;
        Ok(())
    }

    async fn vector_chunks_for_path(
        &self,
        vault: &str,
        file_path: &str,
    ) -> Result<Vec<DocumentChunk>, SearchError> {
        let points = self.scroll(chunk_filter(vault, file_path), true).await?;
        let mut chunks = points
            .iter()
            .map(point_chunk)
            .collect::<Result<Vec<_>, _>>()?;
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(chunks)
    }

    async fn touch_vector_mtime(
        &self,
        vault: &str,
        file_path: &str,
        mtime: f64,
    ) -> Result<(), SearchError> {
        self.send(
            self.client.post(self.url("points/payload?wait=true")?),
            &json!({
                "payload": {"mtime": mtime},
                "filter": path_filter(vault, file_path),
            }),
        )
        .await?;
        Ok(())
    }
}
