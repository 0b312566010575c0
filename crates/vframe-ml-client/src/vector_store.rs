//! Persistence of frame vectors for similarity search.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use vframe_models::JobId;

use crate::config::MlClientConfig;
use crate::error::{MlError, MlResult};

/// One frame's vector and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Store key, `{job_id}_frame_{index}`
    pub id: String,
    pub job_id: JobId,
    pub frame_idx: u32,
    pub locator: String,
    pub description: String,
    pub timestamp: f64,
    pub embedding: Vec<f32>,
}

impl FrameRecord {
    pub fn new(
        job_id: &JobId,
        frame_idx: u32,
        locator: impl Into<String>,
        description: impl Into<String>,
        timestamp: f64,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: job_id.frame_key(frame_idx),
            job_id: job_id.clone(),
            frame_idx,
            locator: locator.into(),
            description: description.into(),
            timestamp,
            embedding,
        }
    }

    /// Metadata stored next to the vector.
    pub fn metadata(&self) -> Value {
        json!({
            "job_id": self.job_id,
            "frame_idx": self.frame_idx,
            "locator": self.locator,
            "description": self.description,
            "timestamp": self.timestamp,
        })
    }
}

/// Vector database seam.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the record with the same id.
    async fn upsert(&self, record: &FrameRecord) -> MlResult<()>;
}

/// Store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    records: DashMap<String, FrameRecord>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<FrameRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one job, ordered by frame index.
    pub fn records_for(&self, job_id: &JobId) -> Vec<FrameRecord> {
        let mut records: Vec<FrameRecord> = self
            .records
            .iter()
            .filter(|r| &r.job_id == job_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.frame_idx);
        records
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, record: &FrameRecord) -> MlResult<()> {
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
}

/// [`VectorStore`] backed by Chroma's REST API.
pub struct ChromaVectorStore {
    http: Client,
    base_url: String,
    collection: String,
    collection_id: OnceCell<String>,
}

impl ChromaVectorStore {
    pub fn new(config: &MlClientConfig) -> MlResult<Self> {
        Ok(Self {
            http: config.http_client()?,
            base_url: config.chroma_url.trim_end_matches('/').to_string(),
            collection: config.chroma_collection.clone(),
            collection_id: OnceCell::new(),
        })
    }

    /// Resolve the collection id, creating the collection on first use.
    async fn collection_id(&self) -> MlResult<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let url = format!("{}/api/v1/collections", self.base_url);
                let response = self
                    .http
                    .post(&url)
                    .json(&json!({"name": self.collection, "get_or_create": true}))
                    .send()
                    .await?;
                let collection: CollectionResponse = MlError::check("vector store", response)
                    .await?
                    .json()
                    .await?;
                info!("Using vector collection {} ({})", self.collection, collection.id);
                Ok::<_, MlError>(collection.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn upsert(&self, record: &FrameRecord) -> MlResult<()> {
        let collection_id = self.collection_id().await?;
        let url = format!(
            "{}/api/v1/collections/{}/upsert",
            self.base_url, collection_id
        );

        let body = json!({
            "ids": [record.id],
            "embeddings": [record.embedding],
            "metadatas": [record.metadata()],
            "documents": [record.description],
        });

        let response = self.http.post(&url).json(&body).send().await?;
        MlError::check("vector store", response).await?;

        debug!("Upserted {} into {}", record.id, self.collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(idx: u32) -> FrameRecord {
        FrameRecord::new(
            &JobId::from_string("v1"),
            idx,
            format!("/data/frames/v1/frame_{:05}.jpg", idx + 1),
            "a red car",
            idx as f64,
            vec![0.1, 0.2],
        )
    }

    #[test]
    fn test_record_id_and_metadata() {
        let r = record(3);
        assert_eq!(r.id, "v1_frame_3");
        let meta = r.metadata();
        assert_eq!(meta["job_id"], "v1");
        assert_eq!(meta["frame_idx"], 3);
        assert_eq!(meta["locator"], "/data/frames/v1/frame_00004.jpg");
        assert_eq!(meta["timestamp"], 3.0);
    }

    #[tokio::test]
    async fn test_in_memory_upsert_replaces() {
        let store = InMemoryVectorStore::new();
        store.upsert(&record(1)).await.unwrap();
        store.upsert(&record(0)).await.unwrap();

        let mut updated = record(1);
        updated.description = "a blue car".to_string();
        store.upsert(&updated).await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("v1_frame_1").unwrap().description, "a blue car");
        let indices: Vec<u32> = store
            .records_for(&JobId::from_string("v1"))
            .iter()
            .map(|r| r.frame_idx)
            .collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_chroma_creates_collection_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections"))
            .and(body_partial_json(json!({"name": "video_frames", "get_or_create": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-123", "name": "video_frames"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections/c-123/upsert"))
            .and(body_partial_json(json!({"ids": ["v1_frame_0"], "documents": ["a red car"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections/c-123/upsert"))
            .and(body_partial_json(json!({"ids": ["v1_frame_1"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(true)))
            .expect(1)
            .mount(&server)
            .await;

        let store = ChromaVectorStore::new(&MlClientConfig {
            chroma_url: server.uri(),
            ..MlClientConfig::default()
        })
        .unwrap();
        store.upsert(&record(0)).await.unwrap();
        store.upsert(&record(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_chroma_upsert_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-1"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/collections/c-1/upsert"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad dimension"))
            .mount(&server)
            .await;

        let store = ChromaVectorStore::new(&MlClientConfig {
            chroma_url: server.uri(),
            ..MlClientConfig::default()
        })
        .unwrap();
        assert!(matches!(
            store.upsert(&record(0)).await,
            Err(MlError::RequestFailed(_))
        ));
    }
}
