// Document storage: where bootstrap snapshots come from and where debounced
// persistence writes them back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{endpoint, ServiceError};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persisted text of `document_id`. A missing document is an error, an
    /// empty one is `Ok("")`.
    async fn get_snapshot(&self, document_id: &str) -> Result<String, ServiceError>;

    async fn save_snapshot(&self, document_id: &str, text: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Deserialize)]
struct DocumentBody {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct ContentUpdate<'a> {
    content: &'a str,
}

/// `GET`/`PUT {api_url}/api/documents/{id}` with a `{content}` body.
#[derive(Debug, Clone)]
pub struct HttpDocumentStore {
    client: reqwest::Client,
    api_url: String,
}

impl HttpDocumentStore {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self { client, api_url: api_url.into() }
    }

    fn document_url(&self, document_id: &str) -> String {
        endpoint(&self.api_url, &format!("api/documents/{document_id}"))
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get_snapshot(&self, document_id: &str) -> Result<String, ServiceError> {
        let response = self.client.get(self.document_url(document_id)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(document_id.to_string())),
            status if status.is_success() => Ok(response.json::<DocumentBody>().await?.content),
            status => Err(ServiceError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn save_snapshot(&self, document_id: &str, text: &str) -> Result<(), ServiceError> {
        let response = self
            .client
            .put(self.document_url(document_id))
            .json(&ContentUpdate { content: text })
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(document_id.to_string())),
            status if status.is_success() => Ok(()),
            status => Err(ServiceError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// In-process store for tests and offline use. Counts reads and writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<String, String>,
    reads: usize,
    writes: usize,
    unavailable: bool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, document_id: &str, text: &str) -> Self {
        self.lock().documents.insert(document_id.to_string(), text.to_string());
        self
    }

    /// Make every call fail as if the service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn document(&self, document_id: &str) -> Option<String> {
        self.lock().documents.get(document_id).cloned()
    }

    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_snapshot(&self, document_id: &str) -> Result<String, ServiceError> {
        let mut state = self.lock();
        state.reads += 1;
        if state.unavailable {
            return Err(ServiceError::Unavailable("memory store offline".to_string()));
        }
        state
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(document_id.to_string()))
    }

    async fn save_snapshot(&self, document_id: &str, text: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(ServiceError::Unavailable("memory store offline".to_string()));
        }
        state.writes += 1;
        state.documents.insert(document_id.to_string(), text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_and_counts() {
        let store = MemoryDocumentStore::new().with_document("1", "print('hi')\n");
        assert_eq!(store.get_snapshot("1").await.expect("read"), "print('hi')\n");
        store.save_snapshot("1", "print('bye')\n").await.expect("write");
        assert_eq!(store.document("1").as_deref(), Some("print('bye')\n"));
        assert_eq!((store.reads(), store.writes()), (1, 1));
    }

    #[tokio::test]
    async fn memory_store_reports_missing_and_unavailable() {
        let store = MemoryDocumentStore::new();
        assert!(matches!(store.get_snapshot("9").await, Err(ServiceError::NotFound(_))));
        store.set_unavailable(true);
        let error = store.get_snapshot("9").await.expect_err("offline");
        assert!(error.is_transient());
    }

    #[test]
    fn http_store_builds_document_urls() {
        let store = HttpDocumentStore::new("http://localhost:8000/");
        assert_eq!(store.document_url("12"), "http://localhost:8000/api/documents/12");
    }
}
