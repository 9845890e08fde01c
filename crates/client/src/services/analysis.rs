// AI analysis service client.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use codesync_common::types::{AnalysisReport, OptimizationResult};

use super::{endpoint, ServiceError};

#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Analyze the full text of a document.
    async fn analyze(&self, document_id: &str, text: &str) -> Result<AnalysisReport, ServiceError>;

    async fn optimize(&self, document_id: &str) -> Result<OptimizationResult, ServiceError>;

    /// The service works on the stored copy of the document rather than the
    /// text it is given, so callers must save the live text first.
    fn reads_stored_text(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    suggestion_data: AnalysisReport,
}

#[derive(Debug, Deserialize)]
struct OptimizeResponse {
    optimization: OptimizationResult,
}

/// `POST {api_url}/api/ai/analyze/{id}` and `POST {api_url}/api/ai/optimize/{id}`.
#[derive(Debug, Clone)]
pub struct HttpAnalysisService {
    client: reqwest::Client,
    api_url: String,
}

impl HttpAnalysisService {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), api_url: api_url.into() }
    }

    async fn post<T, B>(&self, document_id: &str, path: &str, body: Option<&B>) -> Result<T, ServiceError>
    where
        T: for<'de> Deserialize<'de>,
        B: Serialize + Sync,
    {
        let mut request = self.client.post(endpoint(&self.api_url, path));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(ServiceError::NotFound(document_id.to_string())),
            status if status.is_success() => Ok(response.json::<T>().await?),
            status => Err(ServiceError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn analyze(&self, document_id: &str, text: &str) -> Result<AnalysisReport, ServiceError> {
        let body = AnalyzeRequest { content: text };
        let response: AnalyzeResponse = self
            .post(document_id, &format!("api/ai/analyze/{document_id}"), Some(&body))
            .await?;
        Ok(response.suggestion_data)
    }

    async fn optimize(&self, document_id: &str) -> Result<OptimizationResult, ServiceError> {
        let response: OptimizeResponse = self
            .post::<_, ()>(document_id, &format!("api/ai/optimize/{document_id}"), None)
            .await?;
        Ok(response.optimization)
    }

    fn reads_stored_text(&self) -> bool {
        true
    }
}
