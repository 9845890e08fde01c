// Clients for the external document-storage and analysis services.

pub mod analysis;
pub mod storage;

use thiserror::Error;

pub use analysis::{AnalysisService, HttpAnalysisService};
pub use storage::{DocumentStore, HttpDocumentStore, MemoryDocumentStore};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("document `{0}` not found")]
    NotFound(String),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Errors worth retrying later (connectivity, server-side failures).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound(_) => false,
            Self::Status { status, .. } => *status >= 500,
            Self::Http(error) => error.is_connect() || error.is_timeout(),
            Self::Unavailable(_) => true,
        }
    }
}

/// Save `text` as the stored copy of `document_id` when `analysis` reads
/// stored text instead of the text it is handed.
pub async fn stage_for_analysis(
    analysis: &dyn AnalysisService,
    store: &dyn DocumentStore,
    document_id: &str,
    text: &str,
) -> Result<(), ServiceError> {
    if analysis.reads_stored_text() {
        store.save_snapshot(document_id, text).await?;
    }
    Ok(())
}

/// `{base}{path}` with exactly one slash between them.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
