// Debounced propagation hooks.
//
// A hook watches the change stream of one document, restarts its quiet timer
// on every local change, and runs its action with the full snapshot once the
// timer elapses. Remote changes are observed but never restart the timer.
// Firings run as independent tasks and may overlap.

pub mod debounce;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use codesync_common::types::AnalysisReport;

use crate::engine::SharedDocument;
use crate::services::{stage_for_analysis, AnalysisService, DocumentStore, ServiceError};

pub use debounce::{DebounceConfig, Debouncer};

/// Work done after a quiet period.
#[async_trait]
pub trait QuietAction: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn fire(&self, snapshot: String);
}

/// Result of one analysis request, delivered to the UI layer.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub document_id: String,
    /// Characters in the analyzed snapshot.
    pub analyzed_chars: usize,
    pub result: Result<AnalysisReport, ServiceError>,
}

impl AnalysisOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Sends the snapshot to the analysis service.
pub struct AnalyzeAction {
    document_id: String,
    service: Arc<dyn AnalysisService>,
    store: Option<Arc<dyn DocumentStore>>,
    outcomes: mpsc::UnboundedSender<AnalysisOutcome>,
}

impl AnalyzeAction {
    pub fn new(
        document_id: impl Into<String>,
        service: Arc<dyn AnalysisService>,
        outcomes: mpsc::UnboundedSender<AnalysisOutcome>,
    ) -> Self {
        Self { document_id: document_id.into(), service, store: None, outcomes }
    }

    /// Store the snapshot there before analysis, for services that analyze
    /// the stored copy.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    async fn analyze(&self, snapshot: &str) -> Result<AnalysisReport, ServiceError> {
        if let Some(store) = &self.store {
            stage_for_analysis(self.service.as_ref(), store.as_ref(), &self.document_id, snapshot).await?;
        }
        self.service.analyze(&self.document_id, snapshot).await
    }
}

#[async_trait]
impl QuietAction for AnalyzeAction {
    fn name(&self) -> &'static str {
        "analyze"
    }

    async fn fire(&self, snapshot: String) {
        let result = self.analyze(&snapshot).await;
        match &result {
            Ok(report) => debug!(
                document = %self.document_id,
                suggestions = report.suggestions.len(),
                "analysis complete"
            ),
            Err(error) => warn!(document = %self.document_id, %error, "analysis failed"),
        }
        let outcome = AnalysisOutcome {
            document_id: self.document_id.clone(),
            analyzed_chars: snapshot.chars().count(),
            result,
        };
        let _ = self.outcomes.send(outcome);
    }
}

/// Writes the snapshot back to document storage.
pub struct PersistAction {
    document_id: String,
    store: Arc<dyn DocumentStore>,
}

impl PersistAction {
    pub fn new(document_id: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        Self { document_id: document_id.into(), store }
    }
}

#[async_trait]
impl QuietAction for PersistAction {
    fn name(&self) -> &'static str {
        "persist"
    }

    async fn fire(&self, snapshot: String) {
        match self.store.save_snapshot(&self.document_id, &snapshot).await {
            Ok(()) => debug!(document = %self.document_id, "snapshot saved"),
            Err(error) => warn!(document = %self.document_id, %error, "snapshot save failed"),
        }
    }
}

/// Spawn a hook running `action` after every quiet period of local edits on
/// `doc`. The hook stops when `shutdown` fires or its sender is dropped;
/// firings already started run to completion.
pub fn spawn_hook(
    doc: &SharedDocument,
    config: DebounceConfig,
    action: Arc<dyn QuietAction>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let doc = doc.clone();
    let mut changes = doc.subscribe();
    tokio::spawn(async move {
        let mut debouncer = Debouncer::new(config);
        loop {
            let deadline = debouncer.next_deadline();
            tokio::select! {
                _ = shutdown.recv() => break,
                change = changes.recv() => match change {
                    Ok(change) if change.is_local() => debouncer.push(),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(hook = action.name(), skipped, "change stream lagged");
                        debouncer.push();
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = wait_for(deadline), if deadline.is_some() => {
                    if debouncer.drain_ready() {
                        let snapshot = doc.snapshot();
                        let action = Arc::clone(&action);
                        tokio::spawn(async move { action.fire(snapshot).await });
                    }
                }
            }
        }
        debug!(hook = action.name(), room = doc.room_key(), "propagation hook stopped");
    })
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
