// Room session: one participant's live membership in one document room.
//
// `RoomSession::open` creates the local replica, starts the snapshot fetch,
// and spawns a driver task that owns the connection. The driver reconnects
// with a fixed backoff for as long as the session is open, replays missed
// operations through the sync handshake on every connection, and runs
// bootstrap exactly once after the first completed handshake.

mod driver;

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use codesync_common::crdt::id::replica_actor;
use codesync_common::crdt::{Author, TextError, Transaction};
use codesync_common::delta::DocChange;
use codesync_common::protocol::room_key;
use codesync_common::types::{AnalysisReport, CursorPosition, OptimizationResult};

use crate::agent::GhostAgent;
use crate::bootstrap::{Bootstrap, BootstrapOutcome};
use crate::config::ClientConfig;
use crate::engine::{PresenceBoard, SharedDocument};
use crate::identity::Identity;
use crate::propagation::{
    spawn_hook, AnalysisOutcome, AnalyzeAction, DebounceConfig, PersistAction,
};
use crate::services::{stage_for_analysis, AnalysisService, DocumentStore, ServiceError};
use crate::transport::{ConnectionMachine, ConnectionState, Connector, ReconnectPolicy};

use driver::Driver;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub identity: Identity,
    pub debounce: DebounceConfig,
    /// Quiet period before the snapshot is saved back; `None` disables it.
    pub persist_debounce: Option<DebounceConfig>,
    pub reconnect: ReconnectPolicy,
}

impl SessionOptions {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            debounce: DebounceConfig::default(),
            persist_debounce: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn from_config(config: &ClientConfig, identity: Identity) -> Self {
        Self {
            identity: identity.with_display_name(config.display_name.clone()),
            debounce: DebounceConfig::with_window(config.debounce()),
            persist_debounce: config.persist_debounce().map(DebounceConfig::with_window),
            reconnect: ReconnectPolicy::fixed(config.reconnect_backoff()),
        }
    }
}

pub struct RoomSession {
    document_id: String,
    identity: Identity,
    doc: SharedDocument,
    presence: PresenceBoard,
    store: Arc<dyn DocumentStore>,
    analysis: Arc<dyn AnalysisService>,
    status: watch::Receiver<ConnectionState>,
    bootstrap: watch::Receiver<Option<BootstrapOutcome>>,
    failure: watch::Receiver<Option<String>>,
    outcomes: Option<mpsc::UnboundedReceiver<AnalysisOutcome>>,
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl RoomSession {
    /// Open the room of `document_id`. Must be called within a Tokio runtime.
    pub fn open(
        document_id: impl Into<String>,
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        store: Arc<dyn DocumentStore>,
        analysis: Arc<dyn AnalysisService>,
    ) -> Self {
        let document_id: String = document_id.into();
        let key = room_key(&document_id);
        let actor = replica_actor(Uuid::new_v4().as_u64_pair().0);
        let (doc, outbox) = SharedDocument::new(key.clone(), actor);
        let presence = PresenceBoard::new(options.identity.participant_id.clone());
        let (shutdown, _) = broadcast::channel(4);

        let bootstrap = Bootstrap::start(document_id.clone(), Arc::clone(&store));
        let machine = ConnectionMachine::new();
        let status = machine.subscribe();
        let (bootstrap_tx, bootstrap_rx) = watch::channel(None);
        let (failure_tx, failure_rx) = watch::channel(None);
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::new();
        let analyze = AnalyzeAction::new(document_id.clone(), Arc::clone(&analysis), outcomes_tx)
            .with_store(Arc::clone(&store));
        tasks.push(spawn_hook(&doc, options.debounce, Arc::new(analyze), shutdown.subscribe()));
        if let Some(window) = options.persist_debounce {
            let persist = PersistAction::new(document_id.clone(), Arc::clone(&store));
            tasks.push(spawn_hook(&doc, window, Arc::new(persist), shutdown.subscribe()));
        }

        let driver = Driver {
            room_key: key.clone(),
            participant_id: options.identity.participant_id.clone(),
            author: options.identity.author(),
            doc: doc.clone(),
            presence: presence.clone(),
            connector,
            machine,
            policy: options.reconnect,
            outbox,
            local_presence: presence.watch_local(),
            bootstrap,
            bootstrap_tx,
            failure_tx,
            shutdown: shutdown.subscribe(),
        };
        tasks.push(tokio::spawn(driver.run()));

        info!(room = %key, actor = %format!("{actor:x}"), "room session opened");
        Self {
            document_id,
            identity: options.identity,
            doc,
            presence,
            store,
            analysis,
            status,
            bootstrap: bootstrap_rx,
            failure: failure_rx,
            outcomes: Some(outcomes_rx),
            shutdown,
            tasks,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn room_key(&self) -> &str {
        self.doc.room_key()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn author(&self) -> Author {
        self.identity.author()
    }

    pub fn document(&self) -> &SharedDocument {
        &self.doc
    }

    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Why the relay refused this session, once it has. A refused session
    /// does not reconnect.
    pub fn failure(&self) -> Option<String> {
        self.failure.borrow().clone()
    }

    /// Wait until the current connection has completed its handshake.
    pub async fn wait_synced(&self) -> Result<()> {
        let mut status = self.status.clone();
        status
            .wait_for(|state| *state == ConnectionState::Synced)
            .await
            .map(|_| ())
            .map_err(|_| self.stopped())
    }

    fn stopped(&self) -> anyhow::Error {
        match self.failure() {
            Some(reason) => anyhow!("relay rejected the session for `{}`: {reason}", self.document_id),
            None => anyhow!("room session for `{}` stopped", self.document_id),
        }
    }

    pub fn bootstrap_outcome(&self) -> Option<BootstrapOutcome> {
        *self.bootstrap.borrow()
    }

    pub async fn wait_bootstrapped(&self) -> Result<BootstrapOutcome> {
        let mut outcome = self.bootstrap.clone();
        let outcome = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| self.stopped())?;
        (*outcome).ok_or_else(|| anyhow!("bootstrap outcome missing"))
    }

    pub fn presence(&self) -> &PresenceBoard {
        &self.presence
    }

    /// Publish this participant's record with the given cursor.
    pub fn publish_presence(&self, cursor: Option<CursorPosition>) {
        self.presence.publish(self.identity.presence(cursor));
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<DocChange> {
        self.doc.subscribe()
    }

    /// Analysis results of the debounced hook. Can be taken once.
    pub fn take_analysis_outcomes(&mut self) -> Option<mpsc::UnboundedReceiver<AnalysisOutcome>> {
        self.outcomes.take()
    }

    pub fn ghost_agent(&self) -> GhostAgent {
        GhostAgent::new(self.doc.clone())
    }

    pub fn snapshot(&self) -> String {
        self.doc.snapshot()
    }

    pub fn edit<E, F>(&self, f: F) -> Result<Option<DocChange>, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<(), E>,
    {
        self.doc.edit(&self.author(), f)
    }

    pub fn insert(&self, position: usize, text: &str) -> Result<Option<DocChange>, TextError> {
        self.doc.insert(&self.author(), position, text)
    }

    pub fn delete(&self, position: usize, len: usize) -> Result<Option<DocChange>, TextError> {
        self.doc.delete(&self.author(), position, len)
    }

    /// Analyze the current snapshot right away, outside the debounced hook.
    pub async fn analyze(&self) -> Result<AnalysisReport, ServiceError> {
        let snapshot = self.staged_snapshot().await?;
        self.analysis.analyze(&self.document_id, &snapshot).await
    }

    pub async fn optimize(&self) -> Result<OptimizationResult, ServiceError> {
        self.staged_snapshot().await?;
        self.analysis.optimize(&self.document_id).await
    }

    /// Current text, saved first for services that read the stored copy.
    /// Before bootstrap the replica may not hold the document yet, so nothing
    /// is saved or analyzed.
    async fn staged_snapshot(&self) -> Result<String, ServiceError> {
        if self.bootstrap_outcome().is_none() {
            return Err(ServiceError::Unavailable(format!("room `{}` has not synced yet", self.room_key())));
        }
        let snapshot = self.doc.snapshot();
        stage_for_analysis(self.analysis.as_ref(), self.store.as_ref(), &self.document_id, &snapshot).await?;
        Ok(snapshot)
    }

    /// Stop the hooks, flush queued operations, close the connection, and
    /// wait for every session task to finish.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(());
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
        info!(room = %self.room_key(), "room session closed");
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}
