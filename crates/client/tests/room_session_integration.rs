use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

use codesync_client::bootstrap::BootstrapOutcome;
use codesync_client::identity::Identity;
use codesync_client::propagation::DebounceConfig;
use codesync_client::services::{AnalysisService, MemoryDocumentStore, ServiceError};
use codesync_client::transport::{
    ConnectionState, Connector, Link, ReconnectPolicy, WebSocketConnector,
};
use codesync_client::{RoomSession, SessionOptions};
use codesync_common::protocol::{room_key, RoomFrame};
use codesync_common::types::{AnalysisReport, CursorPosition, LineFix, OptimizationResult};
use codesync_relay::cors::cors_layer;
use codesync_relay::{build_router, serve, RoomHub};

const WAIT: Duration = Duration::from_secs(3);

/// Connects sessions to an in-process hub.
struct LocalConnector {
    hub: RoomHub,
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, room_key: &str) -> anyhow::Result<Link> {
        let (outgoing, incoming) = self.hub.connect_local(room_key).await;
        Ok(Link::new(outgoing, incoming))
    }
}

/// Refuses every connection with a non-retryable error.
#[derive(Default)]
struct RejectingConnector {
    connects: AtomicUsize,
    links: Mutex<Vec<tokio::sync::mpsc::UnboundedReceiver<RoomFrame>>>,
}

#[async_trait]
impl Connector for RejectingConnector {
    async fn connect(&self, _room_key: &str) -> anyhow::Result<Link> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (outgoing, sent) = tokio::sync::mpsc::unbounded_channel();
        let (replies, incoming) = tokio::sync::mpsc::unbounded_channel();
        replies.send(RoomFrame::error("malformed_operation", "insert id belongs to another actor", false))?;
        self.links.lock().expect("lock").push(sent);
        Ok(Link::new(outgoing, incoming))
    }
}

#[derive(Default)]
struct CountingAnalysis {
    calls: AtomicUsize,
}

#[async_trait]
impl AnalysisService for CountingAnalysis {
    async fn analyze(&self, _document_id: &str, _text: &str) -> Result<AnalysisReport, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AnalysisReport::default())
    }

    async fn optimize(&self, _document_id: &str) -> Result<OptimizationResult, ServiceError> {
        Err(ServiceError::Unavailable("optimize".into()))
    }
}

fn options(name: &str) -> SessionOptions {
    let mut options = SessionOptions::new(Identity::generate(name));
    options.reconnect = ReconnectPolicy::fixed(Duration::from_millis(300));
    options.debounce = DebounceConfig::with_millis(50);
    options
}

fn open(
    hub: &RoomHub,
    document_id: &str,
    name: &str,
    store: &MemoryDocumentStore,
) -> (RoomSession, Arc<CountingAnalysis>) {
    let analysis = Arc::new(CountingAnalysis::default());
    let session = RoomSession::open(
        document_id,
        options(name),
        Arc::new(LocalConnector { hub: hub.clone() }),
        Arc::new(store.clone()),
        analysis.clone(),
    );
    (session, analysis)
}

async fn wait_for_text(session: &RoomSession, expected: &str) {
    let result = timeout(WAIT, async {
        while session.snapshot() != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "expected {expected:?}, document still reads {:?}",
        session.snapshot()
    );
}

async fn wait_for_state(session: &RoomSession, state: ConnectionState) {
    let mut status = session.watch_status();
    timeout(WAIT, status.wait_for(|current| *current == state))
        .await
        .expect("state reached in time")
        .expect("session still running");
}

#[tokio::test]
async fn first_participant_seeds_and_late_joiner_keeps_peer_state() {
    let hub = RoomHub::new();
    let store = MemoryDocumentStore::new().with_document("doc-seed", "fn main() {}\n");

    let (alice, _) = open(&hub, "doc-seed", "alice", &store);
    assert_eq!(
        timeout(WAIT, alice.wait_bootstrapped()).await.expect("in time").expect("ok"),
        BootstrapOutcome::Seeded
    );
    assert_eq!(alice.snapshot(), "fn main() {}\n");

    alice.insert(0, "pub ").expect("edit");

    let (bob, _) = open(&hub, "doc-seed", "bob", &store);
    assert_eq!(
        timeout(WAIT, bob.wait_bootstrapped()).await.expect("in time").expect("ok"),
        BootstrapOutcome::SkippedPeerState
    );
    wait_for_text(&bob, "pub fn main() {}\n").await;
    assert_eq!(hub.snapshot(&room_key("doc-seed")).await.as_deref(), Some("pub fn main() {}\n"));

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn concurrent_bootstraps_do_not_duplicate_the_snapshot() {
    let hub = RoomHub::new();
    let store = MemoryDocumentStore::new().with_document("doc-race", "abc");

    let (alice, _) = open(&hub, "doc-race", "alice", &store);
    let (bob, _) = open(&hub, "doc-race", "bob", &store);
    timeout(WAIT, alice.wait_bootstrapped()).await.expect("in time").expect("ok");
    timeout(WAIT, bob.wait_bootstrapped()).await.expect("in time").expect("ok");

    sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.snapshot(), "abc");
    assert_eq!(bob.snapshot(), "abc");
    assert_eq!(hub.snapshot(&room_key("doc-race")).await.as_deref(), Some("abc"));

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn concurrent_edits_converge_for_both_participants() {
    let hub = RoomHub::new();
    let store = MemoryDocumentStore::new().with_document("doc-hello", "");

    let (alice, _) = open(&hub, "doc-hello", "alice", &store);
    let (bob, _) = open(&hub, "doc-hello", "bob", &store);
    assert_eq!(
        timeout(WAIT, alice.wait_bootstrapped()).await.expect("in time").expect("ok"),
        BootstrapOutcome::EmptySnapshot
    );
    timeout(WAIT, bob.wait_bootstrapped()).await.expect("in time").expect("ok");

    alice.insert(0, "hello").expect("alice edits");
    wait_for_text(&bob, "hello").await;

    alice.insert(5, "!").expect("alice edits");
    bob.insert(5, " world").expect("bob edits");

    let converged = timeout(WAIT, async {
        loop {
            let (a, b) = (alice.snapshot(), bob.snapshot());
            if a == b && a.chars().count() == "hello world!".len() {
                return a;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("participants converge");
    assert!(
        converged == "hello world!" || converged == "hello! world",
        "unexpected merge result {converged:?}"
    );

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn reconnect_replays_missed_edits_without_rerunning_bootstrap() {
    let hub = RoomHub::new();
    let store = MemoryDocumentStore::new().with_document("doc-reconnect", "base");

    let (alice, _) = open(&hub, "doc-reconnect", "alice", &store);
    let (bob, _) = open(&hub, "doc-reconnect", "bob", &store);
    timeout(WAIT, alice.wait_bootstrapped()).await.expect("in time").expect("ok");
    timeout(WAIT, bob.wait_bootstrapped()).await.expect("in time").expect("ok");
    wait_for_text(&bob, "base").await;
    assert_eq!(store.reads(), 2);

    assert_eq!(hub.drop_sessions(&room_key("doc-reconnect")).await, 2);
    wait_for_state(&alice, ConnectionState::Backoff).await;

    alice.insert(4, " offline").expect("edit while disconnected");

    wait_for_state(&alice, ConnectionState::Synced).await;
    wait_for_state(&bob, ConnectionState::Synced).await;
    wait_for_text(&bob, "base offline").await;

    sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.snapshot(), "base offline");
    assert_eq!(hub.snapshot(&room_key("doc-reconnect")).await.as_deref(), Some("base offline"));
    assert_eq!(store.reads(), 2);

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn relay_losing_the_room_is_refilled_from_the_participants() {
    let hub = RoomHub::new();
    let store = MemoryDocumentStore::new().with_document("doc-lost", "shared");
    let key = room_key("doc-lost");

    let (alice, _) = open(&hub, "doc-lost", "alice", &store);
    let (bob, _) = open(&hub, "doc-lost", "bob", &store);
    timeout(WAIT, alice.wait_bootstrapped()).await.expect("in time").expect("ok");
    timeout(WAIT, bob.wait_bootstrapped()).await.expect("in time").expect("ok");
    bob.insert(6, " text").expect("bob edits");
    wait_for_text(&alice, "shared text").await;
    assert_eq!(store.reads(), 2);

    assert_eq!(hub.drop_sessions(&key).await, 2);
    assert_eq!(hub.sweep_idle(Duration::ZERO).await, 1);
    assert!(hub.snapshot(&key).await.is_none());

    wait_for_state(&alice, ConnectionState::Synced).await;
    wait_for_state(&bob, ConnectionState::Synced).await;
    let restored = timeout(WAIT, async {
        while hub.snapshot(&key).await.as_deref() != Some("shared text") {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(restored.is_ok(), "relay holds {:?}", hub.snapshot(&key).await);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.snapshot(), "shared text");
    assert_eq!(bob.snapshot(), "shared text");
    assert_eq!(hub.snapshot(&key).await.as_deref(), Some("shared text"));
    assert_eq!(store.reads(), 2);

    alice.insert(0, "still ").expect("edit after recovery");
    wait_for_text(&bob, "still shared text").await;

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn rejected_session_stops_instead_of_reconnecting() {
    let connector = Arc::new(RejectingConnector::default());
    let store = MemoryDocumentStore::new().with_document("doc-rejected", "text");
    let session = RoomSession::open(
        "doc-rejected",
        options("alice"),
        connector.clone(),
        Arc::new(store.clone()),
        Arc::new(CountingAnalysis::default()),
    );

    let error = timeout(WAIT, session.wait_bootstrapped())
        .await
        .expect("in time")
        .expect_err("session is refused");
    assert!(error.to_string().contains("malformed_operation"), "{error}");
    assert_eq!(session.failure().as_deref(), Some("malformed_operation: insert id belongs to another actor"));

    sleep(Duration::from_millis(700)).await;
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    assert_eq!(session.status(), ConnectionState::Closed);
    session.close().await;
}

#[tokio::test]
async fn presence_is_shared_and_cleared_when_a_participant_leaves() {
    let hub = RoomHub::new();
    let store = MemoryDocumentStore::new().with_document("doc-presence", "");

    let (alice, _) = open(&hub, "doc-presence", "alice", &store);
    let (bob, _) = open(&hub, "doc-presence", "bob", &store);
    timeout(WAIT, alice.wait_synced()).await.expect("in time").expect("ok");
    timeout(WAIT, bob.wait_synced()).await.expect("in time").expect("ok");

    alice.publish_presence(Some(CursorPosition { line: 3, column: 7 }));
    let alice_id = alice.identity().participant_id.clone();

    let mut records = bob.presence().subscribe();
    let seen = timeout(
        WAIT,
        records.wait_for(|records| {
            records.iter().any(|r| {
                r.participant_id == alice_id && r.cursor == Some(CursorPosition { line: 3, column: 7 })
            })
        }),
    )
    .await
    .expect("presence in time")
    .map(|records| records.clone())
    .expect("board alive");
    let record = seen.iter().find(|r| r.participant_id == alice_id).expect("alice record");
    assert_eq!(record.display_name, "alice");

    alice.close().await;
    timeout(WAIT, records.wait_for(|records| records.iter().all(|r| r.participant_id != alice_id)))
        .await
        .expect("removal in time")
        .expect("board alive");

    bob.close().await;
}

#[tokio::test]
async fn ghost_fixes_replicate_with_agent_attribution() {
    let hub = RoomHub::new();
    let store = MemoryDocumentStore::new().with_document("doc-ghost", "let a = 1\nlet b = 2\nlet c = 3\n");

    let (alice, _) = open(&hub, "doc-ghost", "alice", &store);
    let (bob, _) = open(&hub, "doc-ghost", "bob", &store);
    timeout(WAIT, alice.wait_bootstrapped()).await.expect("in time").expect("ok");
    timeout(WAIT, bob.wait_bootstrapped()).await.expect("in time").expect("ok");
    wait_for_text(&bob, "let a = 1\nlet b = 2\nlet c = 3\n").await;

    let mut changes = bob.subscribe_changes();
    let report = alice
        .ghost_agent()
        .apply_multiple_fixes(&[LineFix::new(1, "let a = 10;"), LineFix::new(3, "let c = 30;")])
        .expect("fixes apply");
    assert_eq!(report.applied.len(), 2);

    wait_for_text(&bob, "let a = 10;\nlet b = 2\nlet c = 30;\n").await;
    let change = timeout(WAIT, changes.recv()).await.expect("in time").expect("change");
    assert!(!change.is_local());
    assert!(change.origin.is_agent());

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn analysis_runs_once_per_burst_and_only_for_the_editing_participant() {
    let hub = RoomHub::new();
    let store = MemoryDocumentStore::new().with_document("doc-analysis", "");

    let (alice, alice_analysis) = open(&hub, "doc-analysis", "alice", &store);
    let (bob, bob_analysis) = open(&hub, "doc-analysis", "bob", &store);
    timeout(WAIT, alice.wait_bootstrapped()).await.expect("in time").expect("ok");
    timeout(WAIT, bob.wait_bootstrapped()).await.expect("in time").expect("ok");

    for (i, ch) in "fn x() {}".chars().enumerate() {
        alice.insert(i, &ch.to_string()).expect("typing");
    }
    wait_for_text(&bob, "fn x() {}").await;
    sleep(Duration::from_millis(400)).await;

    assert_eq!(alice_analysis.calls.load(Ordering::SeqCst), 1);
    assert_eq!(bob_analysis.calls.load(Ordering::SeqCst), 0);

    alice.close().await;
    bob.close().await;
}

#[tokio::test]
async fn sessions_sync_through_a_websocket_relay() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("test listener should bind");
    let addr = listener.local_addr().expect("listener should expose local address");
    let hub = RoomHub::new();
    let router = build_router(hub.clone(), cors_layer(None));
    let server = tokio::spawn(async move {
        serve(listener, router, std::future::pending()).await.expect("relay should run");
    });

    let connector: Arc<dyn Connector> =
        Arc::new(WebSocketConnector::new(&format!("ws://{addr}")).expect("loopback ws url"));
    let store = MemoryDocumentStore::new().with_document("doc-ws", "over the wire");
    let open_ws = |name: &str| {
        RoomSession::open(
            "doc-ws",
            options(name),
            Arc::clone(&connector),
            Arc::new(store.clone()),
            Arc::new(CountingAnalysis::default()),
        )
    };

    let alice = open_ws("alice");
    timeout(WAIT, alice.wait_bootstrapped()).await.expect("in time").expect("ok");
    let bob = open_ws("bob");
    timeout(WAIT, bob.wait_bootstrapped()).await.expect("in time").expect("ok");
    wait_for_text(&bob, "over the wire").await;

    bob.insert(0, "sent ").expect("bob edits");
    wait_for_text(&alice, "sent over the wire").await;
    assert_eq!(hub.snapshot(&room_key("doc-ws")).await.as_deref(), Some("sent over the wire"));

    alice.close().await;
    bob.close().await;
    server.abort();
}
