//! Integration tests for the session HTTP API and WebSocket event stream.
//!
//! Each test serves the real router on an ephemeral port and talks to it
//! with `reqwest` and `tokio-tungstenite`.

mod common;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{open_session, FakeServices};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use synapse_engine::{create_router, AppState, LessonEvent, MemoryStore, Phase, SubPhase};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running test server.
struct TestServer {
    addr: SocketAddr,
    services: Arc<FakeServices>,
    client: reqwest::Client,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let services = FakeServices::new();
        let controller =
            open_session(Arc::clone(&services), Arc::new(MemoryStore::new()), None).await;
        let router = create_router(AppState::new(controller));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });

        Self {
            addr,
            services,
            client: reqwest::Client::new(),
            _handle: handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}/api{path}", self.addr)
    }

    async fn get(&self, path: &str) -> Value {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Request failed");
        assert!(response.status().is_success(), "GET {path}: {}", response.status());
        response.json().await.expect("Invalid JSON")
    }

    async fn post(&self, path: &str, body: &Value) -> (u16, Value) {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Request failed");
        let status = response.status().as_u16();
        (status, response.json().await.expect("Invalid JSON"))
    }

    async fn connect(&self) -> WsClient {
        let (ws_stream, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("Failed to connect to WebSocket");
        ws_stream
    }
}

/// Receives the next event, answering pings on the way.
async fn receive_event(client: &mut WsClient) -> LessonEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Builds the recall request for the presented task.
fn recall_body(presentation: &Value) -> Value {
    let task = &presentation["task"];
    let resolved: Vec<&str> = task["resolvedTerms"]
        .as_array()
        .map(|terms| terms.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let term = task["cloze"]["blankedTerms"]
        .as_array()
        .and_then(|terms| {
            terms
                .iter()
                .filter_map(Value::as_str)
                .find(|t| !resolved.contains(t))
        });

    match term {
        Some(term) => json!({ "response": term, "term": term }),
        None => json!({ "response": "It carries water back to the sky." }),
    }
}

// ============================================================================
// Read-Only Endpoints
// ============================================================================

#[tokio::test]
async fn test_lesson_outline() {
    let server = TestServer::start().await;
    let outline = server.get("/lesson").await;

    assert_eq!(outline["id"], "water-cycle");
    assert_eq!(outline["difficulty"], "beginner");
    let nodes = outline["nodes"].as_array().expect("nodes array");
    assert_eq!(nodes.len(), 6);
    assert_eq!(nodes[2]["title"], "Precipitation");
    assert!(nodes.iter().all(|n| n["status"] == "COMPLETE"));
}

#[tokio::test]
async fn test_initial_progress_and_presentation() {
    let server = TestServer::start().await;

    let progress = server.get("/progress").await;
    assert_eq!(progress["currentNodeIndex"], 0);
    assert_eq!(progress["currentPhase"], "teaching");
    assert_eq!(progress["recallCycle"], 0);

    let presentation = server.get("/presentation").await;
    assert_eq!(presentation["nodeTitle"], "Evaporation");
    assert_eq!(presentation["subPhase"], "content");
    assert!(presentation["content"]["summary"]
        .as_str()
        .is_some_and(|s| s.contains("evaporation")));
}

// ============================================================================
// Learner Actions
// ============================================================================

#[tokio::test]
async fn test_walkthrough_over_http() {
    let server = TestServer::start().await;
    let mut presentation = server.get("/presentation").await;
    let mut requests = 0;

    while presentation["phase"] != "complete" {
        requests += 1;
        assert!(requests < 200, "Lesson did not complete");

        let (status, body) = if presentation["phase"] == "recall" {
            // Content of the node being recalled is withheld.
            assert!(presentation.get("content").is_none());
            let (status, outcome) = server.post("/recall", &recall_body(&presentation)).await;
            (status, outcome["presentation"].clone())
        } else {
            server.post("/continue", &json!({})).await
        };
        assert_eq!(status, 200, "Unexpected response: {body}");
        presentation = body;
    }

    assert_eq!(presentation["completedCycles"], 2);
    let mastery = server.get("/mastery").await;
    assert_eq!(mastery.as_array().map(Vec::len), Some(10));
    assert_eq!(server.services.evaluations.load(Ordering::SeqCst), 10);

    let (status, body) = server.post("/continue", &json!({})).await;
    assert_eq!(status, 409);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_recall_during_teaching_is_conflict() {
    let server = TestServer::start().await;
    let (status, body) = server
        .post("/recall", &json!({ "response": "too early" }))
        .await;

    assert_eq!(status, 409);
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
}

#[tokio::test]
async fn test_evaluation_outage_is_retryable() {
    let server = TestServer::start().await;
    let mut presentation = server.get("/presentation").await;
    while presentation["phase"] != "recall" {
        let (_, body) = server.post("/continue", &json!({})).await;
        presentation = body;
    }
    let progress_before = server.get("/progress").await;

    server.services.fail_evaluation.store(true, Ordering::SeqCst);
    let (status, body) = server.post("/recall", &recall_body(&presentation)).await;
    assert_eq!(status, 503);
    assert_eq!(body["retryable"], true);
    assert_eq!(server.get("/progress").await, progress_before);

    server.services.fail_evaluation.store(false, Ordering::SeqCst);
    let (status, outcome) = server.post("/recall", &recall_body(&presentation)).await;
    assert_eq!(status, 200);
    assert_eq!(outcome["evaluation"]["grade"], "B+");
}

#[tokio::test]
async fn test_tutor_endpoints() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/ask", &json!({ "question": "Why is the sea salty?" }))
        .await;
    assert_eq!(status, 200);
    assert!(body["answer"].as_str().is_some_and(|a| a.contains("Evaporation")));

    let (status, _) = server
        .post("/thinking", &json!({ "response": "The sun is hotter" }))
        .await;
    assert_eq!(status, 409);

    server.post("/continue", &json!({})).await;
    let (status, body) = server
        .post("/thinking", &json!({ "response": "The sun is hotter" }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["feedback"], "Good thought on evaporation");
}

#[tokio::test]
async fn test_generate_unknown_node_is_unprocessable() {
    let server = TestServer::start().await;
    let (status, _) = server.post("/nodes/42/generate", &json!({})).await;
    assert_eq!(status, 422);

    let (status, body) = server.post("/nodes/3/generate", &json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "COMPLETE");
}

// ============================================================================
// WebSocket
// ============================================================================

#[tokio::test]
async fn test_client_receives_connected_event() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    match receive_event(&mut client).await {
        LessonEvent::Connected(payload) => {
            assert_eq!(payload.lesson_id, "water-cycle");
            assert_eq!(payload.state.current_phase, Phase::Teaching);
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_transitions_are_broadcast_to_all_clients() {
    let server = TestServer::start().await;
    let mut first = server.connect().await;
    let mut second = server.connect().await;
    receive_event(&mut first).await;
    receive_event(&mut second).await;

    server.post("/continue", &json!({})).await;
    server.post("/continue", &json!({})).await;

    for client in [&mut first, &mut second] {
        match receive_event(client).await {
            LessonEvent::SubPhaseChanged(payload) => {
                assert_eq!(payload.node_index, 0);
                assert_eq!(payload.sub_phase, SubPhase::Question);
            }
            other => panic!("Expected SubPhaseChanged, got: {other:?}"),
        }
        match receive_event(client).await {
            LessonEvent::NodeEntered(payload) => {
                assert_eq!(payload.node_index, 1);
                assert_eq!(payload.node_id, "condensation");
            }
            other => panic!("Expected NodeEntered, got: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_recall_cycle_events() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;
    receive_event(&mut client).await;

    let mut presentation = server.get("/presentation").await;
    while presentation["phase"] != "recall" {
        let (_, body) = server.post("/continue", &json!({})).await;
        presentation = body;
    }

    let started = loop {
        if let LessonEvent::RecallStarted(payload) = receive_event(&mut client).await {
            break payload;
        }
    };
    assert_eq!(started.cycle, 1);
    assert!(!started.is_final);
    assert_eq!(started.tasks.len(), 3);

    let (status, _) = server.post("/recall", &recall_body(&presentation)).await;
    assert_eq!(status, 200);

    match receive_event(&mut client).await {
        LessonEvent::TaskEvaluated(payload) => {
            assert_eq!(payload.node_index, 1);
            assert_eq!(payload.term.as_deref(), Some("condensation"));
            assert!(!payload.task_resolved);
        }
        other => panic!("Expected TaskEvaluated, got: {other:?}"),
    }
}
