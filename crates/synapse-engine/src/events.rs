//! Session events and their WebSocket stream.
//!
//! Every applied transition, evaluation and generation outcome is broadcast
//! as a [`LessonEvent`]. Clients connected to `/ws` receive a `connected`
//! snapshot first and then every event as JSON `{ "event", "payload" }`.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes current progress
//! - `sub_phase_changed` - Teaching moved within a node
//! - `node_entered` - Teaching moved to a new node
//! - `recall_started` - A recall cycle began, with its task list
//! - `recall_advanced` - The cycle moved to its next task
//! - `task_evaluated` - A recall answer was scored
//! - `recall_completed` - A cycle finished and teaching resumed
//! - `content_ready` / `content_failed` - Generation outcomes
//! - `lesson_complete` - The last node was finished
//! - `error` - Something went wrong that is not tied to a request

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::mastery::Grade;
use crate::progression::{ProgressionState, SubPhase};
use crate::recall_queue::{RecallTask, RecallType};

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// Lesson being served.
    pub lesson_id: String,
    /// Current progression state.
    pub state: ProgressionState,
}

/// Payload for the `sub_phase_changed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubPhasePayload {
    /// Node being taught.
    pub node_index: usize,
    /// New sub-phase.
    pub sub_phase: SubPhase,
}

/// Payload for the `node_entered` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEnteredPayload {
    /// Node now being taught.
    pub node_index: usize,
    /// Its id.
    pub node_id: String,
    /// Its title.
    pub title: String,
}

/// Payload for the `recall_started` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallStartedPayload {
    /// Cycle number.
    pub cycle: usize,
    /// Whether the cycle is the lesson's last.
    pub is_final: bool,
    /// The cycle's tasks, in order.
    pub tasks: Vec<RecallTask>,
}

/// Payload for the `recall_advanced` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallAdvancedPayload {
    /// Cycle number.
    pub cycle: usize,
    /// New recall step.
    pub step: u8,
    /// The task now presented.
    pub task: RecallTask,
}

/// Payload for the `task_evaluated` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvaluatedPayload {
    /// Cycle number.
    pub cycle: usize,
    /// Node that was reconstructed.
    pub node_index: usize,
    /// Recall variant.
    pub recall_type: RecallType,
    /// Term answered, for partial recall.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    /// Score in [0, 1].
    pub score: f64,
    /// Letter grade.
    pub grade: Grade,
    /// Evaluator feedback.
    pub feedback: String,
    /// Whether the task is finished and the cycle moved on.
    pub task_resolved: bool,
}

/// Payload for the `recall_completed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallCompletedPayload {
    /// Finished cycle.
    pub cycle: usize,
    /// Total finished cycles.
    pub completed_cycles: usize,
    /// Node teaching resumed on.
    pub resume_index: usize,
}

/// Payload for the `content_ready` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentReadyPayload {
    /// Node whose content is now available.
    pub node_index: usize,
}

/// Payload for the `content_failed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFailedPayload {
    /// Node that is still pending.
    pub node_index: usize,
    /// What went wrong.
    pub message: String,
    /// Whether retrying may help.
    pub retryable: bool,
}

/// Payload for the `lesson_complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonCompletePayload {
    /// Total finished cycles.
    pub completed_cycles: usize,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events published by a lesson session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum LessonEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// Teaching moved within a node.
    SubPhaseChanged(SubPhasePayload),
    /// Teaching moved to a new node.
    NodeEntered(NodeEnteredPayload),
    /// A recall cycle began.
    RecallStarted(RecallStartedPayload),
    /// The cycle moved to its next task.
    RecallAdvanced(RecallAdvancedPayload),
    /// A recall answer was scored.
    TaskEvaluated(TaskEvaluatedPayload),
    /// A cycle finished.
    RecallCompleted(RecallCompletedPayload),
    /// A node's content was generated.
    ContentReady(ContentReadyPayload),
    /// A node's generation failed.
    ContentFailed(ContentFailedPayload),
    /// The lesson finished.
    LessonComplete(LessonCompletePayload),
    /// An error not tied to a request.
    Error(ErrorPayload),
}

impl LessonEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub fn connected(lesson_id: impl Into<String>, state: ProgressionState) -> Self {
        Self::Connected(ConnectedPayload {
            lesson_id: lesson_id.into(),
            state,
        })
    }

    /// Creates a `ContentReady` event.
    #[must_use]
    pub const fn content_ready(node_index: usize) -> Self {
        Self::ContentReady(ContentReadyPayload { node_index })
    }

    /// Creates a `ContentFailed` event.
    #[must_use]
    pub fn content_failed(node_index: usize, message: impl Into<String>, retryable: bool) -> Self {
        Self::ContentFailed(ContentFailedPayload {
            node_index,
            message: message.into(),
            retryable,
        })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::SubPhaseChanged(_) => "sub_phase_changed",
            Self::NodeEntered(_) => "node_entered",
            Self::RecallStarted(_) => "recall_started",
            Self::RecallAdvanced(_) => "recall_advanced",
            Self::TaskEvaluated(_) => "task_evaluated",
            Self::RecallCompleted(_) => "recall_completed",
            Self::ContentReady(_) => "content_ready",
            Self::ContentFailed(_) => "content_failed",
            Self::LessonComplete(_) => "lesson_complete",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts session events to all subscribers.
///
/// Events are not persisted for disconnected clients.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<LessonEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster whose subscribers buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind receives a `Lagged` error and misses events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LessonEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning how many subscribers will receive it.
    pub fn send(&self, event: LessonEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Heartbeat ping interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Streams events to one client until it leaves or stops answering pings.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before taking the snapshot so no transition falls in between.
    let mut event_receiver = state.events.subscribe();

    let connected_event = {
        let session = state.session.lock().await;
        LessonEvent::connected(session.lesson().id.clone(), session.state().clone())
    };
    let connected_json = match serde_json::to_string(&connected_event) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize connected event");
            return;
        }
    };

    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    info!("WebSocket client connected, sent progress snapshot");

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately.
    heartbeat.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring message from client");
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(lesson_event) => {
                        let json = match serde_json::to_string(&lesson_event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!(error = %e, event = lesson_event.event_name(), "Failed to serialize event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Client lagged behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!(missed = MAX_MISSED_PONGS, "Client stopped answering pings, closing connection");
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
