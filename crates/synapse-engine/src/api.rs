//! HTTP API for one lesson session.
//!
//! The presentation layer drives the lesson through these endpoints and
//! listens on `/ws` for events. Requests are serialized on the session
//! lock, so learner actions never overlap.
//!
//! # Endpoints
//!
//! - `GET /api/lesson` - Lesson outline with per-node content status
//! - `GET /api/progress` - Persisted-shape progression state
//! - `GET /api/presentation` - What the learner should see now
//! - `GET /api/mastery` - Mastery records so far
//! - `POST /api/continue` - Continue in teaching
//! - `POST /api/recall` - Submit a recall answer
//! - `POST /api/thinking` - Answer the thinking question
//! - `POST /api/ask` - Ask about the current node
//! - `POST /api/nodes/:index/generate` - Retry content generation
//! - `GET /ws` - Event stream
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use synapse_engine::{
//!     create_router, AppState, EventBroadcaster, HttpServices, JsonFileStore, Lesson,
//!     LessonProgressionController, Services, ServicesConfig, SessionSetup,
//! };
//!
//! # async fn example() -> synapse_engine::Result<()> {
//! let loaded = Lesson::load("lesson.json")?;
//! let services = HttpServices::new(&ServicesConfig::default())?;
//! let controller = LessonProgressionController::open(SessionSetup {
//!     lesson: loaded.lesson,
//!     content: loaded.content,
//!     state: None,
//!     services: Services::from_shared(Arc::new(services)),
//!     store: Arc::new(JsonFileStore::new(".synapse")),
//!     events: EventBroadcaster::default(),
//!     save_debounce: Duration::from_millis(500),
//! })
//! .await?;
//!
//! let router = create_router(AppState::new(controller));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::controller::{LessonProgressionController, RecallOutcome};
use crate::error::SynapseError;
use crate::events::{ws_handler, EventBroadcaster};
use crate::mastery::MasteryRecord;
use crate::node::{Difficulty, NodeStatus};
use crate::presentation::Presentation;
use crate::progression::ProgressionState;
use crate::services::{ThinkingFeedback, TutorAnswer};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /api/recall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallSubmission {
    /// The learner's answer.
    pub response: String,
    /// The blanked term being filled in, for fill-in-the-blank tasks.
    #[serde(default)]
    pub term: Option<String>,
}

/// Request body for `POST /api/thinking`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingSubmission {
    /// The learner's answer to the thinking question.
    pub response: String,
}

/// Request body for `POST /api/ask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskSubmission {
    /// The learner's question.
    pub question: String,
}

/// One node in the lesson outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineNode {
    /// Position in the lesson.
    pub index: usize,
    /// Node id.
    pub id: String,
    /// Node title.
    pub title: String,
    /// Assigned vocabulary.
    pub vocabulary_terms: Vec<String>,
    /// Whether content has been generated.
    pub status: NodeStatus,
}

/// Response body for `GET /api/lesson`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonOutline {
    /// Lesson id.
    pub id: String,
    /// Lesson topic.
    pub topic: String,
    /// Lesson subject.
    pub subject: String,
    /// Difficulty band.
    pub difficulty: Difficulty,
    /// Nodes in order.
    pub nodes: Vec<OutlineNode>,
}

/// Response body for `POST /api/nodes/:index/generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    /// The node.
    pub node_index: usize,
    /// Its status after the attempt.
    pub status: NodeStatus,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
    /// Whether the same request may succeed if retried.
    #[serde(default)]
    pub retryable: bool,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug)]
pub struct AppState {
    /// The lesson session. Holding the lock serializes learner actions.
    pub session: Mutex<LessonProgressionController>,
    /// The session's event stream, for WebSocket subscribers.
    pub events: EventBroadcaster,
}

impl AppState {
    /// Wraps an opened session.
    #[must_use]
    pub fn new(controller: LessonProgressionController) -> Self {
        let events = controller.events().clone();
        Self {
            session: Mutex::new(controller),
            events,
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
struct ApiError(SynapseError);

impl From<SynapseError> for ApiError {
    fn from(error: SynapseError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let retryable = error.is_transient();
        let status = match &error {
            _ if retryable => StatusCode::SERVICE_UNAVAILABLE,
            SynapseError::InvalidAction { .. } => StatusCode::CONFLICT,
            SynapseError::InvalidRequest { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SynapseError::ContentGenerationFailed { .. }
            | SynapseError::EvaluationFailed { .. }
            | SynapseError::TutorFailed { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %error, "Request failed with an internal error");
            "Internal error; the action was not applied".to_string()
        } else {
            warn!(status = status.as_u16(), error = %error, "Request failed");
            error.to_string()
        };

        let body = Json(ErrorResponse {
            error: message,
            retryable,
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints and the event stream.
///
/// The router carries CORS middleware allowing any origin and tracing
/// middleware for request logging.
pub fn create_router(state: AppState) -> Router {
    create_router_shared(Arc::new(state))
}

/// Like [`create_router`], for callers that keep a handle on the state.
pub fn create_router_shared(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/lesson", get(handle_lesson))
        .route("/progress", get(handle_progress))
        .route("/presentation", get(handle_presentation))
        .route("/mastery", get(handle_mastery))
        .route("/continue", post(handle_continue))
        .route("/recall", post(handle_recall))
        .route("/thinking", post(handle_thinking))
        .route("/ask", post(handle_ask))
        .route("/nodes/:index/generate", post(handle_generate));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /api/lesson`.
async fn handle_lesson(State(state): State<Arc<AppState>>) -> Json<LessonOutline> {
    let session = state.session.lock().await;
    let lesson = session.lesson();
    let statuses = session.gate().statuses().await;

    let nodes = lesson
        .nodes
        .iter()
        .zip(statuses)
        .map(|(node, status)| OutlineNode {
            index: node.position,
            id: node.id.clone(),
            title: node.title.clone(),
            vocabulary_terms: node.vocabulary_terms.clone(),
            status,
        })
        .collect();

    Json(LessonOutline {
        id: lesson.id.clone(),
        topic: lesson.topic.clone(),
        subject: lesson.subject.clone(),
        difficulty: lesson.difficulty,
        nodes,
    })
}

/// Handler for `GET /api/progress`.
async fn handle_progress(State(state): State<Arc<AppState>>) -> Json<ProgressionState> {
    Json(state.session.lock().await.state().clone())
}

/// Handler for `GET /api/presentation`.
async fn handle_presentation(State(state): State<Arc<AppState>>) -> Json<Presentation> {
    Json(state.session.lock().await.presentation().await)
}

/// Handler for `GET /api/mastery`.
async fn handle_mastery(State(state): State<Arc<AppState>>) -> Json<Vec<MasteryRecord>> {
    Json(state.session.lock().await.mastery().to_vec())
}

/// Handler for `POST /api/continue`.
async fn handle_continue(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Presentation>, ApiError> {
    let mut session = state.session.lock().await;
    let presentation = session.continue_lesson().await?;
    info!(
        phase = %presentation.phase,
        sub_phase = %presentation.sub_phase,
        node_index = presentation.node_index,
        "Continued"
    );
    Ok(Json(presentation))
}

/// Handler for `POST /api/recall`.
async fn handle_recall(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecallSubmission>,
) -> Result<Json<RecallOutcome>, ApiError> {
    info!(
        response_len = request.response.len(),
        term = request.term.as_deref().unwrap_or(""),
        "Received recall answer"
    );
    let mut session = state.session.lock().await;
    let outcome = session
        .submit_recall(&request.response, request.term.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// Handler for `POST /api/thinking`.
async fn handle_thinking(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ThinkingSubmission>,
) -> Result<Json<ThinkingFeedback>, ApiError> {
    let session = state.session.lock().await;
    Ok(Json(session.submit_thinking(&request.response).await?))
}

/// Handler for `POST /api/ask`.
async fn handle_ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskSubmission>,
) -> Result<Json<TutorAnswer>, ApiError> {
    let session = state.session.lock().await;
    Ok(Json(session.ask(&request.question).await?))
}

/// Handler for `POST /api/nodes/:index/generate`.
///
/// Waits for the generation without holding the session lock.
async fn handle_generate(
    State(state): State<Arc<AppState>>,
    Path(index): Path<usize>,
) -> Result<Json<GenerationStatus>, ApiError> {
    let gate = state.session.lock().await.gate().clone();
    info!(node_index = index, "Retrying content generation");
    let status = gate.retry(index).await?;
    Ok(Json(GenerationStatus {
        node_index: index,
        status,
    }))
}

// ============================================================================
// Tests
// ============================================================================
