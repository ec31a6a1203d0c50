//! HTTP implementation of the service contracts.
//!
//! All three services live under one base URL and speak JSON:
//! `POST /generate`, `/evaluate`, `/thinking-feedback` and `/ask`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::ServicesConfig;
use crate::error::{Result, ServiceErrorKind, SynapseError};
use crate::node::GeneratedContent;
use crate::services::{
    AskRequest, ContentService, Evaluation, EvaluationRequest, EvaluationService,
    GenerationRequest, ThinkingFeedback, ThinkingRequest, TutorAnswer, TutorService,
};

/// Why a call failed, before it is attributed to a service.
#[derive(Debug)]
enum CallError {
    Service(ServiceErrorKind, String),
    Malformed(String),
}

/// Maps an HTTP status to a service error kind.
#[must_use]
pub fn classify_status(status: StatusCode) -> ServiceErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ServiceErrorKind::Authentication,
        StatusCode::TOO_MANY_REQUESTS => ServiceErrorKind::RateLimit,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ServiceErrorKind::Timeout,
        s if s.is_server_error() => ServiceErrorKind::Server,
        _ => ServiceErrorKind::Other,
    }
}

fn classify_transport(error: &reqwest::Error) -> ServiceErrorKind {
    if error.is_timeout() {
        ServiceErrorKind::Timeout
    } else if error.is_connect() || error.is_request() {
        ServiceErrorKind::Network
    } else {
        ServiceErrorKind::Other
    }
}

/// Strips a surrounding Markdown code fence (with optional language tag).
///
/// ```
/// use synapse_engine::http_services::strip_code_fences;
///
/// assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
/// assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
/// ```
#[must_use]
pub fn strip_code_fences(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map_or("", |(_, after)| after);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Reqwest-backed client for the content, evaluation and tutor services.
#[derive(Debug, Clone)]
pub struct HttpServices {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpServices {
    /// Builds a client from the services configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigValidationError` if the HTTP client cannot be built.
    pub fn new(config: &ServicesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                SynapseError::config_validation(
                    format!("cannot build HTTP client: {e}"),
                    "Check the services section of your synapse.json",
                )
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key(),
        })
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> std::result::Result<Resp, CallError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallError::Service(classify_transport(&e), e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CallError::Service(classify_transport(&e), e.to_string()))?;

        if !status.is_success() {
            return Err(CallError::Service(
                classify_status(status),
                format!("{url} returned {status}: {}", text.trim()),
            ));
        }

        debug!(url = %url, bytes = text.len(), "Service responded");
        serde_json::from_str(strip_code_fences(&text))
            .map_err(|e| CallError::Malformed(format!("{url}: {e}")))
    }
}

#[async_trait]
impl ContentService for HttpServices {
    #[instrument(skip_all, fields(node_index = request.node_index))]
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent> {
        match self.post("/generate", request).await {
            Ok(content) => Ok(content),
            Err(CallError::Service(kind, message)) => Err(SynapseError::generation_failed(
                request.node_index,
                kind,
                message,
            )),
            Err(CallError::Malformed(message)) => Err(SynapseError::malformed("content", message)),
        }
    }
}

#[async_trait]
impl EvaluationService for HttpServices {
    #[instrument(skip_all, fields(recall_type = %request.recall_type))]
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation> {
        match self.post("/evaluate", request).await {
            Ok(evaluation) => Ok(evaluation),
            Err(CallError::Service(kind, message)) => {
                Err(SynapseError::evaluation_failed(kind, message))
            }
            Err(CallError::Malformed(message)) => {
                Err(SynapseError::malformed("evaluation", message))
            }
        }
    }
}

#[async_trait]
impl TutorService for HttpServices {
    #[instrument(skip_all)]
    async fn thinking_feedback(&self, request: &ThinkingRequest) -> Result<ThinkingFeedback> {
        self.post("/thinking-feedback", request)
            .await
            .map_err(tutor_error)
    }

    #[instrument(skip_all)]
    async fn answer(&self, request: &AskRequest) -> Result<TutorAnswer> {
        self.post("/ask", request).await.map_err(tutor_error)
    }
}

fn tutor_error(error: CallError) -> SynapseError {
    match error {
        CallError::Service(kind, message) => SynapseError::tutor_failed(kind, message),
        CallError::Malformed(message) => SynapseError::malformed("tutor", message),
    }
}
