//! Error types for the Synapse lesson engine.
//!
//! This module defines the error hierarchy for all engine operations,
//! including configuration loading, lesson parsing, content generation,
//! recall evaluation, progression transitions and state persistence.

use std::path::PathBuf;

/// A specialized `Result` type for Synapse engine operations.
pub type Result<T> = std::result::Result<T, SynapseError>;

/// Errors that can occur while running a lesson session.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible to help users resolve issues.
#[derive(Debug, thiserror::Error)]
pub enum SynapseError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your synapse.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Lesson Loading Errors
    // ========================================================================
    /// Lesson file was not found at the specified path.
    #[error("Lesson not found: '{path}'\n\nSuggestion: Check the 'lesson' field in synapse.json or pass the lesson path explicitly")]
    LessonNotFound {
        /// Path where the lesson was expected.
        path: PathBuf,
    },

    /// Lesson file exceeds the size limit.
    #[error("Lesson file exceeds size limit (256KB): '{path}' is {size_kb}KB\n\nSuggestion: Remove pre-generated content from the lesson file")]
    LessonTooLarge {
        /// Path to the oversized lesson.
        path: PathBuf,
        /// Actual size in kilobytes.
        size_kb: u64,
    },

    /// Lesson file contains non-UTF-8 content.
    #[error("Lesson has invalid encoding: '{path}'\n\nSuggestion: Convert the file to UTF-8 encoding")]
    LessonEncodingError {
        /// Path to the lesson with encoding issues.
        path: PathBuf,
    },

    /// Lesson file is not valid lesson JSON.
    #[error("Invalid lesson file '{path}': {message}\n\nSuggestion: Check the lesson JSON against the documented structure")]
    LessonParseError {
        /// Path to the lesson file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Lesson structure violates a node sequence invariant.
    #[error("Invalid lesson structure: {message}\n\nSuggestion: A lesson needs 5 to 25 nodes with unique ids and non-empty titles")]
    InvalidLessonStructure {
        /// Description of the violated invariant.
        message: String,
    },

    // ========================================================================
    // External Service Errors
    // ========================================================================
    /// Content generation for a node failed. The node stays pending and may be retried.
    #[error("Content generation failed for node {node_index} ({kind}): {message}\n\nSuggestion: {suggestion}")]
    ContentGenerationFailed {
        /// Position of the node whose generation failed.
        node_index: usize,
        /// The kind of service failure.
        kind: ServiceErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The recall evaluation round-trip failed. The task may be resubmitted.
    #[error("Recall evaluation failed ({kind}): {message}\n\nSuggestion: {suggestion}")]
    EvaluationFailed {
        /// The kind of service failure.
        kind: ServiceErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The tutor (thinking feedback or question answering) call failed.
    #[error("Tutor request failed ({kind}): {message}\n\nSuggestion: {suggestion}")]
    TutorFailed {
        /// The kind of service failure.
        kind: ServiceErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// A service answered with a body that could not be used.
    ///
    /// Treated exactly like a service failure: nothing from the body is applied.
    #[error("Malformed response from {service} service: {message}\n\nSuggestion: Retry the request; the service returned unusable output")]
    MalformedResponse {
        /// Which service produced the response.
        service: String,
        /// What was wrong with the response.
        message: String,
    },

    /// A node's content is not generated yet, so its teaching content cannot be shown.
    #[error("Content for node {node_index} is not ready yet\n\nSuggestion: Wait for generation to finish or retry generation for this node")]
    ContentNotReady {
        /// Position of the node that is still pending.
        node_index: usize,
    },

    // ========================================================================
    // Progression Errors
    // ========================================================================
    /// The recall queue was requested for a block the lesson does not contain.
    #[error("Recall cycle {cycle} needs nodes up to index {end_index}, but the lesson has {node_count} nodes")]
    RecallContractViolation {
        /// The requested cycle number.
        cycle: usize,
        /// The last node index the cycle needs.
        end_index: usize,
        /// Number of nodes in the lesson.
        node_count: usize,
    },

    /// The learner action is not valid in the current state.
    #[error("Cannot {action} while {state}")]
    InvalidAction {
        /// The attempted action.
        action: String,
        /// Description of the current state.
        state: String,
    },

    /// A learner request was rejected before reaching any service.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Why the request was rejected.
        message: String,
    },

    /// Invalid state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    // ========================================================================
    // State Persistence Errors
    // ========================================================================
    /// Persisted progression state is malformed or inconsistent with the lesson.
    #[error("Corrupted state file '{path}': {message}\n\nSuggestion: Remove the state file to restart the lesson, or restore from backup")]
    StateFileCorrupted {
        /// Path to the corrupted state file.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Categories of external service errors for structured error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// The request did not complete in time.
    Timeout,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl ServiceErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check the service API key configured in services.apiKeyEnv",
            Self::RateLimit => "Wait and retry, or reduce request frequency",
            Self::Server => "Retry later; the service may be experiencing issues",
            Self::Network => "Check your network connection and services.baseUrl",
            Self::Timeout => "Retry, or raise services.timeoutSeconds in synapse.json",
            Self::Other => "Check the service logs",
        }
    }

    /// Returns `true` if a failure of this kind is worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Authentication)
    }
}

impl SynapseError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `LessonNotFound` error.
    #[must_use]
    pub fn lesson_not_found(path: impl Into<PathBuf>) -> Self {
        Self::LessonNotFound { path: path.into() }
    }

    /// Creates a new `LessonTooLarge` error.
    #[must_use]
    pub fn lesson_too_large(path: impl Into<PathBuf>, size_kb: u64) -> Self {
        Self::LessonTooLarge {
            path: path.into(),
            size_kb,
        }
    }

    /// Creates a new `LessonEncodingError`.
    #[must_use]
    pub fn lesson_encoding(path: impl Into<PathBuf>) -> Self {
        Self::LessonEncodingError { path: path.into() }
    }

    /// Creates a new `LessonParseError`.
    #[must_use]
    pub fn lesson_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::LessonParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidLessonStructure` error.
    #[must_use]
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidLessonStructure {
            message: message.into(),
        }
    }

    /// Creates a new `ContentGenerationFailed` error with a suggestion based on the kind.
    #[must_use]
    pub fn generation_failed(
        node_index: usize,
        kind: ServiceErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::ContentGenerationFailed {
            node_index,
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `EvaluationFailed` error with a suggestion based on the kind.
    #[must_use]
    pub fn evaluation_failed(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self::EvaluationFailed {
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `TutorFailed` error with a suggestion based on the kind.
    #[must_use]
    pub fn tutor_failed(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self::TutorFailed {
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `MalformedResponse` error.
    #[must_use]
    pub fn malformed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ContentNotReady` error.
    #[must_use]
    pub const fn content_not_ready(node_index: usize) -> Self {
        Self::ContentNotReady { node_index }
    }

    /// Creates a new `InvalidAction` error.
    #[must_use]
    pub fn invalid_action(action: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::InvalidAction {
            action: action.into(),
            state: state.to_string(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `StateFileCorrupted` error.
    #[must_use]
    pub fn state_corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StateFileCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if this error is transient and the learner may retry.
    ///
    /// Transient errors leave the session state untouched.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::ContentGenerationFailed { kind, .. }
            | Self::EvaluationFailed { kind, .. }
            | Self::TutorFailed { kind, .. } => kind.is_retryable(),
            Self::MalformedResponse { .. } | Self::ContentNotReady { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this error is fatal and requires immediate termination.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::LessonNotFound { .. }
                | Self::LessonTooLarge { .. }
                | Self::LessonEncodingError { .. }
                | Self::LessonParseError { .. }
                | Self::InvalidLessonStructure { .. }
                | Self::ContentGenerationFailed {
                    kind: ServiceErrorKind::Authentication,
                    ..
                }
                | Self::EvaluationFailed {
                    kind: ServiceErrorKind::Authentication,
                    ..
                }
                | Self::TutorFailed {
                    kind: ServiceErrorKind::Authentication,
                    ..
                }
        )
    }

    /// Returns `true` if this error reports a programming error rather than
    /// a condition the learner can resolve.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::RecallContractViolation { .. }
                | Self::InvalidStateTransition { .. }
                | Self::StateFileCorrupted { .. }
        )
    }
}
