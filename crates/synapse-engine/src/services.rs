//! Contracts of the external content, evaluation and tutor services.
//!
//! The engine never generates or grades text itself. It talks to three
//! services through these traits; [`crate::http_services::HttpServices`]
//! implements all of them over HTTP and tests substitute in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mastery::Grade;
use crate::node::{GeneratedContent, Lesson};
use crate::recall_queue::{RecallTask, RecallType};

// ============================================================================
// Content Generation
// ============================================================================

/// Everything the content service needs to write one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Lesson topic.
    pub topic: String,
    /// Lesson subject.
    pub subject: String,
    /// Position of the node.
    pub node_index: usize,
    /// Id of the node.
    pub node_id: String,
    /// Title of the node.
    pub title: String,
    /// Vocabulary the content must define.
    pub vocabulary_terms: Vec<String>,
    /// Optional metadata hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_hint: Option<String>,
    /// Title of the preceding node, for continuity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_title: Option<String>,
    /// Title of the following node, for continuity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_title: Option<String>,
    /// Whether this is the last node; its thinking question wraps up the lesson.
    pub is_final_node: bool,
}

impl GenerationRequest {
    /// Builds the request for the node at `index`, or `None` if out of range.
    #[must_use]
    pub fn for_node(lesson: &Lesson, index: usize) -> Option<Self> {
        let node = lesson.nodes.get(index)?;
        let title_at = |i: usize| lesson.nodes.get(i).map(|n| n.title.clone());
        Some(Self {
            topic: lesson.topic.clone(),
            subject: lesson.subject.clone(),
            node_index: index,
            node_id: node.id.clone(),
            title: node.title.clone(),
            vocabulary_terms: node.vocabulary_terms.clone(),
            metadata_hint: node.metadata_hint.clone(),
            previous_title: index.checked_sub(1).and_then(title_at),
            next_title: title_at(index + 1),
            is_final_node: index == lesson.nodes.last_index(),
        })
    }
}

/// Produces teaching content for a node.
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Generates the content of one node.
    ///
    /// Failures are reported as `ContentGenerationFailed` or
    /// `MalformedResponse`; the caller leaves the node pending.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent>;
}

// ============================================================================
// Recall Evaluation
// ============================================================================

/// A learner's answer to one recall task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    /// Recall variant.
    pub recall_type: RecallType,
    /// Id of the node being reconstructed.
    pub target_node_id: String,
    /// What the learner wrote.
    pub learner_response: String,
    /// Context nodes that were visible.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hint_node_ids: Vec<String>,
    /// The blanked term being answered, for partial recall.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    /// Cycle in which the task runs.
    pub cycle_number: usize,
    /// The node's summary, when generated, so the evaluator can compare.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_summary: Option<String>,
}

impl EvaluationRequest {
    /// Builds the request for a task.
    #[must_use]
    pub fn for_task(
        task: &RecallTask,
        cycle: usize,
        response: impl Into<String>,
        term: Option<String>,
        reference_summary: Option<String>,
    ) -> Self {
        Self {
            recall_type: task.recall_type,
            target_node_id: task.node_id.clone(),
            learner_response: response.into(),
            hint_node_ids: task.hint_node_ids.clone(),
            term,
            cycle_number: cycle,
            reference_summary,
        }
    }
}

/// The evaluator's verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// Score in [0, 1].
    pub mastery_score: f64,
    /// Letter grade.
    pub grade: Grade,
    /// Explanation for the learner.
    #[serde(default)]
    pub feedback: String,
}

impl Evaluation {
    /// Checks that the score is a number in [0, 1].
    ///
    /// # Errors
    ///
    /// Returns a description of the problem.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.mastery_score.is_finite() && (0.0..=1.0).contains(&self.mastery_score) {
            Ok(())
        } else {
            Err(format!(
                "masteryScore {} is outside [0, 1]",
                self.mastery_score
            ))
        }
    }
}

/// Scores recall answers.
#[async_trait]
pub trait EvaluationService: Send + Sync {
    /// Evaluates one answer.
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation>;
}

// ============================================================================
// Tutor
// ============================================================================

/// A learner's answer to a node's thinking question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingRequest {
    /// Id of the node.
    pub node_id: String,
    /// The question that was asked.
    pub thinking_question: String,
    /// What the learner wrote.
    pub learner_response: String,
}

/// A free-form learner question about the node on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    /// Lesson topic.
    pub topic: String,
    /// Id of the node.
    pub node_id: String,
    /// Title of the node.
    pub title: String,
    /// The node's summary, as context.
    pub summary: String,
    /// The learner's question.
    pub question: String,
}

/// Feedback on a thinking-question answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingFeedback {
    /// Feedback text.
    pub feedback: String,
}

/// Answer to a learner question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorAnswer {
    /// Answer text.
    pub answer: String,
}

/// Informational tutoring. Never affects progression.
#[async_trait]
pub trait TutorService: Send + Sync {
    /// Comments on a thinking-question answer.
    async fn thinking_feedback(&self, request: &ThinkingRequest) -> Result<ThinkingFeedback>;

    /// Answers a question about the current node.
    async fn answer(&self, request: &AskRequest) -> Result<TutorAnswer>;
}

// ============================================================================
// Bundle
// ============================================================================

/// The three services a session uses.
#[derive(Clone)]
pub struct Services {
    /// Content generation.
    pub content: Arc<dyn ContentService>,
    /// Recall evaluation.
    pub evaluation: Arc<dyn EvaluationService>,
    /// Thinking feedback and questions.
    pub tutor: Arc<dyn TutorService>,
}

impl Services {
    /// Uses one implementation for all three services.
    pub fn from_shared<T>(service: Arc<T>) -> Self
    where
        T: ContentService + EvaluationService + TutorService + 'static,
    {
        Self {
            content: service.clone(),
            evaluation: service.clone(),
            tutor: service,
        }
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services").finish_non_exhaustive()
    }
}
