//! Synapse Lesson Reports
//!
//! Turns a lesson's nodes and recall attempts into mastery metrics, then
//! renders them as JSON for programmatic access or Markdown for the learner.
//!
//! The crate does not depend on the engine: callers fill a [`ReportInput`]
//! with plain strings and numbers.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use synapse_report::{AttemptInput, LessonReport, NodeInput, ReportInput, ReportStatus};
//!
//! let input = ReportInput {
//!     topic: "Photosynthesis".to_string(),
//!     difficulty: "beginner".to_string(),
//!     status: ReportStatus::Completed,
//!     completed_cycles: 1,
//!     completed_at: Some(Utc::now()),
//!     generated_at: Utc::now(),
//!     nodes: vec![NodeInput::new("light", "Light reactions")],
//!     attempts: vec![AttemptInput {
//!         node_id: "light".to_string(),
//!         recall_type: "partial".to_string(),
//!         term: Some("photon".to_string()),
//!         response: "photon".to_string(),
//!         score: 0.9,
//!         grade: "A-".to_string(),
//!         cycle: 1,
//!         attempted_at: Utc::now(),
//!     }],
//! };
//!
//! let report = LessonReport::build(&input).unwrap();
//! assert_eq!(report.summary.total_attempts, 1);
//! assert!(report.weak_nodes.is_empty());
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean score below which a node or term is flagged for review.
pub const REVIEW_THRESHOLD: f64 = 0.7;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Inputs
// ============================================================================

/// Whether the lesson was finished when the report was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// The learner stopped before the last node.
    #[default]
    InProgress,
    /// Every node was taught.
    Completed,
}

impl ReportStatus {
    /// Returns a human-readable description of the status.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::InProgress => "In progress",
            Self::Completed => "Completed",
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// A term and its definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyItem {
    /// The term.
    pub term: String,
    /// What it means.
    pub definition: String,
}

/// One lesson node as it should appear in the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInput {
    /// Node id, referenced by attempts.
    pub id: String,
    /// Node title.
    pub title: String,
    /// Generated summary, if the node was generated.
    pub summary: Option<String>,
    /// Key terms.
    pub vocabulary: Vec<VocabularyItem>,
    /// Reflection question.
    pub thinking_question: Option<String>,
}

impl NodeInput {
    /// A node with no generated content.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Self::default()
        }
    }
}

/// One evaluated recall attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptInput {
    /// Node that was reconstructed.
    pub node_id: String,
    /// Recall variant, as its wire name.
    pub recall_type: String,
    /// Term answered, for fill-in-the-blank attempts.
    pub term: Option<String>,
    /// What the learner wrote.
    pub response: String,
    /// Score in [0, 1].
    pub score: f64,
    /// Letter grade.
    pub grade: String,
    /// Cycle the attempt belongs to.
    pub cycle: usize,
    /// When it was evaluated.
    pub attempted_at: DateTime<Utc>,
}

impl AttemptInput {
    fn is_partial(&self) -> bool {
        self.recall_type == "partial"
    }
}

/// Everything a report is computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportInput {
    /// Lesson topic.
    pub topic: String,
    /// Difficulty band.
    pub difficulty: String,
    /// Whether the lesson was finished.
    pub status: ReportStatus,
    /// Recall cycles finished.
    pub completed_cycles: usize,
    /// When the lesson was finished, if it was.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the report is written.
    pub generated_at: DateTime<Utc>,
    /// Nodes in lesson order.
    pub nodes: Vec<NodeInput>,
    /// Attempts, oldest first.
    pub attempts: Vec<AttemptInput>,
}

// ============================================================================
// Report
// ============================================================================

/// Headline numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Nodes in the lesson.
    pub total_nodes: usize,
    /// Recall cycles finished.
    pub completed_cycles: usize,
    /// Attempts evaluated.
    pub total_attempts: usize,
    /// Mean grade points over attempts with a known grade.
    pub average_grade_points: Option<f64>,
    /// Mean score over all attempts.
    pub average_score: Option<f64>,
    /// Mean score over fill-in-the-blank attempts.
    pub vocabulary_mastery: Option<f64>,
}

/// Per-node content and performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Position in the lesson.
    pub index: usize,
    /// Node id.
    pub id: String,
    /// Node title.
    pub title: String,
    /// Generated summary.
    pub summary: Option<String>,
    /// Key terms.
    pub vocabulary: Vec<VocabularyItem>,
    /// Reflection question.
    pub thinking_question: Option<String>,
    /// Attempts on this node.
    pub attempts: usize,
    /// Mean score of those attempts.
    pub average_score: Option<f64>,
}

/// A node whose mean score is below [`REVIEW_THRESHOLD`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeakNode {
    /// Node id.
    pub id: String,
    /// Node title.
    pub title: String,
    /// Mean score.
    pub average_score: f64,
}

/// Attempts of one recall cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleBreakdown {
    /// Cycle number.
    pub cycle: usize,
    /// Attempts in the cycle.
    pub attempts: usize,
    /// Mean score.
    pub average_score: f64,
    /// Time of the first attempt.
    pub started_at: DateTime<Utc>,
}

/// A fill-in-the-blank term answered below [`REVIEW_THRESHOLD`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyReview {
    /// The term.
    pub term: String,
    /// Node it belongs to.
    pub node_id: String,
    /// Score of the attempt.
    pub score: f64,
}

/// Complete lesson report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonReport {
    /// Lesson topic.
    pub topic: String,
    /// Difficulty band.
    pub difficulty: String,
    /// Whether the lesson was finished.
    pub status: ReportStatus,
    /// When the lesson was finished, if it was.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the report was written.
    pub generated_at: DateTime<Utc>,
    /// Headline numbers.
    pub summary: ReportSummary,
    /// Nodes in lesson order.
    pub nodes: Vec<NodeReport>,
    /// Nodes to revisit, weakest first.
    pub weak_nodes: Vec<WeakNode>,
    /// Per-cycle numbers, in cycle order.
    pub cycles: Vec<CycleBreakdown>,
    /// Terms to revisit, in attempt order.
    pub vocabulary_to_review: Vec<VocabularyReview>,
}

impl LessonReport {
    /// Computes the report.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if an attempt names an unknown node
    /// or carries a score outside [0, 1].
    pub fn build(input: &ReportInput) -> Result<Self> {
        let positions: BTreeMap<&str, usize> = input
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.as_str(), i))
            .collect();

        let mut per_node: Vec<Vec<f64>> = vec![Vec::new(); input.nodes.len()];
        for attempt in &input.attempts {
            if !(0.0..=1.0).contains(&attempt.score) {
                return Err(ReportError::InvalidData(format!(
                    "attempt on '{}' has score {} outside [0, 1]",
                    attempt.node_id, attempt.score
                )));
            }
            let Some(&position) = positions.get(attempt.node_id.as_str()) else {
                return Err(ReportError::InvalidData(format!(
                    "attempt references unknown node '{}'",
                    attempt.node_id
                )));
            };
            per_node[position].push(attempt.score);
        }

        let nodes: Vec<NodeReport> = input
            .nodes
            .iter()
            .zip(&per_node)
            .enumerate()
            .map(|(index, (node, scores))| NodeReport {
                index,
                id: node.id.clone(),
                title: node.title.clone(),
                summary: node.summary.clone(),
                vocabulary: node.vocabulary.clone(),
                thinking_question: node.thinking_question.clone(),
                attempts: scores.len(),
                average_score: mean(scores.iter().copied()),
            })
            .collect();

        let mut weak_nodes: Vec<WeakNode> = nodes
            .iter()
            .filter_map(|node| {
                let average_score = node.average_score?;
                (average_score < REVIEW_THRESHOLD).then(|| WeakNode {
                    id: node.id.clone(),
                    title: node.title.clone(),
                    average_score,
                })
            })
            .collect();
        weak_nodes.sort_by(|a, b| a.average_score.total_cmp(&b.average_score));

        let summary = ReportSummary {
            total_nodes: input.nodes.len(),
            completed_cycles: input.completed_cycles,
            total_attempts: input.attempts.len(),
            average_grade_points: mean(input.attempts.iter().filter_map(|a| grade_points(&a.grade))),
            average_score: mean(input.attempts.iter().map(|a| a.score)),
            vocabulary_mastery: mean(
                input
                    .attempts
                    .iter()
                    .filter(|a| a.is_partial())
                    .map(|a| a.score),
            ),
        };

        let vocabulary_to_review = input
            .attempts
            .iter()
            .filter(|a| a.is_partial() && a.score < REVIEW_THRESHOLD)
            .filter_map(|a| {
                Some(VocabularyReview {
                    term: a.term.clone()?,
                    node_id: a.node_id.clone(),
                    score: a.score,
                })
            })
            .collect();

        Ok(Self {
            topic: input.topic.clone(),
            difficulty: input.difficulty.clone(),
            status: input.status,
            completed_at: input.completed_at,
            generated_at: input.generated_at,
            summary,
            nodes,
            weak_nodes,
            cycles: cycle_breakdown(&input.attempts),
            vocabulary_to_review,
        })
    }
}

fn cycle_breakdown(attempts: &[AttemptInput]) -> Vec<CycleBreakdown> {
    let mut by_cycle: BTreeMap<usize, Vec<&AttemptInput>> = BTreeMap::new();
    for attempt in attempts {
        by_cycle.entry(attempt.cycle).or_default().push(attempt);
    }

    by_cycle
        .into_iter()
        .filter_map(|(cycle, attempts)| {
            Some(CycleBreakdown {
                cycle,
                attempts: attempts.len(),
                average_score: mean(attempts.iter().map(|a| a.score))?,
                started_at: attempts.iter().map(|a| a.attempted_at).min()?,
            })
        })
        .collect()
}

/// Grade points of a letter grade on the 4.3 scale, case-insensitive.
///
/// ```
/// assert_eq!(synapse_report::grade_points("b+"), Some(3.3));
/// assert_eq!(synapse_report::grade_points("Z"), None);
/// ```
#[must_use]
pub fn grade_points(grade: &str) -> Option<f64> {
    let points = match grade.trim().to_uppercase().as_str() {
        "A+" => 4.3,
        "A" => 4.0,
        "A-" => 3.7,
        "B+" => 3.3,
        "B" => 3.0,
        "B-" => 2.7,
        "C+" => 2.3,
        "C" => 2.0,
        "C-" => 1.7,
        "D" => 1.0,
        "F" => 0.0,
        _ => return None,
    };
    Some(points)
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}
