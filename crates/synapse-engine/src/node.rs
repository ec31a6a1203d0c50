//! Knowledge nodes, the immutable node sequence and lesson loading.
//!
//! A lesson is a fixed chain of 5 to 25 knowledge nodes. The structure
//! (ids, titles, vocabulary terms) is decided once and never mutated; only a
//! node's generated content moves from [`NodeContent::Pending`] to
//! [`NodeContent::Complete`], and that transition is owned by the readiness
//! gate.

use std::collections::{BTreeMap, HashSet};
use std::ops::RangeInclusive;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SynapseError};

/// Maximum allowed lesson file size in bytes (256KB).
pub const MAX_LESSON_SIZE: u64 = 256 * 1024;

/// Fewest nodes a lesson may have.
pub const MIN_NODES: usize = 5;

/// Most nodes a lesson may have.
pub const MAX_NODES: usize = 25;

// ============================================================================
// Difficulty
// ============================================================================

/// Lesson difficulty, chosen when the structure is generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Difficulty {
    /// Short introductory lessons.
    Beginner,
    /// The default middle band.
    #[default]
    Intermediate,
    /// Long, dense lessons.
    Advanced,
}

impl Difficulty {
    /// The advisory node-count band for this difficulty.
    #[must_use]
    pub const fn node_range(self) -> RangeInclusive<usize> {
        match self {
            Self::Beginner => 5..=8,
            Self::Intermediate => 10..=15,
            Self::Advanced => 18..=25,
        }
    }

    /// Returns the lowercase name of the difficulty.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Beginner => "beginner",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
        }
    }

    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "beginner" => Some(Self::Beginner),
            "intermediate" => Some(Self::Intermediate),
            "advanced" => Some(Self::Advanced),
            _ => None,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid difficulty '{s}': expected one of 'beginner', 'intermediate', 'advanced'"
            ))
        })
    }
}

impl Serialize for Difficulty {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Generated Content
// ============================================================================

/// A vocabulary term with its generated definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    /// The term as it appears in the node.
    pub term: String,
    /// Definition produced by the content service.
    pub definition: String,
}

/// Teaching content produced for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedContent {
    /// Body text of the node.
    pub summary: String,
    /// Definitions for the node's vocabulary.
    #[serde(default)]
    pub vocabulary: Vec<VocabularyEntry>,
    /// Reflection question shown in the `question` sub-phase.
    pub thinking_question: String,
    /// Free-form presentation metadata (badge, location, key figure...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl GeneratedContent {
    /// Checks that the content can be shown to a learner.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing field.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.summary.trim().is_empty() {
            return Err("summary is empty".to_string());
        }
        if self.thinking_question.trim().is_empty() {
            return Err("thinkingQuestion is empty".to_string());
        }
        if let Some(entry) = self.vocabulary.iter().find(|v| v.term.trim().is_empty()) {
            return Err(format!(
                "vocabulary entry with definition '{}' has an empty term",
                entry.definition
            ));
        }
        Ok(())
    }
}

/// Whether a node's content has been generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Content has not been generated yet.
    PendingContent,
    /// Content is available.
    Complete,
}

/// Content slot of a node: either still pending or generated once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NodeContent {
    /// Not generated yet.
    #[default]
    Pending,
    /// Generated and immutable from now on.
    Complete(GeneratedContent),
}

impl NodeContent {
    /// The status corresponding to this slot.
    #[must_use]
    pub const fn status(&self) -> NodeStatus {
        match self {
            Self::Pending => NodeStatus::PendingContent,
            Self::Complete(_) => NodeStatus::Complete,
        }
    }

    /// Returns `true` once content has been generated.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Borrows the generated content, if any.
    #[must_use]
    pub const fn as_complete(&self) -> Option<&GeneratedContent> {
        match self {
            Self::Pending => None,
            Self::Complete(content) => Some(content),
        }
    }
}

// ============================================================================
// Knowledge Nodes
// ============================================================================

/// Structure of one node as produced by structure generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Stable identifier.
    pub id: String,
    /// Node title.
    pub title: String,
    /// Vocabulary terms fixed before content generation.
    #[serde(default)]
    pub vocabulary_terms: Vec<String>,
    /// Optional hint for the metadata the content service should produce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_hint: Option<String>,
}

impl NodeSpec {
    /// Creates a node spec with no vocabulary.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            vocabulary_terms: Vec::new(),
            metadata_hint: None,
        }
    }

    /// Sets the vocabulary terms.
    #[must_use]
    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vocabulary_terms = terms.into_iter().map(Into::into).collect();
        self
    }
}

/// One teaching unit at a fixed position in the lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeNode {
    /// Stable identifier.
    pub id: String,
    /// 0-based position within the lesson.
    pub position: usize,
    /// Node title.
    pub title: String,
    /// Vocabulary terms, in order.
    pub vocabulary_terms: Vec<String>,
    /// Optional metadata hint for generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_hint: Option<String>,
}

/// The immutable, order-indexed list of a lesson's nodes.
///
/// # Example
///
/// ```
/// use synapse_engine::node::NodeSequence;
///
/// let nodes = NodeSequence::numbered(6).unwrap();
/// assert_eq!(nodes.len(), 6);
/// assert_eq!(nodes.last_index(), 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct NodeSequence {
    nodes: Vec<KnowledgeNode>,
}

impl NodeSequence {
    /// Builds a sequence, assigning positions in order.
    ///
    /// # Errors
    ///
    /// Returns `SynapseError::InvalidLessonStructure` when the count is
    /// outside 5..=25, an id is empty or repeated, a title is empty, or a
    /// node repeats a vocabulary term.
    pub fn new(specs: Vec<NodeSpec>) -> Result<Self> {
        if !(MIN_NODES..=MAX_NODES).contains(&specs.len()) {
            return Err(SynapseError::invalid_structure(format!(
                "lesson has {} nodes, expected {MIN_NODES} to {MAX_NODES}",
                specs.len()
            )));
        }

        let mut seen_ids = HashSet::new();
        let mut nodes = Vec::with_capacity(specs.len());

        for (position, spec) in specs.into_iter().enumerate() {
            let id = spec.id.trim().to_string();
            if id.is_empty() {
                return Err(SynapseError::invalid_structure(format!(
                    "node {position} has an empty id"
                )));
            }
            if !seen_ids.insert(id.clone()) {
                return Err(SynapseError::invalid_structure(format!(
                    "node id '{id}' appears more than once"
                )));
            }
            if spec.title.trim().is_empty() {
                return Err(SynapseError::invalid_structure(format!(
                    "node '{id}' has an empty title"
                )));
            }

            let mut seen_terms = HashSet::new();
            for term in &spec.vocabulary_terms {
                let normalized = term.trim().to_lowercase();
                if normalized.is_empty() {
                    return Err(SynapseError::invalid_structure(format!(
                        "node '{id}' has an empty vocabulary term"
                    )));
                }
                if !seen_terms.insert(normalized) {
                    return Err(SynapseError::invalid_structure(format!(
                        "node '{id}' repeats vocabulary term '{term}'"
                    )));
                }
            }

            nodes.push(KnowledgeNode {
                id,
                position,
                title: spec.title.trim().to_string(),
                vocabulary_terms: spec
                    .vocabulary_terms
                    .iter()
                    .map(|t| t.trim().to_string())
                    .collect(),
                metadata_hint: spec.metadata_hint,
            });
        }

        Ok(Self { nodes })
    }

    /// Builds a placeholder sequence of `count` nodes named `node-1`, `node-2`...
    ///
    /// Useful for inspecting the recall schedule of a lesson size.
    ///
    /// # Errors
    ///
    /// Returns `SynapseError::InvalidLessonStructure` when `count` is out of range.
    pub fn numbered(count: usize) -> Result<Self> {
        Self::new(
            (1..=count)
                .map(|i| NodeSpec::new(format!("node-{i}"), format!("Node {i}")))
                .collect(),
        )
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`; a valid sequence has at least five nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the last node.
    #[must_use]
    pub fn last_index(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// The node at `index`, if in range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&KnowledgeNode> {
        self.nodes.get(index)
    }

    /// The id of the node at `index`, if in range.
    #[must_use]
    pub fn id_of(&self, index: usize) -> Option<&str> {
        self.nodes.get(index).map(|n| n.id.as_str())
    }

    /// Iterates over nodes in order.
    pub fn iter(&self) -> std::slice::Iter<'_, KnowledgeNode> {
        self.nodes.iter()
    }
}

impl<'a> IntoIterator for &'a NodeSequence {
    type Item = &'a KnowledgeNode;
    type IntoIter = std::slice::Iter<'a, KnowledgeNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

// ============================================================================
// Lesson
// ============================================================================

/// A lesson: topic metadata plus its fixed node sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    /// Stable lesson identifier, also used to key persisted state.
    pub id: String,
    /// What the lesson teaches.
    pub topic: String,
    /// Broad subject area.
    pub subject: String,
    /// Difficulty band.
    pub difficulty: Difficulty,
    /// The ordered nodes.
    pub nodes: NodeSequence,
}

/// A lesson together with any content restored from its file.
#[derive(Debug, Clone)]
pub struct LoadedLesson {
    /// The lesson structure.
    pub lesson: Lesson,
    /// One content slot per node, `Pending` unless the file carried content.
    pub content: Vec<NodeContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LessonFile {
    id: String,
    topic: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    difficulty: Difficulty,
    nodes: Vec<LessonFileNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LessonFileNode {
    #[serde(flatten)]
    spec: NodeSpec,
    #[serde(default)]
    content: Option<GeneratedContent>,
}

impl Lesson {
    /// Creates a lesson from its parts, validating the node structure.
    ///
    /// # Errors
    ///
    /// Returns `SynapseError::InvalidLessonStructure` if the id or topic is
    /// empty or the nodes are invalid.
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        subject: impl Into<String>,
        difficulty: Difficulty,
        specs: Vec<NodeSpec>,
    ) -> Result<Self> {
        let id = id.into();
        let topic = topic.into();
        if id.trim().is_empty() {
            return Err(SynapseError::invalid_structure("lesson id is empty"));
        }
        if topic.trim().is_empty() {
            return Err(SynapseError::invalid_structure("lesson topic is empty"));
        }

        let nodes = NodeSequence::new(specs)?;
        if !difficulty.node_range().contains(&nodes.len()) {
            warn!(
                lesson_id = %id,
                difficulty = %difficulty,
                node_count = nodes.len(),
                "Node count is outside the usual band for this difficulty"
            );
        }

        Ok(Self {
            id,
            topic,
            subject: subject.into(),
            difficulty,
            nodes,
        })
    }

    /// Loads a lesson file.
    ///
    /// Validates that the file exists, is at most 256KB, is UTF-8, parses
    /// as a lesson and has a valid node structure.
    ///
    /// # Errors
    ///
    /// Returns `LessonNotFound`, `LessonTooLarge`, `LessonEncodingError`,
    /// `LessonParseError` or `InvalidLessonStructure` accordingly.
    pub fn load(path: impl AsRef<Path>) -> Result<LoadedLesson> {
        let path = path.as_ref();

        let metadata = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SynapseError::lesson_not_found(path)
            } else {
                SynapseError::Io(e)
            }
        })?;

        let file_size = metadata.len();
        if file_size > MAX_LESSON_SIZE {
            return Err(SynapseError::lesson_too_large(path, file_size / 1024));
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                SynapseError::lesson_encoding(path)
            } else {
                SynapseError::Io(e)
            }
        })?;

        Self::parse(path, &contents)
    }

    /// Parses lesson JSON. `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns `LessonParseError` for invalid JSON or invalid restored
    /// content, and `InvalidLessonStructure` for structural problems.
    pub fn parse(path: &Path, contents: &str) -> Result<LoadedLesson> {
        let file: LessonFile = serde_json::from_str(contents)
            .map_err(|e| SynapseError::lesson_parse(path, e.to_string()))?;

        let mut specs = Vec::with_capacity(file.nodes.len());
        let mut content = Vec::with_capacity(file.nodes.len());
        for node in file.nodes {
            let slot = match node.content {
                Some(generated) => {
                    generated.check().map_err(|message| {
                        SynapseError::lesson_parse(
                            path,
                            format!("content of node '{}': {message}", node.spec.id),
                        )
                    })?;
                    NodeContent::Complete(generated)
                }
                None => NodeContent::Pending,
            };
            specs.push(node.spec);
            content.push(slot);
        }

        let lesson = Self::new(file.id, file.topic, file.subject, file.difficulty, specs)?;
        Ok(LoadedLesson { lesson, content })
    }

    /// Number of nodes in the lesson.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
