//! Presentation instructions derived from progression state.
//!
//! Nothing here is stored. Camera hints are a pure function of the recall
//! type and the target node; the full [`Presentation`] is assembled by the
//! controller on demand.

use serde::Serialize;

use crate::cloze::ClozeText;
use crate::node::{GeneratedContent, NodeStatus};
use crate::progression::{Phase, SubPhase};
use crate::recall_queue::{RecallTask, RecallType};

/// How the canvas frames the current node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraMode {
    /// Only the current node.
    Default,
    /// The current node and its predecessor.
    ContextBack,
    /// The current node and its successor.
    ContextForward,
    /// The current node and both neighbours.
    Overview,
}

impl CameraMode {
    /// The framing used for a recall variant.
    #[must_use]
    pub const fn for_recall(recall_type: RecallType) -> Self {
        match recall_type {
            RecallType::Partial => Self::Default,
            RecallType::FullBackward => Self::ContextBack,
            RecallType::FullForward => Self::ContextForward,
            RecallType::FullComprehensive => Self::Overview,
        }
    }

    /// Zoom factor for this framing.
    #[must_use]
    pub const fn zoom(self) -> f32 {
        match self {
            Self::Default => 1.0,
            Self::ContextBack | Self::ContextForward => 0.75,
            Self::Overview => 0.5,
        }
    }
}

/// Which nodes must be visible, and how to frame them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraHint {
    /// Visible node positions, ascending.
    pub visible: Vec<usize>,
    /// Framing mode.
    pub mode: CameraMode,
    /// Zoom factor.
    pub zoom: f32,
}

impl CameraHint {
    /// Framing for teaching a node.
    #[must_use]
    pub fn teaching(node_index: usize) -> Self {
        Self::with_mode(CameraMode::Default, vec![node_index])
    }

    /// Framing for a recall task on `target` in a lesson of `node_count` nodes.
    ///
    /// Neighbours outside the lesson are omitted.
    ///
    /// # Example
    ///
    /// ```
    /// use synapse_engine::presentation::{CameraHint, CameraMode};
    /// use synapse_engine::recall_queue::RecallType;
    ///
    /// let hint = CameraHint::for_recall(RecallType::FullBackward, 0, 6);
    /// assert_eq!(hint.visible, vec![0]);
    /// assert_eq!(hint.mode, CameraMode::ContextBack);
    /// ```
    #[must_use]
    pub fn for_recall(recall_type: RecallType, target: usize, node_count: usize) -> Self {
        let previous = target.checked_sub(1);
        let next = Some(target + 1).filter(|&i| i < node_count);
        let visible = match recall_type {
            RecallType::Partial => vec![Some(target)],
            RecallType::FullBackward => vec![previous, Some(target)],
            RecallType::FullForward => vec![Some(target), next],
            RecallType::FullComprehensive => vec![previous, Some(target), next],
        };
        Self::with_mode(
            CameraMode::for_recall(recall_type),
            visible.into_iter().flatten().collect(),
        )
    }

    fn with_mode(mode: CameraMode, visible: Vec<usize>) -> Self {
        Self {
            visible,
            mode,
            zoom: mode.zoom(),
        }
    }
}

/// The recall task being presented, with what the learner needs to answer it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPresentation {
    /// The task itself.
    #[serde(flatten)]
    pub task: RecallTask,
    /// Intro line for the task.
    pub prompt: &'static str,
    /// Blanked summary, for partial tasks whose node content is available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloze: Option<ClozeText>,
    /// Blanked terms already answered in this task.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resolved_terms: Vec<String>,
}

/// What the learner should be looking at right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    /// Current phase.
    pub phase: Phase,
    /// Teaching sub-phase (meaningful while teaching).
    pub sub_phase: SubPhase,
    /// Node being taught or reconstructed.
    pub node_index: usize,
    /// Id of that node.
    pub node_id: String,
    /// Title of that node.
    pub node_title: String,
    /// Whether its content has been generated.
    pub node_status: NodeStatus,
    /// Its content while teaching, when available. Hidden during recall.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<GeneratedContent>,
    /// Current recall cycle (0 before the first).
    pub recall_cycle: usize,
    /// Current recall step.
    pub recall_step: u8,
    /// Number of finished cycles.
    pub completed_cycles: usize,
    /// The recall task, during recall.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskPresentation>,
    /// Canvas framing.
    pub camera: CameraHint,
}
