//! Progression state and its pure transitions.
//!
//! [`ProgressionState`] is the single record that describes where a learner
//! is in a lesson. It is exactly what gets persisted, and every transition is
//! a pure function from one state to the next: nothing here touches services,
//! storage or the clock.
//!
//! Teaching walks each node through `content` -> (`continue`) -> `question`.
//! Finishing the last node of a block of three starts that block's recall
//! cycle; while in recall, `current_node_index` is the node being
//! reconstructed. When the cycle's last step resolves, teaching resumes on the
//! `question` sub-phase of the node that triggered it.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SynapseError};
use crate::recall_queue::{
    cycle_count, cycle_ending_at, first_step, is_final_cycle, max_step, RecallStage, BLOCK_SIZE,
};

// ============================================================================
// Phase and SubPhase
// ============================================================================

/// Top-level phase of a lesson.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Presenting nodes.
    #[default]
    Teaching,
    /// Running a recall cycle.
    Recall,
    /// Every node has been taught; the state no longer changes.
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Teaching => write!(f, "teaching"),
            Self::Recall => write!(f, "recall"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Sub-phase of a node while teaching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubPhase {
    /// Node body is displayed; the learner may ask questions.
    #[default]
    Content,
    /// Pause before a recall cycle, only on the last node of a block.
    Continue,
    /// The thinking question is displayed.
    Question,
}

impl std::fmt::Display for SubPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Content => write!(f, "content"),
            Self::Continue => write!(f, "continue"),
            Self::Question => write!(f, "question"),
        }
    }
}

// ============================================================================
// Transition
// ============================================================================

/// What a transition did, for logging and event broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Same node, new sub-phase.
    SubPhaseChanged {
        /// The new sub-phase.
        sub_phase: SubPhase,
    },
    /// Teaching moved on to a new node's content.
    NodeEntered {
        /// The node now being taught.
        node_index: usize,
    },
    /// A recall cycle began.
    RecallStarted {
        /// The cycle number.
        cycle: usize,
        /// Whether the cycle carries the capstone.
        is_final: bool,
    },
    /// The cycle moved to its next task.
    RecallAdvanced {
        /// The new recall step.
        step: u8,
    },
    /// The cycle finished and teaching resumed.
    RecallCompleted {
        /// The finished cycle.
        cycle: usize,
        /// The node teaching resumed on.
        resume_index: usize,
    },
    /// The last node was finished.
    LessonCompleted,
}

/// The result of applying a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advanced {
    /// The new state.
    pub state: ProgressionState,
    /// What happened.
    pub transition: Transition,
}

// ============================================================================
// ProgressionState
// ============================================================================

/// Where a learner is in a lesson. This is the persisted record.
///
/// `sub_phase` and `completed_cycles` default when absent, so a bare
/// five-field record still loads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressionState {
    /// Node being taught, or during recall the node being reconstructed.
    pub current_node_index: usize,

    /// Current phase.
    pub current_phase: Phase,

    /// Latest recall cycle started (1-based, 0 before the first).
    pub recall_cycle: usize,

    /// Step within the current cycle (0 to 4).
    pub recall_step: u8,

    /// Teaching node to return to when the current cycle finishes.
    pub resume_index: Option<usize>,

    /// Teaching sub-phase.
    #[serde(default)]
    pub sub_phase: SubPhase,

    /// Number of recall cycles finished.
    #[serde(default)]
    pub completed_cycles: usize,
}

impl Default for ProgressionState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProgressionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.current_phase {
            Phase::Teaching => write!(
                f,
                "teaching node {} ({})",
                self.current_node_index, self.sub_phase
            ),
            Phase::Recall => write!(
                f,
                "in recall cycle {} step {}",
                self.recall_cycle, self.recall_step
            ),
            Phase::Complete => write!(f, "the lesson is complete"),
        }
    }
}

impl ProgressionState {
    /// The state of a freshly created lesson.
    ///
    /// # Examples
    ///
    /// ```
    /// use synapse_engine::progression::{Phase, ProgressionState, SubPhase};
    ///
    /// let state = ProgressionState::new();
    /// assert_eq!(state.current_node_index, 0);
    /// assert_eq!(state.current_phase, Phase::Teaching);
    /// assert_eq!(state.sub_phase, SubPhase::Content);
    /// assert!(state.resume_index.is_none());
    /// ```
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current_node_index: 0,
            current_phase: Phase::Teaching,
            recall_cycle: 0,
            recall_step: 0,
            resume_index: None,
            sub_phase: SubPhase::Content,
            completed_cycles: 0,
        }
    }

    /// Returns `true` once the lesson is complete.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.current_phase, Phase::Complete)
    }

    /// Returns `true` while a recall cycle is running.
    #[must_use]
    pub const fn is_recall(&self) -> bool {
        matches!(self.current_phase, Phase::Recall)
    }

    /// Returns `true` while teaching in the given sub-phase.
    #[must_use]
    pub fn is_teaching_in(&self, sub_phase: SubPhase) -> bool {
        self.current_phase == Phase::Teaching && self.sub_phase == sub_phase
    }

    /// The recall stage being presented, if in recall.
    #[must_use]
    pub const fn current_stage(&self) -> Option<RecallStage> {
        if self.is_recall() {
            RecallStage::from_step(self.recall_step)
        } else {
            None
        }
    }

    /// Checks a restored record against the lesson size.
    ///
    /// # Errors
    ///
    /// Returns `SynapseError::StateFileCorrupted` describing the first
    /// inconsistency found.
    pub fn validate(&self, node_count: usize) -> Result<()> {
        self.check(node_count)
            .map_err(|message| SynapseError::state_corrupted("<progression state>", message))
    }

    fn check(&self, n: usize) -> std::result::Result<(), String> {
        if self.current_node_index >= n {
            return Err(format!(
                "currentNodeIndex {} is out of range for {n} nodes",
                self.current_node_index
            ));
        }
        if let Some(resume) = self.resume_index {
            if resume >= n {
                return Err(format!("resumeIndex {resume} is out of range for {n} nodes"));
            }
            if !self.is_recall() {
                return Err(format!(
                    "resumeIndex is set while in phase {}",
                    self.current_phase
                ));
            }
        }
        if self.recall_cycle > cycle_count(n) {
            return Err(format!(
                "recallCycle {} exceeds the {} cycles of a {n}-node lesson",
                self.recall_cycle,
                cycle_count(n)
            ));
        }
        if self.is_recall() {
            if self.recall_cycle == 0 {
                return Err("recallCycle must be at least 1 during recall".to_string());
            }
            let first = first_step(self.recall_cycle);
            let last = max_step(is_final_cycle(self.recall_cycle, n));
            if !(first..=last).contains(&self.recall_step) {
                return Err(format!(
                    "recallStep {} is outside {first}..={last} for cycle {}",
                    self.recall_step, self.recall_cycle
                ));
            }
        }
        Ok(())
    }

    /// Applies the learner's "continue" while teaching.
    ///
    /// From `content` the node moves to `continue` if it closes a block and to
    /// `question` otherwise. From `continue` or `question`, a node that closes
    /// a block whose cycle has not run yet starts that cycle; any other node
    /// hands over to the next node's `content`, or completes the lesson.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAction` in recall or after completion, and
    /// `InvalidStateTransition` if the index is already past the last node.
    ///
    /// # Examples
    ///
    /// ```
    /// use synapse_engine::progression::{Phase, ProgressionState, SubPhase};
    ///
    /// let state = ProgressionState {
    ///     current_node_index: 2,
    ///     sub_phase: SubPhase::Continue,
    ///     ..ProgressionState::new()
    /// };
    /// let next = state.advance(6).unwrap().state;
    /// assert_eq!(next.current_phase, Phase::Recall);
    /// assert_eq!(next.recall_cycle, 1);
    /// assert_eq!(next.resume_index, Some(2));
    /// assert_eq!(next.current_node_index, 1);
    /// ```
    pub fn advance(&self, node_count: usize) -> Result<Advanced> {
        if self.current_phase != Phase::Teaching {
            return Err(SynapseError::invalid_action("continue", self));
        }
        let index = self.current_node_index;
        if index >= node_count {
            return Err(SynapseError::invalid_transition(
                format!("teaching node {index}"),
                format!("a node beyond the last of {node_count}"),
            ));
        }

        let closes_block = cycle_ending_at(index);

        if self.sub_phase == SubPhase::Content {
            let sub_phase = if closes_block.is_some() {
                SubPhase::Continue
            } else {
                SubPhase::Question
            };
            return Ok(Advanced {
                state: Self {
                    sub_phase,
                    ..self.clone()
                },
                transition: Transition::SubPhaseChanged { sub_phase },
            });
        }

        if let Some(cycle) = closes_block.filter(|&c| self.recall_cycle < c) {
            return Ok(self.enter_recall(cycle, node_count));
        }

        if index + 1 >= node_count {
            return Ok(Advanced {
                state: Self {
                    current_phase: Phase::Complete,
                    ..self.clone()
                },
                transition: Transition::LessonCompleted,
            });
        }

        Ok(Advanced {
            state: Self {
                current_node_index: index + 1,
                sub_phase: SubPhase::Content,
                ..self.clone()
            },
            transition: Transition::NodeEntered {
                node_index: index + 1,
            },
        })
    }

    fn enter_recall(&self, cycle: usize, node_count: usize) -> Advanced {
        let is_final = is_final_cycle(cycle, node_count);
        let step = first_step(cycle);
        let target = RecallStage::from_step(step)
            .and_then(|stage| stage.target(cycle))
            .unwrap_or(cycle * BLOCK_SIZE - 2);
        Advanced {
            state: Self {
                current_node_index: target,
                current_phase: Phase::Recall,
                recall_cycle: cycle,
                recall_step: step,
                resume_index: Some(self.current_node_index),
                sub_phase: self.sub_phase,
                completed_cycles: self.completed_cycles,
            },
            transition: Transition::RecallStarted { cycle, is_final },
        }
    }

    /// Moves past the current recall task once it has been resolved.
    ///
    /// Advances to the next step, or, after the cycle's last step, restores
    /// the resume node in the `question` sub-phase.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAction` outside recall.
    pub fn resolve_recall_task(&self, node_count: usize) -> Result<Advanced> {
        if !self.is_recall() {
            return Err(SynapseError::invalid_action("resolve a recall task", self));
        }
        let cycle = self.recall_cycle;
        let next_step = self.recall_step.saturating_add(1);

        if next_step <= max_step(is_final_cycle(cycle, node_count)) {
            let target = RecallStage::from_step(next_step).and_then(|stage| stage.target(cycle));
            let Some(target) = target else {
                return Err(SynapseError::invalid_transition(
                    format!("recall cycle {cycle} step {}", self.recall_step),
                    format!("step {next_step}"),
                ));
            };
            return Ok(Advanced {
                state: Self {
                    current_node_index: target,
                    recall_step: next_step,
                    ..self.clone()
                },
                transition: Transition::RecallAdvanced { step: next_step },
            });
        }

        let resume_index = self
            .resume_index
            .unwrap_or(cycle * BLOCK_SIZE - 1)
            .min(node_count.saturating_sub(1));
        Ok(Advanced {
            state: Self {
                current_node_index: resume_index,
                current_phase: Phase::Teaching,
                recall_cycle: cycle,
                recall_step: 0,
                resume_index: None,
                sub_phase: SubPhase::Question,
                completed_cycles: self.completed_cycles + 1,
            },
            transition: Transition::RecallCompleted {
                cycle,
                resume_index,
            },
        })
    }

    /// Points a restored recall state at its current task's target node.
    ///
    /// Records saved with the teaching index during recall are realigned.
    #[must_use]
    pub fn aligned(&self) -> Self {
        match self
            .current_stage()
            .and_then(|stage| stage.target(self.recall_cycle))
        {
            Some(target) if target != self.current_node_index => Self {
                current_node_index: target,
                ..self.clone()
            },
            _ => self.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
