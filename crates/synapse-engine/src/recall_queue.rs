//! Recall queue generation.
//!
//! Every recall cycle tests exactly one block of three consecutive nodes.
//! Block `k` (1-based) spans positions `3(k-1)`, `3(k-1)+1` and `3(k-1)+2`.
//! The queue for a cycle is a pure function of the cycle number, the node
//! sequence and whether the cycle is the lesson's last, so a restored
//! session can rebuild the exact task it was on.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SynapseError};
use crate::node::NodeSequence;

/// Number of nodes in a recall block.
pub const BLOCK_SIZE: usize = 3;

// ============================================================================
// Recall Types
// ============================================================================

/// How the learner is asked to reconstruct a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecallType {
    /// Cloze: fill in blanked vocabulary terms inline.
    Partial,
    /// Reconstruct the later node of a pair, using the earlier as context.
    FullForward,
    /// Reconstruct the earlier node of a pair, using the later as context.
    FullBackward,
    /// Reconstruct a node using both neighbours as context.
    FullComprehensive,
}

impl RecallType {
    /// Wire name of the recall type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Partial => "partial",
            Self::FullForward => "full-forward",
            Self::FullBackward => "full-backward",
            Self::FullComprehensive => "full-comprehensive",
        }
    }

    /// Returns `true` for the term-by-term cloze variant.
    #[must_use]
    pub const fn is_partial(self) -> bool {
        matches!(self, Self::Partial)
    }
}

impl std::fmt::Display for RecallType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which slot of a cycle's queue produced a task.
///
/// The discriminant is the recall step that presents the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecallStage {
    /// Re-test of the previous block's middle node (cycles after the first).
    Retention = 0,
    /// Cloze on the current block's middle node.
    Cloze = 1,
    /// Reconstruct the block's first node.
    Backward = 2,
    /// Reconstruct the block's last node.
    Forward = 3,
    /// Synthesis of the middle node, only in the final cycle.
    Capstone = 4,
}

impl RecallStage {
    /// The recall step at which this stage is presented.
    #[must_use]
    pub const fn step(self) -> u8 {
        self as u8
    }

    /// The stage presented at `step`, if the step is in 0..=4.
    #[must_use]
    pub const fn from_step(step: u8) -> Option<Self> {
        match step {
            0 => Some(Self::Retention),
            1 => Some(Self::Cloze),
            2 => Some(Self::Backward),
            3 => Some(Self::Forward),
            4 => Some(Self::Capstone),
            _ => None,
        }
    }

    /// The learner-facing prompt introducing the task.
    #[must_use]
    pub const fn prompt(self) -> &'static str {
        match self {
            Self::Retention => "Let's review the previous topic...",
            Self::Cloze => "Fill in the blanks...",
            Self::Backward => "Recall the start of this section...",
            Self::Forward => "Recall the end of this section...",
            Self::Capstone => "Final review of this section...",
        }
    }

    /// The recall variant used by this stage.
    #[must_use]
    pub const fn recall_type(self) -> RecallType {
        match self {
            Self::Retention | Self::Capstone => RecallType::FullComprehensive,
            Self::Cloze => RecallType::Partial,
            Self::Backward => RecallType::FullBackward,
            Self::Forward => RecallType::FullForward,
        }
    }

    /// Target node and hint nodes of this stage in `cycle`.
    ///
    /// Returns `None` for cycle 0, and for the retention stage of the first
    /// cycle, which has no previous block.
    #[must_use]
    pub fn placement(self, cycle: usize) -> Option<(usize, Vec<usize>)> {
        let block = Block::for_cycle(cycle)?;
        match self {
            Self::Retention => {
                let previous = Block::for_cycle(cycle - 1)?;
                Some((previous.middle, vec![previous.start, previous.end]))
            }
            Self::Cloze => Some((block.middle, Vec::new())),
            Self::Backward => Some((block.start, vec![block.middle])),
            Self::Forward => Some((block.end, vec![block.middle])),
            Self::Capstone => Some((block.middle, vec![block.start, block.end])),
        }
    }

    /// Target node of this stage in `cycle`.
    #[must_use]
    pub fn target(self, cycle: usize) -> Option<usize> {
        self.placement(cycle).map(|(target, _)| target)
    }
}

// ============================================================================
// Recall Tasks
// ============================================================================

/// One recall exercise within a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallTask {
    /// Position of the node to reconstruct.
    pub node_index: usize,
    /// Id of the node to reconstruct.
    pub node_id: String,
    /// Recall variant.
    pub recall_type: RecallType,
    /// Queue slot that produced this task.
    pub stage: RecallStage,
    /// Positions of the nodes shown as context (0 to 2 entries).
    pub hint_node_indices: Vec<usize>,
    /// Ids of the context nodes, parallel to `hint_node_indices`.
    pub hint_node_ids: Vec<String>,
}

impl RecallTask {
    fn build(nodes: &NodeSequence, cycle: usize, stage: RecallStage) -> Option<Self> {
        let (node_index, hints) = stage.placement(cycle)?;
        let node_id = nodes.id_of(node_index)?.to_string();
        let hint_node_ids = hints
            .iter()
            .map(|&i| nodes.id_of(i).map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            node_index,
            node_id,
            recall_type: stage.recall_type(),
            stage,
            hint_node_indices: hints,
            hint_node_ids,
        })
    }
}

/// The three node positions of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// First node of the block.
    pub start: usize,
    /// Middle node of the block.
    pub middle: usize,
    /// Last node of the block.
    pub end: usize,
}

impl Block {
    /// The block tested by `cycle` (1-based). Cycle 0 has no block.
    #[must_use]
    pub const fn for_cycle(cycle: usize) -> Option<Self> {
        if cycle == 0 {
            return None;
        }
        let start = (cycle - 1) * BLOCK_SIZE;
        Some(Self {
            start,
            middle: start + 1,
            end: start + 2,
        })
    }

    /// Returns `true` if every position of the block exists in `node_count` nodes.
    #[must_use]
    pub const fn fits(&self, node_count: usize) -> bool {
        self.end < node_count
    }
}

// ============================================================================
// Cycle Arithmetic
// ============================================================================

/// Number of complete blocks, and therefore recall cycles, in a lesson.
#[must_use]
pub const fn cycle_count(node_count: usize) -> usize {
    node_count / BLOCK_SIZE
}

/// Returns `true` if `cycle` tests the lesson's last block.
#[must_use]
pub const fn is_final_cycle(cycle: usize, node_count: usize) -> bool {
    cycle * BLOCK_SIZE >= node_count
}

/// The cycle whose block ends at `node_index`, if the node closes a block.
#[must_use]
pub const fn cycle_ending_at(node_index: usize) -> Option<usize> {
    if (node_index + 1) % BLOCK_SIZE == 0 {
        Some((node_index + 1) / BLOCK_SIZE)
    } else {
        None
    }
}

/// First recall step of a cycle; the first cycle has no retention task.
#[must_use]
pub const fn first_step(cycle: usize) -> u8 {
    if cycle > 1 {
        RecallStage::Retention.step()
    } else {
        RecallStage::Cloze.step()
    }
}

/// Last recall step of a cycle; only the final cycle has a capstone.
#[must_use]
pub const fn max_step(is_final: bool) -> u8 {
    if is_final {
        RecallStage::Capstone.step()
    } else {
        RecallStage::Forward.step()
    }
}

// ============================================================================
// Queue Generation
// ============================================================================

/// Generates the ordered recall tasks for `cycle`.
///
/// Returns an empty list, after logging a warning, when the cycle's block
/// does not fit in the sequence. Callers are expected to guard against that
/// with [`checked_recall_queue`] or by checking [`Block::fits`] first.
///
/// # Example
///
/// ```
/// use synapse_engine::node::NodeSequence;
/// use synapse_engine::recall_queue::{generate_recall_queue, RecallType};
///
/// let nodes = NodeSequence::numbered(6).unwrap();
/// let queue = generate_recall_queue(1, &nodes, false);
/// assert_eq!(queue.len(), 3);
/// assert_eq!(queue[0].recall_type, RecallType::Partial);
/// assert_eq!(queue[0].node_index, 1);
/// ```
#[must_use]
pub fn generate_recall_queue(cycle: usize, nodes: &NodeSequence, is_final: bool) -> Vec<RecallTask> {
    if !Block::for_cycle(cycle).is_some_and(|b| b.fits(nodes.len())) {
        warn!(
            cycle,
            node_count = nodes.len(),
            "Recall cycle does not fit in the lesson, returning an empty queue"
        );
        return Vec::new();
    }

    (first_step(cycle)..=max_step(is_final))
        .filter_map(RecallStage::from_step)
        .filter_map(|stage| RecallTask::build(nodes, cycle, stage))
        .collect()
}

/// Like [`generate_recall_queue`], but reports an out-of-range cycle as a
/// contract violation instead of an empty queue.
///
/// # Errors
///
/// Returns `SynapseError::RecallContractViolation` if the block does not fit.
pub fn checked_recall_queue(
    cycle: usize,
    nodes: &NodeSequence,
    is_final: bool,
) -> Result<Vec<RecallTask>> {
    let end_index = cycle.max(1) * BLOCK_SIZE - 1;
    if cycle == 0 || end_index >= nodes.len() {
        return Err(SynapseError::RecallContractViolation {
            cycle,
            end_index,
            node_count: nodes.len(),
        });
    }
    Ok(generate_recall_queue(cycle, nodes, is_final))
}

/// Looks up the task presented at `step` of `cycle` in a queue built for it.
#[must_use]
pub fn task_at_step(queue: &[RecallTask], cycle: usize, step: u8) -> Option<&RecallTask> {
    let offset = step.checked_sub(first_step(cycle))?;
    queue.get(usize::from(offset))
}

// ============================================================================
// Whole-Lesson Schedule
// ============================================================================

/// One cycle of a lesson's recall schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledCycle {
    /// 1-based cycle number.
    pub cycle: usize,
    /// Whether this is the last cycle (carries the capstone).
    pub is_final: bool,
    /// The node whose completion triggers the cycle.
    pub after_node: usize,
    /// The cycle's tasks, in order.
    pub tasks: Vec<RecallTask>,
}

/// Every recall cycle a lesson will run, plus nodes taught without recall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallSchedule {
    /// Number of nodes in the lesson.
    pub node_count: usize,
    /// Cycles in order.
    pub cycles: Vec<ScheduledCycle>,
    /// Trailing nodes that do not fill a block and are never recalled.
    pub trailing_nodes: Vec<usize>,
}

impl RecallSchedule {
    /// Builds the complete schedule for a node sequence.
    #[must_use]
    pub fn for_lesson(nodes: &NodeSequence) -> Self {
        let n = nodes.len();
        let total = cycle_count(n);
        let cycles = (1..=total)
            .map(|cycle| ScheduledCycle {
                cycle,
                is_final: is_final_cycle(cycle, n),
                after_node: cycle * BLOCK_SIZE - 1,
                tasks: generate_recall_queue(cycle, nodes, is_final_cycle(cycle, n)),
            })
            .collect();
        Self {
            node_count: n,
            cycles,
            trailing_nodes: (total * BLOCK_SIZE..n).collect(),
        }
    }
}
