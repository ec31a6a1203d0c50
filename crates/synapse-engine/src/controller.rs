//! The lesson session: learner actions in, transitions and events out.
//!
//! [`LessonProgressionController`] owns the progression state and the
//! current cycle's recall queue. Every learner action either applies exactly
//! one pure transition from [`crate::progression`] or leaves the state
//! untouched and returns an error. Applied transitions are queued on the
//! debounced [`ProgressWriter`], broadcast as events and followed by
//! look-ahead generation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cloze::render_cloze;
use crate::error::{Result, SynapseError};
use crate::events::{
    EventBroadcaster, LessonCompletePayload, LessonEvent, NodeEnteredPayload,
    RecallAdvancedPayload, RecallCompletedPayload, RecallStartedPayload, SubPhasePayload,
    TaskEvaluatedPayload,
};
use crate::mastery::MasteryRecord;
use crate::node::{GeneratedContent, KnowledgeNode, Lesson, NodeContent, NodeStatus};
use crate::presentation::{CameraHint, Presentation, TaskPresentation};
use crate::progression::{Advanced, ProgressionState, SubPhase, Transition};
use crate::readiness::ContentReadinessGate;
use crate::recall_queue::{checked_recall_queue, is_final_cycle, task_at_step, RecallTask};
use crate::services::{
    AskRequest, Evaluation, EvaluationRequest, Services, ThinkingFeedback, ThinkingRequest,
    TutorAnswer,
};
use crate::store::{ProgressStore, ProgressWriter};

/// Everything needed to open a session.
pub struct SessionSetup {
    /// The lesson to teach.
    pub lesson: Lesson,
    /// Content restored from the lesson file, one slot per node.
    pub content: Vec<NodeContent>,
    /// Restored progression state; `None` starts from the first node.
    pub state: Option<ProgressionState>,
    /// Content, evaluation and tutor services.
    pub services: Services,
    /// Where progress, mastery and content are persisted.
    pub store: Arc<dyn ProgressStore>,
    /// Event stream for connected clients.
    pub events: EventBroadcaster,
    /// Debounce window for progress saves.
    pub save_debounce: Duration,
}

/// Result of one recall submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallOutcome {
    /// The evaluator's verdict.
    pub evaluation: Evaluation,
    /// Whether the task is finished and the cycle moved on.
    pub task_resolved: bool,
    /// What to show next.
    pub presentation: Presentation,
}

/// Drives one learner through one lesson.
pub struct LessonProgressionController {
    lesson: Arc<Lesson>,
    state: ProgressionState,
    queue: Vec<RecallTask>,
    resolved_terms: Vec<String>,
    gate: ContentReadinessGate,
    services: Services,
    writer: ProgressWriter,
    store: Arc<dyn ProgressStore>,
    events: EventBroadcaster,
    mastery: Vec<MasteryRecord>,
}

impl std::fmt::Debug for LessonProgressionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LessonProgressionController")
            .field("lesson_id", &self.lesson.id)
            .field("state", &self.state)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl LessonProgressionController {
    /// Opens a session, restoring state, mastery records and stored content.
    ///
    /// # Errors
    ///
    /// Returns `StateFileCorrupted` if the restored state does not fit the
    /// lesson, or `RecallContractViolation` if its recall cycle cannot be
    /// rebuilt.
    pub async fn open(setup: SessionSetup) -> Result<Self> {
        let SessionSetup {
            lesson,
            mut content,
            state,
            services,
            store,
            events,
            save_debounce,
        } = setup;
        let node_count = lesson.node_count();

        let state = match state {
            Some(restored) => {
                restored.validate(node_count)?;
                restored.aligned()
            }
            None => ProgressionState::new(),
        };

        content.resize(node_count, NodeContent::Pending);
        match store.load_content(&lesson.id).await {
            Ok(stored) => {
                for (index, generated) in stored {
                    if let Some(slot) = content.get_mut(index) {
                        if !slot.is_complete() {
                            *slot = NodeContent::Complete(generated);
                        }
                    }
                }
            }
            Err(e) => warn!(lesson_id = %lesson.id, error = %e, "Failed to load stored content"),
        }

        let mastery = store.load_mastery(&lesson.id).await.unwrap_or_else(|e| {
            warn!(lesson_id = %lesson.id, error = %e, "Failed to load mastery records");
            Vec::new()
        });

        let queue = if state.is_recall() {
            checked_recall_queue(
                state.recall_cycle,
                &lesson.nodes,
                is_final_cycle(state.recall_cycle, node_count),
            )?
        } else {
            Vec::new()
        };

        let lesson = Arc::new(lesson);
        let gate = ContentReadinessGate::new(
            Arc::clone(&lesson),
            content,
            Arc::clone(&services.content),
            events.clone(),
            Some(Arc::clone(&store)),
        );
        let writer = ProgressWriter::spawn(Arc::clone(&store), lesson.id.clone(), save_debounce);

        let controller = Self {
            lesson,
            state,
            queue,
            resolved_terms: Vec::new(),
            gate,
            services,
            writer,
            store,
            events,
            mastery,
        };

        info!(
            lesson_id = %controller.lesson.id,
            node_count,
            state = %controller.state,
            mastery_records = controller.mastery.len(),
            "Opened lesson session"
        );
        controller.look_ahead().await;
        Ok(controller)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The lesson being taught.
    #[must_use]
    pub fn lesson(&self) -> &Lesson {
        &self.lesson
    }

    /// The current progression state.
    #[must_use]
    pub const fn state(&self) -> &ProgressionState {
        &self.state
    }

    /// Mastery records of this lesson, oldest first.
    #[must_use]
    pub fn mastery(&self) -> &[MasteryRecord] {
        &self.mastery
    }

    /// The content readiness gate.
    #[must_use]
    pub const fn gate(&self) -> &ContentReadinessGate {
        &self.gate
    }

    /// The session's event stream.
    #[must_use]
    pub const fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// The current cycle's recall queue; empty outside recall.
    #[must_use]
    pub fn queue(&self) -> &[RecallTask] {
        &self.queue
    }

    /// The recall task being presented, if any.
    #[must_use]
    pub fn current_task(&self) -> Option<&RecallTask> {
        if !self.state.is_recall() {
            return None;
        }
        task_at_step(&self.queue, self.state.recall_cycle, self.state.recall_step)
    }

    /// Saves the latest progression state now.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the save fails.
    pub async fn flush(&self) -> Result<()> {
        self.writer.flush().await
    }

    // ========================================================================
    // Presentation
    // ========================================================================

    /// What the learner should be looking at right now.
    ///
    /// During recall the target's content is withheld; partial tasks carry
    /// the blanked summary instead.
    pub async fn presentation(&self) -> Presentation {
        let index = self.state.current_node_index;
        let node = self.lesson.nodes.get(index);
        let content = self.gate.content(index).await;
        let node_status = if content.is_some() {
            NodeStatus::Complete
        } else {
            NodeStatus::PendingContent
        };

        let task = self.current_task().map(|task| {
            let cloze = match (task.recall_type.is_partial(), node, content.as_ref()) {
                (true, Some(node), Some(generated)) => Some(render_cloze(
                    &generated.summary,
                    &cloze_terms(node, generated),
                )),
                _ => None,
            };
            TaskPresentation {
                task: task.clone(),
                prompt: task.stage.prompt(),
                cloze,
                resolved_terms: self.resolved_terms.clone(),
            }
        });

        let camera = task.as_ref().map_or_else(
            || CameraHint::teaching(index),
            |t| CameraHint::for_recall(t.task.recall_type, t.task.node_index, self.lesson.node_count()),
        );

        Presentation {
            phase: self.state.current_phase,
            sub_phase: self.state.sub_phase,
            node_index: index,
            node_id: node.map(|n| n.id.clone()).unwrap_or_default(),
            node_title: node.map(|n| n.title.clone()).unwrap_or_default(),
            node_status,
            content: if self.state.is_recall() { None } else { content },
            recall_cycle: self.state.recall_cycle,
            recall_step: self.state.recall_step,
            completed_cycles: self.state.completed_cycles,
            task,
            camera,
        }
    }

    // ========================================================================
    // Learner Actions
    // ========================================================================

    /// The learner's "continue" during teaching.
    ///
    /// # Errors
    ///
    /// - `InvalidAction` outside teaching
    /// - `ContentNotReady` if the current node is still in its `content`
    ///   sub-phase without content, or the next node has no content yet;
    ///   generation is re-requested and the state is unchanged
    /// - `RecallContractViolation` if the triggered cycle cannot be built
    pub async fn continue_lesson(&mut self) -> Result<Presentation> {
        let node_count = self.lesson.node_count();
        let advanced = self.state.advance(node_count)?;

        if self.state.is_teaching_in(SubPhase::Content) {
            let index = self.state.current_node_index;
            if !self.gate.is_ready(index).await {
                self.gate.ensure_window([index, index + 1]).await;
                info!(node_index = index, "Node content is still generating, holding position");
                return Err(SynapseError::content_not_ready(index));
            }
        }

        match advanced.transition {
            Transition::NodeEntered { node_index } => {
                if !self.gate.is_ready(node_index).await {
                    self.gate.ensure_window([node_index, node_index + 1]).await;
                    info!(node_index, "Next node is still generating, holding position");
                    return Err(SynapseError::content_not_ready(node_index));
                }
            }
            Transition::RecallStarted { cycle, is_final } => {
                match checked_recall_queue(cycle, &self.lesson.nodes, is_final) {
                    Ok(queue) => self.queue = queue,
                    Err(e) => {
                        error!(cycle, error = %e, "Cannot build recall queue");
                        self.events.send(LessonEvent::error(e.to_string()));
                        return Err(e);
                    }
                }
                self.resolved_terms.clear();
            }
            _ => {}
        }

        self.apply(advanced).await;
        Ok(self.presentation().await)
    }

    /// Submits an answer to the current recall task.
    ///
    /// Full-recall answers resolve the task. Partial answers name the blanked
    /// `term` they fill; the task resolves once every blanked term has been
    /// answered. Scores never gate advancement.
    ///
    /// # Errors
    ///
    /// - `InvalidAction` outside recall
    /// - `InvalidRequest` for an empty response or a missing, unknown or
    ///   repeated term
    /// - `ContentNotReady` if a partial task's node has no content yet
    /// - the evaluation error, with no state change
    pub async fn submit_recall(&mut self, response: &str, term: Option<&str>) -> Result<RecallOutcome> {
        if !self.state.is_recall() {
            return Err(SynapseError::invalid_action("submit a recall answer", &self.state));
        }
        let response = response.trim();
        if response.is_empty() {
            return Err(SynapseError::invalid_request("response must not be empty"));
        }
        let cycle = self.state.recall_cycle;
        let Some(task) = self.current_task().cloned() else {
            return Err(SynapseError::invalid_transition(
                &self.state,
                "a recall step with no task",
            ));
        };

        let content = self.gate.content(task.node_index).await;
        let (term, resolves) = if task.recall_type.is_partial() {
            self.match_term(&task, content.as_ref(), term).await?
        } else if term.is_some() {
            return Err(SynapseError::invalid_request(
                "only fill-in-the-blank answers name a term",
            ));
        } else {
            (None, true)
        };

        let request = EvaluationRequest::for_task(
            &task,
            cycle,
            response,
            term.clone(),
            content.map(|c| c.summary),
        );
        let evaluation = match self.services.evaluation.evaluate(&request).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!(
                    node_index = task.node_index,
                    recall_type = %task.recall_type,
                    error = %e,
                    "Evaluation failed, task stays open"
                );
                return Err(e);
            }
        };
        evaluation
            .check()
            .map_err(|message| SynapseError::malformed("evaluation", message))?;

        let record = MasteryRecord {
            lesson_id: self.lesson.id.clone(),
            node_id: task.node_id.clone(),
            node_index: task.node_index,
            recall_type: task.recall_type,
            term: term.clone(),
            hint_node_ids: task.hint_node_ids.clone(),
            response: response.to_string(),
            score: evaluation.mastery_score,
            grade: evaluation.grade,
            feedback: evaluation.feedback.clone(),
            cycle,
            attempted_at: Utc::now(),
        };
        if let Err(e) = self.store.append_mastery(&record).await {
            warn!(error = %e, "Failed to persist mastery record");
        }
        self.mastery.push(record);

        info!(
            cycle,
            node_index = task.node_index,
            recall_type = %task.recall_type,
            term = term.as_deref().unwrap_or(""),
            score = evaluation.mastery_score,
            grade = %evaluation.grade,
            "Recall answer evaluated"
        );
        self.events.send(LessonEvent::TaskEvaluated(TaskEvaluatedPayload {
            cycle,
            node_index: task.node_index,
            recall_type: task.recall_type,
            term: term.clone(),
            score: evaluation.mastery_score,
            grade: evaluation.grade,
            feedback: evaluation.feedback.clone(),
            task_resolved: resolves,
        }));

        if resolves {
            let advanced = self.state.resolve_recall_task(self.lesson.node_count())?;
            self.resolved_terms.clear();
            self.apply(advanced).await;
        } else if let Some(term) = term {
            self.resolved_terms.push(term);
        }

        Ok(RecallOutcome {
            evaluation,
            task_resolved: resolves,
            presentation: self.presentation().await,
        })
    }

    /// Checks a partial answer's term against the blanked terms.
    ///
    /// Returns the canonical term (if any) and whether answering it finishes
    /// the task.
    async fn match_term(
        &self,
        task: &RecallTask,
        content: Option<&GeneratedContent>,
        term: Option<&str>,
    ) -> Result<(Option<String>, bool)> {
        let (Some(node), Some(generated)) = (self.lesson.nodes.get(task.node_index), content)
        else {
            self.gate.ensure_ready(task.node_index).await;
            return Err(SynapseError::content_not_ready(task.node_index));
        };

        let blanked = render_cloze(&generated.summary, &cloze_terms(node, generated)).blanked_terms;
        let requested = term.map(str::trim).filter(|t| !t.is_empty());

        if blanked.is_empty() {
            // Nothing was blanked: one free answer closes the task.
            return match requested {
                Some(t) => Err(SynapseError::invalid_request(format!(
                    "'{t}' is not blanked in this summary"
                ))),
                None => Ok((None, true)),
            };
        }

        let Some(requested) = requested else {
            return Err(SynapseError::invalid_request(format!(
                "name the blanked term you are filling in: {}",
                blanked.join(", ")
            )));
        };
        let wanted = requested.to_lowercase();
        let Some(matched) = blanked.iter().find(|b| b.to_lowercase() == wanted) else {
            return Err(SynapseError::invalid_request(format!(
                "'{requested}' is not a blanked term of this summary"
            )));
        };
        if self.resolved_terms.contains(matched) {
            return Err(SynapseError::invalid_request(format!(
                "'{matched}' has already been answered"
            )));
        }

        let resolves = blanked
            .iter()
            .all(|b| b == matched || self.resolved_terms.contains(b));
        Ok((Some(matched.clone()), resolves))
    }

    /// Gets feedback on the current node's thinking question.
    ///
    /// # Errors
    ///
    /// `InvalidAction` outside the teaching `question` sub-phase, or the
    /// tutor's error. Never changes state.
    pub async fn submit_thinking(&self, response: &str) -> Result<ThinkingFeedback> {
        if !self.state.is_teaching_in(SubPhase::Question) {
            return Err(SynapseError::invalid_action("answer the thinking question", &self.state));
        }
        let response = response.trim();
        if response.is_empty() {
            return Err(SynapseError::invalid_request("response must not be empty"));
        }

        let index = self.state.current_node_index;
        let Some(generated) = self.gate.content(index).await else {
            self.gate.ensure_ready(index).await;
            return Err(SynapseError::content_not_ready(index));
        };
        let request = ThinkingRequest {
            node_id: self.node_id(index),
            thinking_question: generated.thinking_question,
            learner_response: response.to_string(),
        };
        self.services.tutor.thinking_feedback(&request).await
    }

    /// Answers a free-form question about the node on screen.
    ///
    /// # Errors
    ///
    /// `InvalidAction` outside the teaching `content` and `continue`
    /// sub-phases, or the tutor's error. Never changes state.
    pub async fn ask(&self, question: &str) -> Result<TutorAnswer> {
        if !(self.state.is_teaching_in(SubPhase::Content)
            || self.state.is_teaching_in(SubPhase::Continue))
        {
            return Err(SynapseError::invalid_action("ask a question", &self.state));
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(SynapseError::invalid_request("question must not be empty"));
        }

        let index = self.state.current_node_index;
        let Some(generated) = self.gate.content(index).await else {
            self.gate.ensure_ready(index).await;
            return Err(SynapseError::content_not_ready(index));
        };
        let title = self
            .lesson
            .nodes
            .get(index)
            .map(|n| n.title.clone())
            .unwrap_or_default();
        let request = AskRequest {
            topic: self.lesson.topic.clone(),
            node_id: self.node_id(index),
            title,
            summary: generated.summary,
            question: question.to_string(),
        };
        self.services.tutor.answer(&request).await
    }

    /// Generates a node stuck in `PENDING_CONTENT`, waiting for the result.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` for an unknown node, or the generation error.
    pub async fn retry_generation(&self, index: usize) -> Result<NodeStatus> {
        info!(node_index = index, "Retrying content generation");
        self.gate.retry(index).await
    }

    // ========================================================================
    // Transition Plumbing
    // ========================================================================

    async fn apply(&mut self, advanced: Advanced) {
        let Advanced { state, transition } = advanced;
        self.state = state;
        self.writer.submit(&self.state);

        info!(
            lesson_id = %self.lesson.id,
            state = %self.state,
            ?transition,
            "Applied transition"
        );

        if let Some(event) = self.event_for(transition) {
            self.events.send(event);
        }

        match transition {
            Transition::RecallCompleted { .. } => self.queue.clear(),
            Transition::LessonCompleted => {
                self.queue.clear();
                if let Err(e) = self.writer.flush().await {
                    warn!(error = %e, "Failed to save completed lesson");
                }
            }
            _ => {}
        }

        self.look_ahead().await;
    }

    fn event_for(&self, transition: Transition) -> Option<LessonEvent> {
        let event = match transition {
            Transition::SubPhaseChanged { sub_phase } => {
                LessonEvent::SubPhaseChanged(SubPhasePayload {
                    node_index: self.state.current_node_index,
                    sub_phase,
                })
            }
            Transition::NodeEntered { node_index } => {
                let node = self.lesson.nodes.get(node_index)?;
                LessonEvent::NodeEntered(NodeEnteredPayload {
                    node_index,
                    node_id: node.id.clone(),
                    title: node.title.clone(),
                })
            }
            Transition::RecallStarted { cycle, is_final } => {
                LessonEvent::RecallStarted(RecallStartedPayload {
                    cycle,
                    is_final,
                    tasks: self.queue.clone(),
                })
            }
            Transition::RecallAdvanced { step } => LessonEvent::RecallAdvanced(RecallAdvancedPayload {
                cycle: self.state.recall_cycle,
                step,
                task: self.current_task()?.clone(),
            }),
            Transition::RecallCompleted {
                cycle,
                resume_index,
            } => LessonEvent::RecallCompleted(RecallCompletedPayload {
                cycle,
                completed_cycles: self.state.completed_cycles,
                resume_index,
            }),
            Transition::LessonCompleted => LessonEvent::LessonComplete(LessonCompletePayload {
                completed_cycles: self.state.completed_cycles,
            }),
        };
        Some(event)
    }

    /// Requests content for the current node, the next one and, during
    /// recall, the node after the resume point.
    async fn look_ahead(&self) {
        let index = self.state.current_node_index;
        let mut window = vec![index, index + 1];
        if let Some(resume) = self.state.resume_index {
            window.push(resume + 1);
        }
        self.gate.ensure_window(window).await;
    }

    fn node_id(&self, index: usize) -> String {
        self.lesson.nodes.id_of(index).unwrap_or_default().to_string()
    }
}

/// Terms to blank: the node's assigned vocabulary, then any extra terms the
/// generated content defines, without case-insensitive duplicates.
fn cloze_terms(node: &KnowledgeNode, generated: &GeneratedContent) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let assigned = node.vocabulary_terms.iter();
    let defined = generated.vocabulary.iter().map(|v| &v.term);
    for term in assigned.chain(defined) {
        let lower = term.to_lowercase();
        if !term.trim().is_empty() && !terms.iter().any(|t| t.to_lowercase() == lower) {
            terms.push(term.clone());
        }
    }
    terms
}
