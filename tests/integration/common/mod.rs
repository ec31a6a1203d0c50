//! Helpers shared by the integration test binaries.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use synapse_engine::{
    AskRequest, ContentService, Evaluation, EvaluationRequest, EvaluationService,
    EventBroadcaster, GeneratedContent, GenerationRequest, Grade, Lesson,
    LessonProgressionController, LoadedLesson, ProgressStore, ProgressionState, Result,
    ServiceErrorKind, Services, SessionSetup, SynapseError, ThinkingFeedback, ThinkingRequest,
    TutorAnswer, TutorService, VocabularyEntry,
};

/// Directory of the sample lesson fixture.
pub fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/sample-lesson")
}

/// Loads the six-node water-cycle lesson.
pub fn load_fixture() -> LoadedLesson {
    Lesson::load(fixture_dir().join("lesson.json")).expect("Failed to load fixture lesson")
}

/// A fresh, empty directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "synapse_it_{name}_{}",
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// In-memory content, evaluation and tutor services.
///
/// Answers containing "don't know" score 0.2 (F); everything else scores
/// 0.85 (B+).
#[derive(Debug, Default)]
pub struct FakeServices {
    pub fail_generation: AtomicBool,
    pub fail_evaluation: AtomicBool,
    pub generations: AtomicUsize,
    pub evaluations: AtomicUsize,
}

impl FakeServices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ContentService for FakeServices {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedContent> {
        if self.fail_generation.load(Ordering::SeqCst) {
            return Err(SynapseError::generation_failed(
                request.node_index,
                ServiceErrorKind::RateLimit,
                "slow down",
            ));
        }
        self.generations.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedContent {
            summary: format!(
                "{} explains {}.",
                request.title,
                request.vocabulary_terms.join(" and ")
            ),
            vocabulary: request
                .vocabulary_terms
                .iter()
                .map(|term| VocabularyEntry {
                    term: term.clone(),
                    definition: format!("Meaning of {term}"),
                })
                .collect(),
            thinking_question: format!("What surprised you about {}?", request.title),
            metadata: std::collections::BTreeMap::new(),
        })
    }
}

#[async_trait]
impl EvaluationService for FakeServices {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation> {
        if self.fail_evaluation.load(Ordering::SeqCst) {
            return Err(SynapseError::evaluation_failed(
                ServiceErrorKind::Timeout,
                "evaluator timed out",
            ));
        }
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let weak = request.learner_response.contains("don't know");
        Ok(Evaluation {
            mastery_score: if weak { 0.2 } else { 0.85 },
            grade: if weak { Grade::F } else { Grade::BPlus },
            feedback: format!("Checked against {}", request.target_node_id),
        })
    }
}

#[async_trait]
impl TutorService for FakeServices {
    async fn thinking_feedback(&self, request: &ThinkingRequest) -> Result<ThinkingFeedback> {
        Ok(ThinkingFeedback {
            feedback: format!("Good thought on {}", request.node_id),
        })
    }

    async fn answer(&self, request: &AskRequest) -> Result<TutorAnswer> {
        Ok(TutorAnswer {
            answer: format!("{} is about {}", request.title, request.topic),
        })
    }
}

/// Opens a session on the fixture lesson.
pub async fn open_session(
    services: Arc<FakeServices>,
    store: Arc<dyn ProgressStore>,
    state: Option<ProgressionState>,
) -> LessonProgressionController {
    let LoadedLesson { lesson, content } = load_fixture();
    LessonProgressionController::open(SessionSetup {
        lesson,
        content,
        state,
        services: Services::from_shared(services),
        store,
        events: EventBroadcaster::default(),
        save_debounce: Duration::from_millis(20),
    })
    .await
    .expect("Failed to open session")
}

/// The answer to give for the current recall task: a term to fill for
/// cloze tasks, `None` for full recall.
pub fn next_term(presentation: &synapse_engine::Presentation) -> Option<String> {
    let task = presentation.task.as_ref()?;
    let cloze = task.cloze.as_ref()?;
    cloze
        .blanked_terms
        .iter()
        .find(|term| !task.resolved_terms.contains(term))
        .cloned()
}
