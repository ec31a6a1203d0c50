//! End-to-end progression scenarios for Synapse.
//!
//! These tests drive a real session controller over the sample lesson with
//! in-memory services and a JSON file store, then check what was persisted
//! and what the report makes of it.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{load_fixture, next_term, open_session, scratch_dir, FakeServices};
use synapse_engine::{
    Config, Difficulty, EventBroadcaster, JsonFileStore, LessonProgressionController,
    LoadedLesson, MasteryRecord, MemoryStore, NodeContent, NodeStatus, Phase, ProgressStore,
    RecallSchedule, RecallType, Services, SessionSetup, SubPhase, SynapseError,
};
use synapse_report::{AttemptInput, LessonReport, NodeInput, ReportInput, ReportStatus};

/// Answers the current recall task. The term "droplets" gets a weak answer.
async fn answer_current_task(controller: &mut LessonProgressionController) -> (usize, bool) {
    let presentation = controller.presentation().await;
    let node_index = presentation
        .task
        .as_ref()
        .map(|t| t.task.node_index)
        .expect("Recall phase without a task");
    let term = next_term(&presentation);
    let response = match term.as_deref() {
        Some("droplets") => "I don't know".to_string(),
        Some(term) => term.to_string(),
        None => "Water moves between the sea, the sky and the land.".to_string(),
    };

    let outcome = controller
        .submit_recall(&response, term.as_deref())
        .await
        .expect("Recall answer rejected");
    (node_index, outcome.task_resolved)
}

/// Drives the session until it completes, returning resolved task targets
/// per cycle.
async fn run_to_completion(controller: &mut LessonProgressionController) -> Vec<Vec<usize>> {
    let mut cycles: Vec<Vec<usize>> = Vec::new();

    for _ in 0..200 {
        let state = controller.state().clone();
        match state.current_phase {
            Phase::Complete => return cycles,
            Phase::Teaching => {
                controller.continue_lesson().await.expect("Continue failed");
            }
            Phase::Recall => {
                if cycles.len() < state.recall_cycle {
                    cycles.push(Vec::new());
                }
                let (node_index, resolved) = answer_current_task(controller).await;
                if resolved {
                    if let Some(cycle) = cycles.last_mut() {
                        cycle.push(node_index);
                    }
                }
            }
        }
    }

    panic!("Lesson did not complete: {}", controller.state());
}

fn report_input(controller: &LessonProgressionController, mastery: &[MasteryRecord]) -> ReportInput {
    let lesson = controller.lesson();
    ReportInput {
        topic: lesson.topic.clone(),
        difficulty: lesson.difficulty.to_string(),
        status: if controller.state().is_complete() {
            ReportStatus::Completed
        } else {
            ReportStatus::InProgress
        },
        completed_cycles: controller.state().completed_cycles,
        completed_at: mastery.last().map(|r| r.attempted_at),
        generated_at: chrono::Utc::now(),
        nodes: lesson
            .nodes
            .iter()
            .map(|node| NodeInput::new(node.id.clone(), node.title.clone()))
            .collect(),
        attempts: mastery
            .iter()
            .map(|r| AttemptInput {
                node_id: r.node_id.clone(),
                recall_type: r.recall_type.as_str().to_string(),
                term: r.term.clone(),
                response: r.response.clone(),
                score: r.score,
                grade: r.grade.to_string(),
                cycle: r.cycle,
                attempted_at: r.attempted_at,
            })
            .collect(),
    }
}

async fn wait_for_generations(
    controller: &LessonProgressionController,
    indices: impl IntoIterator<Item = usize> + Clone,
) {
    for _ in 0..200 {
        let mut busy = false;
        for index in indices.clone() {
            busy |= controller.gate().is_in_flight(index).await;
        }
        if !busy {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Generations did not settle");
}

// ============================================================================
// Fixture Tests
// ============================================================================

#[test]
fn test_sample_lesson_loads() {
    let LoadedLesson { lesson, content } = load_fixture();

    assert_eq!(lesson.id, "water-cycle");
    assert_eq!(lesson.difficulty, Difficulty::Beginner);
    assert_eq!(lesson.node_count(), 6);
    assert!(content.iter().all(NodeContent::is_complete));
}

#[test]
fn test_sample_config_loads() {
    let config = Config::load_from_dir(&common::fixture_dir()).expect("Config should load");

    assert_eq!(config.lesson, "lesson.json");
    assert_eq!(config.save_debounce_ms, 50);
    assert_eq!(config.event_buffer_size, 100);
    assert_eq!(config.services.timeout_seconds, 30);
    assert_eq!(config.services.api_key_env.as_deref(), Some("SYNAPSE_API_KEY"));
}

#[test]
fn test_sample_lesson_schedule() {
    let LoadedLesson { lesson, .. } = load_fixture();
    let schedule = RecallSchedule::for_lesson(&lesson.nodes);

    assert_eq!(schedule.cycles.len(), 2);
    assert!(!schedule.cycles[0].is_final);
    assert_eq!(schedule.cycles[0].tasks.len(), 3);
    assert!(schedule.cycles[1].is_final);
    assert_eq!(schedule.cycles[1].tasks.len(), 5);
    assert_eq!(schedule.cycles[1].after_node, 5);
    assert!(schedule.trailing_nodes.is_empty());
}

// ============================================================================
// Full Session
// ============================================================================

#[tokio::test]
async fn test_full_lesson_is_persisted() {
    let dir = scratch_dir("full_lesson");
    let store = Arc::new(JsonFileStore::new(&dir));
    let services = FakeServices::new();
    let mut controller = open_session(Arc::clone(&services), store.clone(), None).await;

    let cycles = run_to_completion(&mut controller).await;

    assert_eq!(cycles, vec![vec![1, 0, 2], vec![1, 4, 3, 5, 4]]);
    assert_eq!(controller.state().completed_cycles, 2);
    assert_eq!(controller.state().current_node_index, 5);
    // Two cloze tasks with two blanked terms each.
    assert_eq!(services.evaluations.load(Ordering::SeqCst), 10);
    assert_eq!(services.generations.load(Ordering::SeqCst), 0);

    controller.flush().await.expect("Flush failed");

    let saved = store
        .load_progress("water-cycle")
        .await
        .expect("Load failed")
        .expect("Progress was not saved");
    assert!(saved.is_complete());
    assert_eq!(saved.completed_cycles, 2);

    let mastery = store.load_mastery("water-cycle").await.expect("Load failed");
    assert_eq!(mastery.len(), 10);
    let partial_terms: Vec<_> = mastery
        .iter()
        .filter(|r| r.recall_type == RecallType::Partial)
        .filter_map(|r| r.term.clone())
        .collect();
    assert_eq!(partial_terms.len(), 4);
    assert!(partial_terms.contains(&"droplets".to_string()));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_completed_session_rejects_more_input() {
    let store = Arc::new(MemoryStore::new());
    let mut controller = open_session(FakeServices::new(), store, None).await;
    run_to_completion(&mut controller).await;

    let result = controller.continue_lesson().await;
    assert!(matches!(result, Err(SynapseError::InvalidAction { .. })));

    let result = controller.submit_recall("anything", None).await;
    assert!(matches!(result, Err(SynapseError::InvalidAction { .. })));
}

#[tokio::test]
async fn test_report_from_session_records() {
    let store = Arc::new(MemoryStore::new());
    let mut controller = open_session(FakeServices::new(), store, None).await;
    run_to_completion(&mut controller).await;

    let input = report_input(&controller, controller.mastery());
    let report = LessonReport::build(&input).expect("Report should build");

    assert_eq!(report.status, ReportStatus::Completed);
    assert_eq!(report.summary.total_attempts, 10);
    assert_eq!(report.cycles.len(), 2);

    let weak: Vec<&str> = report.weak_nodes.iter().map(|w| w.id.as_str()).collect();
    assert_eq!(weak, vec!["condensation"]);

    let review: Vec<&str> = report
        .vocabulary_to_review
        .iter()
        .map(|v| v.term.as_str())
        .collect();
    assert_eq!(review, vec!["droplets"]);

    let mastery = report.summary.vocabulary_mastery.expect("Partial attempts exist");
    assert!((mastery - 0.6875).abs() < 1e-9);
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_resume_mid_recall_cycle() {
    let dir = scratch_dir("resume");
    let store = Arc::new(JsonFileStore::new(&dir));
    let mut controller = open_session(FakeServices::new(), store.clone(), None).await;

    // Stop right after the first cycle's cloze task is resolved.
    for _ in 0..50 {
        let state = controller.state();
        if state.is_recall() && state.recall_step == 2 {
            break;
        }
        if state.is_recall() {
            answer_current_task(&mut controller).await;
        } else {
            controller.continue_lesson().await.expect("Continue failed");
        }
    }
    let before = controller.state().clone();
    assert_eq!(before.recall_cycle, 1);
    assert_eq!(before.current_node_index, 0);
    controller.flush().await.expect("Flush failed");
    drop(controller);

    let saved = store.load_progress("water-cycle").await.expect("Load failed");
    assert_eq!(saved.as_ref(), Some(&before));

    let mut resumed = open_session(FakeServices::new(), store.clone(), saved).await;
    assert_eq!(resumed.state(), &before);
    assert_eq!(resumed.queue().len(), 3);
    assert_eq!(resumed.mastery().len(), 2);
    let task = resumed.current_task().expect("Resumed without a task");
    assert_eq!(task.recall_type, RecallType::FullBackward);
    assert_eq!(task.node_index, 0);

    let cycles = run_to_completion(&mut resumed).await;
    // The resumed cycle only reports the tasks left in it.
    assert_eq!(cycles, vec![vec![0, 2], vec![1, 4, 3, 5, 4]]);

    let _ = std::fs::remove_dir_all(&dir);
}

// ============================================================================
// Content Readiness
// ============================================================================

#[tokio::test]
async fn test_pending_content_holds_position_until_generated() {
    let services = FakeServices::new();
    services.fail_generation.store(true, Ordering::SeqCst);

    let LoadedLesson { lesson, .. } = load_fixture();
    let node_count = lesson.node_count();
    let mut controller = LessonProgressionController::open(SessionSetup {
        lesson,
        content: vec![NodeContent::Pending; node_count],
        state: None,
        services: Services::from_shared(Arc::clone(&services)),
        store: Arc::new(MemoryStore::new()),
        events: EventBroadcaster::default(),
        save_debounce: Duration::from_millis(20),
    })
    .await
    .expect("Failed to open session");

    // The first node cannot be left while its content is missing.
    let before = controller.state().clone();
    match controller.continue_lesson().await {
        Err(e @ SynapseError::ContentNotReady { node_index: 0 }) => assert!(e.is_transient()),
        other => panic!("Expected ContentNotReady for node 0, got {other:?}"),
    }
    assert_eq!(controller.state(), &before);

    // Let the failing look-ahead runs finish before generation recovers.
    wait_for_generations(&controller, [0, 1]).await;
    services.fail_generation.store(false, Ordering::SeqCst);
    let status = controller.retry_generation(0).await.expect("Retry failed");
    assert_eq!(status, NodeStatus::Complete);
    services.fail_generation.store(true, Ordering::SeqCst);

    let presentation = controller.continue_lesson().await.expect("Sub-phase change failed");
    assert_eq!(presentation.sub_phase, SubPhase::Question);

    let result = controller.continue_lesson().await;
    match result {
        Err(e @ SynapseError::ContentNotReady { node_index: 1 }) => assert!(e.is_transient()),
        other => panic!("Expected ContentNotReady for node 1, got {other:?}"),
    }
    assert_eq!(controller.state().current_node_index, 0);
    assert_eq!(controller.state().sub_phase, SubPhase::Question);

    services.fail_generation.store(false, Ordering::SeqCst);
    let status = controller.retry_generation(1).await.expect("Retry failed");
    assert_eq!(status, NodeStatus::Complete);

    let presentation = controller.continue_lesson().await.expect("Continue failed");
    assert_eq!(presentation.node_index, 1);
    assert_eq!(presentation.node_status, NodeStatus::Complete);
    assert!(presentation.content.is_some());
}

#[tokio::test]
async fn test_failed_evaluation_keeps_task_open() {
    let services = FakeServices::new();
    let store = Arc::new(MemoryStore::new());
    let mut controller = open_session(Arc::clone(&services), store, None).await;

    while !controller.state().is_recall() {
        controller.continue_lesson().await.expect("Continue failed");
    }
    let before = controller.state().clone();
    let term = next_term(&controller.presentation().await);

    services.fail_evaluation.store(true, Ordering::SeqCst);
    let result = controller.submit_recall("condensation", term.as_deref()).await;
    assert!(matches!(result, Err(SynapseError::EvaluationFailed { .. })));
    assert_eq!(controller.state(), &before);
    assert!(controller.mastery().is_empty());

    services.fail_evaluation.store(false, Ordering::SeqCst);
    let outcome = controller
        .submit_recall("condensation", term.as_deref())
        .await
        .expect("Retry should succeed");
    assert!(!outcome.task_resolved);
    assert_eq!(controller.mastery().len(), 1);
}
