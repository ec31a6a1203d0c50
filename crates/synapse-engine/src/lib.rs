//! Synapse Lesson Engine
//!
//! Lesson progression, recall scheduling, content readiness and the HTTP and
//! WebSocket surface of one lesson session.

pub mod api;
pub mod cloze;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod http_services;
pub mod mastery;
pub mod node;
pub mod presentation;
pub mod progression;
pub mod readiness;
pub mod recall_queue;
pub mod services;
pub mod store;

pub use api::{
    create_router, create_router_shared, AppState, AskSubmission, ErrorResponse,
    GenerationStatus, LessonOutline, OutlineNode, RecallSubmission, ThinkingSubmission,
};
pub use cloze::{render_cloze, ClozeText, BLANK};
pub use config::{Config, ServicesConfig, CONFIG_FILE_NAME};
pub use controller::{LessonProgressionController, RecallOutcome, SessionSetup};
pub use error::{Result, ServiceErrorKind, SynapseError};
pub use events::{EventBroadcaster, LessonEvent};
pub use http_services::HttpServices;
pub use mastery::{Grade, MasteryBand, MasteryRecord};
pub use node::{
    Difficulty, GeneratedContent, KnowledgeNode, Lesson, LoadedLesson, NodeContent,
    NodeSequence, NodeSpec, NodeStatus, VocabularyEntry, MAX_LESSON_SIZE,
};
pub use presentation::{CameraHint, CameraMode, Presentation, TaskPresentation};
pub use progression::{Phase, ProgressionState, SubPhase, Transition};
pub use readiness::ContentReadinessGate;
pub use recall_queue::{
    checked_recall_queue, generate_recall_queue, RecallSchedule, RecallStage, RecallTask,
    RecallType, ScheduledCycle, BLOCK_SIZE,
};
pub use services::{
    AskRequest, ContentService, Evaluation, EvaluationRequest, EvaluationService,
    GenerationRequest, Services, ThinkingFeedback, ThinkingRequest, TutorAnswer, TutorService,
};
pub use store::{JsonFileStore, MemoryStore, ProgressStore, ProgressWriter};
