//! Synapse CLI
//!
//! Serves a lesson session, prints recall schedules and writes lesson reports.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use synapse_engine::{
    create_router_shared, AppState, Config, EventBroadcaster, HttpServices, JsonFileStore, Lesson,
    LessonProgressionController, LoadedLesson, MasteryRecord, NodeContent, NodeSequence,
    ProgressStore, ProgressionState, RecallSchedule, Services, SessionSetup,
};
use synapse_report::{
    json::JsonGenerator, AttemptInput, LessonReport, MarkdownGenerator, NodeInput, ReportInput,
    ReportStatus, VocabularyItem,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

const MARKDOWN_REPORT: &str = "synapse-report.md";
const JSON_REPORT: &str = "synapse-report.json";

/// Synapse - Lesson Progression Engine
///
/// Teaches a lesson node by node and interleaves spaced recall cycles that
/// ask the learner to reconstruct what they were taught.
#[derive(Parser, Debug)]
#[command(name = "synapse")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a lesson session over HTTP and WebSocket
    Serve(ServeArgs),
    /// Print the recall schedule of a lesson with N nodes
    Schedule {
        /// Number of nodes in the lesson
        #[arg(short, long)]
        nodes: usize,

        /// Print the schedule as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write reports from stored progress and mastery records
    Report(LessonArgs),
}

#[derive(Args, Debug)]
struct LessonArgs {
    /// Path to the lesson file (default: the config's lesson)
    #[arg(value_name = "LESSON")]
    lesson: Option<String>,

    /// Path to configuration file (default: synapse.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Output directory for reports
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<String>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[command(flatten)]
    lesson: LessonArgs,

    /// Port for the HTTP API server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Continue an unfinished session instead of refusing to start
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Schedule { nodes, json } => print_schedule(nodes, json),
        Command::Report(args) => report(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

// ============================================================================
// serve
// ============================================================================

/// Runs one lesson session until Ctrl+C.
async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(&args.lesson)?;
    print_config(&config);

    tracing::info!(lesson = %config.lesson, "Loading lesson");
    let LoadedLesson { lesson, content } = Lesson::load(&config.lesson)?;
    print_lesson_info(&lesson);

    let store = Arc::new(JsonFileStore::new(config.state_dir_path()));
    let state = restore_state(store.as_ref(), &lesson, args.resume).await?;

    let services = Services::from_shared(Arc::new(HttpServices::new(&config.services)?));
    let controller = LessonProgressionController::open(SessionSetup {
        lesson,
        content,
        state,
        services,
        store,
        events: EventBroadcaster::new(config.event_buffer_size),
        save_debounce: config.save_debounce(),
    })
    .await?;
    println!("Session at {}", controller.state());

    let app_state = Arc::new(AppState::new(controller));
    let router = create_router_shared(Arc::clone(&app_state));

    let addr: SocketAddr = ([127, 0, 0, 1], args.port).into();
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("Lesson API running on http://{addr}/api");
    println!("Events streaming on ws://{addr}/ws");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    println!();
    println!("Shutting down...");

    let session = app_state.session.lock().await;
    if let Err(e) = session.flush().await {
        tracing::warn!(error = %e, "Failed to save final progress");
    }

    let input = report_input(
        session.lesson(),
        &session.gate().snapshot().await,
        session.state(),
        session.mastery(),
    );
    drop(session);

    print_summary(&input);
    generate_reports(&input, Path::new(&config.output_dir))
}

/// Loads stored progress, refusing to clobber an unfinished session.
async fn restore_state(
    store: &dyn ProgressStore,
    lesson: &Lesson,
    resume: bool,
) -> anyhow::Result<Option<ProgressionState>> {
    match store.load_progress(&lesson.id).await? {
        Some(state) if !state.is_complete() => {
            if !resume {
                anyhow::bail!(
                    "Lesson '{}' has an unfinished session ({state})\n\nSuggestion: Use --resume to continue it, or remove its files from the state directory to start over",
                    lesson.id
                );
            }
            println!("Resuming session: {state}");
            Ok(Some(state))
        }
        Some(_) => {
            println!("Previous session is complete, starting fresh");
            Ok(None)
        }
        None => {
            if resume {
                println!("No saved session found, starting fresh");
            }
            Ok(None)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

// ============================================================================
// schedule
// ============================================================================

fn print_schedule(nodes: usize, json: bool) -> anyhow::Result<()> {
    let sequence = NodeSequence::numbered(nodes)?;
    let schedule = RecallSchedule::for_lesson(&sequence);

    if json {
        println!("{}", serde_json::to_string_pretty(&schedule)?);
        return Ok(());
    }

    println!(
        "Recall schedule for {} nodes ({} cycles)",
        schedule.node_count,
        schedule.cycles.len()
    );

    for cycle in &schedule.cycles {
        println!();
        println!(
            "Cycle {}{} after node #{}",
            cycle.cycle,
            if cycle.is_final { " (final)" } else { "" },
            cycle.after_node
        );
        for task in &cycle.tasks {
            let hints = if task.hint_node_indices.is_empty() {
                "-".to_string()
            } else {
                task.hint_node_indices
                    .iter()
                    .map(|i| format!("#{i}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            println!(
                "  step {}  {:<19} node #{:<3} hints: {hints}",
                task.stage.step(),
                task.recall_type.as_str(),
                task.node_index
            );
        }
    }

    if !schedule.trailing_nodes.is_empty() {
        println!();
        println!(
            "Taught without recall: {}",
            schedule
                .trailing_nodes
                .iter()
                .map(|i| format!("#{i}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(())
}

// ============================================================================
// report
// ============================================================================

/// Writes reports for a lesson from the progress store alone.
async fn report(args: LessonArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let LoadedLesson {
        lesson,
        mut content,
    } = Lesson::load(&config.lesson)?;

    let store = JsonFileStore::new(config.state_dir_path());
    let state = store
        .load_progress(&lesson.id)
        .await?
        .unwrap_or_default();
    let mastery = store.load_mastery(&lesson.id).await?;
    for (index, generated) in store.load_content(&lesson.id).await? {
        if let Some(slot) = content.get_mut(index) {
            if !slot.is_complete() {
                *slot = NodeContent::Complete(generated);
            }
        }
    }

    let input = report_input(&lesson, &content, &state, &mastery);
    print_summary(&input);
    generate_reports(&input, Path::new(&config.output_dir))
}

// ============================================================================
// Helpers
// ============================================================================

/// Loads configuration and applies CLI overrides.
fn load_config(args: &LessonArgs) -> anyhow::Result<Config> {
    let mut config = match args.config.as_deref() {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path)?
        }
        None => Config::load()?,
    };

    if let Some(ref lesson) = args.lesson {
        config.lesson.clone_from(lesson);
    }
    if let Some(ref output_dir) = args.output_dir {
        config.output_dir.clone_from(output_dir);
    }

    // Re-validate after overrides
    config.validate()?;
    Ok(config)
}

fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Lesson: {}", config.lesson);
    println!("  State directory: {}", config.state_dir);
    println!("  Output directory: {}", config.output_dir);
    println!("  Services: {}", config.services.base_url);
}

fn print_lesson_info(lesson: &Lesson) {
    println!();
    println!("Lesson loaded:");
    println!("  Topic: {}", lesson.topic);
    println!("  Difficulty: {}", lesson.difficulty);
    println!("  Nodes: {}", lesson.node_count());
    println!(
        "  Recall cycles: {}",
        RecallSchedule::for_lesson(&lesson.nodes).cycles.len()
    );
}

fn print_summary(input: &ReportInput) {
    println!();
    println!("=== Synapse Lesson Summary ===");
    println!("Status: {}", input.status);
    println!("Recall cycles completed: {}", input.completed_cycles);
    println!("Recall attempts: {}", input.attempts.len());
}

fn generate_reports(input: &ReportInput, output_dir: &Path) -> anyhow::Result<()> {
    println!();
    println!("Generating reports...");

    let report = LessonReport::build(input)?;

    std::fs::create_dir_all(output_dir)?;

    let md_path: PathBuf = output_dir.join(MARKDOWN_REPORT);
    std::fs::write(&md_path, MarkdownGenerator::new(&report).generate())?;
    println!("  Markdown report: {}", md_path.display());

    let json_path = output_dir.join(JSON_REPORT);
    JsonGenerator::new(&report).write_to_file(&json_path, true)?;
    println!("  JSON report: {}", json_path.display());

    if !report.weak_nodes.is_empty() {
        println!();
        println!("Nodes to review: {}", report.weak_nodes.len());
    }

    Ok(())
}

/// Flattens engine state into the report crate's input.
fn report_input(
    lesson: &Lesson,
    content: &[NodeContent],
    state: &ProgressionState,
    mastery: &[MasteryRecord],
) -> ReportInput {
    let nodes = lesson
        .nodes
        .iter()
        .map(|node| {
            let generated = content.get(node.position).and_then(NodeContent::as_complete);
            NodeInput {
                id: node.id.clone(),
                title: node.title.clone(),
                summary: generated.map(|g| g.summary.clone()),
                vocabulary: generated
                    .map(|g| {
                        g.vocabulary
                            .iter()
                            .map(|v| VocabularyItem {
                                term: v.term.clone(),
                                definition: v.definition.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
                thinking_question: generated.map(|g| g.thinking_question.clone()),
            }
        })
        .collect();

    let attempts = mastery
        .iter()
        .map(|record| AttemptInput {
            node_id: record.node_id.clone(),
            recall_type: record.recall_type.as_str().to_string(),
            term: record.term.clone(),
            response: record.response.clone(),
            score: record.score,
            grade: record.grade.to_string(),
            cycle: record.cycle,
            attempted_at: record.attempted_at,
        })
        .collect();

    let (status, completed_at) = if state.is_complete() {
        (
            ReportStatus::Completed,
            mastery.iter().map(|r| r.attempted_at).max(),
        )
    } else {
        (ReportStatus::InProgress, None)
    };

    ReportInput {
        topic: lesson.topic.clone(),
        difficulty: lesson.difficulty.to_string(),
        status,
        completed_cycles: state.completed_cycles,
        completed_at,
        generated_at: Utc::now(),
        nodes,
        attempts,
    }
}
