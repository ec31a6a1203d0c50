//! Persistence of progression state, mastery records and generated content.
//!
//! [`ProgressStore`] is the persistence gateway. Progress is one record per
//! lesson, overwritten on every save, so replaying a save is harmless.
//! Mastery records are append-only. [`ProgressWriter`] sits in front of the
//! store and debounces progress saves off the learner's request path.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, SynapseError};
use crate::mastery::MasteryRecord;
use crate::node::GeneratedContent;
use crate::progression::ProgressionState;

// ============================================================================
// ProgressStore
// ============================================================================

/// Loads and saves everything a session needs to resume.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Loads the progression state of a lesson, if any was saved.
    async fn load_progress(&self, lesson_id: &str) -> Result<Option<ProgressionState>>;

    /// Overwrites the progression state of a lesson.
    async fn save_progress(&self, lesson_id: &str, state: &ProgressionState) -> Result<()>;

    /// Appends one mastery record.
    async fn append_mastery(&self, record: &MasteryRecord) -> Result<()>;

    /// Loads every mastery record of a lesson, oldest first.
    async fn load_mastery(&self, lesson_id: &str) -> Result<Vec<MasteryRecord>>;

    /// Stores the generated content of one node.
    async fn save_content(
        &self,
        lesson_id: &str,
        node_index: usize,
        content: &GeneratedContent,
    ) -> Result<()>;

    /// Loads all stored node content of a lesson, keyed by node index.
    async fn load_content(&self, lesson_id: &str) -> Result<BTreeMap<usize, GeneratedContent>>;
}

// ============================================================================
// JsonFileStore
// ============================================================================

/// Stores each lesson as JSON files in one directory.
///
/// - `<id>.progress.json`: the progression state, replaced atomically
/// - `<id>.mastery.jsonl`: one mastery record per line
/// - `<id>.content.json`: generated content by node index
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The directory holding the files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the progress file of a lesson.
    #[must_use]
    pub fn progress_path(&self, lesson_id: &str) -> PathBuf {
        self.dir.join(format!("{}.progress.json", file_stem(lesson_id)))
    }

    /// Path of the mastery log of a lesson.
    #[must_use]
    pub fn mastery_path(&self, lesson_id: &str) -> PathBuf {
        self.dir.join(format!("{}.mastery.jsonl", file_stem(lesson_id)))
    }

    /// Path of the content file of a lesson.
    #[must_use]
    pub fn content_path(&self, lesson_id: &str) -> PathBuf {
        self.dir.join(format!("{}.content.json", file_stem(lesson_id)))
    }

    /// Writes `bytes` to `path` via a temporary file and a rename.
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Lesson ids become file names; anything but `[A-Za-z0-9_-]` becomes `_`.
fn file_stem(lesson_id: &str) -> String {
    lesson_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SynapseError::Io(e)),
    }
}

#[async_trait]
impl ProgressStore for JsonFileStore {
    async fn load_progress(&self, lesson_id: &str) -> Result<Option<ProgressionState>> {
        let path = self.progress_path(lesson_id);
        let Some(contents) = read_optional(&path).await? else {
            return Ok(None);
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| SynapseError::state_corrupted(&path, e.to_string()))
    }

    async fn save_progress(&self, lesson_id: &str, state: &ProgressionState) -> Result<()> {
        let path = self.progress_path(lesson_id);
        let json = serde_json::to_vec_pretty(state)?;
        let _guard = self.write_lock.lock().await;
        self.write_atomic(&path, &json).await?;
        debug!(path = %path.display(), "Saved progress");
        Ok(())
    }

    async fn append_mastery(&self, record: &MasteryRecord) -> Result<()> {
        let path = self.mastery_path(&record.lesson_id);
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn load_mastery(&self, lesson_id: &str) -> Result<Vec<MasteryRecord>> {
        let path = self.mastery_path(lesson_id);
        let Some(contents) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = number + 1,
                    error = %e,
                    "Skipping unreadable mastery record"
                ),
            }
        }
        Ok(records)
    }

    async fn save_content(
        &self,
        lesson_id: &str,
        node_index: usize,
        content: &GeneratedContent,
    ) -> Result<()> {
        let path = self.content_path(lesson_id);
        let _guard = self.write_lock.lock().await;

        let mut all: BTreeMap<usize, GeneratedContent> = match read_optional(&path).await? {
            Some(existing) => serde_json::from_str(&existing)
                .map_err(|e| SynapseError::state_corrupted(&path, e.to_string()))?,
            None => BTreeMap::new(),
        };
        all.insert(node_index, content.clone());

        let json = serde_json::to_vec_pretty(&all)?;
        self.write_atomic(&path, &json).await
    }

    async fn load_content(&self, lesson_id: &str) -> Result<BTreeMap<usize, GeneratedContent>> {
        let path = self.content_path(lesson_id);
        match read_optional(&path).await? {
            Some(contents) => serde_json::from_str(&contents)
                .map_err(|e| SynapseError::state_corrupted(&path, e.to_string())),
            None => Ok(BTreeMap::new()),
        }
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    progress: HashMap<String, ProgressionState>,
    mastery: HashMap<String, Vec<MasteryRecord>>,
    content: HashMap<String, BTreeMap<usize, GeneratedContent>>,
    progress_saves: usize,
}

/// In-process store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of progress saves performed so far.
    pub async fn progress_saves(&self) -> usize {
        self.inner.lock().await.progress_saves
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn load_progress(&self, lesson_id: &str) -> Result<Option<ProgressionState>> {
        Ok(self.inner.lock().await.progress.get(lesson_id).cloned())
    }

    async fn save_progress(&self, lesson_id: &str, state: &ProgressionState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.progress.insert(lesson_id.to_string(), state.clone());
        inner.progress_saves += 1;
        Ok(())
    }

    async fn append_mastery(&self, record: &MasteryRecord) -> Result<()> {
        self.inner
            .lock()
            .await
            .mastery
            .entry(record.lesson_id.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn load_mastery(&self, lesson_id: &str) -> Result<Vec<MasteryRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .mastery
            .get(lesson_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_content(
        &self,
        lesson_id: &str,
        node_index: usize,
        content: &GeneratedContent,
    ) -> Result<()> {
        self.inner
            .lock()
            .await
            .content
            .entry(lesson_id.to_string())
            .or_default()
            .insert(node_index, content.clone());
        Ok(())
    }

    async fn load_content(&self, lesson_id: &str) -> Result<BTreeMap<usize, GeneratedContent>> {
        Ok(self
            .inner
            .lock()
            .await
            .content
            .get(lesson_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// ProgressWriter
// ============================================================================

/// Latest submitted state, tagged with a version that only grows.
type Versioned = (u64, Option<ProgressionState>);

struct WriterShared {
    store: Arc<dyn ProgressStore>,
    lesson_id: String,
    saved_version: Mutex<u64>,
}

impl WriterShared {
    /// Saves the latest state unless a newer or equal version is already saved.
    async fn save_latest(&self, latest: &watch::Receiver<Versioned>) -> Result<()> {
        let mut saved = self.saved_version.lock().await;
        let (version, state) = latest.borrow().clone();
        let Some(state) = state else {
            return Ok(());
        };
        if version <= *saved {
            return Ok(());
        }
        self.store.save_progress(&self.lesson_id, &state).await?;
        *saved = version;
        Ok(())
    }
}

/// Debounced, fire-and-forget progress saver.
///
/// [`submit`](Self::submit) never blocks or fails; a background task saves
/// the most recent state at most once per debounce window. Save failures are
/// logged and never reach the session.
pub struct ProgressWriter {
    sender: watch::Sender<Versioned>,
    receiver: watch::Receiver<Versioned>,
    shared: Arc<WriterShared>,
    task: JoinHandle<()>,
}

impl ProgressWriter {
    /// Starts the background writer. Must be called within a Tokio runtime.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn ProgressStore>,
        lesson_id: impl Into<String>,
        debounce: Duration,
    ) -> Self {
        let (sender, receiver) = watch::channel((0, None));
        let shared = Arc::new(WriterShared {
            store,
            lesson_id: lesson_id.into(),
            saved_version: Mutex::new(0),
        });

        let mut background = receiver.clone();
        let task_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            while background.changed().await.is_ok() {
                tokio::time::sleep(debounce).await;
                background.borrow_and_update();
                if let Err(e) = task_shared.save_latest(&background).await {
                    warn!(lesson_id = %task_shared.lesson_id, error = %e, "Failed to save progress");
                }
            }
        });

        Self {
            sender,
            receiver,
            shared,
            task,
        }
    }

    /// Queues `state` to be saved.
    pub fn submit(&self, state: &ProgressionState) {
        self.sender.send_modify(|(version, slot)| {
            *version += 1;
            *slot = Some(state.clone());
        });
    }

    /// Saves the latest submitted state now.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the save fails.
    pub async fn flush(&self) -> Result<()> {
        self.shared.save_latest(&self.receiver).await
    }
}

impl std::fmt::Debug for ProgressWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressWriter")
            .field("lesson_id", &self.shared.lesson_id)
            .finish_non_exhaustive()
    }
}

impl Drop for ProgressWriter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::mastery::Grade;
    use crate::progression::Phase;
    use crate::recall_queue::RecallType;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("synapse_store_{name}_{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    fn record(lesson_id: &str, score: f64) -> MasteryRecord {
        MasteryRecord {
            lesson_id: lesson_id.to_string(),
            node_id: "n1".to_string(),
            node_index: 1,
            recall_type: RecallType::FullBackward,
            term: None,
            hint_node_ids: vec!["n2".to_string()],
            response: "answer".to_string(),
            score,
            grade: Grade::B,
            feedback: "ok".to_string(),
            cycle: 1,
            attempted_at: Utc::now(),
        }
    }

    fn content(summary: &str) -> GeneratedContent {
        GeneratedContent {
            summary: summary.to_string(),
            vocabulary: Vec::new(),
            thinking_question: "Why?".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    // ------------------------------------------------------------------------
    // JsonFileStore
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_json_store_progress_round_trip() {
        let dir = temp_dir("progress");
        let store = JsonFileStore::new(&dir);

        assert!(store.load_progress("lesson-1").await.unwrap().is_none());

        let state = ProgressionState {
            current_node_index: 3,
            completed_cycles: 1,
            recall_cycle: 1,
            ..ProgressionState::new()
        };
        store.save_progress("lesson-1", &state).await.unwrap();
        store.save_progress("lesson-1", &state).await.unwrap();

        let loaded = store.load_progress("lesson-1").await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(!store.progress_path("lesson-1").with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_json_store_corrupted_progress() {
        let dir = temp_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let store = JsonFileStore::new(&dir);
        std::fs::write(store.progress_path("l"), "{ nope").unwrap();

        let err = store.load_progress("l").await.unwrap_err();
        assert!(matches!(err, SynapseError::StateFileCorrupted { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_json_store_mastery_appends_and_skips_torn_lines() {
        let dir = temp_dir("mastery");
        let store = JsonFileStore::new(&dir);

        store.append_mastery(&record("l", 0.5)).await.unwrap();
        store.append_mastery(&record("l", 0.9)).await.unwrap();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(store.mastery_path("l"))
            .unwrap();
        std::io::Write::write_all(&mut file, b"{\"lessonId\": \"l\", \"trunc").unwrap();

        let records = store.load_mastery("l").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!((records[1].score - 0.9).abs() < f64::EPSILON);
        assert!(store.load_mastery("other").await.unwrap().is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_json_store_content_merges_nodes() {
        let dir = temp_dir("content");
        let store = JsonFileStore::new(&dir);

        store.save_content("l", 0, &content("zero")).await.unwrap();
        store.save_content("l", 2, &content("two")).await.unwrap();

        let all = store.load_content("l").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[&2].summary, "two");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_memory_store_keeps_lessons_apart() {
        tokio_test::block_on(async {
            let store = MemoryStore::new();
            store.append_mastery(&record("a", 0.4)).await.unwrap();
            store.save_content("a", 1, &content("one")).await.unwrap();

            assert_eq!(store.load_mastery("a").await.unwrap().len(), 1);
            assert!(store.load_mastery("b").await.unwrap().is_empty());
            assert!(store.load_content("b").await.unwrap().is_empty());
            assert!(store.load_progress("a").await.unwrap().is_none());
        });
    }

    #[test]
    fn test_file_stem_sanitizes_ids() {
        assert_eq!(file_stem("intro to ../rust"), "intro_to____rust");
        assert_eq!(file_stem("lesson-42_a"), "lesson-42_a");
    }

    // ------------------------------------------------------------------------
    // ProgressWriter
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_writer_coalesces_bursts() {
        let store = Arc::new(MemoryStore::new());
        let writer = ProgressWriter::spawn(store.clone(), "l", Duration::from_millis(50));

        for index in 0..5 {
            writer.submit(&ProgressionState {
                current_node_index: index,
                ..ProgressionState::new()
            });
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let saved = store.load_progress("l").await.unwrap().unwrap();
        assert_eq!(saved.current_node_index, 4);
        assert_eq!(store.progress_saves().await, 1);
    }

    #[tokio::test]
    async fn test_writer_flush_saves_immediately_and_once() {
        let store = Arc::new(MemoryStore::new());
        let writer = ProgressWriter::spawn(store.clone(), "l", Duration::from_secs(60));

        let state = ProgressionState {
            current_phase: Phase::Complete,
            ..ProgressionState::new()
        };
        writer.submit(&state);
        writer.flush().await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(store.load_progress("l").await.unwrap(), Some(state));
        assert_eq!(store.progress_saves().await, 1);
    }

    #[tokio::test]
    async fn test_writer_flush_without_submissions_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let writer = ProgressWriter::spawn(store.clone(), "l", Duration::from_millis(10));
        writer.flush().await.unwrap();
        assert!(store.load_progress("l").await.unwrap().is_none());
    }
}
