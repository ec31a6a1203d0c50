//! Per-node content readiness and look-ahead generation.
//!
//! The gate owns every node's content slot and guarantees at most one
//! generation in flight per node. Generations run on their own Tokio tasks;
//! their results are applied whenever they land, even if the learner has
//! moved on, and never drive a progression transition.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceErrorKind, SynapseError};
use crate::events::{EventBroadcaster, LessonEvent};
use crate::node::{GeneratedContent, Lesson, NodeContent, NodeStatus};
use crate::services::{ContentService, GenerationRequest};
use crate::store::ProgressStore;

struct GateInner {
    lesson: Arc<Lesson>,
    content: RwLock<Vec<NodeContent>>,
    in_flight: Mutex<HashSet<usize>>,
    finished: Notify,
    service: Arc<dyn ContentService>,
    events: EventBroadcaster,
    store: Option<Arc<dyn ProgressStore>>,
}

/// Tracks which nodes have content and requests what is missing.
///
/// Cloning is cheap; clones share the same slots.
#[derive(Clone)]
pub struct ContentReadinessGate {
    inner: Arc<GateInner>,
}

impl std::fmt::Debug for ContentReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentReadinessGate")
            .field("lesson_id", &self.inner.lesson.id)
            .finish_non_exhaustive()
    }
}

impl ContentReadinessGate {
    /// Creates a gate over `lesson`.
    ///
    /// `content` is padded with `Pending` (or truncated) to one slot per
    /// node. When a store is given, generated content is saved to it.
    #[must_use]
    pub fn new(
        lesson: Arc<Lesson>,
        mut content: Vec<NodeContent>,
        service: Arc<dyn ContentService>,
        events: EventBroadcaster,
        store: Option<Arc<dyn ProgressStore>>,
    ) -> Self {
        content.resize(lesson.node_count(), NodeContent::Pending);
        Self {
            inner: Arc::new(GateInner {
                lesson,
                content: RwLock::new(content),
                in_flight: Mutex::new(HashSet::new()),
                finished: Notify::new(),
                service,
                events,
                store,
            }),
        }
    }

    /// Makes sure node `index` has or is getting content.
    ///
    /// No-op if the node is complete, already generating or out of range.
    /// Returns whether a new generation was started.
    pub async fn ensure_ready(&self, index: usize) -> bool {
        self.start(index).await.is_some()
    }

    /// Calls [`ensure_ready`](Self::ensure_ready) for each index.
    pub async fn ensure_window(&self, indices: impl IntoIterator<Item = usize>) {
        for index in indices {
            self.ensure_ready(index).await;
        }
    }

    /// Generates node `index` now, or waits for the generation already running.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an out-of-range index, or the generation
    /// error when this call started the generation and it failed.
    pub async fn retry(&self, index: usize) -> Result<NodeStatus> {
        if index >= self.inner.lesson.node_count() {
            return Err(SynapseError::invalid_request(format!(
                "node {index} does not exist in a lesson of {} nodes",
                self.inner.lesson.node_count()
            )));
        }

        loop {
            // Registered before checking so a completion in between is not missed.
            let finished = self.inner.finished.notified();

            if let Some(handle) = self.start(index).await {
                handle.await.map_err(|e| {
                    SynapseError::generation_failed(index, ServiceErrorKind::Other, e.to_string())
                })??;
                break;
            }
            if self.is_ready(index).await {
                break;
            }
            if self.is_in_flight(index).await {
                // Someone else's run; if it fails the next pass starts our own.
                finished.await;
            }
        }

        Ok(self.status(index).await)
    }

    /// Whether node `index` has content.
    pub async fn is_ready(&self, index: usize) -> bool {
        self.inner
            .content
            .read()
            .await
            .get(index)
            .is_some_and(NodeContent::is_complete)
    }

    /// Whether a generation for node `index` is running.
    pub async fn is_in_flight(&self, index: usize) -> bool {
        self.inner.in_flight.lock().await.contains(&index)
    }

    /// Status of node `index`; out-of-range nodes report pending.
    pub async fn status(&self, index: usize) -> NodeStatus {
        self.inner
            .content
            .read()
            .await
            .get(index)
            .map_or(NodeStatus::PendingContent, NodeContent::status)
    }

    /// Status of every node, in order.
    pub async fn statuses(&self) -> Vec<NodeStatus> {
        self.inner
            .content
            .read()
            .await
            .iter()
            .map(NodeContent::status)
            .collect()
    }

    /// Generated content of node `index`, if complete.
    pub async fn content(&self, index: usize) -> Option<GeneratedContent> {
        self.inner
            .content
            .read()
            .await
            .get(index)
            .and_then(NodeContent::as_complete)
            .cloned()
    }

    /// Copy of every content slot.
    pub async fn snapshot(&self) -> Vec<NodeContent> {
        self.inner.content.read().await.clone()
    }

    async fn start(&self, index: usize) -> Option<JoinHandle<Result<()>>> {
        let mut in_flight = self.inner.in_flight.lock().await;
        if in_flight.contains(&index) || self.is_ready(index).await {
            return None;
        }
        let request = GenerationRequest::for_node(&self.inner.lesson, index)?;
        in_flight.insert(index);
        drop(in_flight);

        debug!(node_index = index, node_id = %request.node_id, "Requesting node content");
        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move { inner.generate(request).await }))
    }
}

impl GateInner {
    async fn generate(&self, request: GenerationRequest) -> Result<()> {
        let index = request.node_index;
        let service = Arc::clone(&self.service);
        // A panicking service must still clear the in-flight flag.
        let call = tokio::spawn(async move { service.generate(&request).await });
        let outcome = match call.await {
            Ok(Ok(content)) => content
                .check()
                .map(|()| content)
                .map_err(|message| SynapseError::malformed("content", message)),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(SynapseError::generation_failed(
                index,
                ServiceErrorKind::Other,
                format!("content service aborted: {e}"),
            )),
        };

        let result = match outcome {
            Ok(content) => {
                self.apply(index, content).await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    node_index = index,
                    error = %e,
                    retryable = e.is_transient(),
                    "Content generation failed, node stays pending"
                );
                self.events
                    .send(LessonEvent::content_failed(index, e.to_string(), e.is_transient()));
                Err(e)
            }
        };

        self.in_flight.lock().await.remove(&index);
        self.finished.notify_waiters();
        result
    }

    async fn apply(&self, index: usize, content: GeneratedContent) {
        let applied = {
            let mut slots = self.content.write().await;
            match slots.get_mut(index) {
                Some(slot) if !slot.is_complete() => {
                    *slot = NodeContent::Complete(content.clone());
                    true
                }
                _ => false,
            }
        };
        if !applied {
            debug!(node_index = index, "Node already complete, dropping duplicate content");
            return;
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save_content(&self.lesson.id, index, &content).await {
                warn!(node_index = index, error = %e, "Failed to persist node content");
            }
        }

        info!(node_index = index, "Node content ready");
        self.events.send(LessonEvent::content_ready(index));
    }
}
