//! In-process evaluation queue.
//!
//! A single scheduler task pops Queued items in FIFO order whenever a slot is
//! free and runs each one as its own task under a timeout. In-flight jobs are
//! owned by a [`JoinSet`] so shutdown can wait for them and then abort.
//!
//! Queue state lives behind one mutex; a [`Notify`] only wakes the scheduler
//! and never carries data.

use attest_core::MergedSummary;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::QueueConfig;
use crate::document::DocumentPayload;
use crate::evaluator::DocumentEvaluator;

/// Items listed in [`QueueStatus::queued_items`].
const STATUS_PREVIEW: usize = 10;

/// Errors from the queue, and the terminal reasons recorded on failed items.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Queue is full (max {max} items). Please try again later.")]
    CapacityExceeded { max: usize },

    #[error("Evaluation timed out")]
    Timeout,

    #[error("Evaluation callback not set")]
    CallbackNotSet,

    #[error("Evaluation panicked: {0}")]
    Panicked(String),

    #[error("Evaluation aborted during shutdown")]
    Aborted,

    #[error("{0}")]
    Evaluation(String),
}

/// Lifecycle of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl QueueItemState {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueItemState::Completed | QueueItemState::Failed)
    }
}

/// One document evaluation job. Returned to callers as a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    /// Caller-supplied job id
    pub id: String,

    pub label: String,

    pub state: QueueItemState,

    /// 1-based among Queued items; 0 once Processing or finished
    pub position: usize,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<MergedSummary>,

    #[serde(skip)]
    document: DocumentPayload,
}

impl QueueItem {
    fn new(id: String, document: DocumentPayload, label: String) -> Self {
        Self {
            id,
            label,
            state: QueueItemState::Queued,
            position: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            result: None,
            document,
        }
    }

    pub fn document(&self) -> &DocumentPayload {
        &self.document
    }
}

/// What the evaluation callback receives.
#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub id: String,
    pub document: DocumentPayload,
    pub label: String,
    /// Cancelled on timeout or forced shutdown
    pub cancel: CancellationToken,
}

/// Evaluates one job.
pub type EvaluationCallback =
    Arc<dyn Fn(EvaluationJob) -> BoxFuture<'static, anyhow::Result<MergedSummary>> + Send + Sync>;

/// Point-in-time snapshot of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub running: bool,
    pub pending_count: usize,
    pub processing_count: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub available_slots: usize,
    pub queued_items: Vec<QueueItem>,
    pub processing_items: Vec<QueueItem>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueItem>,
    processing: BTreeMap<String, QueueItem>,
    history: VecDeque<QueueItem>,
    callback: Option<EvaluationCallback>,
}

impl QueueState {
    fn update_positions(&mut self) {
        for (i, item) in self.pending.iter_mut().enumerate() {
            item.position = i + 1;
        }
    }
}

struct QueueInner {
    config: QueueConfig,
    state: Mutex<QueueState>,
    wakeup: Notify,
}

impl QueueInner {
    /// Move the head of the queue to Processing if a slot is free.
    fn pop_next(&self) -> Option<QueueItem> {
        let mut state = self.state.lock();
        if state.processing.len() >= self.config.max_concurrent {
            return None;
        }
        let mut item = state.pending.pop_front()?;
        item.state = QueueItemState::Processing;
        item.position = 0;
        item.started_at = Some(Utc::now());
        state.processing.insert(item.id.clone(), item.clone());
        state.update_positions();
        Some(item)
    }

    /// Record a terminal outcome and move the item to history.
    fn finish(&self, id: &str, outcome: Result<MergedSummary, QueueError>) {
        let mut state = self.state.lock();
        let Some(mut item) = state.processing.remove(id) else {
            return;
        };
        item.completed_at = Some(Utc::now());
        match outcome {
            Ok(summary) => {
                item.state = QueueItemState::Completed;
                item.result = Some(summary);
                tracing::info!(job = %item.id, label = %item.label, "Completed evaluation");
            }
            Err(error) => {
                item.state = QueueItemState::Failed;
                item.error_message = Some(error.to_string());
                tracing::error!(job = %item.id, label = %item.label, error = %error, "Evaluation failed");
            }
        }
        state.history.push_back(item);
        while state.history.len() > self.config.history_limit {
            state.history.pop_front();
        }
        drop(state);
        self.wakeup.notify_one();
    }

    async fn run_job(self: Arc<Self>, item: QueueItem, cancel: CancellationToken) {
        let callback = self.state.lock().callback.clone();
        let outcome = match callback {
            None => Err(QueueError::CallbackNotSet),
            Some(callback) => {
                let job = EvaluationJob {
                    id: item.id.clone(),
                    document: item.document.clone(),
                    label: item.label.clone(),
                    cancel: cancel.clone(),
                };
                let run = AssertUnwindSafe(callback(job)).catch_unwind();
                match tokio::time::timeout(self.config.job_timeout, run).await {
                    Err(_) => {
                        cancel.cancel();
                        tracing::error!(job = %item.id, timeout = ?self.config.job_timeout, "Evaluation timed out");
                        Err(QueueError::Timeout)
                    }
                    Ok(Err(panic)) => Err(QueueError::Panicked(panic_message(panic.as_ref()))),
                    Ok(Ok(Err(error))) => Err(QueueError::Evaluation(format!("{:#}", error))),
                    Ok(Ok(Ok(summary))) => Ok(summary),
                }
            }
        };
        self.finish(&item.id, outcome);
    }

    /// Scheduler loop: start jobs while work and slots exist, then wait for a wakeup.
    async fn schedule(self: Arc<Self>, shutdown: CancellationToken) {
        let mut jobs = JoinSet::new();
        let jobs_cancel = CancellationToken::new();
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            max_queue_size = self.config.max_queue_size,
            "Queue scheduler started"
        );

        loop {
            while let Some(item) = self.pop_next() {
                tracing::info!(job = %item.id, label = %item.label, "Starting evaluation");
                jobs.spawn(self.clone().run_job(item, jobs_cancel.child_token()));
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wakeup.notified() => {}
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Evaluation task failed to join");
                    }
                }
            }
        }

        let grace = self.config.shutdown_grace;
        tracing::info!(in_flight = jobs.len(), grace = ?grace, "Queue stopping");
        let drained = tokio::time::timeout(grace, async {
            while jobs.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!(in_flight = jobs.len(), "Grace period elapsed, aborting evaluations");
            jobs_cancel.cancel();
            jobs.abort_all();
            while jobs.join_next().await.is_some() {}

            let aborted: Vec<String> = self.state.lock().processing.keys().cloned().collect();
            for id in aborted {
                self.finish(&id, Err(QueueError::Aborted));
            }
        }
        tracing::info!("Queue scheduler stopped");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Scheduler {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

/// Bounded FIFO queue of document evaluations.
pub struct EvaluationQueue {
    inner: Arc<QueueInner>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl std::fmt::Debug for EvaluationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("EvaluationQueue")
            .field("pending", &state.pending.len())
            .field("processing", &state.processing.len())
            .field("running", &self.scheduler.lock().is_some())
            .finish()
    }
}

impl EvaluationQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                config,
                state: Mutex::new(QueueState::default()),
                wakeup: Notify::new(),
            }),
            scheduler: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Install the function that evaluates each job.
    pub fn set_evaluation_callback<F, Fut>(&self, callback: F)
    where
        F: Fn(EvaluationJob) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<MergedSummary>> + Send + 'static,
    {
        let callback: EvaluationCallback = Arc::new(move |job| callback(job).boxed());
        self.inner.state.lock().callback = Some(callback);
    }

    /// Evaluate every job with `evaluator`.
    pub fn set_evaluator(&self, evaluator: Arc<dyn DocumentEvaluator>) {
        self.set_evaluation_callback(move |job: EvaluationJob| {
            let evaluator = evaluator.clone();
            async move {
                evaluator
                    .evaluate_document(&job.document, job.cancel)
                    .await
                    .map_err(anyhow::Error::from)
            }
        });
    }

    /// Spawn the scheduler. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return;
        }
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(self.inner.clone().schedule(shutdown.clone()));
        *scheduler = Some(Scheduler { handle, shutdown });
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    /// Stop scheduling; let in-flight jobs finish within the grace period, then abort them.
    ///
    /// Queued items stay queued and run after the next `start`.
    pub async fn stop(&self) {
        let Some(scheduler) = self.scheduler.lock().take() else {
            return;
        };
        scheduler.shutdown.cancel();
        if let Err(e) = scheduler.handle.await {
            tracing::error!(error = %e, "Queue scheduler task failed");
        }
    }

    /// Add a job. Returns the live item and its position when `id` is already queued or processing.
    pub fn enqueue(
        &self,
        id: impl Into<String>,
        document: DocumentPayload,
        label: impl Into<String>,
    ) -> Result<(QueueItem, usize), QueueError> {
        let id = id.into();
        let mut state = self.inner.state.lock();

        if state.pending.len() >= self.inner.config.max_queue_size {
            return Err(QueueError::CapacityExceeded {
                max: self.inner.config.max_queue_size,
            });
        }
        if let Some(existing) = state.processing.get(&id) {
            return Ok((existing.clone(), 0));
        }
        if let Some(existing) = state.pending.iter().find(|item| item.id == id) {
            return Ok((existing.clone(), existing.position));
        }

        let mut item = QueueItem::new(id, document, label.into());
        item.position = state.pending.len() + 1;
        state.pending.push_back(item.clone());
        drop(state);

        tracing::info!(job = %item.id, label = %item.label, position = item.position, "Enqueued evaluation");
        self.inner.wakeup.notify_one();
        let position = item.position;
        Ok((item, position))
    }

    /// Remove a Queued job. Processing and unknown jobs return false.
    pub fn cancel(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let Some(index) = state.pending.iter().position(|item| item.id == id) else {
            return false;
        };
        state.pending.remove(index);
        state.update_positions();
        tracing::info!(job = %id, "Cancelled evaluation");
        true
    }

    /// 1-based position while Queued, 0 while Processing, None otherwise.
    pub fn get_position(&self, id: &str) -> Option<usize> {
        let state = self.inner.state.lock();
        if state.processing.contains_key(id) {
            return Some(0);
        }
        state
            .pending
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.position)
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock();
        let max_concurrent = self.inner.config.max_concurrent;
        QueueStatus {
            running: self.scheduler.lock().is_some(),
            pending_count: state.pending.len(),
            processing_count: state.processing.len(),
            max_concurrent,
            max_queue_size: self.inner.config.max_queue_size,
            available_slots: max_concurrent.saturating_sub(state.processing.len()),
            queued_items: state.pending.iter().take(STATUS_PREVIEW).cloned().collect(),
            processing_items: state.processing.values().cloned().collect(),
        }
    }

    /// The item wherever it lives: processing, queued, or recent history.
    pub fn item_status(&self, id: &str) -> Option<QueueItem> {
        let state = self.inner.state.lock();
        state
            .processing
            .get(id)
            .or_else(|| state.pending.iter().find(|item| item.id == id))
            .or_else(|| state.history.iter().rev().find(|item| item.id == id))
            .cloned()
    }
}

impl Default for EvaluationQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
