//! Task queue runtime.
//!
//! Producers call [`TaskQueue::enqueue`]. Consumers run one loop per broker
//! partition for the task stream and one for the retry stream. Each record
//! is dispatched against the authoritative task row, the outcome is
//! published (retry or dead-letter stream) and persisted, and only then is
//! the offset committed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics;

use super::broker::{Broker, DEAD_LETTER_STREAM};
use super::config::{QueueConfig, StreamKind};
use super::error::QueueError;
use super::handler::{Interrupted, TaskHandler};
use super::store::TaskStore;
use super::types::{RetryDecision, TaskMessage, TaskStatus};

/// Result of dispatching one message.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Handler succeeded; row is `completed`.
    Completed,
    /// Handler failed; message republished to the retry stream.
    Retrying {
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
    },
    /// Message published to the dead-letter stream; row is `failed`.
    DeadLettered { reason: String },
    /// Row was already terminal; nothing ran.
    Skipped,
    /// Row is waiting for its backoff to elapse; nothing ran.
    NotDue { next_retry_at: DateTime<Utc> },
    /// Handler was cut short by shutdown; row restored, budget untouched.
    Interrupted,
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Completed => "completed",
            DispatchOutcome::Retrying { .. } => "retrying",
            DispatchOutcome::DeadLettered { .. } => "dead_lettered",
            DispatchOutcome::Skipped => "skipped",
            DispatchOutcome::NotDue { .. } => "not_due",
            DispatchOutcome::Interrupted => "interrupted",
        }
    }
}

/// Task row counts by status.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: i64,
    pub processing: i64,
    pub retrying: i64,
    pub completed: i64,
    pub failed: i64,
}

/// Snapshot of queue state for operators.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub running: bool,
    pub service: String,
    pub partitions: u32,
    pub handlers: Vec<String>,
    pub tasks: TaskCounts,
}

/// Read position of one consumer ahead of its committed offset.
///
/// `blocked` is set once a record was left for later; nothing past it is
/// committed until a scan from the committed offset clears it.
#[derive(Debug, Clone, Copy, Default)]
struct ScanCursor {
    after: i64,
    blocked: bool,
}

/// Reliable task queue over a partitioned broker and a task store.
#[derive(Clone)]
pub struct TaskQueue {
    config: QueueConfig,
    broker: Arc<dyn Broker>,
    store: Arc<dyn TaskStore>,
    handlers: Arc<RwLock<HashMap<String, Arc<dyn TaskHandler>>>>,

    // Runtime state
    running: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    cursors: Arc<Mutex<HashMap<(StreamKind, u32), ScanCursor>>>,
}

impl TaskQueue {
    /// Create a new queue. No consumers run until [`TaskQueue::start`].
    pub fn new(config: QueueConfig, broker: Arc<dyn Broker>, store: Arc<dyn TaskStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            broker,
            store,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            workers: Arc::new(Mutex::new(Vec::new())),
            cursors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Register the handler for a task type, replacing any previous one.
    pub async fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        debug!(task_type = %task_type, "Registered task handler");
        self.handlers.write().await.insert(task_type, handler);
    }

    /// Publish a fresh pending message for `payload` to the task stream.
    ///
    /// Fails with [`QueueError::AlreadyExists`] if `id` already has a row,
    /// whatever its status. Transport errors are returned to the caller;
    /// nothing is buffered locally.
    pub async fn enqueue<P: Serialize + ?Sized>(
        &self,
        task_type: &str,
        payload: &P,
        id: impl Into<String>,
    ) -> Result<TaskMessage, QueueError> {
        let payload = serde_json::to_value(payload)?;
        let message = TaskMessage::new(
            id,
            task_type,
            payload,
            self.config.max_retries,
            self.config.service.clone(),
        );
        self.submit(message).await
    }

    async fn submit(&self, message: TaskMessage) -> Result<TaskMessage, QueueError> {
        if !self.store.insert(&message)? {
            let status = self
                .store
                .get(&message.id)?
                .map_or(TaskStatus::Pending, |row| row.status);
            return Err(QueueError::AlreadyExists {
                id: message.id,
                status,
            });
        }

        if let Err(e) = self.publish(&self.config.task_stream(), &message).await {
            if let Err(cleanup) = self.store.delete(&message.id) {
                warn!(task_id = %message.id, error = %cleanup, "Failed to remove row after publish error");
            }
            return Err(e);
        }

        metrics::TASKS_ENQUEUED
            .with_label_values(&[message.task_type.as_str()])
            .inc();
        info!(task_id = %message.id, task_type = %message.task_type, "Enqueued task");
        Ok(message)
    }

    /// Run one message against its handler and record the outcome.
    ///
    /// The stored row wins over the delivered copy. Terminal rows are
    /// skipped and rows with a pending backoff are only run once due.
    pub async fn dispatch(&self, message: TaskMessage) -> Result<DispatchOutcome, QueueError> {
        let now = Utc::now();

        let mut task = match self.store.get(&message.id)? {
            Some(stored) => stored,
            None if self.store.insert(&message)? => message,
            // Another consumer created the row in the meantime.
            None => self
                .store
                .get(&message.id)?
                .ok_or_else(|| QueueError::NotFound(message.id.clone()))?,
        };

        if task.status.is_terminal() {
            debug!(task_id = %task.id, status = %task.status, "Skipping redelivered terminal task");
            self.record_attempt(&task.task_type, &DispatchOutcome::Skipped);
            return Ok(DispatchOutcome::Skipped);
        }

        if !task.is_due(now) {
            return Ok(DispatchOutcome::NotDue {
                next_retry_at: task.next_retry_at.unwrap_or(now),
            });
        }

        let handler = self.handlers.read().await.get(&task.task_type).cloned();
        let Some(handler) = handler else {
            let reason = format!("no handler registered for task type '{}'", task.task_type);
            warn!(task_id = %task.id, "{}", reason);
            task.mark_unroutable(reason.clone(), now);
            self.publish(DEAD_LETTER_STREAM, &task).await?;
            self.store.update(&task)?;
            metrics::DEAD_LETTERED.with_label_values(&["no_handler"]).inc();
            let outcome = DispatchOutcome::DeadLettered { reason };
            self.record_attempt(&task.task_type, &outcome);
            return Ok(outcome);
        };

        let resume_status = task.status;
        task.mark_processing(now);
        self.store.update(&task)?;

        debug!(task_id = %task.id, task_type = %task.task_type, attempt = task.retry_count + 1, "Dispatching task");
        let started = Instant::now();
        let result = handler.handle(&task).await;
        metrics::TASK_HANDLER_DURATION
            .with_label_values(&[task.task_type.as_str()])
            .observe(started.elapsed().as_secs_f64());

        let now = Utc::now();
        let outcome = match result {
            Err(e) if Interrupted::is_interruption(&e) => {
                task.mark_interrupted(resume_status, now);
                self.store.update(&task)?;
                info!(task_id = %task.id, status = %task.status, error = %e, "Task attempt interrupted, left for redelivery");
                DispatchOutcome::Interrupted
            }
            Ok(()) => {
                task.mark_completed(now);
                self.store.update(&task)?;
                info!(task_id = %task.id, task_type = %task.task_type, "Task completed");
                DispatchOutcome::Completed
            }
            Err(e) => {
                let error_text = format!("{:#}", e);
                match task.prepare_retry(error_text.clone(), now) {
                    RetryDecision::Retry { next_retry_at } => {
                        self.publish(&self.config.retry_stream(), &task).await?;
                        self.store.update(&task)?;
                        warn!(
                            task_id = %task.id,
                            retry_count = task.retry_count,
                            max_retries = task.max_retries,
                            next_retry_at = %next_retry_at,
                            error = %error_text,
                            "Task failed, scheduled retry"
                        );
                        DispatchOutcome::Retrying {
                            retry_count: task.retry_count,
                            next_retry_at,
                        }
                    }
                    RetryDecision::DeadLetter => {
                        self.publish(DEAD_LETTER_STREAM, &task).await?;
                        self.store.update(&task)?;
                        metrics::DEAD_LETTERED.with_label_values(&["exhausted"]).inc();
                        error!(
                            task_id = %task.id,
                            retry_count = task.retry_count,
                            error = %error_text,
                            "Task exhausted retries, dead-lettered"
                        );
                        DispatchOutcome::DeadLettered { reason: error_text }
                    }
                }
            }
        };

        self.record_attempt(&task.task_type, &outcome);
        Ok(outcome)
    }

    /// Fetch and dispatch one batch from a partition of the given stream.
    ///
    /// Offsets are committed per record once its outcome is durable. On the
    /// retry stream a record that is not yet due is left uncommitted and
    /// the scan moves on, so later records that are due still run. Commits
    /// stop at the first record left behind; the scan returns to it once
    /// it reaches the end of the partition.
    ///
    /// A stopping queue leaves the rest of the batch uncommitted, as does
    /// an interrupted attempt.
    pub async fn poll_once(&self, kind: StreamKind, partition: u32) -> Result<usize, QueueError> {
        let stream = self.config.stream_name(kind);
        let group = self.config.consumer_group();
        let batch_size = self.config.batch_size;

        let mut cursor = self
            .cursors
            .lock()
            .await
            .remove(&(kind, partition))
            .unwrap_or_default();

        let records = self
            .broker
            .fetch_after(&stream, &group, partition, cursor.after, batch_size)
            .await?;
        let reached_end = records.len() < batch_size;

        let mut handled = 0;
        for record in records {
            if self.stopping.load(Ordering::SeqCst) {
                debug!(stream = %stream, partition, seq = record.seq, "Queue stopping, leaving rest of batch");
                return Ok(handled);
            }

            match serde_json::from_slice::<TaskMessage>(&record.payload) {
                Ok(message) => match self.dispatch(message).await? {
                    DispatchOutcome::NotDue { .. } if kind == StreamKind::Retry => {
                        cursor.after = record.seq;
                        cursor.blocked = true;
                        continue;
                    }
                    DispatchOutcome::Interrupted => return Ok(handled),
                    _ => {}
                },
                Err(e) => {
                    warn!(stream = %stream, seq = record.seq, error = %e, "Undecodable record, dead-lettering");
                    self.broker
                        .publish(DEAD_LETTER_STREAM, &record.key, &record.payload)
                        .await?;
                    metrics::DEAD_LETTERED.with_label_values(&["undecodable"]).inc();
                }
            }

            if !cursor.blocked {
                self.broker.commit(&stream, &group, partition, record.seq).await?;
            }
            cursor.after = record.seq;
            handled += 1;
        }

        if !reached_end {
            self.cursors.lock().await.insert((kind, partition), cursor);
        }
        Ok(handled)
    }

    /// Replay a dead-lettered task under a new id.
    ///
    /// The dead-lettered row stays as it is. The new message carries the
    /// same type and payload, a fresh retry budget, and `replay_of` set to
    /// the original id.
    pub async fn replay_dead_letter(&self, id: &str) -> Result<TaskMessage, QueueError> {
        let task = self
            .store
            .get(id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        if task.status != TaskStatus::Failed {
            return Err(QueueError::NotDeadLettered {
                id: id.to_string(),
                status: task.status,
            });
        }

        let replay = TaskMessage::new(
            uuid::Uuid::new_v4().to_string(),
            task.task_type,
            task.payload,
            self.config.max_retries,
            self.config.service.clone(),
        )
        .with_replay_of(id);

        info!(task_id = %id, replay_id = %replay.id, previous_error = ?task.last_error, "Replaying dead-lettered task");
        self.submit(replay).await
    }

    /// Get current queue status.
    pub async fn status(&self) -> Result<QueueStatus, QueueError> {
        let counts = self.store.count_by_status()?;
        let count = |s: TaskStatus| counts.get(&s).copied().unwrap_or(0);

        let mut handlers: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        handlers.sort();

        Ok(QueueStatus {
            running: self.running.load(Ordering::Relaxed),
            service: self.config.service.clone(),
            partitions: self.broker.partitions(),
            handlers,
            tasks: TaskCounts {
                pending: count(TaskStatus::Pending),
                processing: count(TaskStatus::Processing),
                retrying: count(TaskStatus::Retrying),
                completed: count(TaskStatus::Completed),
                failed: count(TaskStatus::Failed),
            },
        })
    }

    /// Start consumer loops (spawns background tasks).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Task queue already running");
            return;
        }

        self.stopping.store(false, Ordering::SeqCst);
        let partitions = self.broker.partitions();
        info!(service = %self.config.service, partitions, "Starting task queue consumers");

        let mut workers = self.workers.lock().await;
        for partition in 0..partitions {
            workers.push(self.spawn_consumer(StreamKind::Tasks, partition));
            workers.push(self.spawn_consumer(StreamKind::Retry, partition));
        }
    }

    /// Stop consumer loops, waiting for in-flight dispatches to finish.
    ///
    /// Consumers finish the record in hand and leave the rest of their
    /// batch uncommitted.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Task queue not running");
            return;
        }
        self.stopping.store(true, Ordering::SeqCst);

        info!("Stopping task queue consumers");
        let _ = self.shutdown_tx.send(());

        let workers: Vec<_> = self.workers.lock().await.drain(..).collect();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                warn!("Consumer loop ended abnormally: {}", e);
            }
        }

        info!("Task queue stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn spawn_consumer(&self, kind: StreamKind, partition: u32) -> JoinHandle<()> {
        let queue = self.clone();
        let running = Arc::clone(&self.running);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let batch_size = self.config.batch_size;
        let stream = self.config.stream_name(kind);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            debug!(stream = %stream, partition, "Consumer loop started");
            loop {
                if !running.load(Ordering::Relaxed) {
                    break;
                }

                let handled = match queue.poll_once(kind, partition).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(stream = %stream, partition, error = %e, "Consumer poll failed");
                        0
                    }
                };

                // A full batch means more may be waiting.
                if handled >= batch_size {
                    continue;
                }

                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            debug!(stream = %stream, partition, "Consumer loop stopped");
        })
    }

    async fn publish(&self, stream: &str, message: &TaskMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(message)?;
        self.broker.publish(stream, &message.id, &payload).await?;
        Ok(())
    }

    fn record_attempt(&self, task_type: &str, outcome: &DispatchOutcome) {
        metrics::TASK_ATTEMPTS
            .with_label_values(&[task_type, outcome.label()])
            .inc();
    }
}
