//! Task queue lifecycle integration tests.
//!
//! These tests drive the queue through its consumer path (`poll_once`) over
//! a SQLite broker and task store:
//! - Retry counting and exponential backoff
//! - Dead-lettering after the retry budget is spent
//! - Skipping redelivered terminal tasks
//! - Manual dead-letter replay under a new id
//! - Interrupted attempts and stopping consumers
//! - Durability across a restart

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use mediaflow_core::queue::{
    retry_backoff, Broker, DispatchOutcome, Interrupted, QueueConfig, QueueError, SqliteBroker,
    SqliteTaskStore, StreamKind, TaskHandler, TaskMessage, TaskQueue, TaskStatus, TaskStore,
    DEAD_LETTER_STREAM,
};

/// Fails its first `failures` calls, then succeeds.
struct FlakyHandler {
    calls: AtomicUsize,
    failures: usize,
}

impl FlakyHandler {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failures,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn handle(&self, task: &TaskMessage) -> anyhow::Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            anyhow::bail!("attempt {} for {} failed", call, task.id);
        }
        Ok(())
    }
}

/// Reports its first call as interrupted by shutdown, then succeeds.
struct InterruptedOnceHandler {
    calls: AtomicUsize,
}

#[async_trait]
impl TaskHandler for InterruptedOnceHandler {
    async fn handle(&self, _task: &TaskMessage) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(Interrupted::new("worker shutting down").into());
        }
        Ok(())
    }
}

struct TestHarness {
    queue: TaskQueue,
    broker: Arc<SqliteBroker>,
    store: Arc<SqliteTaskStore>,
}

impl TestHarness {
    fn new() -> Self {
        let broker = Arc::new(SqliteBroker::in_memory(1).expect("Failed to create broker"));
        let store = Arc::new(SqliteTaskStore::in_memory().expect("Failed to create task store"));
        let queue = TaskQueue::new(
            QueueConfig::for_service("uploads"),
            Arc::clone(&broker) as Arc<dyn Broker>,
            Arc::clone(&store) as Arc<dyn TaskStore>,
        );
        Self {
            queue,
            broker,
            store,
        }
    }

    fn row(&self, id: &str) -> TaskMessage {
        self.store.get(id).unwrap().expect("task row missing")
    }

    /// Pull the row's backoff into the past so the retry consumer runs it.
    fn make_due(&self, id: &str) {
        let mut row = self.row(id);
        row.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
        self.store.update(&row).unwrap();
    }

    fn delay(&self, id: &str, minutes: i64) {
        let mut row = self.row(id);
        row.next_retry_at = Some(Utc::now() + chrono::Duration::minutes(minutes));
        self.store.update(&row).unwrap();
    }

    fn stream_len(&self, stream: &str) -> i64 {
        self.broker.stream_len(stream).unwrap()
    }
}

#[tokio::test]
async fn test_retry_count_and_backoff_per_failure() {
    let h = TestHarness::new();
    let handler = FlakyHandler::new(usize::MAX);
    h.queue.register_handler("resize", handler.clone()).await;
    h.queue
        .enqueue("resize", &serde_json::json!({"videoId": "v1"}), "t1")
        .await
        .unwrap();

    h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap();

    for expected in 1..=3u32 {
        let row = h.row("t1");
        assert_eq!(row.status, TaskStatus::Retrying);
        assert_eq!(row.retry_count, expected);
        assert_eq!(
            row.next_retry_at.unwrap() - row.updated_at,
            retry_backoff(expected)
        );
        assert_eq!(
            row.last_error.as_deref(),
            Some(format!("attempt {} for t1 failed", expected).as_str())
        );

        if expected < 3 {
            h.make_due("t1");
            assert_eq!(h.queue.poll_once(StreamKind::Retry, 0).await.unwrap(), 1);
        }
    }

    assert_eq!(handler.calls(), 3);
    assert_eq!(h.stream_len("uploads.retry"), 3);
}

#[tokio::test]
async fn test_fourth_failure_dead_letters() {
    let h = TestHarness::new();
    let handler = FlakyHandler::new(usize::MAX);
    h.queue.register_handler("resize", handler.clone()).await;
    h.queue
        .enqueue("resize", &serde_json::json!({}), "t1")
        .await
        .unwrap();

    // Attempt 1 from the task stream, attempts 2-4 from the retry stream.
    h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap();
    for _ in 0..3 {
        h.make_due("t1");
        h.queue.poll_once(StreamKind::Retry, 0).await.unwrap();
    }

    let row = h.row("t1");
    assert_eq!(row.status, TaskStatus::Failed);
    assert_eq!(row.retry_count, 4);
    assert!(row.next_retry_at.is_none());
    assert_eq!(handler.calls(), 4);

    // Three retries were scheduled; the fourth failure went to dead-letter.
    assert_eq!(h.stream_len("uploads.retry"), 3);
    assert_eq!(h.stream_len(DEAD_LETTER_STREAM), 1);

    // Nothing further is delivered.
    assert_eq!(h.queue.poll_once(StreamKind::Retry, 0).await.unwrap(), 0);
    assert_eq!(handler.calls(), 4);
}

#[tokio::test]
async fn test_early_retry_is_not_dispatched() {
    let h = TestHarness::new();
    let handler = FlakyHandler::new(1);
    h.queue.register_handler("resize", handler.clone()).await;
    h.queue
        .enqueue("resize", &serde_json::json!({}), "t1")
        .await
        .unwrap();
    h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap();

    // Not due yet: left uncommitted and re-checked on the next poll.
    assert_eq!(h.queue.poll_once(StreamKind::Retry, 0).await.unwrap(), 0);
    assert_eq!(handler.calls(), 1);

    h.make_due("t1");
    assert_eq!(h.queue.poll_once(StreamKind::Retry, 0).await.unwrap(), 1);
    assert_eq!(handler.calls(), 2);
    assert_eq!(h.row("t1").status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_due_retry_runs_past_a_later_one() {
    let h = TestHarness::new();
    let handler = FlakyHandler::new(2);
    h.queue.register_handler("resize", handler.clone()).await;
    for id in ["a", "b"] {
        h.queue
            .enqueue("resize", &serde_json::json!({}), id)
            .await
            .unwrap();
    }
    h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap();
    assert_eq!(handler.calls(), 2);

    // a's retry record comes first on the partition but is due much later.
    h.delay("a", 60);
    h.make_due("b");

    assert_eq!(h.queue.poll_once(StreamKind::Retry, 0).await.unwrap(), 1);
    assert_eq!(handler.calls(), 3);
    assert_eq!(h.row("b").status, TaskStatus::Completed);
    assert_eq!(h.row("a").status, TaskStatus::Retrying);

    // a is still waiting; b's record is seen again but does not run.
    h.queue.poll_once(StreamKind::Retry, 0).await.unwrap();
    assert_eq!(handler.calls(), 3);

    h.make_due("a");
    h.queue.poll_once(StreamKind::Retry, 0).await.unwrap();
    assert_eq!(handler.calls(), 4);
    assert_eq!(h.row("a").status, TaskStatus::Completed);

    // Both records are committed now.
    assert_eq!(h.queue.poll_once(StreamKind::Retry, 0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_enqueue_rejects_existing_id() {
    let h = TestHarness::new();
    let handler = FlakyHandler::new(1);
    h.queue.register_handler("resize", handler.clone()).await;
    h.queue
        .enqueue("resize", &serde_json::json!({}), "t1")
        .await
        .unwrap();
    h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap();
    assert_eq!(h.row("t1").retry_count, 1);

    let err = h
        .queue
        .enqueue("resize", &serde_json::json!({}), "t1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::AlreadyExists {
            status: TaskStatus::Retrying,
            ..
        }
    ));

    // The row keeps its budget and backoff; nothing new was published.
    let row = h.row("t1");
    assert_eq!(row.status, TaskStatus::Retrying);
    assert_eq!(row.retry_count, 1);
    assert_eq!(h.stream_len("uploads.tasks"), 1);
    assert_eq!(h.queue.poll_once(StreamKind::Retry, 0).await.unwrap(), 0);
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_interrupted_attempt_is_redelivered_without_charge() {
    let h = TestHarness::new();
    let handler = Arc::new(InterruptedOnceHandler {
        calls: AtomicUsize::new(0),
    });
    h.queue.register_handler("resize", handler.clone()).await;
    for id in ["t1", "t2"] {
        h.queue
            .enqueue("resize", &serde_json::json!({}), id)
            .await
            .unwrap();
    }

    // The interruption ends the batch before t2 and commits nothing.
    assert_eq!(h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap(), 0);
    let row = h.row("t1");
    assert_eq!(row.status, TaskStatus::Pending);
    assert_eq!(row.retry_count, 0);
    assert!(row.last_error.is_none());
    assert_eq!(h.row("t2").status, TaskStatus::Pending);
    assert_eq!(h.stream_len("uploads.retry"), 0);

    assert_eq!(h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap(), 2);
    assert_eq!(h.row("t1").status, TaskStatus::Completed);
    assert_eq!(h.row("t1").retry_count, 0);
    assert_eq!(h.row("t2").status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_stopped_queue_leaves_records_uncommitted() {
    let h = TestHarness::new();
    let handler = FlakyHandler::new(0);
    h.queue.register_handler("resize", handler.clone()).await;

    h.queue.start().await;
    h.queue.stop().await;

    h.queue
        .enqueue("resize", &serde_json::json!({}), "t1")
        .await
        .unwrap();
    assert_eq!(h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap(), 0);
    assert_eq!(handler.calls(), 0);
    assert_eq!(h.row("t1").status, TaskStatus::Pending);

    // A restart picks the record up again.
    h.queue.start().await;
    for _ in 0..200 {
        if handler.calls() == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    h.queue.stop().await;
    assert_eq!(handler.calls(), 1);
    assert_eq!(h.row("t1").status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_redelivered_terminal_task_is_skipped() {
    let h = TestHarness::new();
    let handler = FlakyHandler::new(0);
    h.queue.register_handler("resize", handler.clone()).await;
    let message = h
        .queue
        .enqueue("resize", &serde_json::json!({}), "t1")
        .await
        .unwrap();

    h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap();
    assert_eq!(h.row("t1").status, TaskStatus::Completed);

    // The stale copy on the wire still says pending; the row wins.
    let outcome = tokio_test::assert_ok!(h.queue.dispatch(message).await);
    assert_eq!(outcome, DispatchOutcome::Skipped);
    assert_eq!(handler.calls(), 1);
}

#[tokio::test]
async fn test_unknown_task_type_dead_letters_without_retry() {
    let h = TestHarness::new();
    h.queue
        .enqueue("thumbnail", &serde_json::json!({}), "t1")
        .await
        .unwrap();

    h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap();

    let row = h.row("t1");
    assert_eq!(row.status, TaskStatus::Failed);
    assert_eq!(row.retry_count, 0);
    assert!(row.last_error.unwrap().contains("thumbnail"));
    assert_eq!(h.stream_len("uploads.retry"), 0);
    assert_eq!(h.stream_len(DEAD_LETTER_STREAM), 1);
}

#[tokio::test]
async fn test_undecodable_record_goes_to_dead_letter() {
    let h = TestHarness::new();
    h.broker
        .publish("uploads.tasks", "garbage", b"{not json")
        .await
        .unwrap();

    assert_eq!(h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap(), 1);

    let records = h
        .broker
        .fetch(DEAD_LETTER_STREAM, "audit", 0, 10)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload, b"{not json".to_vec());

    // Committed: not delivered again.
    assert_eq!(h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap(), 0);
}

#[tokio::test]
async fn test_replay_dead_letter() {
    let h = TestHarness::new();
    h.queue
        .enqueue("resize", &serde_json::json!({"videoId": "v9"}), "t1")
        .await
        .unwrap();
    h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap();
    assert_eq!(h.row("t1").status, TaskStatus::Failed);

    // The operator deploys the missing handler and replays.
    let handler = FlakyHandler::new(0);
    h.queue.register_handler("resize", handler.clone()).await;
    let replayed = h.queue.replay_dead_letter("t1").await.unwrap();
    assert_ne!(replayed.id, "t1");
    assert_eq!(replayed.replay_of.as_deref(), Some("t1"));
    assert_eq!(replayed.status, TaskStatus::Pending);
    assert_eq!(replayed.retry_count, 0);
    assert_eq!(replayed.payload, serde_json::json!({"videoId": "v9"}));

    h.queue.poll_once(StreamKind::Tasks, 0).await.unwrap();
    assert_eq!(handler.calls(), 1);
    assert_eq!(h.row(&replayed.id).status, TaskStatus::Completed);

    // The dead-lettered row is left exactly as it was.
    let original = h.row("t1");
    assert_eq!(original.status, TaskStatus::Failed);
    assert!(original.last_error.unwrap().contains("resize"));

    let status = h.queue.status().await.unwrap();
    assert_eq!(status.tasks.completed, 1);
    assert_eq!(status.tasks.failed, 1);
}

#[tokio::test]
async fn test_tasks_survive_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("queue.db");

    {
        let queue = TaskQueue::new(
            QueueConfig::for_service("uploads"),
            Arc::new(SqliteBroker::new(&db_path, 2).unwrap()),
            Arc::new(SqliteTaskStore::new(&db_path).unwrap()),
        );
        for id in ["a", "b", "c"] {
            queue
                .enqueue("resize", &serde_json::json!({ "id": id }), id)
                .await
                .unwrap();
        }
    }

    let queue = TaskQueue::new(
        QueueConfig::for_service("uploads"),
        Arc::new(SqliteBroker::new(&db_path, 2).unwrap()),
        Arc::new(SqliteTaskStore::new(&db_path).unwrap()),
    );
    let handler = FlakyHandler::new(0);
    queue.register_handler("resize", handler.clone()).await;

    let mut handled = 0;
    for partition in 0..2 {
        handled += queue.poll_once(StreamKind::Tasks, partition).await.unwrap();
    }
    assert_eq!(handled, 3);
    assert_eq!(handler.calls(), 3);
    assert_eq!(queue.status().await.unwrap().tasks.completed, 3);
}
