//! Common test utilities for API testing with mocks.
//!
//! Builds an in-process router over in-memory SQLite stores and the core
//! mocks, so handlers can be exercised without ffmpeg, an object store, or
//! a listening socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use mediaflow_core::queue::{Broker, QueueConfig, TaskStore};
use mediaflow_core::testing::{MockEventPublisher, MockMediaTool, MockStorage};
use mediaflow_core::{
    Config, EventPublisher, MediaTool, SqliteBroker, SqliteTaskStore, SqliteVideoStore,
    StorageGateway, TaskQueue, TranscodeOrchestrator, VideoStore,
};

/// Re-export fixtures for test convenience
pub use mediaflow_core::testing::fixtures;

/// Test fixture wiring the API router to mock collaborators.
///
/// The queue is constructed but not started: enqueued tasks stay in the
/// store and broker where tests can inspect them.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_trigger() {
///     let fixture = TestFixture::new().await;
///     fixture.videos.create(fixtures::new_video("v1")).unwrap();
///
///     let response = fixture.post("/api/v1/videos/v1/transcode").await;
///     assert_eq!(response.status, 202);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub videos: Arc<SqliteVideoStore>,
    pub tasks: Arc<SqliteTaskStore>,
    pub broker: Arc<SqliteBroker>,
    pub queue: TaskQueue,
    pub storage: MockStorage,
    pub tool: MockMediaTool,
    pub events: MockEventPublisher,
    /// Scratch space for the orchestrator
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    /// Parsed JSON body, `Null` when empty or not JSON.
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let videos = Arc::new(SqliteVideoStore::in_memory().expect("Failed to create video store"));
        let tasks = Arc::new(SqliteTaskStore::in_memory().expect("Failed to create task store"));
        let broker = Arc::new(SqliteBroker::in_memory(1).expect("Failed to create broker"));

        let storage = MockStorage::new();
        let tool = MockMediaTool::new();
        let events = MockEventPublisher::new();

        let mut config = Config::default();
        config.server.host = std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);
        config.server.port = 0; // Not used for in-process testing
        config.queue = QueueConfig::for_service("api-test");
        config.queue.partitions = 1;
        config.transcode = fixtures::transcode_config(temp_dir.path());

        let orchestrator = Arc::new(TranscodeOrchestrator::new(
            config.transcode.clone(),
            Arc::clone(&videos) as Arc<dyn VideoStore>,
            Arc::new(storage.clone()) as Arc<dyn StorageGateway>,
            Arc::new(tool.clone()) as Arc<dyn MediaTool>,
            Arc::new(events.clone()) as Arc<dyn EventPublisher>,
        ));

        let queue = TaskQueue::new(
            config.queue.clone(),
            Arc::clone(&broker) as Arc<dyn Broker>,
            Arc::clone(&tasks) as Arc<dyn TaskStore>,
        );

        let state = Arc::new(mediaflow_server::state::AppState::new(
            config,
            queue.clone(),
            Arc::clone(&videos) as Arc<dyn VideoStore>,
            orchestrator,
        ));

        let router = mediaflow_server::api::create_router(state);

        Self {
            router,
            videos,
            tasks,
            broker,
            queue,
            storage,
            tool,
            events,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request without a body.
    pub async fn post(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post_json(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}
