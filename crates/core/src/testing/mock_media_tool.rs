//! Mock media tool for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::media::{MediaTool, MediaToolError, ProbeInfo};

/// A recorded tool invocation for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    Probe { input: PathBuf },
    Cover { input: PathBuf, output: PathBuf },
    Frame { input: PathBuf, at_secs: f64, output: PathBuf },
    Normalize { input: PathBuf, output: PathBuf },
    Rendition { input: PathBuf, output: PathBuf, width: u32, height: u32 },
}

impl ToolCall {
    /// Operation name, matching the names accepted by `fail_operation`.
    pub fn operation(&self) -> &'static str {
        match self {
            ToolCall::Probe { .. } => "probe",
            ToolCall::Cover { .. } => "cover",
            ToolCall::Frame { .. } => "frame",
            ToolCall::Normalize { .. } => "normalize",
            ToolCall::Rendition { .. } => "rendition",
        }
    }
}

/// Mock implementation of the MediaTool trait.
///
/// Writes small placeholder files instead of running a real encoder.
/// Provides controllable behavior for testing:
/// - Configurable probe result
/// - Per-operation and per-rendition failures
/// - Simulated latency that honors cancellation
/// - Peak concurrency tracking
#[derive(Debug, Clone)]
pub struct MockMediaTool {
    calls: Arc<RwLock<Vec<ToolCall>>>,
    probe_info: Arc<RwLock<ProbeInfo>>,
    failing_operations: Arc<RwLock<HashSet<&'static str>>>,
    failing_rendition_widths: Arc<RwLock<HashSet<u32>>>,
    delay: Arc<RwLock<Duration>>,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
}

impl Default for MockMediaTool {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMediaTool {
    /// Create a mock that probes every input as 1920x1080, 30 seconds.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            probe_info: Arc::new(RwLock::new(ProbeInfo {
                width: 1920,
                height: 1080,
                duration_secs: 30.0,
            })),
            failing_operations: Arc::new(RwLock::new(HashSet::new())),
            failing_rendition_widths: Arc::new(RwLock::new(HashSet::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the probe result returned for every input.
    pub async fn set_probe_info(&self, info: ProbeInfo) {
        *self.probe_info.write().await = info;
    }

    /// Make every call of `operation` fail. One of "probe", "cover",
    /// "frame", "normalize", "rendition".
    pub async fn fail_operation(&self, operation: &'static str) {
        self.failing_operations.write().await.insert(operation);
    }

    /// Make rendition encodes with this output width fail.
    pub async fn fail_rendition_width(&self, width: u32) {
        self.failing_rendition_widths.write().await.insert(width);
    }

    /// Clear all configured failures.
    pub async fn clear_failures(&self) {
        self.failing_operations.write().await.clear();
        self.failing_rendition_widths.write().await.clear();
    }

    /// Set simulated latency for every operation.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Get all recorded calls.
    pub async fn recorded_calls(&self) -> Vec<ToolCall> {
        self.calls.read().await.clone()
    }

    /// Get recorded calls for one operation.
    pub async fn calls_for(&self, operation: &str) -> Vec<ToolCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.operation() == operation)
            .cloned()
            .collect()
    }

    /// Highest number of operations observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    async fn invoke(
        &self,
        call: ToolCall,
        output: Option<(&Path, String)>,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError> {
        let operation = call.operation();
        let rendition_width = match &call {
            ToolCall::Rendition { width, .. } => Some(*width),
            _ => None,
        };
        self.calls.write().await.push(call);

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
        let result = self.simulate(operation, rendition_width, output, cancel).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn simulate(
        &self,
        operation: &'static str,
        rendition_width: Option<u32>,
        output: Option<(&Path, String)>,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError> {
        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(MediaToolError::Cancelled { operation }),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(MediaToolError::Cancelled { operation });
        }

        if self.failing_operations.read().await.contains(operation) {
            return Err(MediaToolError::tool_failed(
                operation,
                "exit status: 1",
                Some("mock failure".to_string()),
            ));
        }
        if let Some(width) = rendition_width {
            if self.failing_rendition_widths.read().await.contains(&width) {
                return Err(MediaToolError::tool_failed(
                    operation,
                    format!("mock failure at width {}", width),
                    None,
                ));
            }
        }

        if let Some((path, contents)) = output {
            tokio::fs::write(path, contents).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTool for MockMediaTool {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe(
        &self,
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProbeInfo, MediaToolError> {
        self.invoke(
            ToolCall::Probe {
                input: input.to_path_buf(),
            },
            None,
            cancel,
        )
        .await?;
        Ok(*self.probe_info.read().await)
    }

    async fn extract_cover(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError> {
        self.invoke(
            ToolCall::Cover {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
            },
            Some((output, "cover".to_string())),
            cancel,
        )
        .await
    }

    async fn extract_frame(
        &self,
        input: &Path,
        at_secs: f64,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError> {
        self.invoke(
            ToolCall::Frame {
                input: input.to_path_buf(),
                at_secs,
                output: output.to_path_buf(),
            },
            Some((output, format!("frame@{:.3}", at_secs))),
            cancel,
        )
        .await
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError> {
        self.invoke(
            ToolCall::Normalize {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
            },
            Some((output, "normalized".to_string())),
            cancel,
        )
        .await
    }

    async fn encode_rendition(
        &self,
        input: &Path,
        output: &Path,
        width: u32,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError> {
        self.invoke(
            ToolCall::Rendition {
                input: input.to_path_buf(),
                output: output.to_path_buf(),
                width,
                height,
            },
            Some((output, format!("rendition {}x{}", width, height))),
            cancel,
        )
        .await
    }

    async fn validate(&self) -> Result<(), MediaToolError> {
        Ok(())
    }
}
