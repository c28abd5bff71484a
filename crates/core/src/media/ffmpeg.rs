//! FFmpeg-based media tool implementation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metrics;

use super::config::MediaConfig;
use super::error::MediaToolError;
use super::traits::MediaTool;
use super::types::{format_timestamp, ProbeInfo};

/// Which binary an invocation runs.
#[derive(Debug, Clone, Copy)]
enum Binary {
    Ffmpeg,
    Ffprobe,
}

/// FFmpeg/FFprobe media tool.
pub struct FfmpegTool {
    config: MediaConfig,
}

impl FfmpegTool {
    /// Creates a new FFmpeg tool with the given configuration.
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    /// Creates a tool with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(MediaConfig::default())
    }

    fn path_arg(path: &Path) -> String {
        path.to_string_lossy().to_string()
    }

    /// `-v error -show_entries stream=width,height:format=duration -of csv=p=0 <input>`
    pub fn probe_args(input: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "stream=width,height:format=duration".to_string(),
            "-of".to_string(),
            "csv=p=0".to_string(),
            Self::path_arg(input),
        ]
    }

    /// `-i <input> -ss 00:00:01.000 -vframes 1 -q:v 2 <output>`
    pub fn cover_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            Self::path_arg(input),
            "-ss".to_string(),
            "00:00:01.000".to_string(),
            "-vframes".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            "2".to_string(),
            Self::path_arg(output),
        ]
    }

    /// `-ss <t> -i <input> -vframes 1 -q:v 2 -y <output>`
    pub fn frame_args(input: &Path, at_secs: f64, output: &Path) -> Vec<String> {
        vec![
            "-ss".to_string(),
            format_timestamp(at_secs),
            "-i".to_string(),
            Self::path_arg(input),
            "-vframes".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            "2".to_string(),
            "-y".to_string(),
            Self::path_arg(output),
        ]
    }

    /// H.264 CRF 23 `slower` main@3.1, faststart, yuv420p, AAC 128k stereo, 30 fps.
    pub fn normalize_args(input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["-i".to_string(), Self::path_arg(input)];
        args.extend(
            [
                "-c:v", "libx264", "-crf", "23", "-preset", "slower", "-profile:v", "main",
                "-level", "3.1", "-movflags", "+faststart", "-pix_fmt", "yuv420p", "-c:a", "aac",
                "-b:a", "128k", "-ac", "2", "-r", "30", "-y",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(Self::path_arg(output));
        args
    }

    /// H.264 CRF 23 `medium` main, scale-then-pad to `width`x`height`,
    /// capped at 2 Mbps with a 4 Mbps buffer, AAC 128k, faststart.
    pub fn rendition_args(input: &Path, output: &Path, width: u32, height: u32) -> Vec<String> {
        let filter = format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            w = width,
            h = height
        );

        let mut args = vec![
            "-i".to_string(),
            Self::path_arg(input),
            "-vf".to_string(),
            filter,
        ];
        args.extend(
            [
                "-c:v", "libx264", "-crf", "23", "-preset", "medium", "-profile:v", "main",
                "-pix_fmt", "yuv420p", "-maxrate", "2M", "-bufsize", "4M", "-c:a", "aac", "-b:a",
                "128k", "-movflags", "faststart", "-y",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(Self::path_arg(output));
        args
    }

    fn binary_path(&self, binary: Binary) -> &PathBuf {
        match binary {
            Binary::Ffmpeg => &self.config.ffmpeg_path,
            Binary::Ffprobe => &self.config.ffprobe_path,
        }
    }

    fn not_found(&self, binary: Binary) -> MediaToolError {
        match binary {
            Binary::Ffmpeg => MediaToolError::FfmpegNotFound {
                path: self.config.ffmpeg_path.clone(),
            },
            Binary::Ffprobe => MediaToolError::FfprobeNotFound {
                path: self.config.ffprobe_path.clone(),
            },
        }
    }

    /// Runs one invocation to completion, racing its deadline and `cancel`.
    ///
    /// The child is killed if either fires. Returns captured stdout.
    async fn run(
        &self,
        binary: Binary,
        operation: &'static str,
        args: Vec<String>,
        deadline_secs: u64,
        cancel: &CancellationToken,
    ) -> Result<String, MediaToolError> {
        if cancel.is_cancelled() {
            return Err(MediaToolError::Cancelled { operation });
        }

        debug!(operation, args = ?args, "Running media tool");
        let start = Instant::now();

        let child = Command::new(self.binary_path(binary))
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    self.not_found(binary)
                } else {
                    MediaToolError::Io(e)
                }
            })?;

        // Dropping the wait future drops the child, which kills it.
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(MediaToolError::Cancelled { operation }),
            waited = timeout(Duration::from_secs(deadline_secs), child.wait_with_output()) => {
                match waited {
                    Err(_) => Err(MediaToolError::Timeout { operation, timeout_secs: deadline_secs }),
                    Ok(Err(e)) => Err(MediaToolError::Io(e)),
                    Ok(Ok(output)) if output.status.success() => {
                        Ok(String::from_utf8_lossy(&output.stdout).to_string())
                    }
                    Ok(Ok(output)) => {
                        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                        Err(MediaToolError::tool_failed(
                            operation,
                            format!("exited with code: {:?}", output.status.code()),
                            if stderr.is_empty() { None } else { Some(stderr) },
                        ))
                    }
                }
            }
        };

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::MEDIA_TOOL_DURATION
            .with_label_values(&[operation, status])
            .observe(start.elapsed().as_secs_f64());

        result
    }

    /// Runs an ffmpeg invocation that must leave `output` behind.
    async fn run_ffmpeg(
        &self,
        operation: &'static str,
        args: Vec<String>,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError> {
        self.run(Binary::Ffmpeg, operation, args, self.config.timeout_secs, cancel)
            .await?;

        tokio::fs::metadata(output)
            .await
            .map_err(|_| MediaToolError::tool_failed(operation, "output file not created", None))?;
        Ok(())
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn probe(
        &self,
        input: &Path,
        cancel: &CancellationToken,
    ) -> Result<ProbeInfo, MediaToolError> {
        let stdout = self
            .run(
                Binary::Ffprobe,
                "probe",
                Self::probe_args(input),
                self.config.probe_timeout_secs,
                cancel,
            )
            .await?;
        ProbeInfo::parse(&stdout)
    }

    async fn extract_cover(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError> {
        self.run_ffmpeg("cover", Self::cover_args(input, output), output, cancel)
            .await
    }

    async fn extract_frame(
        &self,
        input: &Path,
        at_secs: f64,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError> {
        self.run_ffmpeg("frame", Self::frame_args(input, at_secs, output), output, cancel)
            .await
    }

    async fn normalize(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), MediaToolError> {
        self.run_ffmpeg("normalize", Self::normalize_args(input, output), output, cancel)
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
        self.run_ffmpeg(
            "rendition",
            Self::rendition_args(input, output, width, height),
            output,
            cancel,
        )
        .await
    }

    async fn validate(&self) -> Result<(), MediaToolError> {
        let cancel = CancellationToken::new();
        for binary in [Binary::Ffmpeg, Binary::Ffprobe] {
            self.run(binary, "version", vec!["-version".to_string()], 10, &cancel)
                .await?;
        }
        Ok(())
    }
}
