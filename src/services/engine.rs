//! Black-box media transform engine.
//!
//! The pipeline only needs "given an input file and an operation, produce
//! an output file". [`FfmpegEngine`] does that by shelling out to ffmpeg,
//! killing the process if it runs past the configured timeout.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::models::{OperationSpec, OverlayPosition};

/// Captured stderr is truncated to this many bytes.
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// One engine invocation.
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub input: PathBuf,
    /// Where the engine should write its result.
    pub output: PathBuf,
    pub operation: OperationSpec,
}

#[async_trait]
pub trait TransformEngine: Send + Sync {
    /// Run one operation; returns the path of the produced file.
    async fn transform(&self, request: &TransformRequest) -> Result<PathBuf, EngineError>;

    /// Media duration in seconds, when the engine can tell.
    async fn probe_duration(&self, _path: &Path) -> Result<Option<f64>, EngineError> {
        Ok(None)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start transform process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("transform exited with code {exit_code:?}: {stderr}")]
    Failed { exit_code: Option<i32>, stderr: String },

    #[error("transform timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("transform reported success but produced no file at {0}")]
    MissingOutput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// ffmpeg/ffprobe backed engine.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_path: String,
    ffprobe_path: String,
    timeout: Duration,
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: &str, ffprobe_path: &str, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.to_string(),
            ffprobe_path: ffprobe_path.to_string(),
            timeout,
        }
    }
}

/// ffmpeg arguments (after the input) for one operation.
pub fn ffmpeg_args(operation: &OperationSpec) -> Vec<String> {
    match operation {
        OperationSpec::Cut { start, end } => vec![
            "-ss".into(),
            start.clone(),
            "-to".into(),
            end.clone(),
            "-c".into(),
            "copy".into(),
        ],
        OperationSpec::Resize { width, height } => {
            vec!["-vf".into(), format!("scale={width}:{height}"), "-c:a".into(), "copy".into()]
        }
        // The container change is carried by the output extension.
        OperationSpec::Convert { .. } => Vec::new(),
        OperationSpec::Overlay {
            text,
            position,
            font_size,
        } => {
            let (x, y) = match position {
                OverlayPosition::TopLeft => ("10", "10"),
                OverlayPosition::TopRight => ("w-tw-10", "10"),
                OverlayPosition::BottomLeft => ("10", "h-th-10"),
                OverlayPosition::BottomRight => ("w-tw-10", "h-th-10"),
                OverlayPosition::Center => ("(w-tw)/2", "(h-th)/2"),
            };
            // A quote cannot be escaped inside a quoted value: close, escape, reopen.
            let escaped = text.replace('\\', "\\\\").replace('\'', r"'\''").replace(':', "\\:");
            vec![
                "-vf".into(),
                format!("drawtext=text='{escaped}':x={x}:y={y}:fontsize={font_size}:fontcolor=white"),
                "-c:a".into(),
                "copy".into(),
            ]
        }
    }
}

/// Run `cmd` to completion, killing it once `timeout` elapses.
async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<std::process::Output, EngineError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let mut child = cmd.spawn().map_err(EngineError::Spawn)?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_task = tokio::spawn(read_stream(stdout));
    let stderr_task = tokio::spawn(read_stream(stderr));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(std::process::Output {
            status,
            stdout: stdout_task.await.unwrap_or_default(),
            stderr: stderr_task.await.unwrap_or_default(),
        }),
        Ok(Err(e)) => Err(EngineError::Io(e)),
        // `child` is dropped here; kill_on_drop terminates the process.
        Err(_) => Err(EngineError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
    }
}

async fn read_stream<R: tokio::io::AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h.take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
    }
    buf
}

#[async_trait]
impl TransformEngine for FfmpegEngine {
    async fn transform(&self, request: &TransformRequest) -> Result<PathBuf, EngineError> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(&request.input)
            .args(ffmpeg_args(&request.operation))
            .arg(&request.output);

        debug!(
            input = %request.input.display(),
            output = %request.output.display(),
            kind = %request.operation.kind(),
            "Invoking ffmpeg"
        );

        let output = run_with_timeout(&mut cmd, self.timeout).await?;
        if !output.status.success() {
            return Err(EngineError::Failed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        if !tokio::fs::try_exists(&request.output).await.unwrap_or(false) {
            return Err(EngineError::MissingOutput(request.output.clone()));
        }
        Ok(request.output.clone())
    }

    async fn probe_duration(&self, path: &Path) -> Result<Option<f64>, EngineError> {
        let mut cmd = Command::new(&self.ffprobe_path);
        cmd.arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(path);

        let output = run_with_timeout(&mut cmd, self.timeout).await?;
        if !output.status.success() {
            warn!(path = %path.display(), "ffprobe could not read media duration");
            return Ok(None);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputFormat;

    #[test]
    fn test_cut_args() {
        let args = ffmpeg_args(&OperationSpec::Cut {
            start: "00:00:05".into(),
            end: "00:00:10".into(),
        });
        assert_eq!(args, vec!["-ss", "00:00:05", "-to", "00:00:10", "-c", "copy"]);
    }

    #[test]
    fn test_resize_args() {
        let args = ffmpeg_args(&OperationSpec::Resize { width: 1280, height: 720 });
        assert_eq!(args[1], "scale=1280:720");
    }

    #[test]
    fn test_convert_has_no_filter() {
        assert!(ffmpeg_args(&OperationSpec::Convert { target_format: OutputFormat::Mov }).is_empty());
    }

    #[test]
    fn test_overlay_escapes_text() {
        let args = ffmpeg_args(&OperationSpec::Overlay {
            text: "it's 10:30".into(),
            position: OverlayPosition::Center,
            font_size: 32,
        });
        assert!(args[1].contains(r"text='it'\''s 10\:30'"));
        assert!(args[1].contains("x=(w-tw)/2"));
        assert!(args[1].contains("fontsize=32"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let engine = FfmpegEngine::new(
            "/nonexistent/ffmpeg",
            "/nonexistent/ffprobe",
            Duration::from_secs(1),
        );
        let request = TransformRequest {
            input: PathBuf::from("/tmp/in.mp4"),
            output: PathBuf::from("/tmp/out.mp4"),
            operation: OperationSpec::Resize { width: 640, height: 360 },
        };
        assert!(matches!(engine.transform(&request).await, Err(EngineError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_timeout_kills_long_running_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");

        let started = Instant::now();
        let result = run_with_timeout(&mut cmd, Duration::from_millis(100)).await;

        assert!(matches!(result, Err(EngineError::Timeout { elapsed_ms }) if elapsed_ms >= 100));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
