//! Encoder processes.
//!
//! One encoder process records one segment. The session only needs three
//! things from it: start it, notice if it dies, and stop it cleanly.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Everything an encoder needs to record one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSpec {
    /// Owning session.
    pub session_id: String,
    /// Segment index within the session, starting at 0.
    pub index: u32,
    /// Output video file.
    pub output_path: PathBuf,
    /// Overlay text file the encoder re-reads.
    pub overlay_path: PathBuf,
    /// Planned segment duration.
    pub duration: Duration,
}

/// How an encoder process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
}

impl EncoderExit {
    /// Whether the process exited with status 0.
    #[must_use]
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for EncoderExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status {code}"),
            None => write!(f, "terminated by signal"),
        }
    }
}

impl From<std::process::ExitStatus> for EncoderExit {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// A running encoder.
#[async_trait::async_trait]
pub trait EncoderProcess: Send + fmt::Debug {
    /// Wait for the process to exit on its own.
    ///
    /// Must be cancel-safe: the session polls it inside `select!`.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit status can't be collected.
    async fn wait(&mut self) -> Result<EncoderExit>;

    /// Ask the process to finish the file, killing it after `grace`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process can't be signalled or reaped.
    async fn shutdown(&mut self, grace: Duration) -> Result<EncoderExit>;
}

/// Starts encoder processes.
#[async_trait::async_trait]
pub trait Encoder: Send + Sync + fmt::Debug {
    /// Start recording the given segment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EncoderProcessFailure`] if the process can't start.
    async fn spawn(&self, segment: &SegmentSpec) -> Result<Box<dyn EncoderProcess>>;
}

/// Default `ffmpeg` arguments: V4L2 camera in, overlay burned in with
/// `drawtext`, H.264 out.
///
/// No `-t {duration}` here: the session ends each segment itself, and an
/// encoder that exits on its own is treated as a failure.
#[must_use]
pub fn default_ffmpeg_args() -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "v4l2",
        "-framerate",
        "30",
        "-video_size",
        "1920x1080",
        "-i",
        "/dev/video0",
        "-vf",
        "drawtext=textfile={overlay}:reload=1:x=16:y=h-th-16:fontsize=28:fontcolor=white:box=1:boxcolor=black@0.5",
        "-c:v",
        "libx264",
        "-preset",
        "ultrafast",
        "-b:v",
        "10M",
        "{output}",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// `ffmpeg` (or any program taking a templated argument list).
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: String,
    args: Vec<String>,
}

impl FfmpegEncoder {
    /// Create an encoder running `program` with the given argument template.
    ///
    /// `{output}`, `{overlay}` and `{duration}` (seconds) are substituted per
    /// segment.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The argument list for one segment.
    #[must_use]
    pub fn render_args(&self, segment: &SegmentSpec) -> Vec<String> {
        let output = segment.output_path.display().to_string();
        let overlay = segment.overlay_path.display().to_string();
        let duration = segment.duration.as_secs().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{output}", &output)
                    .replace("{overlay}", &overlay)
                    .replace("{duration}", &duration)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl Encoder for FfmpegEncoder {
    async fn spawn(&self, segment: &SegmentSpec) -> Result<Box<dyn EncoderProcess>> {
        let args = self.render_args(segment);
        debug!(program = %self.program, ?args, "spawning encoder");

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                Error::encoder(
                    segment.index,
                    format!("failed to start {}: {err}", self.program),
                )
            })?;

        info!(
            segment = segment.index,
            pid = child.id(),
            output = %segment.output_path.display(),
            "encoder started"
        );
        Ok(Box::new(FfmpegProcess {
            child,
            segment: segment.index,
        }))
    }
}

/// A running `ffmpeg` child.
#[derive(Debug)]
struct FfmpegProcess {
    child: Child,
    segment: u32,
}

#[async_trait::async_trait]
impl EncoderProcess for FfmpegProcess {
    async fn wait(&mut self) -> Result<EncoderExit> {
        Ok(self.child.wait().await?.into())
    }

    async fn shutdown(&mut self, grace: Duration) -> Result<EncoderExit> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status.into());
        }

        // ffmpeg finalizes the container when it reads `q` on stdin.
        if let Some(mut stdin) = self.child.stdin.take() {
            if let Err(err) = stdin.write_all(b"q").await {
                debug!(segment = self.segment, error = %err, "encoder stdin closed");
            }
            drop(stdin);
        }

        if let Ok(status) = tokio::time::timeout(grace, self.child.wait()).await {
            return Ok(status?.into());
        }

        warn!(
            segment = self.segment,
            grace_ms = grace.as_millis(),
            "encoder ignored quit request, killing"
        );
        self.child.kill().await?;
        Ok(self.child.wait().await?.into())
    }
}
