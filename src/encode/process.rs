use crate::foundation::core::Fps;
use crate::foundation::error::{CaptureError, CaptureResult};
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::warn;

/// Codec selection for an encoder process.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EncoderCodec {
    /// CPU encoding via libx264. Forces `yuv420p` output, which requires even
    /// frame dimensions.
    Software {
        /// Constant rate factor (0..=51, lower is higher quality).
        crf: u8,
        /// libx264 preset name, e.g. `"medium"` or `"veryfast"`.
        preset: String,
    },
    /// GPU encoding via a named ffmpeg encoder such as `h264_nvenc`.
    Hardware {
        /// ffmpeg encoder name passed to `-c:v`.
        encoder: String,
        /// Constant quality target passed to `-cq`.
        cq: u8,
    },
}

impl EncoderCodec {
    /// Whether this codec's pixel format rejects odd frame dimensions.
    pub fn requires_even_dimensions(&self) -> bool {
        matches!(self, Self::Software { .. })
    }

    fn push_args(&self, cmd: &mut Command) {
        match self {
            Self::Software { crf, preset } => {
                cmd.args([
                    "-c:v",
                    "libx264",
                    "-preset",
                    preset,
                    "-crf",
                    &crf.to_string(),
                    "-pix_fmt",
                    "yuv420p",
                ]);
            }
            Self::Hardware { encoder, cq } => {
                cmd.args(["-c:v", encoder, "-cq", &cq.to_string()]);
            }
        }
    }
}

/// Options for spawning one encoder process.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EncoderSettings {
    /// Encoder executable, resolved through `PATH`.
    pub program: String,
    /// Codec arguments appended after the raw-video input.
    pub codec: EncoderCodec,
    /// Overwrite the output file if it already exists (`-y` vs `-n`).
    pub overwrite: bool,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".into(),
            codec: EncoderCodec::Software {
                crf: 23,
                preset: "medium".into(),
            },
            overwrite: true,
        }
    }
}

impl EncoderSettings {
    fn command(&self, width: u32, height: u32, fps: Fps, out_path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if self.overwrite {
            cmd.arg("-y");
        } else {
            cmd.arg("-n");
        }

        // Input: tightly packed RGBA8 frames on stdin.
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-video_size",
            &format!("{width}x{height}"),
            "-framerate",
            &format!("{}/{}", fps.num, fps.den),
            "-i",
            "pipe:0",
        ]);
        self.codec.push_args(&mut cmd);
        cmd.arg(out_path);
        cmd
    }
}

/// How an encoder process ended.
#[derive(Debug)]
pub struct ExitReport {
    /// The process exit status.
    pub status: ExitStatus,
    /// Everything the process wrote to stderr, lossily decoded.
    pub stderr: String,
    /// Whether the process had to be killed after the grace period.
    pub forced: bool,
}

impl ExitReport {
    /// `true` when the process exited cleanly on its own.
    pub fn clean(&self) -> bool {
        self.status.success() && !self.forced
    }
}

/// One spawned encoder child and its stderr drain.
///
/// This is the only owner of the child process: whoever holds it decides when
/// to wait or kill, and nothing else can reach the process. The write end of
/// stdin is taken at spawn time and handed to the stream writer, which drops
/// it to signal end-of-input.
#[derive(Debug)]
pub struct EncoderProcess {
    child: Child,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,
}

impl EncoderProcess {
    /// Spawn an encoder for a `width`×`height` RGBA stream into `out_path`.
    ///
    /// Returns the process capability plus its stdin handle. A spawn failure
    /// is returned as a `Process` error; callers decide whether that degrades
    /// the source or aborts the session.
    pub fn spawn(
        settings: &EncoderSettings,
        width: u32,
        height: u32,
        fps: Fps,
        out_path: &Path,
    ) -> CaptureResult<(Self, ChildStdin)> {
        ensure_parent_dir(out_path)?;
        if !settings.overwrite && out_path.exists() {
            return Err(CaptureError::process(format!(
                "output file '{}' already exists",
                out_path.display()
            )));
        }

        let mut child = settings
            .command(width, height, fps, out_path)
            .spawn()
            .map_err(|e| {
                CaptureError::process(format!(
                    "failed to spawn '{}' (is it installed and on PATH?): {e}",
                    settings.program
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CaptureError::process("failed to open encoder stdin (unexpected)"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| CaptureError::process("failed to open encoder stderr (unexpected)"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        Ok((
            Self {
                child,
                stderr_drain: Some(stderr_drain),
            },
            stdin,
        ))
    }

    /// Wait for the process to exit on its own, killing it at the deadline.
    ///
    /// Call only after the stdin handle has been dropped, otherwise the
    /// encoder never sees end-of-input and the grace period is always spent.
    pub fn wait_with_grace(mut self, grace: Duration) -> CaptureResult<ExitReport> {
        let deadline = Instant::now() + grace;
        let mut forced = false;
        let status = loop {
            match self.child.try_wait().map_err(|e| {
                CaptureError::process(format!("failed to poll encoder process: {e}"))
            })? {
                Some(status) => break status,
                None if Instant::now() >= deadline => {
                    warn!("encoder did not exit within the grace period, killing it");
                    self.child.kill().map_err(|e| {
                        CaptureError::process(format!("failed to kill encoder process: {e}"))
                    })?;
                    forced = true;
                    break self.child.wait().map_err(|e| {
                        CaptureError::process(format!("failed to reap encoder process: {e}"))
                    })?;
                }
                None => std::thread::sleep(Duration::from_millis(10)),
            }
        };

        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| CaptureError::process("encoder stderr drain thread panicked"))?
                .unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(ExitReport {
            status,
            stderr: String::from_utf8_lossy(&stderr_bytes).trim().to_string(),
            forced,
        })
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> CaptureResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `program` can be invoked from `PATH`.
pub fn encoder_on_path(program: &str) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
