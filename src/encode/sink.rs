use crate::capture::pool::BufferPool;
use crate::capture::session::CaptureStats;
use crate::encode::process::{EncoderProcess, EncoderSettings, ExitReport};
use crate::encode::writer::{PendingWrites, StreamWriter};
use crate::foundation::core::{Fps, FrameIndex, SourceId};
use crate::foundation::error::{CaptureError, CaptureResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Where one source's frames go.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SinkSpec {
    /// Stream raw frames into a spawned encoder process.
    Encoder {
        /// Encoded output file (e.g. an `.mp4` path).
        out_path: PathBuf,
        /// Encoder invocation options.
        settings: EncoderSettings,
        /// Directory to fall back to as a file sink when the encoder cannot
        /// be spawned. `None` disables the source instead.
        fallback_dir: Option<PathBuf>,
    },
    /// Write each frame as a PNG into a directory.
    Files {
        /// Target directory, created at session start.
        dir: PathBuf,
    },
}

/// Runtime state of one source's sink after activation.
pub enum ActiveSink {
    /// Frames stream to an owned encoder process through a writer worker.
    Encoder {
        /// Backpressured writer feeding the encoder's stdin.
        writer: StreamWriter,
        /// The owned child process.
        process: EncoderProcess,
    },
    /// Frames are written as individual PNG files.
    Files {
        /// Prepared output directory.
        dir: PathBuf,
    },
    /// The source produces no output for the rest of the session.
    Disabled,
}

impl ActiveSink {
    /// Bring a configured sink up for one source.
    ///
    /// File sinks are fatal when their directory cannot be prepared; an
    /// encoder that fails to spawn degrades to the fallback directory (or to
    /// [`ActiveSink::Disabled`]) with a warning, never an error.
    #[allow(clippy::too_many_arguments)]
    pub fn activate(
        source: SourceId,
        name: &str,
        spec: &SinkSpec,
        width: u32,
        height: u32,
        fps: Fps,
        pending: &Arc<PendingWrites>,
        pool: &Arc<BufferPool>,
        stats: &Arc<CaptureStats>,
    ) -> CaptureResult<Self> {
        match spec {
            SinkSpec::Files { dir } => {
                prepare_sink_dir(dir)?;
                Ok(Self::Files { dir: dir.clone() })
            }
            SinkSpec::Encoder {
                out_path,
                settings,
                fallback_dir,
            } => match EncoderProcess::spawn(settings, width, height, fps, out_path) {
                Ok((process, stdin)) => Ok(Self::Encoder {
                    writer: StreamWriter::spawn(
                        source,
                        name,
                        Box::new(stdin),
                        Arc::clone(pending),
                        Arc::clone(pool),
                        Arc::clone(stats),
                    ),
                    process,
                }),
                Err(e) => {
                    warn!("encoder for '{name}' unavailable: {e}");
                    match fallback_dir {
                        Some(dir) => match prepare_sink_dir(dir) {
                            Ok(()) => {
                                warn!(
                                    "'{name}' falls back to PNG files in '{}'",
                                    dir.display()
                                );
                                Ok(Self::Files { dir: dir.clone() })
                            }
                            Err(e) => {
                                warn!("fallback directory for '{name}' unusable ({e}), disabling");
                                Ok(Self::Disabled)
                            }
                        },
                        None => {
                            warn!("'{name}' has no fallback directory, disabling");
                            Ok(Self::Disabled)
                        }
                    }
                }
            },
        }
    }

    /// Close the sink, draining queued frames and reaping the encoder.
    ///
    /// Returns the encoder's exit report when there was a process to wait for.
    pub fn close(self, grace: Duration) -> CaptureResult<Option<ExitReport>> {
        match self {
            Self::Encoder {
                mut writer,
                process,
            } => {
                // Seal first so the worker drains and drops stdin, then give
                // the encoder its grace. Waiting on the worker before the
                // process would deadlock against an encoder that stopped
                // reading; once the process is gone (or killed) every queued
                // write fails fast and the join returns.
                writer.seal();
                let report = process.wait_with_grace(grace)?;
                writer.close();
                Ok(Some(report))
            }
            Self::Files { .. } | Self::Disabled => Ok(None),
        }
    }
}

/// Create `dir` if needed and verify it is writable.
pub fn prepare_sink_dir(dir: &Path) -> CaptureResult<()> {
    use anyhow::Context as _;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create sink directory '{}'", dir.display()))?;
    let probe = dir.join(".write-probe");
    std::fs::write(&probe, b"")
        .with_context(|| format!("sink directory '{}' is not writable", dir.display()))?;
    std::fs::remove_file(&probe).ok();
    Ok(())
}

/// File name for one frame of a file sink: `<name>_<frame:06>.png`.
pub fn frame_file_name(name: &str, frame: FrameIndex) -> String {
    format!("{name}_{:06}.png", frame.0)
}

/// Write one RGBA frame as a PNG into `dir`.
pub fn write_frame_png(
    dir: &Path,
    name: &str,
    frame: FrameIndex,
    width: u32,
    height: u32,
    bytes: &[u8],
) -> CaptureResult<PathBuf> {
    let path = dir.join(frame_file_name(name, frame));
    image::save_buffer_with_format(
        &path,
        bytes,
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|e| CaptureError::write(format!("failed to write '{}': {e}", path.display())))?;
    Ok(path)
}
