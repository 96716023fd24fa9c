use crate::atlas::layout::{AtlasLayout, DEFAULT_SOURCE_HEIGHT, DEFAULT_SOURCE_WIDTH};
use crate::atlas::surface::CompositeTarget;
use crate::capture::dispatch::{Dispatcher, Lane};
use crate::capture::host::RenderHost;
use crate::capture::pool::{BufferPool, PoolOpts, PoolStats};
use crate::capture::transfer::TransferController;
use crate::encode::sink::{ActiveSink, SinkSpec};
use crate::encode::writer::PendingWrites;
use crate::foundation::core::{Fps, FrameIndex, PixelRect, SourceId};
use crate::foundation::error::{CaptureError, CaptureResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// One capture source and where its frames should go.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceConfig {
    /// Source name, used in file names and log messages. Must be unique.
    pub name: String,
    /// Native width in pixels; `0` falls back to the default display size.
    pub width: u32,
    /// Native height in pixels; `0` falls back to the default display size.
    pub height: u32,
    /// Destination for this source's frames.
    pub sink: SinkSpec,
}

impl SourceConfig {
    /// The size this source is actually planned and encoded at.
    pub fn effective_size(&self) -> (u32, u32) {
        if self.width == 0 || self.height == 0 {
            (DEFAULT_SOURCE_WIDTH, DEFAULT_SOURCE_HEIGHT)
        } else {
            (self.width, self.height)
        }
    }
}

/// Full configuration for one capture session.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CaptureConfig {
    /// Tick rate, forwarded to every encoder.
    pub fps: Fps,
    /// The sources to capture, in id order.
    pub sources: Vec<SourceConfig>,
    /// Global cap on writes in flight across all sinks.
    pub pending_ceiling: usize,
    /// End-to-end budget for draining and tearing down at shutdown.
    pub shutdown_grace: Duration,
    /// Frame buffer pool limits.
    pub pool: PoolOpts,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: Fps::default(),
            sources: Vec::new(),
            pending_ceiling: 16,
            shutdown_grace: Duration::from_secs(2),
            pool: PoolOpts::default(),
        }
    }
}

impl CaptureConfig {
    /// Parse a configuration from its JSON representation.
    pub fn from_json_str(json: &str) -> CaptureResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CaptureError::config(format!("invalid capture config JSON: {e}")))
    }

    /// Serialize the configuration as pretty-printed JSON.
    pub fn to_json_string(&self) -> CaptureResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CaptureError::config(format!("failed to serialize capture config: {e}")))
    }

    /// Reject configurations the session cannot run with.
    pub fn validate(&self) -> CaptureResult<()> {
        if self.sources.is_empty() {
            return Err(CaptureError::config(
                "capture requires at least one source",
            ));
        }
        if self.fps.num == 0 || self.fps.den == 0 {
            return Err(CaptureError::config("fps must be non-zero"));
        }
        if self.pending_ceiling == 0 {
            return Err(CaptureError::config("pending write ceiling must be >= 1"));
        }

        let mut names = HashSet::new();
        for src in &self.sources {
            if src.name.is_empty() {
                return Err(CaptureError::config("source names must be non-empty"));
            }
            if src.name.contains(['/', '\\']) {
                return Err(CaptureError::config(format!(
                    "source name '{}' must not contain path separators",
                    src.name
                )));
            }
            if !names.insert(src.name.as_str()) {
                return Err(CaptureError::config(format!(
                    "duplicate source name '{}'",
                    src.name
                )));
            }
            if let SinkSpec::Encoder { settings, .. } = &src.sink
                && settings.codec.requires_even_dimensions()
            {
                let (w, h) = src.effective_size();
                if !w.is_multiple_of(2) || !h.is_multiple_of(2) {
                    return Err(CaptureError::config(format!(
                        "source '{}' is {w}x{h}, but its encoder requires even dimensions",
                        src.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Shared per-session state: the tick counter and the stop latch.
///
/// Handed out as an `Arc` so controllers, callbacks, and embedding code can
/// observe the same frame clock and request a stop from any thread. Stopping
/// is one-shot: once requested it never unlatches.
#[derive(Debug)]
pub struct SessionCtx {
    fps: Fps,
    frame: AtomicU64,
    stopping: AtomicBool,
}

impl SessionCtx {
    /// Fresh context starting at frame 0.
    pub fn new(fps: Fps) -> Self {
        Self {
            fps,
            frame: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
        }
    }

    /// The session tick rate.
    pub fn fps(&self) -> Fps {
        self.fps
    }

    /// Claim the next frame index.
    pub fn next_frame(&self) -> FrameIndex {
        FrameIndex(self.frame.fetch_add(1, Ordering::Relaxed))
    }

    /// Frames claimed so far.
    pub fn frames_started(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    /// Latch the stop flag; subsequent ticks become no-ops.
    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// Counters kept by a running session, updated from several threads.
#[derive(Debug, Default)]
pub struct CaptureStats {
    ticks: AtomicU64,
    transfers_completed: AtomicU64,
    transfers_failed: AtomicU64,
    transfers_skipped: AtomicU64,
    frames_dispatched: AtomicU64,
    frames_dropped: AtomicU64,
    write_failures: AtomicU64,
}

impl CaptureStats {
    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transfer_completed(&self) {
        self.transfers_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transfer_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transfer_skipped(&self) {
        self.transfers_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_dispatched(&self) {
        self.frames_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A coherent-enough copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            transfers_skipped: self.transfers_skipped.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Capture session statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Capture ticks executed.
    pub ticks: u64,
    /// Readbacks that completed and dispatched.
    pub transfers_completed: u64,
    /// Readbacks that failed at submission or completion.
    pub transfers_failed: u64,
    /// Ticks that skipped issuing a readback because one was in flight.
    pub transfers_skipped: u64,
    /// Per-source frames handed to a sink.
    pub frames_dispatched: u64,
    /// Per-source frames shed at the pending-write ceiling.
    pub frames_dropped: u64,
    /// Stream or file writes that failed.
    pub write_failures: u64,
}

/// Result of one [`CaptureSession::tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick ran; `transfer_issued` is `false` when the readback was
    /// skipped (previous transfer still in flight) or failed to submit.
    Frame {
        /// The frame index this tick claimed.
        frame: FrameIndex,
        /// Whether a readback was actually submitted.
        transfer_issued: bool,
    },
    /// A stop has been requested; nothing was rendered.
    Stopping,
}

/// A running multi-source capture.
///
/// Owns everything but the render host, which the embedder passes into each
/// call: the atlas layout, the composite surface, the buffer pool, the
/// per-source sinks with their writer workers and encoder processes, and the
/// transfer controller. Drive it by calling [`CaptureSession::tick`] at the
/// configured rate, then [`CaptureSession::shutdown`] exactly once.
pub struct CaptureSession {
    ctx: Arc<SessionCtx>,
    layout: AtlasLayout,
    placements: Vec<(SourceId, PixelRect)>,
    target: CompositeTarget,
    pool: Arc<BufferPool>,
    pending: Arc<PendingWrites>,
    stats: Arc<CaptureStats>,
    dispatcher: Arc<Dispatcher>,
    transfer: TransferController,
    shutdown_grace: Duration,
}

impl CaptureSession {
    /// Validate the configuration, plan the atlas, create the composite
    /// surface, and bring up every source's sink.
    ///
    /// Configuration problems and file-sink directory failures are fatal here;
    /// an encoder that cannot be spawned only degrades its source.
    #[tracing::instrument(skip(config, host))]
    pub fn start(config: CaptureConfig, host: &mut dyn RenderHost) -> CaptureResult<Self> {
        config.validate()?;

        let sizes: Vec<(u32, u32)> = config.sources.iter().map(|s| (s.width, s.height)).collect();
        let layout = AtlasLayout::plan(&sizes)?;

        let pool = Arc::new(BufferPool::new(config.pool));
        let pending = Arc::new(PendingWrites::new(config.pending_ceiling));
        let stats = Arc::new(CaptureStats::default());

        let mut target = CompositeTarget::new();
        target.ensure(host, layout.width, layout.height)?;

        let mut lanes = Vec::with_capacity(config.sources.len());
        for (i, src) in config.sources.iter().enumerate() {
            let source = SourceId(i as u32);
            let rect = layout.rects[i];
            match ActiveSink::activate(
                source,
                &src.name,
                &src.sink,
                rect.width,
                rect.height,
                config.fps,
                &pending,
                &pool,
                &stats,
            ) {
                Ok(sink) => lanes.push(Lane::new(source, &src.name, rect, sink)),
                Err(e) => {
                    // Unwind whatever came up before the failing source.
                    for lane in lanes {
                        let _ = lane.sink.close(config.shutdown_grace);
                    }
                    let _ = target.release(host);
                    return Err(e);
                }
            }
        }

        let placements = layout
            .rects
            .iter()
            .enumerate()
            .map(|(i, &rect)| (SourceId(i as u32), rect))
            .collect();
        let dispatcher = Arc::new(Dispatcher::new(
            layout.width,
            lanes,
            Arc::clone(&pool),
            Arc::clone(&stats),
        ));
        let transfer = TransferController::new(Arc::clone(&dispatcher), Arc::clone(&stats));

        Ok(Self {
            ctx: Arc::new(SessionCtx::new(config.fps)),
            layout,
            placements,
            target,
            pool,
            pending,
            stats,
            dispatcher,
            transfer,
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Capture one frame: render every source into its atlas rect, then issue
    /// the asynchronous readback.
    ///
    /// Errors come only from the host contract (redirect/render/restore); a
    /// readback that cannot be issued is reported through the outcome and the
    /// stats instead, and the session keeps going.
    pub fn tick(&mut self, host: &mut dyn RenderHost) -> CaptureResult<TickOutcome> {
        if self.ctx.is_stopping() {
            return Ok(TickOutcome::Stopping);
        }
        let frame = self.ctx.next_frame();
        self.stats.record_tick();

        let surface = self
            .target
            .surface()
            .ok_or_else(|| CaptureError::config("session has no composite surface"))?;

        for &(source, rect) in &self.placements {
            host.redirect_source(source, surface, rect)?;
            let rendered = host.render_source(source);
            // Never leave a source redirected, even when its render failed.
            let restored = host.restore_source(source);
            rendered?;
            restored?;
        }

        let transfer_issued =
            match self
                .transfer
                .issue(host, surface, frame, self.target.staging())
            {
                Ok(issued) => issued,
                Err(e) => {
                    warn!("tick {} could not issue its readback: {e}", frame.0);
                    false
                }
            };

        Ok(TickOutcome::Frame {
            frame,
            transfer_issued,
        })
    }

    /// Stop capturing, drain in-flight work within the grace budget, close
    /// every sink, and release the composite surface.
    ///
    /// Everything that cannot finish in time is abandoned with a warning;
    /// encoder processes that outlive their drain window are killed. Always
    /// returns the final statistics.
    #[tracing::instrument(skip(self, host))]
    pub fn shutdown(mut self, host: &mut dyn RenderHost) -> StatsSnapshot {
        self.ctx.request_stop();
        let deadline = Instant::now() + self.shutdown_grace;
        let remaining = |deadline: Instant| deadline.saturating_duration_since(Instant::now());

        if !self.transfer.wait_idle(remaining(deadline)) {
            warn!("a readback was still in flight at the grace deadline");
        }
        if !self.pending.wait_drained(remaining(deadline)) {
            warn!(
                "pending writes did not drain before the grace deadline: {:?}",
                self.pending.pending_ids()
            );
        }

        for (name, closed) in self.dispatcher.close_sinks(remaining(deadline)) {
            match closed {
                Ok(Some(report)) if !report.clean() => {
                    warn!(
                        "encoder for '{name}' exited uncleanly ({}): {}",
                        report.status, report.stderr
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("closing the sink for '{name}' failed: {e}"),
            }
        }

        if let Err(e) = self.target.release(host) {
            warn!("composite surface release failed: {e}");
        }
        self.stats.snapshot()
    }

    /// The immutable atlas layout for this session.
    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    /// Shared session context (frame clock and stop latch).
    pub fn ctx(&self) -> Arc<SessionCtx> {
        Arc::clone(&self.ctx)
    }

    /// Request a stop; equivalent to `ctx().request_stop()`.
    pub fn request_stop(&self) {
        self.ctx.request_stop();
    }

    /// Current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current buffer pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Writes currently in flight across all sinks.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }
}
