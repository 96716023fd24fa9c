//! Synchronized multi-source frame capture.
//!
//! `atlascap` renders N independent sources into one composite "atlas"
//! surface per tick, reads the surface back asynchronously, slices the result
//! into per-source frames, and streams each source to its own encoder process
//! (or PNG directory) behind a global backpressure ceiling. The API is
//! session-oriented:
//!
//! - Describe sources and sinks in a [`CaptureConfig`]
//! - [`CaptureSession::start`] against a [`RenderHost`]
//! - Call [`CaptureSession::tick`] at the configured rate
//! - [`CaptureSession::shutdown`] drains and tears everything down within a
//!   bounded grace period
#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Atlas layout planning and the composite surface.
pub mod atlas;
/// The capture pipeline and session.
pub mod capture;
/// Encoder processes and backpressured stream writing.
pub mod encode;
/// Shared value types and errors.
pub mod foundation;

pub use crate::foundation::core::{BYTES_PER_PIXEL, Fps, FrameIndex, PixelRect, SourceId};
pub use crate::foundation::error::{CaptureError, CaptureResult};

pub use crate::atlas::layout::{AtlasLayout, DEFAULT_SOURCE_HEIGHT, DEFAULT_SOURCE_WIDTH};
pub use crate::atlas::surface::{CompositeTarget, SurfaceHandle};
pub use crate::capture::host::{InMemoryHost, ReadbackComplete, RenderHost};
pub use crate::capture::pool::{BufferPool, PoolOpts, PoolStats};
pub use crate::capture::session::{
    CaptureConfig, CaptureSession, CaptureStats, SessionCtx, SourceConfig, StatsSnapshot,
    TickOutcome,
};
pub use crate::encode::process::{EncoderCodec, EncoderSettings, encoder_on_path};
pub use crate::encode::sink::SinkSpec;
pub use crate::encode::writer::PendingWrites;
