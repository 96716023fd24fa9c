//! The capture pipeline: host contract, buffer pool, transfer control,
//! slice dispatch, and the session that ties them together.

/// Per-frame slicing of the composite and routing of slices to sinks.
pub mod dispatch;
/// Rendering collaborator contract and the in-memory host.
pub mod host;
/// Bounded recycling pool for frame buffers.
pub mod pool;
/// Session configuration, the tick loop, and shutdown.
pub mod session;
/// Serialization of device-to-host readbacks.
pub mod transfer;
