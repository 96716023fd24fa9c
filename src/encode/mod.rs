//! Encoder process management and backpressured stream writing.
//!
//! Each encoder sink owns one external process and one writer worker; a
//! session-wide pending-write registry bounds memory across all of them.

/// Spawning, reaping, and command-line construction for encoder processes.
pub mod process;
/// Sink configuration and per-source sink runtime (encoder, files, disabled).
pub mod sink;
/// The pending-write registry and per-stream writer workers.
pub mod writer;
