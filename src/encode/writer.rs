use crate::capture::pool::BufferPool;
use crate::capture::session::CaptureStats;
use crate::foundation::core::{FrameIndex, SourceId};
use std::collections::HashMap;
use std::io::Write;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::warn;

/// Identity of one registered pending write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WriteTicket(pub u64);

struct PendingEntry {
    source: SourceId,
    frame: FrameIndex,
}

struct PendingState {
    next_ticket: u64,
    entries: HashMap<u64, PendingEntry>,
}

/// Global registry of writes that have been scheduled but not yet completed.
///
/// One instance is shared by every stream writer in a session, so the ceiling
/// bounds memory across all sources together, not per source. Registration
/// happens at schedule time; the worker that finishes (or fails) the write
/// removes its own entry and wakes anyone blocked in [`PendingWrites::wait_drained`].
pub struct PendingWrites {
    ceiling: usize,
    state: Mutex<PendingState>,
    drained: Condvar,
}

impl PendingWrites {
    /// Registry admitting at most `ceiling` concurrent pending writes.
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            state: Mutex::new(PendingState {
                next_ticket: 0,
                entries: HashMap::new(),
            }),
            drained: Condvar::new(),
        }
    }

    /// The configured ceiling.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Writes currently in flight.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// `true` when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim a slot for a new write, or `None` when the registry is full.
    pub fn try_register(&self, source: SourceId, frame: FrameIndex) -> Option<WriteTicket> {
        let mut state = self.state.lock().unwrap();
        if state.entries.len() >= self.ceiling {
            return None;
        }
        let ticket = WriteTicket(state.next_ticket);
        state.next_ticket += 1;
        state.entries.insert(ticket.0, PendingEntry { source, frame });
        Some(ticket)
    }

    /// `(source, frame)` of every write still in flight, oldest first.
    pub fn pending_ids(&self) -> Vec<(SourceId, FrameIndex)> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<_> = state.entries.iter().collect();
        entries.sort_by_key(|(ticket, _)| **ticket);
        entries
            .into_iter()
            .map(|(_, e)| (e.source, e.frame))
            .collect()
    }

    /// Mark a write as finished, releasing its slot.
    pub fn complete(&self, ticket: WriteTicket) {
        let mut state = self.state.lock().unwrap();
        state.entries.remove(&ticket.0);
        if state.entries.is_empty() {
            self.drained.notify_all();
        }
    }

    /// Block until every pending write completes, or until `timeout` elapses.
    ///
    /// Returns `true` when the registry drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (state, _timed_out) = self
            .drained
            .wait_timeout_while(state, timeout, |s| !s.entries.is_empty())
            .unwrap();
        state.entries.is_empty()
    }
}

/// What happened to a frame handed to [`StreamWriter::schedule`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheduled {
    /// The frame was queued for its writer worker.
    Queued,
    /// The pending ceiling was hit; the frame was dropped and its buffer
    /// returned to the pool.
    Dropped,
    /// The writer has been closed; nothing was queued.
    SinkClosed,
}

struct WriteJob {
    ticket: WriteTicket,
    frame: FrameIndex,
    buf: Vec<u8>,
}

// Ensures pool return and ticket completion happen exactly once per job,
// including when the stream write panics.
struct CompletionGuard {
    ticket: WriteTicket,
    buf: Option<Vec<u8>>,
    pending: Arc<PendingWrites>,
    pool: Arc<BufferPool>,
}

impl CompletionGuard {
    fn bytes(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
        self.pending.complete(self.ticket);
    }
}

/// Ordered, backpressured writer for one output stream.
///
/// A dedicated worker thread owns the stream and consumes frames from a FIFO
/// channel, so bytes for one sink are written by exactly one thread in
/// schedule order while workers of different sinks run in parallel. Closing
/// the writer lets the worker drain whatever is already queued, then drops the
/// stream, which is what delivers end-of-input to an encoder's stdin.
pub struct StreamWriter {
    source: SourceId,
    name: String,
    tx: Option<mpsc::Sender<WriteJob>>,
    worker: Option<std::thread::JoinHandle<()>>,
    pending: Arc<PendingWrites>,
    pool: Arc<BufferPool>,
    stats: Arc<CaptureStats>,
}

impl StreamWriter {
    /// Spawn the worker thread that owns `stream`.
    pub fn spawn(
        source: SourceId,
        name: impl Into<String>,
        stream: Box<dyn Write + Send>,
        pending: Arc<PendingWrites>,
        pool: Arc<BufferPool>,
        stats: Arc<CaptureStats>,
    ) -> Self {
        let name = name.into();
        let (tx, rx) = mpsc::channel::<WriteJob>();

        let worker = std::thread::spawn({
            let pending = Arc::clone(&pending);
            let pool = Arc::clone(&pool);
            let stats = Arc::clone(&stats);
            let name = name.clone();
            move || {
                let mut stream = stream;
                for job in rx {
                    let WriteJob { ticket, frame, buf } = job;
                    let guard = CompletionGuard {
                        ticket,
                        buf: Some(buf),
                        pending: Arc::clone(&pending),
                        pool: Arc::clone(&pool),
                    };
                    let res = stream.write_all(guard.bytes()).and_then(|_| stream.flush());
                    if let Err(e) = res {
                        stats.record_write_failure();
                        warn!("frame {} write to '{name}' failed: {e}", frame.0);
                    }
                }
                // Channel closed and FIFO drained; dropping the stream here is
                // what closes an encoder's stdin.
            }
        });

        Self {
            source,
            name,
            tx: Some(tx),
            worker: Some(worker),
            pending,
            pool,
            stats,
        }
    }

    /// The source this writer belongs to.
    pub fn source(&self) -> SourceId {
        self.source
    }

    /// Queue one frame for writing, or shed it under load.
    ///
    /// When the shared registry is at its ceiling the frame is dropped on the
    /// spot and its buffer returned to the pool, so a stalled sink costs a
    /// warning per frame instead of unbounded memory.
    pub fn schedule(&self, frame: FrameIndex, buf: Vec<u8>) -> Scheduled {
        let Some(ticket) = self.pending.try_register(self.source, frame) else {
            warn!(
                "dropping frame {} for '{}': {} pending writes at ceiling",
                frame.0,
                self.name,
                self.pending.ceiling()
            );
            self.stats.record_frame_dropped();
            self.pool.release(buf);
            return Scheduled::Dropped;
        };

        let Some(tx) = self.tx.as_ref() else {
            self.pending.complete(ticket);
            self.pool.release(buf);
            return Scheduled::SinkClosed;
        };
        if let Err(failed) = tx.send(WriteJob { ticket, frame, buf }) {
            let WriteJob { ticket, buf, .. } = failed.0;
            warn!(
                "writer worker for '{}' is gone, dropping frame {}",
                self.name, frame.0
            );
            self.pending.complete(ticket);
            self.pool.release(buf);
            return Scheduled::SinkClosed;
        }
        Scheduled::Queued
    }

    /// Stop accepting frames without waiting for the worker.
    ///
    /// The worker keeps draining whatever is already queued and then drops
    /// the stream. Useful when the consumer of the stream must be dealt with
    /// (waited for, killed) before it is safe to block on the worker.
    pub fn seal(&mut self) {
        drop(self.tx.take());
    }

    /// Stop accepting frames, drain the queue, and join the worker.
    ///
    /// Idempotent. Blocks until the worker has written (or failed) everything
    /// already scheduled and released the stream.
    pub fn close(&mut self) {
        self.seal();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("writer worker for '{}' panicked", self.name);
        }
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.close();
    }
}
