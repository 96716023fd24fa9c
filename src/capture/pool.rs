use std::collections::HashMap;
use std::sync::Mutex;

/// Retention limits for pooled frame buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolOpts {
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: usize,
    /// Maximum number of retained buffers per exact-size bucket.
    pub max_buffers_per_bucket: usize,
}

impl Default for PoolOpts {
    fn default() -> Self {
        Self {
            // Conservative default; a handful of 4K RGBA frames per bucket fits well under it.
            max_pool_bytes: 256 * 1024 * 1024,
            max_buffers_per_bucket: 8,
        }
    }
}

/// Counters describing pool behavior since construction.
#[derive(Debug, Default, Clone)]
pub struct PoolStats {
    /// Buffers currently parked in the pool.
    pub retained_buffers: usize,
    /// Bytes currently parked in the pool.
    pub retained_bytes: usize,
    /// Fresh allocations served because no pooled buffer matched.
    pub allocations: u64,
    /// Acquisitions served from an existing bucket.
    pub reuses: u64,
    /// Buffers dropped at release because a cap was exceeded.
    pub dropped_on_release: u64,
}

#[derive(Default)]
struct PoolInner {
    stats: PoolStats,
    // Exact-size buckets. Frame sizes are fixed per session so the key set stays
    // tiny; lookup cost is per-frame, not per-pixel.
    buckets: HashMap<usize, Vec<Vec<u8>>>,
}

/// Bounded recycling allocator for frame-sized byte buffers.
///
/// Buckets are keyed by exact byte length: an `acquire(n)` is only ever served by
/// a buffer previously released at length `n`, so callers never see a buffer of
/// the wrong size. Shared across threads behind an `Arc`; all methods take
/// `&self`.
pub struct BufferPool {
    opts: PoolOpts,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    /// Create an empty pool with the given retention limits.
    pub fn new(opts: PoolOpts) -> Self {
        Self {
            opts,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Obtain a buffer of exactly `len` bytes.
    ///
    /// A fresh allocation is zero-filled; a reused buffer keeps its previous
    /// contents and is expected to be fully overwritten by the caller.
    pub fn acquire(&self, len: usize) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(buf) = inner.buckets.get_mut(&len).and_then(Vec::pop) {
            inner.stats.reuses = inner.stats.reuses.saturating_add(1);
            inner.stats.retained_buffers = inner.stats.retained_buffers.saturating_sub(1);
            inner.stats.retained_bytes = inner.stats.retained_bytes.saturating_sub(len);
            return buf;
        }
        inner.stats.allocations = inner.stats.allocations.saturating_add(1);
        drop(inner);
        vec![0u8; len]
    }

    /// Hand a buffer back for reuse.
    ///
    /// The buffer is dropped instead of retained when either cap would be
    /// exceeded, so the pool never grows past its configured bounds.
    pub fn release(&self, buf: Vec<u8>) {
        let len = buf.len();
        let mut inner = self.inner.lock().unwrap();

        if self.opts.max_pool_bytes == 0 || self.opts.max_buffers_per_bucket == 0 || len == 0 {
            inner.stats.dropped_on_release = inner.stats.dropped_on_release.saturating_add(1);
            return;
        }
        if inner.stats.retained_bytes.saturating_add(len) > self.opts.max_pool_bytes {
            inner.stats.dropped_on_release = inner.stats.dropped_on_release.saturating_add(1);
            return;
        }

        let bucket = inner.buckets.entry(len).or_default();
        if bucket.len() >= self.opts.max_buffers_per_bucket {
            inner.stats.dropped_on_release = inner.stats.dropped_on_release.saturating_add(1);
            return;
        }

        bucket.push(buf);
        inner.stats.retained_buffers = inner.stats.retained_buffers.saturating_add(1);
        inner.stats.retained_bytes = inner.stats.retained_bytes.saturating_add(len);
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().unwrap().stats.clone()
    }
}
