use crate::capture::pool::BufferPool;
use crate::capture::session::CaptureStats;
use crate::encode::process::ExitReport;
use crate::encode::sink::{self, ActiveSink};
use crate::encode::writer::Scheduled;
use crate::foundation::core::{BYTES_PER_PIXEL, FrameIndex, PixelRect, SourceId};
use crate::foundation::error::CaptureResult;
use rayon::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Copy `rect` out of a composite frame into a tightly packed buffer.
///
/// `staging` holds the full composite (`composite_width` pixels per row,
/// tightly packed RGBA8); `dst` must be exactly `rect.area_bytes()` long. Only
/// the rect's own pixels are read, so padding in the surrounding grid cell
/// never leaks into the slice.
pub fn extract_rect(staging: &[u8], composite_width: u32, rect: PixelRect, dst: &mut [u8]) {
    debug_assert_eq!(dst.len(), rect.area_bytes());
    let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
    for r in 0..rect.height as usize {
        let src =
            ((rect.y as usize + r) * composite_width as usize + rect.x as usize) * BYTES_PER_PIXEL;
        let out = r * row_bytes;
        dst[out..out + row_bytes].copy_from_slice(&staging[src..src + row_bytes]);
    }
}

/// Copy a tightly packed frame into `rect` of a composite buffer.
///
/// The inverse of [`extract_rect`]; bytes outside the rect are untouched.
pub fn embed_rect(staging: &mut [u8], composite_width: u32, rect: PixelRect, src: &[u8]) {
    debug_assert_eq!(src.len(), rect.area_bytes());
    let row_bytes = rect.width as usize * BYTES_PER_PIXEL;
    for r in 0..rect.height as usize {
        let dst =
            ((rect.y as usize + r) * composite_width as usize + rect.x as usize) * BYTES_PER_PIXEL;
        let from = r * row_bytes;
        staging[dst..dst + row_bytes].copy_from_slice(&src[from..from + row_bytes]);
    }
}

/// One source's routing state: where its rect lives and where its frames go.
pub struct Lane {
    pub(crate) source: SourceId,
    pub(crate) name: String,
    pub(crate) rect: PixelRect,
    pub(crate) sink: ActiveSink,
}

impl Lane {
    /// Build a lane for one source.
    pub fn new(source: SourceId, name: impl Into<String>, rect: PixelRect, sink: ActiveSink) -> Self {
        Self {
            source,
            name: name.into(),
            rect,
            sink,
        }
    }
}

/// Splits completed composite frames into per-source slices and hands each to
/// its sink.
///
/// Shared between the session (which closes sinks at shutdown) and the
/// transfer completion path (which dispatches), hence the interior lock. At
/// most one transfer completes at a time, so dispatches never contend with
/// each other.
pub struct Dispatcher {
    composite_width: u32,
    lanes: Mutex<Vec<Lane>>,
    pool: Arc<BufferPool>,
    stats: Arc<CaptureStats>,
}

impl Dispatcher {
    /// Dispatcher over the session's lanes.
    pub fn new(
        composite_width: u32,
        lanes: Vec<Lane>,
        pool: Arc<BufferPool>,
        stats: Arc<CaptureStats>,
    ) -> Self {
        Self {
            composite_width,
            lanes: Mutex::new(lanes),
            pool,
            stats,
        }
    }

    /// Slice one completed composite frame and route every slice.
    ///
    /// Extraction runs across sources in parallel; handoff then walks sources
    /// in id order so per-sink scheduling stays deterministic.
    pub fn dispatch(&self, frame: FrameIndex, staging: &[u8]) {
        let lanes = self.lanes.lock().unwrap();

        let slices: Vec<Vec<u8>> = lanes
            .par_iter()
            .map(|lane| {
                let mut buf = self.pool.acquire(lane.rect.area_bytes());
                extract_rect(staging, self.composite_width, lane.rect, &mut buf);
                buf
            })
            .collect();

        for (lane, buf) in lanes.iter().zip(slices) {
            match &lane.sink {
                ActiveSink::Encoder { writer, .. } => {
                    if writer.schedule(frame, buf) == Scheduled::Queued {
                        self.stats.record_frame_dispatched();
                    }
                }
                ActiveSink::Files { dir } => {
                    match sink::write_frame_png(
                        dir,
                        &lane.name,
                        frame,
                        lane.rect.width,
                        lane.rect.height,
                        &buf,
                    ) {
                        Ok(_) => self.stats.record_frame_dispatched(),
                        Err(e) => {
                            self.stats.record_write_failure();
                            warn!("frame {} for '{}' not written: {e}", frame.0, lane.name);
                        }
                    }
                    self.pool.release(buf);
                }
                ActiveSink::Disabled => {
                    debug!("frame {} for '{}' discarded, sink disabled", frame.0, lane.name);
                    self.pool.release(buf);
                }
            }
        }
    }

    /// Close every sink within one shared grace budget.
    ///
    /// Returns one `(source name, close result)` pair per lane, in id order.
    /// The budget covers all lanes together: a sink that eats the clock
    /// leaves the rest with whatever remains. After this the dispatcher
    /// discards all further frames.
    pub fn close_sinks(&self, grace: Duration) -> Vec<(String, CaptureResult<Option<ExitReport>>)> {
        let deadline = std::time::Instant::now() + grace;
        let mut lanes = self.lanes.lock().unwrap();
        lanes
            .drain(..)
            .map(|lane| {
                let remaining = deadline.saturating_duration_since(std::time::Instant::now());
                (lane.name, lane.sink.close(remaining))
            })
            .collect()
    }

    /// Per-lane `(source, name, rect)` summary for ticks and reporting.
    pub fn lane_rects(&self) -> Vec<(SourceId, String, PixelRect)> {
        self.lanes
            .lock()
            .unwrap()
            .iter()
            .map(|l| (l.source, l.name.clone(), l.rect))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pool::PoolOpts;

    fn patterned_composite(width: u32, height: u32) -> Vec<u8> {
        let mut staging = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        for y in 0..height {
            for x in 0..width {
                let o = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
                staging[o] = x as u8;
                staging[o + 1] = y as u8;
                staging[o + 2] = x.wrapping_add(y) as u8;
                staging[o + 3] = 0xFF;
            }
        }
        staging
    }

    #[test]
    fn extract_reads_only_the_rect() {
        let staging = patterned_composite(8, 6);
        let rect = PixelRect::new(3, 1, 4, 2);
        let mut out = vec![0u8; rect.area_bytes()];
        extract_rect(&staging, 8, rect, &mut out);

        for r in 0..2u32 {
            for c in 0..4u32 {
                let o = (r as usize * 4 + c as usize) * BYTES_PER_PIXEL;
                let (x, y) = (3 + c, 1 + r);
                assert_eq!(
                    &out[o..o + 4],
                    &[x as u8, y as u8, (x + y) as u8, 0xFF],
                    "pixel ({c},{r})"
                );
            }
        }
    }

    #[test]
    fn embed_then_extract_round_trips_and_leaves_padding_alone() {
        let mut staging = vec![0x55u8; 8 * 6 * BYTES_PER_PIXEL];
        let rect = PixelRect::new(2, 2, 3, 3);
        let frame: Vec<u8> = (0..rect.area_bytes()).map(|i| i as u8).collect();

        embed_rect(&mut staging, 8, rect, &frame);
        let mut back = vec![0u8; rect.area_bytes()];
        extract_rect(&staging, 8, rect, &mut back);
        assert_eq!(back, frame);

        let untouched = staging
            .chunks_exact(BYTES_PER_PIXEL)
            .enumerate()
            .filter(|(i, px)| {
                let (x, y) = ((i % 8) as u32, (i / 8) as u32);
                !rect.contains_rect(PixelRect::new(x, y, 1, 1)) && px.iter().all(|&b| b == 0x55)
            })
            .count();
        assert_eq!(untouched, 8 * 6 - 9, "every pixel outside the rect keeps its value");
    }

    #[test]
    fn full_width_rect_is_a_contiguous_copy() {
        let staging = patterned_composite(4, 4);
        let rect = PixelRect::new(0, 1, 4, 2);
        let mut out = vec![0u8; rect.area_bytes()];
        extract_rect(&staging, 4, rect, &mut out);
        assert_eq!(out, staging[4 * BYTES_PER_PIXEL..12 * BYTES_PER_PIXEL]);
    }

    #[test]
    fn disabled_lanes_recycle_their_buffers() {
        let pool = Arc::new(BufferPool::new(PoolOpts::default()));
        let stats = Arc::new(CaptureStats::default());
        let rect = PixelRect::new(0, 0, 2, 2);
        let dispatcher = Dispatcher::new(
            4,
            vec![Lane::new(SourceId(0), "off", rect, ActiveSink::Disabled)],
            Arc::clone(&pool),
            Arc::clone(&stats),
        );

        let staging = patterned_composite(4, 4);
        dispatcher.dispatch(FrameIndex(0), &staging);

        assert_eq!(pool.stats().retained_buffers, 1);
        assert_eq!(stats.snapshot().frames_dispatched, 0);
    }

    #[test]
    fn file_lanes_write_and_count_dispatched_frames() {
        let tmp = std::env::temp_dir().join(format!(
            "atlascap_dispatch_png_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&tmp).unwrap();

        let pool = Arc::new(BufferPool::new(PoolOpts::default()));
        let stats = Arc::new(CaptureStats::default());
        let rect = PixelRect::new(1, 1, 2, 2);
        let dispatcher = Dispatcher::new(
            4,
            vec![Lane::new(
                SourceId(0),
                "cam",
                rect,
                ActiveSink::Files { dir: tmp.clone() },
            )],
            Arc::clone(&pool),
            Arc::clone(&stats),
        );

        let staging = patterned_composite(4, 4);
        dispatcher.dispatch(FrameIndex(3), &staging);

        let written = tmp.join("cam_000003.png");
        let img = image::open(&written).unwrap().into_rgba8();
        let mut expected = vec![0u8; rect.area_bytes()];
        extract_rect(&staging, 4, rect, &mut expected);
        assert_eq!(img.into_raw(), expected);
        assert_eq!(stats.snapshot().frames_dispatched, 1);
        assert_eq!(pool.stats().retained_buffers, 1);

        std::fs::remove_dir_all(&tmp).ok();
    }

    #[test]
    fn close_sinks_empties_the_lane_table() {
        let pool = Arc::new(BufferPool::new(PoolOpts::default()));
        let stats = Arc::new(CaptureStats::default());
        let dispatcher = Dispatcher::new(
            4,
            vec![
                Lane::new(SourceId(0), "a", PixelRect::new(0, 0, 2, 2), ActiveSink::Disabled),
                Lane::new(SourceId(1), "b", PixelRect::new(2, 0, 2, 2), ActiveSink::Disabled),
            ],
            pool,
            stats,
        );

        let closed = dispatcher.close_sinks(Duration::from_millis(100));
        assert_eq!(closed.len(), 2);
        assert_eq!(closed[0].0, "a");
        assert!(dispatcher.lane_rects().is_empty());
    }
}
