use crate::atlas::surface::SurfaceHandle;
use crate::foundation::core::{BYTES_PER_PIXEL, PixelRect, SourceId};
use crate::foundation::error::{CaptureError, CaptureResult};
use std::collections::HashMap;
use std::collections::VecDeque;

/// Completion callback for an asynchronous readback.
///
/// Invoked exactly once with the mapped bytes of the surface (tightly packed
/// RGBA8, row-major from the bottom row up) or with the transfer error. The
/// borrow is only valid for the duration of the call; callers copy what they
/// need before returning.
pub type ReadbackComplete = Box<dyn FnOnce(CaptureResult<&[u8]>) + Send>;

/// Rendering collaborator contract.
///
/// The host owns the actual render targets and source pipelines; this crate
/// only steers them. Per-source calls within one tick follow the order
/// `redirect_source` then `render_source` then `restore_source`, so a source is
/// never left redirected between ticks. `submit_readback` is asynchronous: the
/// host may invoke the completion on any thread, any number of ticks later,
/// but at most one readback per surface is outstanding at a time (the caller
/// enforces this).
pub trait RenderHost {
    /// Allocate a host-side RGBA8 surface of the given pixel dimensions.
    fn create_surface(&mut self, width: u32, height: u32) -> CaptureResult<SurfaceHandle>;
    /// Free a surface previously returned by [`RenderHost::create_surface`].
    fn release_surface(&mut self, surface: SurfaceHandle) -> CaptureResult<()>;
    /// Constrain a source's rendering to `rect` within `surface`.
    fn redirect_source(
        &mut self,
        source: SourceId,
        surface: SurfaceHandle,
        rect: PixelRect,
    ) -> CaptureResult<()>;
    /// Render the source's current content to wherever it is directed.
    fn render_source(&mut self, source: SourceId) -> CaptureResult<()>;
    /// Return the source to its normal (non-redirected) target.
    fn restore_source(&mut self, source: SourceId) -> CaptureResult<()>;
    /// Begin an asynchronous device-to-host copy of the surface contents.
    fn submit_readback(
        &mut self,
        surface: SurfaceHandle,
        on_done: ReadbackComplete,
    ) -> CaptureResult<()>;
}

struct OwnedSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

struct PendingReadback {
    // Snapshot taken at submit time, matching a copy enqueued right after the
    // frame's renders.
    pixels: Vec<u8>,
    on_done: ReadbackComplete,
}

/// In-memory [`RenderHost`] for tests and embedding experiments.
///
/// Surfaces are plain RGBA vectors. `render_source` fills the source's
/// redirected rect with a deterministic pattern (see [`InMemoryHost::pattern`])
/// that varies per source and per render, so downstream slices can be verified
/// byte-for-byte. Readbacks complete immediately by default; a deferred host
/// queues them until [`InMemoryHost::fire_next`] is called, and a failure can
/// be injected for the next completion.
#[derive(Default)]
pub struct InMemoryHost {
    surfaces: HashMap<u64, OwnedSurface>,
    next_handle: u64,
    redirects: HashMap<SourceId, (SurfaceHandle, PixelRect)>,
    render_counts: HashMap<SourceId, u64>,
    deferred: bool,
    pending: VecDeque<PendingReadback>,
    fail_next_readback: Option<String>,
}

impl InMemoryHost {
    /// Host whose readbacks complete inside `submit_readback`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Host whose readbacks queue until explicitly fired.
    pub fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::default()
        }
    }

    /// The deterministic fill `render_source` writes, as a standalone frame.
    ///
    /// `sequence` is the 0-based count of renders for that source, which equals
    /// the frame index when the source renders every tick.
    pub fn pattern(source: SourceId, sequence: u64, width: u32, height: u32) -> Vec<u8> {
        let mut out = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        for y in 0..height {
            for x in 0..width {
                let o = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
                out[o] = (source.0 as u8).wrapping_mul(31).wrapping_add(sequence as u8);
                out[o + 1] = x as u8;
                out[o + 2] = y as u8;
                out[o + 3] = 0xFF;
            }
        }
        out
    }

    /// Arrange for the next readback completion to report this error.
    pub fn inject_readback_failure(&mut self, message: impl Into<String>) {
        self.fail_next_readback = Some(message.into());
    }

    /// Number of readbacks waiting to be fired (deferred hosts only).
    pub fn pending_readbacks(&self) -> usize {
        self.pending.len()
    }

    /// Fire the oldest queued readback; `false` when none are queued.
    pub fn fire_next(&mut self) -> bool {
        let Some(p) = self.pending.pop_front() else {
            return false;
        };
        self.complete(p.pixels, p.on_done);
        true
    }

    /// Fire every queued readback in submission order.
    pub fn fire_all(&mut self) {
        while self.fire_next() {}
    }

    /// Borrow a surface's current pixels.
    pub fn surface_pixels(&self, surface: SurfaceHandle) -> Option<&[u8]> {
        self.surfaces.get(&surface.0).map(|s| s.pixels.as_slice())
    }

    /// Number of live surfaces.
    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    /// How many times a source has been rendered.
    pub fn render_count(&self, source: SourceId) -> u64 {
        self.render_counts.get(&source).copied().unwrap_or(0)
    }

    /// Number of sources currently redirected (0 between well-formed ticks).
    pub fn active_redirects(&self) -> usize {
        self.redirects.len()
    }

    fn complete(&mut self, pixels: Vec<u8>, on_done: ReadbackComplete) {
        match self.fail_next_readback.take() {
            Some(msg) => on_done(Err(CaptureError::transfer(msg))),
            None => on_done(Ok(&pixels)),
        }
    }
}

impl RenderHost for InMemoryHost {
    fn create_surface(&mut self, width: u32, height: u32) -> CaptureResult<SurfaceHandle> {
        if width == 0 || height == 0 {
            return Err(CaptureError::config(format!(
                "surface dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let handle = SurfaceHandle(self.next_handle);
        self.next_handle += 1;
        self.surfaces.insert(
            handle.0,
            OwnedSurface {
                width,
                height,
                pixels: vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL],
            },
        );
        Ok(handle)
    }

    fn release_surface(&mut self, surface: SurfaceHandle) -> CaptureResult<()> {
        self.surfaces
            .remove(&surface.0)
            .map(|_| ())
            .ok_or_else(|| CaptureError::transfer(format!("unknown surface {}", surface.0)))
    }

    fn redirect_source(
        &mut self,
        source: SourceId,
        surface: SurfaceHandle,
        rect: PixelRect,
    ) -> CaptureResult<()> {
        let s = self
            .surfaces
            .get(&surface.0)
            .ok_or_else(|| CaptureError::transfer(format!("unknown surface {}", surface.0)))?;
        let bounds = PixelRect::new(0, 0, s.width, s.height);
        if !bounds.contains_rect(rect) {
            return Err(CaptureError::config(format!(
                "redirect rect {rect:?} escapes surface {}x{}",
                s.width, s.height
            )));
        }
        self.redirects.insert(source, (surface, rect));
        Ok(())
    }

    fn render_source(&mut self, source: SourceId) -> CaptureResult<()> {
        let &(surface, rect) = self.redirects.get(&source).ok_or_else(|| {
            CaptureError::transfer(format!("source {} rendered without a redirect", source.0))
        })?;
        let sequence = self.render_counts.entry(source).or_insert(0);
        let pattern = Self::pattern(source, *sequence, rect.width, rect.height);
        *sequence += 1;

        let s = self
            .surfaces
            .get_mut(&surface.0)
            .ok_or_else(|| CaptureError::transfer(format!("unknown surface {}", surface.0)))?;
        crate::capture::dispatch::embed_rect(&mut s.pixels, s.width, rect, &pattern);
        Ok(())
    }

    fn restore_source(&mut self, source: SourceId) -> CaptureResult<()> {
        self.redirects.remove(&source);
        Ok(())
    }

    fn submit_readback(
        &mut self,
        surface: SurfaceHandle,
        on_done: ReadbackComplete,
    ) -> CaptureResult<()> {
        let pixels = self
            .surfaces
            .get(&surface.0)
            .map(|s| s.pixels.clone())
            .ok_or_else(|| CaptureError::transfer(format!("unknown surface {}", surface.0)))?;
        if self.deferred {
            self.pending.push_back(PendingReadback { pixels, on_done });
        } else {
            self.complete(pixels, on_done);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn render_fills_the_redirected_rect_only() {
        let mut host = InMemoryHost::new();
        let surface = host.create_surface(8, 8).unwrap();
        let rect = PixelRect::new(2, 4, 3, 2);
        host.redirect_source(SourceId(1), surface, rect).unwrap();
        host.render_source(SourceId(1)).unwrap();
        host.restore_source(SourceId(1)).unwrap();

        let pixels = host.surface_pixels(surface).unwrap();
        let expected = InMemoryHost::pattern(SourceId(1), 0, 3, 2);
        for y in 0..8u32 {
            for x in 0..8u32 {
                let o = (y as usize * 8 + x as usize) * BYTES_PER_PIXEL;
                let inside = x >= 2 && x < 5 && y >= 4 && y < 6;
                if inside {
                    let e = ((y - 4) as usize * 3 + (x - 2) as usize) * BYTES_PER_PIXEL;
                    assert_eq!(&pixels[o..o + 4], &expected[e..e + 4]);
                } else {
                    assert_eq!(&pixels[o..o + 4], &[0, 0, 0, 0], "({x},{y}) touched");
                }
            }
        }
        assert_eq!(host.active_redirects(), 0);
    }

    #[test]
    fn render_without_redirect_is_a_contract_error() {
        let mut host = InMemoryHost::new();
        assert!(host.render_source(SourceId(0)).is_err());
    }

    #[test]
    fn deferred_readback_snapshots_at_submit() {
        let mut host = InMemoryHost::deferred();
        let surface = host.create_surface(2, 1).unwrap();
        let rect = PixelRect::new(0, 0, 2, 1);
        host.redirect_source(SourceId(0), surface, rect).unwrap();
        host.render_source(SourceId(0)).unwrap();
        host.restore_source(SourceId(0)).unwrap();

        let first = InMemoryHost::pattern(SourceId(0), 0, 2, 1);
        let got: Arc<std::sync::Mutex<Vec<u8>>> = Arc::default();
        let got2 = Arc::clone(&got);
        host.submit_readback(
            surface,
            Box::new(move |bytes| {
                *got2.lock().unwrap() = bytes.unwrap().to_vec();
            }),
        )
        .unwrap();

        // Render again before firing; the completion must still see the older frame.
        host.redirect_source(SourceId(0), surface, rect).unwrap();
        host.render_source(SourceId(0)).unwrap();
        host.restore_source(SourceId(0)).unwrap();

        assert_eq!(host.pending_readbacks(), 1);
        assert!(host.fire_next());
        assert_eq!(*got.lock().unwrap(), first);
        assert!(!host.fire_next());
    }

    #[test]
    fn injected_failure_reaches_the_completion() {
        let mut host = InMemoryHost::new();
        let surface = host.create_surface(1, 1).unwrap();
        host.inject_readback_failure("map failed");

        let failed = Arc::new(AtomicBool::new(false));
        let failed2 = Arc::clone(&failed);
        host.submit_readback(
            surface,
            Box::new(move |bytes| {
                failed2.store(bytes.is_err(), Ordering::SeqCst);
            }),
        )
        .unwrap();
        assert!(failed.load(Ordering::SeqCst));
    }
}
