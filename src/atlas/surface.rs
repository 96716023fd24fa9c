use crate::capture::host::RenderHost;
use crate::foundation::core::BYTES_PER_PIXEL;
use crate::foundation::error::CaptureResult;
use std::sync::{Arc, Mutex};

/// Opaque identity of a host-owned render surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// The composite surface every source renders into, plus its host-side
/// staging buffer for readback copies.
///
/// `ensure` is idempotent: calling it with unchanged dimensions touches
/// nothing, so it is safe to call at every (re)configuration point. On a
/// dimension change the old surface is released, a new one is created, and the
/// staging buffer is replaced wholesale; any readback still completing against
/// the old staging allocation writes into memory nobody reads again.
pub struct CompositeTarget {
    surface: Option<SurfaceHandle>,
    width: u32,
    height: u32,
    staging: Arc<Mutex<Vec<u8>>>,
}

impl Default for CompositeTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeTarget {
    /// An empty target with no surface allocated yet.
    pub fn new() -> Self {
        Self {
            surface: None,
            width: 0,
            height: 0,
            staging: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make the target match `width`×`height`, allocating or replacing the
    /// host surface as needed.
    pub fn ensure(
        &mut self,
        host: &mut dyn RenderHost,
        width: u32,
        height: u32,
    ) -> CaptureResult<()> {
        if self.surface.is_some() && self.width == width && self.height == height {
            return Ok(());
        }
        if let Some(old) = self.surface.take() {
            host.release_surface(old)?;
        }
        self.surface = Some(host.create_surface(width, height)?);
        self.width = width;
        self.height = height;
        self.staging = Arc::new(Mutex::new(vec![
            0u8;
            width as usize
                * height as usize
                * BYTES_PER_PIXEL
        ]));
        Ok(())
    }

    /// Release the host surface, leaving the target empty.
    pub fn release(&mut self, host: &mut dyn RenderHost) -> CaptureResult<()> {
        if let Some(surface) = self.surface.take() {
            host.release_surface(surface)?;
        }
        self.width = 0;
        self.height = 0;
        Ok(())
    }

    /// The live surface handle, if one is allocated.
    pub fn surface(&self) -> Option<SurfaceHandle> {
        self.surface
    }

    /// Current surface width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Current surface height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Expected staging length in bytes for the current dimensions.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Shared handle to the staging buffer readbacks copy into.
    pub fn staging(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.staging)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::host::InMemoryHost;

    #[test]
    fn ensure_with_unchanged_dimensions_is_a_noop() {
        let mut host = InMemoryHost::new();
        let mut target = CompositeTarget::new();
        target.ensure(&mut host, 16, 8).unwrap();
        let first = target.surface().unwrap();

        target.ensure(&mut host, 16, 8).unwrap();
        assert_eq!(target.surface(), Some(first));
        assert_eq!(host.surface_count(), 1);
    }

    #[test]
    fn dimension_change_replaces_surface_and_staging() {
        let mut host = InMemoryHost::new();
        let mut target = CompositeTarget::new();
        target.ensure(&mut host, 4, 4).unwrap();
        let first = target.surface().unwrap();
        target.staging().lock().unwrap().fill(0xAB);

        target.ensure(&mut host, 8, 2).unwrap();
        assert_ne!(target.surface(), Some(first));
        assert_eq!(host.surface_count(), 1, "old surface must be released");
        assert_eq!(target.byte_len(), 8 * 2 * BYTES_PER_PIXEL);

        let staging = target.staging();
        let staging = staging.lock().unwrap();
        assert_eq!(staging.len(), target.byte_len());
        assert!(staging.iter().all(|&b| b == 0), "stale bytes must not survive");
    }

    #[test]
    fn release_frees_the_surface() {
        let mut host = InMemoryHost::new();
        let mut target = CompositeTarget::new();
        target.ensure(&mut host, 4, 4).unwrap();
        target.release(&mut host).unwrap();
        assert_eq!(target.surface(), None);
        assert_eq!(host.surface_count(), 0);
        // Releasing an empty target is fine.
        target.release(&mut host).unwrap();
    }
}
