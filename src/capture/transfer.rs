use crate::atlas::surface::SurfaceHandle;
use crate::capture::dispatch::Dispatcher;
use crate::capture::host::RenderHost;
use crate::capture::session::CaptureStats;
use crate::foundation::core::FrameIndex;
use crate::foundation::error::CaptureResult;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// Clears the in-flight flag when the completion closure finishes, whether it
// ran to completion, bailed early, or panicked inside the host.
struct ClearInFlight(Arc<AtomicBool>);

impl Drop for ClearInFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Serializes device-to-host readbacks: at most one is ever outstanding.
///
/// A tick that lands while the previous readback is still in flight simply
/// skips issuance; capture continues and the next tick tries again. The
/// completion copies the mapped bytes into the session's staging buffer and
/// dispatches slices before returning, so by the time the flag clears the
/// frame has fully left the transfer path.
pub struct TransferController {
    in_flight: Arc<AtomicBool>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<CaptureStats>,
}

impl TransferController {
    /// Controller feeding completed frames into `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>, stats: Arc<CaptureStats>) -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            dispatcher,
            stats,
        }
    }

    /// Whether a readback is currently outstanding.
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Issue a readback of `surface` for `frame`, unless one is already
    /// outstanding.
    ///
    /// Returns `Ok(true)` when a readback was submitted, `Ok(false)` when it
    /// was skipped because of a pending transfer. A submission failure clears
    /// the flag before propagating, so the next tick can try again.
    pub fn issue(
        &self,
        host: &mut dyn RenderHost,
        surface: SurfaceHandle,
        frame: FrameIndex,
        staging: Arc<Mutex<Vec<u8>>>,
    ) -> CaptureResult<bool> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("readback for frame {} skipped, previous transfer still in flight", frame.0);
            self.stats.record_transfer_skipped();
            return Ok(false);
        }

        let flag = Arc::clone(&self.in_flight);
        let dispatcher = Arc::clone(&self.dispatcher);
        let stats = Arc::clone(&self.stats);
        let on_done = Box::new(move |result: CaptureResult<&[u8]>| {
            let _clear = ClearInFlight(flag);
            match result {
                Ok(bytes) => {
                    let mut staging = staging.lock().unwrap();
                    if bytes.len() != staging.len() {
                        stats.record_transfer_failed();
                        warn!(
                            "readback for frame {} returned {} bytes, expected {}",
                            frame.0,
                            bytes.len(),
                            staging.len()
                        );
                        return;
                    }
                    staging.copy_from_slice(bytes);
                    stats.record_transfer_completed();
                    dispatcher.dispatch(frame, &staging);
                }
                Err(e) => {
                    stats.record_transfer_failed();
                    warn!("readback for frame {} failed: {e}", frame.0);
                }
            }
        });

        match host.submit_readback(surface, on_done) {
            Ok(()) => Ok(true),
            Err(e) => {
                // The host did not accept the callback, so nothing will clear
                // the flag for us.
                self.in_flight.store(false, Ordering::Release);
                self.stats.record_transfer_failed();
                Err(e)
            }
        }
    }

    /// Wait until no readback is outstanding, up to `timeout`.
    ///
    /// Returns `true` when the controller went idle in time.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }
}
