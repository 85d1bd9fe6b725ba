//! Background sweeper for stale locks and expired uploads

use crate::storage::{UploadLockingService, UploadStorageService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Periodically collects lock files nobody holds anymore and uploads past
/// their expiration deadline. Stopping the reaper only pauses hygiene;
/// the next start picks up whatever accumulated.
pub struct UploadReaper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UploadReaper {
    pub fn start(
        storage: Arc<dyn UploadStorageService>,
        locking: Arc<dyn UploadLockingService>,
        interval: Duration,
        stale_lock_grace: Duration,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("upload-reaper".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    sweep(storage.as_ref(), locking.as_ref(), stale_lock_grace);
                    // sleep in small steps so shutdown stays prompt
                    let mut slept = Duration::ZERO;
                    while slept < interval && !stop_flag.load(Ordering::Relaxed) {
                        let step = SHUTDOWN_POLL.min(interval - slept);
                        thread::sleep(step);
                        slept += step;
                    }
                }
            })
            .ok();
        if handle.is_none() {
            warn!("could not spawn the upload reaper thread");
        }
        UploadReaper { stop, handle }
    }

    /// Signal the sweeper and wait for it to finish its current pass.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UploadReaper {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// One pass over both sweeps. Failures are logged and do not stop the
/// reaper: a transient storage hiccup just delays hygiene one interval.
fn sweep(
    storage: &dyn UploadStorageService,
    locking: &dyn UploadLockingService,
    stale_lock_grace: Duration,
) {
    match locking.cleanup_stale_locks(stale_lock_grace) {
        Ok(0) => {}
        Ok(removed) => info!(removed, "collected stale lock files"),
        Err(e) => warn!(error = %e, "stale lock sweep failed"),
    }
    match storage.cleanup_expired_uploads(locking) {
        Ok(0) => {}
        Ok(removed) => info!(removed, "collected expired uploads"),
        Err(e) => warn!(error = %e, "expired upload sweep failed"),
    }
}
