//! Background screenshot worker.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use pawawwewism::Worker;

use crate::pipeline::Capture;

use super::Screenshotter;

/// Default time between the trigger and the screenshot, giving the user time to get their hand
/// out of the way.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(3);

struct CaptureRequest;

/// Clears the busy flag when dropped, also if the capture panicked.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs a [`Screenshotter`] on its own thread.
///
/// Only one capture is in flight at a time: requests that arrive while a capture is still
/// waiting out its delay or writing its file are dropped.
pub struct CaptureWorker {
    worker: Worker<CaptureRequest>,
    busy: Arc<AtomicBool>,
    error: Arc<Mutex<Option<anyhow::Error>>>,
}

impl CaptureWorker {
    /// Spawns the worker thread. Every accepted request waits for `delay` before capturing.
    pub fn spawn(mut screenshotter: Screenshotter, delay: Duration) -> anyhow::Result<Self> {
        let busy = Arc::new(AtomicBool::new(false));
        let error = Arc::new(Mutex::new(None));

        let worker = {
            let busy = busy.clone();
            let error = error.clone();
            Worker::builder()
                .name("screenshot")
                .spawn(move |CaptureRequest| {
                    let _busy = BusyGuard(busy.clone());
                    thread::sleep(delay);
                    if let Err(e) = screenshotter.capture_full_screen() {
                        log::error!("screenshot failed: {e:#}");
                        *error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e);
                    }
                })
                .context("failed to spawn screenshot worker")?
        };

        Ok(Self {
            worker,
            busy,
            error,
        })
    }

    /// Returns whether a capture is currently pending or running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Capture for CaptureWorker {
    fn request_capture(&mut self) -> bool {
        if self.busy.swap(true, Ordering::AcqRel) {
            log::debug!("screenshot already in progress, ignoring trigger");
            return false;
        }

        self.worker.send(CaptureRequest);
        true
    }

    fn poll_error(&mut self) -> anyhow::Result<()> {
        let error = self
            .error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        match error {
            Some(e) => Err(e.context("screenshot worker failed")),
            None => Ok(()),
        }
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        if self.is_busy() {
            log::info!("waiting for the screenshot in progress");
            while self.is_busy() {
                thread::sleep(Duration::from_millis(10));
            }
        }
        self.poll_error()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, time::Instant};

    use anyhow::bail;
    use image::RgbaImage;

    use crate::capture::{ScreenGrabber, ScreenshotStore};

    use super::*;

    struct CountingScreen {
        grabs: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ScreenGrabber for CountingScreen {
        fn grab(&mut self) -> anyhow::Result<RgbaImage> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("no display");
            }
            Ok(RgbaImage::new(4, 4))
        }
    }

    fn wait_idle(worker: &CaptureWorker) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while worker.is_busy() {
            assert!(Instant::now() < deadline, "capture worker did not finish");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn worker(
        dir: &std::path::Path,
        fail: bool,
        delay: Duration,
    ) -> (CaptureWorker, Arc<AtomicUsize>) {
        let grabs = Arc::new(AtomicUsize::new(0));
        let screen = CountingScreen {
            grabs: grabs.clone(),
            fail,
        };
        let shooter = Screenshotter::new(Box::new(screen), ScreenshotStore::new(dir));
        (CaptureWorker::spawn(shooter, delay).unwrap(), grabs)
    }

    #[test]
    fn captures_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let (mut worker, grabs) = worker(dir.path(), false, Duration::ZERO);

        assert!(worker.request_capture());
        wait_idle(&worker);
        worker.poll_error().unwrap();
        assert_eq!(grabs.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        assert!(worker.request_capture());
        wait_idle(&worker);
        assert_eq!(grabs.load(Ordering::SeqCst), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn busy_drops_requests() {
        let dir = tempfile::tempdir().unwrap();
        let (mut worker, grabs) = worker(dir.path(), false, Duration::from_millis(200));

        assert!(worker.request_capture());
        assert!(worker.is_busy());
        assert!(!worker.request_capture());
        assert!(!worker.request_capture());
        wait_idle(&worker);
        assert_eq!(grabs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_are_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let (mut worker, _) = worker(dir.path(), true, Duration::ZERO);

        worker.request_capture();
        wait_idle(&worker);
        let err = worker.poll_error().unwrap_err();
        assert!(format!("{err:#}").contains("no display"), "{err:#}");
        worker.poll_error().unwrap();

        // The worker keeps serving requests after a failure.
        assert!(worker.request_capture());
        wait_idle(&worker);
        assert!(worker.poll_error().is_err());
    }

    #[test]
    fn finish_waits_for_delayed_capture() {
        let dir = tempfile::tempdir().unwrap();
        let (mut worker, grabs) = worker(dir.path(), true, Duration::from_millis(100));

        assert!(worker.request_capture());
        // Nothing has failed yet while the delay is running.
        worker.poll_error().unwrap();

        let err = worker.finish().unwrap_err();
        assert!(format!("{err:#}").contains("no display"), "{err:#}");
        assert!(!worker.is_busy());
        assert_eq!(grabs.load(Ordering::SeqCst), 1);

        // Finishing an idle worker has nothing to wait for.
        worker.finish().unwrap();
    }
}
