//! Background acquisition thread feeding the shared frame slot

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::capture::source::{FrameSource, InterruptHandle, ReadOutcome};
use crate::capture::Frame;
use crate::error::WorkerError;
use crate::pipeline::{SharedFrameSlot, SlotStats};

/// Pause after a transient read failure before retrying
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Runs a [`FrameSource`] on its own thread and publishes each frame into a
/// [`SharedFrameSlot`], so slow or stalled acquisition never blocks the
/// consumer.
pub struct CaptureWorker {
    source: Option<Box<dyn FrameSource>>,
    slot: Arc<SharedFrameSlot>,
    running: Arc<AtomicBool>,
    grace_period: Duration,
    started: bool,
    thread: Option<WorkerThread>,
}

struct WorkerThread {
    handle: JoinHandle<()>,
    done: Receiver<()>,
    interrupt: Option<InterruptHandle>,
}

impl CaptureWorker {
    pub fn new(source: Box<dyn FrameSource>, grace_period: Duration) -> Self {
        Self {
            source: Some(source),
            slot: Arc::new(SharedFrameSlot::new()),
            running: Arc::new(AtomicBool::new(false)),
            grace_period,
            started: false,
            thread: None,
        }
    }

    /// Spawn the capture loop and return immediately.
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.started {
            return Err(WorkerError::AlreadyRunning);
        }
        let source = self.source.take().ok_or(WorkerError::AlreadyRunning)?;
        self.started = true;

        let interrupt = source.interrupt_handle();
        let slot = self.slot.clone();
        let running = self.running.clone();
        let (done_tx, done) = flume::bounded::<()>(1);

        running.store(true, Ordering::Release);
        info!("Starting capture worker for {}", source.name());

        let spawned = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                capture_loop(source, &slot, &running);
                let _ = done_tx.send(());
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.slot.finish();
                return Err(WorkerError::Spawn(e));
            }
        };

        self.thread = Some(WorkerThread {
            handle,
            done,
            interrupt,
        });
        Ok(())
    }

    /// Signal the loop to exit and wait up to the grace period. If the loop
    /// is stuck inside the backend, the source is interrupted and the thread
    /// is detached; teardown always makes progress.
    ///
    /// Returns `true` if the thread exited within the grace period.
    pub fn stop(&mut self) -> bool {
        self.running.store(false, Ordering::Release);

        let Some(worker) = self.thread.take() else {
            // Never started: release the source here
            if let Some(mut source) = self.source.take() {
                source.close();
            }
            return true;
        };

        let started = Instant::now();
        match worker.done.recv_timeout(self.grace_period) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!("Capture thread panicked");
                }
                debug!("Capture worker stopped in {:?}", started.elapsed());
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Capture worker did not stop within {:?}, detaching",
                    self.grace_period
                );
                if let Some(interrupt) = worker.interrupt {
                    interrupt();
                }
                self.slot.finish();
                false
            }
        }
    }

    /// Copy of the most recent frame, without waiting for a new one.
    pub fn latest(&self) -> Option<Frame> {
        self.slot.latest()
    }

    /// Frames written, read and overwritten unread so far.
    pub fn stats(&self) -> SlotStats {
        self.slot.stats()
    }

    /// True once the source has ended or failed and no more frames will come.
    pub fn is_finished(&self) -> bool {
        self.slot.is_finished()
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Marks the slot finished however the loop exits, panics included.
struct FinishGuard<'a>(&'a SharedFrameSlot);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

fn capture_loop(mut source: Box<dyn FrameSource>, slot: &SharedFrameSlot, running: &AtomicBool) {
    let _finish = FinishGuard(slot);

    while running.load(Ordering::Acquire) {
        match source.next_frame() {
            Ok(ReadOutcome::Frame(frame)) => slot.publish(frame),
            Ok(ReadOutcome::EndOfStream) => {
                info!("{} reached end of stream", source.name());
                break;
            }
            Err(e) if e.is_transient() => {
                debug!("Transient read error on {}: {}", source.name(), e);
                thread::sleep(RETRY_BACKOFF);
            }
            Err(e) => {
                error!("Capture error on {}: {}", source.name(), e);
                break;
            }
        }
    }

    source.close();
    debug!("Capture loop for {} exited", source.name());
}
