//! Dedicated delivery thread for frame sources that produce frames elsewhere
//!
//! A producer pushes frames into a bounded channel; the pump thread hands
//! them to the frame handler one at a time, in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, warn};

use crate::capture::traits::FrameHandler;
use crate::error::{CaptureError, CaptureResult};
use crate::types::{Frame, BUFFER_COUNT};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Channel sized to the frame pool's buffer count. A full channel blocks the
/// producer, so frames are never queued beyond double buffering.
pub fn frame_channel<S>() -> (Sender<Frame<S>>, Receiver<Frame<S>>) {
    bounded(BUFFER_COUNT as usize)
}

/// Error path for frame sources that run the handler on a thread with no
/// caller to return to. Device errors go to the capture owner's receiver.
#[derive(Clone)]
pub struct DeliveryErrors {
    sender: Sender<CaptureError>,
}

impl DeliveryErrors {
    pub fn channel() -> (Self, Receiver<CaptureError>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    /// Inspect one handler result and return whether the source should keep
    /// delivering. Stops on `ObjectClosed` and on the first device error.
    pub fn observe(&self, result: CaptureResult<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(CaptureError::ObjectClosed) => false,
            Err(e) => {
                error!("Frame delivery failed: {}", e);
                if let Err(unsent) = self.sender.send(e) {
                    warn!("No owner listening for delivery errors: {}", unsent.0);
                }
                false
            }
        }
    }
}

/// Delivery thread driving a frame handler
pub struct FramePump {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<CaptureResult<u64>>>,
}

impl FramePump {
    /// Start delivering frames from `frames` to `handler`.
    ///
    /// The thread exits when the channel disconnects, [`FramePump::stop`] is
    /// called, the handler reports `ObjectClosed`, or the handler fails with
    /// any other error (which `join` returns).
    pub fn spawn<S: Send + 'static>(frames: Receiver<Frame<S>>, mut handler: FrameHandler<S>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let handle = thread::spawn(move || {
            let mut delivered = 0u64;
            while thread_running.load(Ordering::Acquire) {
                let frame = match frames.recv_timeout(POLL_INTERVAL) {
                    Ok(frame) => frame,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };

                match handler(frame) {
                    Ok(()) => delivered += 1,
                    Err(CaptureError::ObjectClosed) => break,
                    Err(e) => {
                        error!("Frame delivery failed: {}", e);
                        thread_running.store(false, Ordering::Release);
                        return Err(e);
                    }
                }
            }
            thread_running.store(false, Ordering::Release);
            debug!("Delivery thread exiting after {} frames", delivered);
            Ok(delivered)
        });

        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Ask the thread to exit after the frame it is handling. Does not wait.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Wait for the thread and return how many frames it delivered.
    /// Must not be called from the delivery thread itself.
    pub fn join(mut self) -> CaptureResult<u64> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| CaptureError::Other(anyhow::anyhow!("frame delivery thread panicked")))?,
            None => Ok(0),
        }
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.stop();
    }
}
