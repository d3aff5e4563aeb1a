//! Frame acquisition on a dedicated thread, feeding a bounded queue.
//!
//! The processing side pulls at its own tick rate. A live camera never waits
//! on a slow consumer: when the queue is full the new frame is dropped.

use rollcall_hw::{CameraError, Frame, FrameSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

type Item = Result<Frame, CameraError>;

/// What happens to a frame when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// Drop it. Processing always sees the freshest frames.
    DropNewest,
    /// Wait for space. Every frame is processed in order.
    Lossless,
}

/// Result of pulling from the queue on one tick.
pub enum Pulled {
    Frame(Frame),
    /// Nothing new since the last tick.
    Empty,
    /// The source failed; acquisition has ended.
    Failed(CameraError),
    /// The source is exhausted or stopped.
    Closed,
}

pub struct Acquisition {
    rx: mpsc::Receiver<Item>,
    stop: Arc<AtomicBool>,
    policy: QueuePolicy,
    handle: Option<JoinHandle<()>>,
}

impl Acquisition {
    pub fn spawn(
        mut source: Box<dyn FrameSource>,
        capacity: usize,
        policy: QueuePolicy,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Item>(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("rollcall-acquire".into())
            .spawn(move || {
                tracing::debug!(?policy, "acquisition thread started");
                let mut dropped = 0u64;
                while !stop_flag.load(Ordering::Relaxed) {
                    let frame = match source.read() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => {
                            tracing::info!("frame source exhausted");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "frame source failed");
                            let _ = tx.blocking_send(Err(e));
                            break;
                        }
                    };
                    let sent = match policy {
                        QueuePolicy::DropNewest => match tx.try_send(Ok(frame)) {
                            Ok(()) => true,
                            Err(TrySendError::Full(_)) => {
                                dropped += 1;
                                tracing::trace!(dropped, "queue full, frame dropped");
                                true
                            }
                            Err(TrySendError::Closed(_)) => false,
                        },
                        QueuePolicy::Lossless => tx.blocking_send(Ok(frame)).is_ok(),
                    };
                    if !sent {
                        break;
                    }
                }
                tracing::debug!(dropped, "acquisition thread exiting");
                // Source dropped here, releasing the device.
            })?;

        Ok(Self {
            rx,
            stop,
            policy,
            handle: Some(handle),
        })
    }

    /// Pull for one tick. Under [`QueuePolicy::DropNewest`] older queued frames
    /// are discarded in favour of the newest.
    pub fn pull(&mut self) -> Pulled {
        let mut latest = None;
        loop {
            match self.rx.try_recv() {
                Ok(Ok(frame)) => {
                    latest = Some(frame);
                    if self.policy == QueuePolicy::Lossless {
                        break;
                    }
                }
                Ok(Err(e)) => return Pulled::Failed(e),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return latest.map_or(Pulled::Closed, Pulled::Frame);
                }
            }
        }
        latest.map_or(Pulled::Empty, Pulled::Frame)
    }

    /// Ask the acquisition thread to finish. Frames already queued stay readable.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
        // Unblocks a Lossless sender waiting for space.
        self.rx.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
