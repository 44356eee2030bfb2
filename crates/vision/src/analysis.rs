//! Streaming analysis with backpressure by discard.
//!
//! At most one frame is with the detector at any time. Frames offered while
//! the worker is busy, or while analysis is paused, are dropped on the spot.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
};

use camera_session::FrameBuffer;
use crossbeam_channel::{Sender, TrySendError, bounded};
use tracing::{debug, error, warn};

use crate::{
    pipeline::{FrameProcessor, ScreenUpdate},
    telemetry,
};

/// What happened to an offered frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    DroppedBusy,
    DroppedPaused,
    /// The worker has stopped.
    Closed,
}

#[derive(Debug, Default)]
struct StreamFlags {
    busy: AtomicBool,
    paused: AtomicBool,
    dropped: AtomicU64,
    analyzed: AtomicU64,
}

/// Clears the busy flag when the worker is done with a frame.
struct InFlight(Arc<StreamFlags>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::SeqCst);
    }
}

/// Handle feeding preview frames to a detection worker.
pub struct AnalysisStream {
    tx: Option<Sender<FrameBuffer>>,
    flags: Arc<StreamFlags>,
    worker: Option<thread::JoinHandle<()>>,
}

impl AnalysisStream {
    /// Spawn the worker; reports go to `ui_tx`.
    pub fn spawn(mut processor: FrameProcessor, ui_tx: Sender<ScreenUpdate>) -> io::Result<Self> {
        let (tx, rx) = bounded::<FrameBuffer>(1);
        let flags = Arc::new(StreamFlags::default());
        let worker_flags = flags.clone();

        let worker = telemetry::spawn_thread("analysis-worker", move || {
            let span = tracing::info_span!("vision.analysis");
            let _guard = span.enter();
            for frame in rx.iter() {
                let in_flight = InFlight(worker_flags.clone());
                let update = match processor.process(frame, None) {
                    Ok(report) => {
                        worker_flags.analyzed.fetch_add(1, Ordering::Relaxed);
                        ScreenUpdate::Report(report)
                    }
                    Err(err) => {
                        metrics::counter!("vision_detection_failures_total").increment(1);
                        error!("analysis failed: {err}");
                        ScreenUpdate::Error {
                            message: err.to_string(),
                            fatal: false,
                        }
                    }
                };
                drop(in_flight);
                if ui_tx.send(update).is_err() {
                    warn!("UI channel closed, stopping analysis worker");
                    break;
                }
            }
            debug!("analysis worker stopped");
        })?;

        Ok(Self {
            tx: Some(tx),
            flags,
            worker: Some(worker),
        })
    }

    /// Hand `frame` to the detector unless it is busy or analysis is paused.
    /// Rejected frames are released immediately.
    pub fn offer(&self, frame: FrameBuffer) -> Offer {
        if self.flags.paused.load(Ordering::SeqCst) {
            return self.discard(frame, Offer::DroppedPaused);
        }
        if self
            .flags
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return self.discard(frame, Offer::DroppedBusy);
        }
        let Some(tx) = self.tx.as_ref() else {
            self.flags.busy.store(false, Ordering::SeqCst);
            return Offer::Closed;
        };
        match tx.try_send(frame) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(frame)) => {
                self.flags.busy.store(false, Ordering::SeqCst);
                self.discard(frame, Offer::DroppedBusy)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.flags.busy.store(false, Ordering::SeqCst);
                Offer::Closed
            }
        }
    }

    fn discard(&self, frame: FrameBuffer, reason: Offer) -> Offer {
        drop(frame);
        self.flags.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("vision_analysis_dropped_frames_total").increment(1);
        reason
    }

    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    /// Whether a frame is currently with the detector.
    pub fn is_busy(&self) -> bool {
        self.flags.busy.load(Ordering::SeqCst)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.flags.dropped.load(Ordering::Relaxed)
    }

    pub fn analyzed_frames(&self) -> u64 {
        self.flags.analyzed.load(Ordering::Relaxed)
    }
}

impl Drop for AnalysisStream {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("analysis worker panicked");
            }
        }
    }
}
