//! Still-capture pipeline: session events in, screen updates out.
//!
//! A detection worker drains the controller's event stream. Captured frames
//! are decoded, enhanced with the flash directive they were taken under, run
//! through the detector once and projected into view space. Everything the UI
//! needs is re-dispatched as [`ScreenUpdate`]s on a separate channel.

use std::{io, thread, time::Instant};

use camera_session::{
    CapturedFrame, FrameBuffer, Rotation, SessionError, SessionEvent, SessionState, Size,
};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use ml_core::{
    Detection, DetectorError, DetectorInput, DetectorService, DisplayFilter,
    summary::{recognized_text, summary_lines},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    enhance::{EnhanceError, decode_frame, enhance},
    projection::Projector,
    telemetry,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Enhance(#[from] EnhanceError),
    #[error("detection failed: {0}")]
    Detector(#[from] DetectorError),
}

/// Detections for one frame, in source and view space.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub timestamp_ms: i64,
    /// Upright source dimensions the detector saw.
    pub source: Size,
    /// Displayed detections in source pixels.
    pub detections: Vec<Detection>,
    /// The same detections projected into the view.
    pub overlay: Vec<Detection>,
}

impl DetectionReport {
    /// Result-list lines for every displayed detection.
    pub fn summary(&self) -> Vec<String> {
        self.detections
            .iter()
            .enumerate()
            .flat_map(|(position, det)| summary_lines(position, det))
            .collect()
    }

    /// Recognised text and whether it can be copied or shared.
    pub fn recognized_text(&self) -> (String, bool) {
        recognized_text(&self.detections)
    }
}

/// Messages for the UI context.
#[derive(Debug)]
pub enum ScreenUpdate {
    State(SessionState),
    PreviewStarted(Size),
    Report(DetectionReport),
    /// User-facing error text; `fatal` errors need a manual reopen.
    Error { message: String, fatal: bool },
}

impl ScreenUpdate {
    fn from_session_error(err: &SessionError) -> Self {
        ScreenUpdate::Error {
            message: err.to_string(),
            fatal: matches!(err, SessionError::Fatal(_)),
        }
    }
}

/// Decode → enhance → detect → filter → project for single frames.
pub struct FrameProcessor {
    detector: Box<dyn DetectorService>,
    display: DisplayFilter,
    view: Size,
    mirror: bool,
}

impl FrameProcessor {
    pub fn new(
        detector: Box<dyn DetectorService>,
        display: DisplayFilter,
        view: Size,
        mirror: bool,
    ) -> Self {
        Self {
            detector,
            display,
            view,
            mirror,
        }
    }

    /// Update the destination view, e.g. after a resize.
    pub fn set_view(&mut self, view: Size) {
        self.view = view;
    }

    /// Run one frame through the detector. `enhance_with` selects the
    /// enhancement strength; `None` skips enhancement. The frame buffer is
    /// released before this returns, on every path.
    pub fn process(
        &mut self,
        frame: FrameBuffer,
        enhance_with: Option<bool>,
    ) -> Result<DetectionReport, PipelineError> {
        let started = Instant::now();
        let timestamp_ms = frame.timestamp_ms;
        let rotation = frame.rotation;
        let decoded = decode_frame(&frame)?;
        drop(frame);

        let image = match enhance_with {
            Some(use_flash) => enhance(&decoded, use_flash),
            None => decoded,
        };
        let input = DetectorInput::new(image, rotation.degrees() as u16);
        let (width, height) = input.upright_size();

        let detections = self.detector.detect(&input)?;
        drop(input);
        let detections = self.display.apply(detections);

        // upright dimensions already account for rotation
        let projector = Projector::new(
            Size::new(width, height),
            self.view,
            self.mirror,
            Rotation::Deg0,
        );
        let overlay = projector.project(detections.clone());

        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        metrics::histogram!("vision_detection_latency_ms").record(elapsed_ms);
        debug!(
            detector = self.detector.name(),
            count = detections.len(),
            elapsed_ms,
            "frame processed"
        );

        Ok(DetectionReport {
            timestamp_ms,
            source: Size::new(width, height),
            detections,
            overlay,
        })
    }
}

/// Worker translating session events into screen updates.
pub struct CapturePipeline {
    stop: Option<Sender<()>>,
    worker: Option<thread::JoinHandle<FrameProcessor>>,
}

impl CapturePipeline {
    /// Spawn the detection worker. It runs until the session event stream
    /// closes, the UI side hangs up or the pipeline is dropped.
    pub fn spawn(
        events: Receiver<SessionEvent>,
        mut processor: FrameProcessor,
        ui_tx: Sender<ScreenUpdate>,
    ) -> io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let worker = telemetry::spawn_thread("capture-pipeline", move || {
            let span = tracing::info_span!("vision.capture");
            let _guard = span.enter();
            loop {
                let event = select! {
                    recv(events) -> event => match event {
                        Ok(event) => event,
                        Err(_) => break,
                    },
                    recv(stop_rx) -> _ => break,
                };
                let update = match event {
                    SessionEvent::State(state) => ScreenUpdate::State(state),
                    SessionEvent::PreviewStarted { size } => ScreenUpdate::PreviewStarted(size),
                    SessionEvent::Error(err) => ScreenUpdate::from_session_error(&err),
                    SessionEvent::Frame(captured) => handle_capture(&mut processor, captured),
                };
                if ui_tx.send(update).is_err() {
                    warn!("UI channel closed, stopping capture pipeline");
                    break;
                }
            }
            processor
        })?;
        Ok(Self {
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }

    /// Wait for the event stream to end and get the processor back.
    pub fn join(mut self) -> Option<FrameProcessor> {
        self.worker.take().and_then(|worker| worker.join().ok())
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("capture pipeline thread panicked");
            }
        }
    }
}

fn handle_capture(processor: &mut FrameProcessor, captured: CapturedFrame) -> ScreenUpdate {
    let CapturedFrame {
        frame,
        flash_used,
        ticket,
    } = captured;
    let update = match processor.process(frame, Some(flash_used)) {
        Ok(report) => ScreenUpdate::Report(report),
        Err(err) => {
            metrics::counter!("vision_detection_failures_total").increment(1);
            error!("text recognition failed: {err}");
            ScreenUpdate::Error {
                message: err.to_string(),
                fatal: false,
            }
        }
    };
    // the capture stays in flight until its result is ready
    drop(ticket);
    update
}

#[cfg(test)]
mod tests {
    use camera_session::FrameFormat;
    use ml_core::{DetectionBox, DetectionKind, PixelRect};

    use super::*;

    struct FixedDetector(Vec<Detection>);

    impl DetectorService for FixedDetector {
        fn name(&self) -> &str {
            "fixed"
        }

        fn detect(&mut self, _input: &DetectorInput) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn text(value: &str, rect: PixelRect) -> Detection {
        Detection {
            bbox: DetectionBox {
                rect,
                confidence: 0.9,
                tracking_id: None,
            },
            landmarks: Vec::new(),
            kind: DetectionKind::Text { text: value.into() },
        }
    }

    #[test]
    fn rotated_frames_project_against_upright_size() {
        let detector = FixedDetector(vec![text("hi", PixelRect::new(0.0, 0.0, 40.0, 80.0))]);
        let mut processor = FrameProcessor::new(
            Box::new(detector),
            DisplayFilter::default(),
            Size::new(200, 400),
            false,
        );
        let frame = FrameBuffer::new(vec![0; 80 * 40 * 4], 80, 40, FrameFormat::Rgba8)
            .with_rotation(Rotation::Deg270);
        let report = processor.process(frame, None).unwrap();
        assert_eq!(report.source, Size::new(40, 80));
        assert_eq!(report.overlay[0].bbox.rect, PixelRect::new(0.0, 0.0, 200.0, 400.0));
        assert_eq!(report.recognized_text(), ("hi".to_owned(), true));
    }

    #[test]
    fn undecodable_frames_are_reported() {
        let mut processor = FrameProcessor::new(
            Box::new(FixedDetector(Vec::new())),
            DisplayFilter::default(),
            Size::new(10, 10),
            false,
        );
        let frame = FrameBuffer::new(vec![0; 3], 2, 2, FrameFormat::Rgba8);
        assert!(matches!(
            processor.process(frame, Some(true)),
            Err(PipelineError::Enhance(_))
        ));
    }
}
