use std::time::Duration;

use camera_session::{BufferTracker, FrameBuffer, FrameFormat, Size};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use ml_core::{Detection, DetectorError, DetectorInput, DetectorService, DisplayFilter};
use vision::{FrameProcessor, ScreenUpdate, analysis::AnalysisStream, analysis::Offer};

const WAIT: Duration = Duration::from_secs(5);

/// Blocks inside `detect` until the test opens the gate.
struct GatedDetector {
    entered: Sender<()>,
    gate: Receiver<Result<(), String>>,
}

impl DetectorService for GatedDetector {
    fn name(&self) -> &str {
        "gated"
    }

    fn detect(&mut self, _input: &DetectorInput) -> Result<Vec<Detection>, DetectorError> {
        let _ = self.entered.send(());
        match self.gate.recv() {
            Ok(Ok(())) => Ok(Vec::new()),
            Ok(Err(reason)) => Err(DetectorError::Backend(reason)),
            Err(_) => Err(DetectorError::Backend("gate closed".into())),
        }
    }
}

struct Harness {
    stream: AnalysisStream,
    entered: Receiver<()>,
    gate: Sender<Result<(), String>>,
    ui: Receiver<ScreenUpdate>,
    tracker: BufferTracker,
}

fn harness() -> Harness {
    let (entered_tx, entered) = unbounded();
    let (gate, gate_rx) = unbounded();
    let processor = FrameProcessor::new(
        Box::new(GatedDetector {
            entered: entered_tx,
            gate: gate_rx,
        }),
        DisplayFilter::default(),
        Size::new(8, 8),
        false,
    );
    let (ui_tx, ui) = bounded(16);
    Harness {
        stream: AnalysisStream::spawn(processor, ui_tx).unwrap(),
        entered,
        gate,
        ui,
        tracker: BufferTracker::new(),
    }
}

fn frame(tracker: &BufferTracker) -> FrameBuffer {
    FrameBuffer::new(vec![0; 4 * 4 * 4], 4, 4, FrameFormat::Rgba8).tracked(tracker)
}

#[test]
fn frames_offered_while_busy_are_dropped() {
    let h = harness();
    assert_eq!(h.stream.offer(frame(&h.tracker)), Offer::Accepted);
    h.entered.recv_timeout(WAIT).unwrap();
    assert!(h.stream.is_busy());

    assert_eq!(h.stream.offer(frame(&h.tracker)), Offer::DroppedBusy);
    assert_eq!(h.stream.offer(frame(&h.tracker)), Offer::DroppedBusy);
    assert_eq!(h.stream.dropped_frames(), 2);
    assert_eq!(h.tracker.live(), 0, "dropped and decoded frames are released");

    h.gate.send(Ok(())).unwrap();
    assert!(matches!(
        h.ui.recv_timeout(WAIT).unwrap(),
        ScreenUpdate::Report(_)
    ));
    assert!(!h.stream.is_busy());

    assert_eq!(h.stream.offer(frame(&h.tracker)), Offer::Accepted);
    h.entered.recv_timeout(WAIT).unwrap();
    h.gate.send(Ok(())).unwrap();
    h.ui.recv_timeout(WAIT).unwrap();
    assert_eq!(h.stream.analyzed_frames(), 2);
}

#[test]
fn paused_stream_discards_until_resumed() {
    let h = harness();
    h.stream.pause();
    assert!(h.stream.is_paused());
    assert_eq!(h.stream.offer(frame(&h.tracker)), Offer::DroppedPaused);
    assert_eq!(h.tracker.live(), 0);

    h.stream.resume();
    assert_eq!(h.stream.offer(frame(&h.tracker)), Offer::Accepted);
    h.entered.recv_timeout(WAIT).unwrap();
    h.gate.send(Ok(())).unwrap();
    h.ui.recv_timeout(WAIT).unwrap();
}

#[test]
fn detector_failure_is_reported_once_and_stream_continues() {
    let h = harness();
    assert_eq!(h.stream.offer(frame(&h.tracker)), Offer::Accepted);
    h.entered.recv_timeout(WAIT).unwrap();
    h.gate.send(Err("model unavailable".into())).unwrap();

    match h.ui.recv_timeout(WAIT).unwrap() {
        ScreenUpdate::Error { message, fatal } => {
            assert!(message.contains("model unavailable"));
            assert!(!fatal);
        }
        other => panic!("unexpected update {other:?}"),
    }
    assert!(h.ui.recv_timeout(Duration::from_millis(50)).is_err());

    assert_eq!(h.stream.offer(frame(&h.tracker)), Offer::Accepted);
    h.entered.recv_timeout(WAIT).unwrap();
    h.gate.send(Ok(())).unwrap();
    assert!(matches!(
        h.ui.recv_timeout(WAIT).unwrap(),
        ScreenUpdate::Report(_)
    ));
}
