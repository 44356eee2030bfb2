use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use approx::assert_relative_eq;
use camera_session::{
    CaptureSession, ControllerSettings, OpenClosePermit, OpenOutcome, SessionState, SimCall,
    SimulatedCamera, Size, SurfaceInfo,
};
use crossbeam_channel::{Receiver, unbounded};
use ml_core::{
    Detection, DetectionBox, DetectionKind, DetectionRecording, DisplayFilter, ObjectLabel,
    PixelRect, ReplayDetector,
};
use vision::{
    CapturePipeline, DetectionReport, FrameProcessor, LightAdaptiveFlashPolicy, LightSample,
    ScreenUpdate, flash::spawn_light_monitor,
};

const WAIT: Duration = Duration::from_secs(5);

fn fast_settings() -> ControllerSettings {
    ControllerSettings {
        retry_backoff: Duration::from_millis(10),
        permit_timeout: Duration::from_millis(50),
        ..ControllerSettings::default()
    }
}

fn two_boxes() -> DetectionRecording {
    let text = Detection {
        bbox: DetectionBox {
            rect: PixelRect::new(96.0, 54.0, 192.0, 108.0),
            confidence: 0.95,
            tracking_id: None,
        },
        landmarks: Vec::new(),
        kind: DetectionKind::Text {
            text: "EXIT".into(),
        },
    };
    let object = Detection {
        bbox: DetectionBox {
            rect: PixelRect::new(480.0, 270.0, 720.0, 405.0),
            confidence: 1.0,
            tracking_id: Some(7),
        },
        landmarks: Vec::new(),
        kind: DetectionKind::Object {
            labels: vec![ObjectLabel {
                text: "door".into(),
                confidence: 0.8,
            }],
        },
    };
    DetectionRecording {
        source_width: 960,
        source_height: 540,
        frames: vec![vec![text, object]],
    }
}

fn next_update(
    rx: &Receiver<ScreenUpdate>,
    mut pred: impl FnMut(&ScreenUpdate) -> bool,
) -> ScreenUpdate {
    let deadline = Instant::now() + WAIT;
    loop {
        let update = rx
            .recv_deadline(deadline)
            .expect("timed out waiting for screen update");
        if pred(&update) {
            return update;
        }
    }
}

fn next_report(rx: &Receiver<ScreenUpdate>) -> DetectionReport {
    match next_update(rx, |u| matches!(u, ScreenUpdate::Report(_))) {
        ScreenUpdate::Report(report) => report,
        _ => unreachable!(),
    }
}

#[test]
fn capture_detect_project_and_close_releases_everything() {
    let (camera, control) = SimulatedCamera::new();
    let (session, events) = CaptureSession::spawn(
        camera,
        fast_settings(),
        SurfaceInfo::new(1280, 720),
        OpenClosePermit::new(),
    )
    .unwrap();
    let processor = FrameProcessor::new(
        Box::new(ReplayDetector::new(two_boxes())),
        DisplayFilter::default(),
        Size::new(1280, 720),
        false,
    );
    let (ui_tx, ui_rx) = unbounded();
    let pipeline = CapturePipeline::spawn(events, processor, ui_tx).unwrap();

    session.open();
    match next_update(&ui_rx, |u| matches!(u, ScreenUpdate::PreviewStarted(_))) {
        ScreenUpdate::PreviewStarted(size) => assert_eq!(size, Size::new(960, 540)),
        _ => unreachable!(),
    }

    session.capture().unwrap();
    let report = next_report(&ui_rx);
    assert_eq!(report.source, Size::new(960, 540));
    assert_eq!(report.overlay.len(), 2);

    let first = report.overlay[0].bbox.rect;
    assert_relative_eq!(first.left, 128.0, epsilon = 1e-3);
    assert_relative_eq!(first.top, 72.0, epsilon = 1e-3);
    assert_relative_eq!(first.right, 256.0, epsilon = 1e-3);
    assert_relative_eq!(first.bottom, 144.0, epsilon = 1e-3);
    let second = report.overlay[1].bbox.rect;
    assert_relative_eq!(second.left, 640.0, epsilon = 1e-3);
    assert_relative_eq!(second.bottom, 540.0, epsilon = 1e-3);

    assert_eq!(report.recognized_text(), ("EXIT".to_owned(), true));
    assert_eq!(report.summary(), vec!["EXIT", "door 80.0%"]);
    assert!(!session.is_capturing());

    session.close();
    next_update(&ui_rx, |u| matches!(u, ScreenUpdate::State(SessionState::Closed)));
    assert_eq!(session.state(), SessionState::Closed);

    drop(session);
    assert!(pipeline.join().is_some());
    assert_eq!(control.tracker().live(), 0);
    assert!(
        control
            .calls()
            .iter()
            .any(|c| matches!(c, SimCall::CloseReader(_)))
    );
}

#[test]
fn exhausted_retries_surface_as_fatal_screen_error() {
    let (camera, control) = SimulatedCamera::new();
    control.script_opens([OpenOutcome::Busy, OpenOutcome::Busy, OpenOutcome::Busy]);
    let (session, events) = CaptureSession::spawn(
        camera,
        fast_settings(),
        SurfaceInfo::new(1280, 720),
        OpenClosePermit::new(),
    )
    .unwrap();
    let processor = FrameProcessor::new(
        Box::new(ReplayDetector::new(DetectionRecording::default())),
        DisplayFilter::default(),
        Size::new(1280, 720),
        false,
    );
    let (ui_tx, ui_rx) = unbounded();
    let _pipeline = CapturePipeline::spawn(events, processor, ui_tx).unwrap();

    session.open();
    match next_update(&ui_rx, |u| matches!(u, ScreenUpdate::Error { fatal: true, .. })) {
        ScreenUpdate::Error { message, .. } => {
            assert!(message.contains("after 3 attempts"), "{message}")
        }
        _ => unreachable!(),
    }
    assert_eq!(session.state(), SessionState::Error);
}

#[test]
fn bright_light_turns_flash_off_on_the_live_session() {
    let (camera, control) = SimulatedCamera::new();
    let (session, events) = CaptureSession::spawn(
        camera,
        fast_settings(),
        SurfaceInfo::new(1280, 720),
        OpenClosePermit::new(),
    )
    .unwrap();
    let session = Arc::new(session);
    session.open();
    let deadline = Instant::now() + WAIT;
    while !session.is_ready() {
        assert!(Instant::now() < deadline, "session never became ready");
        std::thread::sleep(Duration::from_millis(2));
    }

    let (tx, rx) = unbounded();
    let monitor =
        spawn_light_monitor(session.clone(), rx, LightAdaptiveFlashPolicy::default()).unwrap();
    tx.send(LightSample::now(800.0)).unwrap();
    drop(tx);
    let policy = monitor.join().unwrap();
    assert!(!policy.use_flash());

    let deadline = Instant::now() + WAIT;
    while !control
        .calls()
        .iter()
        .any(|c| matches!(c, SimCall::SubmitRepeating { flash: false, .. }))
    {
        assert!(Instant::now() < deadline, "flash change never resubmitted");
        std::thread::sleep(Duration::from_millis(2));
    }
    drop(events);
}
