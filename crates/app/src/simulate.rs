//! End-to-end run against the simulated camera.

use std::{
    fs,
    sync::{
        Arc, Once,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use camera_session::{
    CaptureRejected, CaptureSession, FrameBuffer, FrameFormat, OpenClosePermit, OpenOutcome,
    SessionState, SimulatedCamera, Size,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use ml_core::{
    Detection, DetectionBox, DetectionKind, DetectionRecording, FaceAttributes, ObjectLabel,
    PixelRect, ReplayDetector,
};
use tracing::{info, warn};
use vision::{
    CapturePipeline, FrameProcessor, LightAdaptiveFlashPolicy, LightSample, ScreenUpdate,
    SessionConfig,
    analysis::{AnalysisStream, Offer},
    flash::{LIGHT_CHECK_INTERVAL, spawn_light_monitor},
    telemetry,
};

use crate::cli::SimulateArgs;

const UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn run(args: SimulateArgs) -> Result<()> {
    let config = SessionConfig::try_from(args.session)?;
    let _telemetry = telemetry::enter_runtime(&config.telemetry, config.verbose);
    if args.metrics {
        telemetry::init_metrics_recorder()?;
    }

    static CTRL_HANDLER: Once = Once::new();
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_shutdown = shutdown.clone();
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            handler_shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let recording = match args.recording.as_ref() {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            DetectionRecording::from_json(&raw)
                .with_context(|| format!("invalid recording {}", path.display()))?
        }
        None => demo_scene(),
    };

    let (camera, control) = SimulatedCamera::new();
    control.set_frame_rotation(config.rotation);
    control.script_opens((0..args.fail_opens).map(|_| OpenOutcome::Busy));

    let (session, events) = CaptureSession::spawn(
        camera,
        config.controller.clone(),
        config.surface,
        OpenClosePermit::new(),
    )
    .context("failed to start camera session")?;
    let session = Arc::new(session);

    let (ui_tx, ui_rx) = unbounded();
    let pipeline = CapturePipeline::spawn(
        events,
        FrameProcessor::new(
            Box::new(ReplayDetector::new(recording.clone())),
            config.display,
            config.surface.size,
            config.mirror,
        ),
        ui_tx.clone(),
    )
    .context("failed to start capture pipeline")?;

    info!(surface = %config.surface.size, "opening simulated camera");
    session.open();
    let preview = wait_for(&ui_rx, args.json, |update| match update {
        ScreenUpdate::PreviewStarted(size) => Some(*size),
        _ => None,
    })?;

    if !args.lux.is_empty() {
        run_light_samples(&session, &args.lux, config.controller.initial_flash)?;
    }

    for index in 0..args.captures {
        if shutdown.load(Ordering::SeqCst) {
            warn!("interrupted, skipping remaining captures");
            break;
        }
        request_capture(&session)?;
        let report = wait_for(&ui_rx, args.json, |update| match update {
            ScreenUpdate::Report(report) => Some(report.clone()),
            _ => None,
        })?;
        if !args.json {
            let (text, shareable) = report.recognized_text();
            println!(
                "capture {index}: {} detection(s), text {:?}{}",
                report.detections.len(),
                text,
                if shareable { "" } else { " (nothing to share)" }
            );
        }
    }

    if args.analysis_frames > 0 && !shutdown.load(Ordering::SeqCst) {
        run_analysis(
            &config,
            recording,
            preview,
            args.analysis_frames,
            &control,
            args.json,
        )?;
    }

    session.close();
    wait_for(&ui_rx, args.json, |update| match update {
        ScreenUpdate::State(SessionState::Closed) => Some(()),
        _ => None,
    })?;

    drop(session);
    drop(ui_tx);
    if pipeline.join().is_none() {
        warn!("capture pipeline stopped abnormally");
    }
    for update in ui_rx.try_iter() {
        print_update(&update, args.json)?;
    }

    let live = control.tracker().live();
    if live != 0 {
        bail!("{live} frame buffer(s) were never released");
    }
    info!(opens = control.open_calls(), "simulation finished");

    if args.metrics {
        if let Some(rendered) = telemetry::render_metrics() {
            println!("{rendered}");
        }
    }
    Ok(())
}

/// Feed lux readings through the flash policy on a simulated sensor clock,
/// one check interval apart.
fn run_light_samples(session: &Arc<CaptureSession>, lux: &[f32], initial: bool) -> Result<()> {
    let (tx, rx) = unbounded();
    let monitor = spawn_light_monitor(session.clone(), rx, LightAdaptiveFlashPolicy::new(initial))
        .context("failed to start light monitor")?;
    let start = Instant::now();
    let step = LIGHT_CHECK_INTERVAL + Duration::from_millis(1);
    for (i, &lux) in lux.iter().enumerate() {
        let at = start + step * i as u32;
        if tx.send(LightSample { lux, at }).is_err() {
            break;
        }
    }
    drop(tx);
    let policy = monitor
        .join()
        .map_err(|_| anyhow!("light monitor panicked"))?;
    info!(
        evaluations = policy.evaluations(),
        use_flash = policy.use_flash(),
        "light samples applied"
    );
    Ok(())
}

fn request_capture(session: &CaptureSession) -> Result<()> {
    let deadline = Instant::now() + UPDATE_TIMEOUT;
    loop {
        match session.capture() {
            Ok(()) => return Ok(()),
            Err(CaptureRejected::Stopped) => bail!("camera session has stopped"),
            Err(reason) if Instant::now() >= deadline => {
                bail!("capture was not accepted in time: {reason}")
            }
            Err(_) => thread::sleep(Duration::from_millis(5)),
        }
    }
}

fn run_analysis(
    config: &SessionConfig,
    recording: DetectionRecording,
    preview: Size,
    frames: u32,
    control: &camera_session::SimControl,
    json: bool,
) -> Result<()> {
    let (ui_tx, ui_rx) = unbounded();
    let processor = FrameProcessor::new(
        Box::new(ReplayDetector::new(recording)),
        config.display,
        config.surface.size,
        config.mirror,
    );
    let stream = AnalysisStream::spawn(processor, ui_tx).context("failed to start analysis")?;

    let mut accepted = 0u32;
    for _ in 0..frames {
        let frame = preview_frame(preview).tracked(control.tracker());
        if stream.offer(frame) == Offer::Accepted {
            accepted += 1;
        }
        thread::sleep(Duration::from_millis(2));
    }

    let mut reports = 0u32;
    while reports < accepted {
        match ui_rx.recv_timeout(UPDATE_TIMEOUT) {
            Ok(update) => {
                print_update(&update, json)?;
                reports += 1;
            }
            Err(RecvTimeoutError::Timeout) => bail!("analysis worker stalled"),
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if !json {
        println!(
            "analysis: offered {frames}, analyzed {}, dropped {}",
            stream.analyzed_frames(),
            stream.dropped_frames()
        );
    }
    Ok(())
}

fn preview_frame(size: Size) -> FrameBuffer {
    let pixels = size.width as usize * size.height as usize;
    FrameBuffer::new(
        vec![96; pixels * 4],
        size.width,
        size.height,
        FrameFormat::Rgba8,
    )
}

/// Print updates until `pick` matches one; fatal errors end the run.
fn wait_for<T>(
    rx: &Receiver<ScreenUpdate>,
    json: bool,
    mut pick: impl FnMut(&ScreenUpdate) -> Option<T>,
) -> Result<T> {
    let deadline = Instant::now() + UPDATE_TIMEOUT;
    loop {
        let update = rx
            .recv_deadline(deadline)
            .map_err(|_| anyhow!("timed out waiting for the camera session"))?;
        print_update(&update, json)?;
        if let Some(found) = pick(&update) {
            return Ok(found);
        }
        if let ScreenUpdate::Error {
            message,
            fatal: true,
        } = update
        {
            bail!(message);
        }
    }
}

fn print_update(update: &ScreenUpdate, json: bool) -> Result<()> {
    match update {
        ScreenUpdate::Report(report) if json => {
            println!("{}", serde_json::to_string(report)?);
        }
        ScreenUpdate::Report(report) => {
            for line in report.summary() {
                println!("  {line}");
            }
        }
        ScreenUpdate::State(state) if !json => println!("state: {state}"),
        ScreenUpdate::PreviewStarted(size) if !json => println!("preview: {size}"),
        ScreenUpdate::Error { message, fatal } if !json => {
            let tag = if *fatal { "fatal" } else { "error" };
            println!("{tag}: {message}");
        }
        _ => {}
    }
    Ok(())
}

/// Scene replayed when no recording is given; fits inside a 640x480 frame.
fn demo_scene() -> DetectionRecording {
    let face = Detection {
        bbox: DetectionBox {
            rect: PixelRect::from_xywh(80.0, 60.0, 160.0, 200.0),
            confidence: 1.0,
            tracking_id: Some(1),
        },
        landmarks: Vec::new(),
        kind: DetectionKind::Face(FaceAttributes {
            smiling: Some(0.82),
            left_eye_open: Some(0.97),
            right_eye_open: Some(0.91),
        }),
    };
    let cup = Detection {
        bbox: DetectionBox {
            rect: PixelRect::from_xywh(360.0, 240.0, 120.0, 140.0),
            confidence: 1.0,
            tracking_id: Some(2),
        },
        landmarks: Vec::new(),
        kind: DetectionKind::Object {
            labels: vec![ObjectLabel {
                text: "Cup".into(),
                confidence: 0.74,
            }],
        },
    };
    let sign = Detection {
        bbox: DetectionBox {
            rect: PixelRect::from_xywh(300.0, 40.0, 220.0, 60.0),
            confidence: 0.9,
            tracking_id: None,
        },
        landmarks: Vec::new(),
        kind: DetectionKind::Text {
            text: "OPEN 9-5".into(),
        },
    };
    DetectionRecording {
        source_width: 640,
        source_height: 480,
        frames: vec![vec![face, cup, sign]],
    }
}
