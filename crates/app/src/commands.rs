use std::fs;

use anyhow::{Context, Result, bail};
use camera_session::{MAX_PREVIEW_SIZE, Rotation, Size, choose_optimal_size};
use ml_core::{DEFAULT_CONFIDENCE_THRESHOLD, Detection, DetectionRecording, DisplayFilter};
use serde::Serialize;
use vision::{
    Projector,
    config::{parse_size, parse_size_list},
};

use crate::cli::{ProjectArgs, SelectSizeArgs};

pub fn select_size(args: SelectSizeArgs) -> Result<()> {
    let candidates = parse_size_list(&args.candidates)?;
    let display_size = parse_size(&args.display)?;
    let bound = match args.bound.as_deref() {
        Some(raw) => parse_size(raw)?,
        None => MAX_PREVIEW_SIZE,
    };
    let chosen = choose_optimal_size(&candidates, display_size, bound);
    tracing::debug!(display = %display_size, %bound, %chosen, "preview size selected");
    println!("{chosen}");
    Ok(())
}

#[derive(Debug, Serialize)]
struct ProjectedFrame {
    index: usize,
    summary: Vec<String>,
    overlay: Vec<Detection>,
}

pub fn project(args: ProjectArgs) -> Result<()> {
    let threshold = args.threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
    if !(0.0..=1.0).contains(&threshold) {
        bail!("--threshold must be between 0.0 and 1.0");
    }
    if args.rotation.rem_euclid(90) != 0 {
        bail!("--rotation must be a multiple of 90 degrees");
    }
    let raw = fs::read_to_string(&args.recording)
        .with_context(|| format!("failed to read {}", args.recording.display()))?;
    let recording = DetectionRecording::from_json(&raw)
        .with_context(|| format!("invalid recording {}", args.recording.display()))?;

    let view = parse_size(&args.view)?;
    let filter = DisplayFilter::new(args.display_mode.into(), threshold);
    let projector = Projector::new(
        Size::new(recording.source_width, recording.source_height),
        view,
        args.mirror,
        Rotation::from_degrees(args.rotation),
    );
    if projector.is_degenerate() {
        tracing::warn!("recording has a zero-sized source; overlays will be empty");
    }

    let frames: Vec<ProjectedFrame> = recording
        .frames
        .into_iter()
        .enumerate()
        .map(|(index, detections)| {
            let shown = filter.apply(detections);
            let summary = shown
                .iter()
                .enumerate()
                .flat_map(|(position, det)| ml_core::summary::summary_lines(position, det))
                .collect();
            ProjectedFrame {
                index,
                summary,
                overlay: projector.project(shown),
            }
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&frames)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_size_accepts_display_and_bound() {
        let args = SelectSizeArgs {
            candidates: "1920x1080,1280x720,960x540,640x480".into(),
            display: "1280x720".into(),
            bound: Some("1280x720".into()),
        };
        assert!(select_size(args).is_ok());
    }

    #[test]
    fn select_size_rejects_malformed_display() {
        let args = SelectSizeArgs {
            candidates: "640x480".into(),
            display: "wide".into(),
            bound: None,
        };
        assert!(select_size(args).is_err());
    }
}
