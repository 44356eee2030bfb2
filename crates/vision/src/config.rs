//! Configuration parsing for camera sessions.
//!
//! This module owns translation of CLI arguments into a `SessionConfig` which
//! the controller, pipelines and overlay use without re-parsing flags.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use camera_session::{
    ControllerSettings, Facing, MAX_PREVIEW_SIZE, MAX_RETRY_ATTEMPTS, PERMIT_TIMEOUT,
    RETRY_BACKOFF, Rotation, STILL_JPEG_QUALITY, Size, SurfaceInfo,
};
use clap::{Args, ValueEnum};
use ml_core::{DEFAULT_CONFIDENCE_THRESHOLD, DisplayFilter, DisplayMode};

/// Lens direction accepted on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum FacingArg {
    Front,
    #[default]
    Back,
    External,
}

impl From<FacingArg> for Facing {
    fn from(arg: FacingArg) -> Self {
        match arg {
            FacingArg::Front => Facing::Front,
            FacingArg::Back => Facing::Back,
            FacingArg::External => Facing::External,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum DisplayModeArg {
    #[default]
    Multiple,
    Single,
}

impl From<DisplayModeArg> for DisplayMode {
    fn from(arg: DisplayModeArg) -> Self {
        match arg {
            DisplayModeArg::Multiple => DisplayMode::Multiple,
            DisplayModeArg::Single => DisplayMode::Single,
        }
    }
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by the controller and the pipelines.
pub struct SessionConfig {
    /// Display surface the preview and overlay are sized for.
    pub surface: SurfaceInfo,
    /// Lifecycle tunables handed to the controller.
    pub controller: ControllerSettings,
    /// Which detections the overlay shows.
    pub display: DisplayFilter,
    /// Device rotation applied to captured frames.
    pub rotation: Rotation,
    /// Mirror overlay X coordinates (front camera preview).
    pub mirror: bool,
    /// Emit verbose logging (frame drops, detection details).
    pub verbose: bool,
    /// Telemetry and instrumentation options.
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing session spans.
    pub chrome_trace_path: Option<PathBuf>,
}

/// Session arguments shared by the commands that drive a camera.
#[derive(Debug, Default, Args)]
pub struct SessionCliArgs {
    /// Display surface width in pixels.
    #[arg(value_name = "WIDTH")]
    pub width: Option<u32>,
    /// Display surface height in pixels.
    #[arg(value_name = "HEIGHT")]
    pub height: Option<u32>,

    /// Display surface as WxH (overrides positional).
    #[arg(long = "surface", value_name = "WxH")]
    pub surface: Option<String>,
    /// Camera facing to prefer when several are present.
    #[arg(long = "facing", value_enum, default_value_t = FacingArg::Back)]
    pub facing: FacingArg,
    /// Largest preview size requested from the camera, as WxH.
    #[arg(long = "max-preview", value_name = "WxH")]
    pub max_preview: Option<String>,
    /// Attempts before a failing open gives up.
    #[arg(long = "max-retries", value_name = "N")]
    pub max_retries: Option<u32>,
    /// Delay between open attempts in milliseconds.
    #[arg(long = "retry-backoff-ms", value_name = "MS")]
    pub retry_backoff_ms: Option<u64>,
    /// Wait for the open/close lock in milliseconds.
    #[arg(long = "permit-timeout-ms", value_name = "MS")]
    pub permit_timeout_ms: Option<u64>,
    /// JPEG quality of still captures (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<u32>,
    /// Start with the flash off until the light sensor says otherwise.
    #[arg(long = "no-flash", action = clap::ArgAction::SetTrue)]
    pub no_flash: bool,
    /// Device rotation in degrees (0, 90, 180, 270).
    #[arg(long = "rotation", value_name = "DEG", default_value_t = 0)]
    pub rotation: i32,
    /// Force overlay mirroring on or off; defaults to mirroring front cameras.
    #[arg(long = "mirror", value_name = "BOOL")]
    pub mirror: Option<bool>,
    /// Show every confident object or only the best one.
    #[arg(long = "display-mode", value_enum, default_value_t = DisplayModeArg::Multiple)]
    pub display_mode: DisplayModeArg,
    /// Minimum confidence for displayed objects (0.0-1.0).
    #[arg(long = "threshold", value_name = "P")]
    pub threshold: Option<f32>,
    /// Enable verbose logging (frame drops, detections).
    #[arg(long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_size(raw: &str) -> Result<Size> {
    let (w, h) = raw
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("size `{raw}` must look like WIDTHxHEIGHT"))?;
    let width = w
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid width in `{raw}`"))?;
    let height = h
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid height in `{raw}`"))?;
    Ok(Size::new(width, height))
}

/// Parse a comma separated list of `WIDTHxHEIGHT` sizes.
pub fn parse_size_list(raw: &str) -> Result<Vec<Size>> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(parse_size)
        .collect()
}

impl TryFrom<SessionCliArgs> for SessionConfig {
    type Error = anyhow::Error;

    fn try_from(args: SessionCliArgs) -> Result<Self> {
        let surface = match (args.surface.as_deref(), args.width, args.height) {
            (Some(raw), _, _) => parse_size(raw)?,
            (None, Some(w), Some(h)) => Size::new(w, h),
            (None, Some(_), None) | (None, None, Some(_)) => {
                bail!("Provide both <width> and <height>, or --surface WxH.")
            }
            (None, None, None) => Size::new(1280, 720),
        };
        if surface.width == 0 || surface.height == 0 {
            bail!("Surface width and height must be positive integers");
        }

        let max_preview = match args.max_preview.as_deref() {
            Some(raw) => parse_size(raw)?,
            None => MAX_PREVIEW_SIZE,
        };
        if max_preview.width == 0 || max_preview.height == 0 {
            bail!("--max-preview must be a positive size");
        }

        let max_retry_attempts = args.max_retries.unwrap_or(MAX_RETRY_ATTEMPTS);
        if max_retry_attempts == 0 {
            bail!("--max-retries must be at least 1");
        }

        let jpeg_quality = args.jpeg_quality.unwrap_or(u32::from(STILL_JPEG_QUALITY));
        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        if args.rotation.rem_euclid(90) != 0 {
            bail!("--rotation must be a multiple of 90 degrees");
        }
        let rotation = Rotation::from_degrees(args.rotation);

        let threshold = args.threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);
        if !(0.0..=1.0).contains(&threshold) {
            bail!("--threshold must be between 0.0 and 1.0");
        }

        let preferred_facing = Facing::from(args.facing);
        let controller = ControllerSettings {
            max_retry_attempts,
            retry_backoff: args
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(RETRY_BACKOFF),
            permit_timeout: args
                .permit_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(PERMIT_TIMEOUT),
            preferred_facing,
            max_preview,
            jpeg_quality: jpeg_quality as u8,
            initial_flash: !args.no_flash,
        };

        Ok(Self {
            surface: SurfaceInfo::new(surface.width, surface.height),
            controller,
            display: DisplayFilter::new(args.display_mode.into(), threshold),
            rotation,
            mirror: args
                .mirror
                .unwrap_or(preferred_facing == Facing::Front),
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_session_constants() {
        let config = SessionConfig::try_from(SessionCliArgs::default()).unwrap();
        assert_eq!(config.surface.size, Size::new(1280, 720));
        assert_eq!(config.controller.max_retry_attempts, 3);
        assert_eq!(config.controller.retry_backoff, Duration::from_secs(1));
        assert_eq!(config.controller.jpeg_quality, 95);
        assert!(config.controller.initial_flash);
        assert!(!config.mirror);
        assert_eq!(config.display.mode, DisplayMode::Multiple);
    }

    #[test]
    fn surface_flag_overrides_positional() {
        let args = SessionCliArgs {
            width: Some(10),
            height: Some(10),
            surface: Some("1080x1920".into()),
            facing: FacingArg::Front,
            ..SessionCliArgs::default()
        };
        let config = SessionConfig::try_from(args).unwrap();
        assert_eq!(config.surface.size, Size::new(1080, 1920));
        assert!(config.mirror, "front camera mirrors by default");
    }

    #[test]
    fn rejects_bad_values() {
        let half = SessionCliArgs {
            width: Some(640),
            ..SessionCliArgs::default()
        };
        assert!(SessionConfig::try_from(half).is_err());

        let quality = SessionCliArgs {
            jpeg_quality: Some(0),
            ..SessionCliArgs::default()
        };
        assert!(SessionConfig::try_from(quality).is_err());

        let rotation = SessionCliArgs {
            rotation: 45,
            ..SessionCliArgs::default()
        };
        assert!(SessionConfig::try_from(rotation).is_err());

        let retries = SessionCliArgs {
            max_retries: Some(0),
            ..SessionCliArgs::default()
        };
        assert!(SessionConfig::try_from(retries).is_err());
    }

    #[test]
    fn parses_size_lists() {
        let sizes = parse_size_list("1920x1080, 640X480").unwrap();
        assert_eq!(sizes, vec![Size::new(1920, 1080), Size::new(640, 480)]);
        assert!(parse_size("1920").is_err());
        assert!(parse_size("axb").is_err());
    }
}
