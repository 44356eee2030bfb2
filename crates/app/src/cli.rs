use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vision::{SessionCliArgs, config::DisplayModeArg};

#[derive(Debug, Parser)]
#[command(
    name = "mlvision",
    version,
    about = "Camera session, flash policy and detection overlay tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pick a preview size from the sizes a camera offers.
    SelectSize(SelectSizeArgs),
    /// Project recorded detections into a view and print them as JSON.
    Project(ProjectArgs),
    /// Run a simulated camera session: open, capture, analyse, close.
    Simulate(SimulateArgs),
}

#[derive(Debug, Args)]
pub struct SelectSizeArgs {
    /// Candidate sizes, e.g. 1920x1080,1280x720,640x480.
    #[arg(long = "candidates", value_name = "WxH,...")]
    pub candidates: String,
    /// Display surface size.
    #[arg(long = "display", value_name = "WxH")]
    pub display: String,
    /// Largest acceptable size.
    #[arg(long = "bound", value_name = "WxH")]
    pub bound: Option<String>,
}

#[derive(Debug, Args)]
pub struct ProjectArgs {
    /// Recorded detections JSON.
    #[arg(long = "recording", value_name = "PATH")]
    pub recording: PathBuf,
    /// Destination view size.
    #[arg(long = "view", value_name = "WxH")]
    pub view: String,
    /// Mirror X coordinates (front camera).
    #[arg(long = "mirror", action = clap::ArgAction::SetTrue)]
    pub mirror: bool,
    /// Device rotation in degrees.
    #[arg(long = "rotation", value_name = "DEG", default_value_t = 0)]
    pub rotation: i32,
    /// Show every confident detection or only the best one.
    #[arg(long = "display-mode", value_enum, default_value_t = DisplayModeArg::Multiple)]
    pub display_mode: DisplayModeArg,
    /// Minimum confidence for displayed detections (0.0-1.0).
    #[arg(long = "threshold", value_name = "P")]
    pub threshold: Option<f32>,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub session: SessionCliArgs,
    /// Recorded detections replayed by the detector; a built-in scene otherwise.
    #[arg(long = "recording", value_name = "PATH")]
    pub recording: Option<PathBuf>,
    /// Still captures to take once the preview is running.
    #[arg(long = "captures", value_name = "N", default_value_t = 1)]
    pub captures: u32,
    /// Preview frames pushed through the streaming analysis path.
    #[arg(long = "analysis-frames", value_name = "N", default_value_t = 0)]
    pub analysis_frames: u32,
    /// Busy failures injected before the camera opens.
    #[arg(long = "fail-opens", value_name = "N", default_value_t = 0)]
    pub fail_opens: u32,
    /// Ambient light samples fed to the flash policy, one per second.
    #[arg(long = "lux", value_name = "LUX,...", value_delimiter = ',')]
    pub lux: Vec<f32>,
    /// Print screen updates as JSON lines.
    #[arg(long = "json", action = clap::ArgAction::SetTrue)]
    pub json: bool,
    /// Print Prometheus metrics when the run ends.
    #[arg(long = "metrics", action = clap::ArgAction::SetTrue)]
    pub metrics: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn simulate_accepts_session_flags() {
        let cli = Cli::try_parse_from([
            "mlvision",
            "simulate",
            "1080",
            "1920",
            "--facing",
            "front",
            "--lux",
            "10,200",
            "--captures",
            "2",
        ])
        .unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.session.width, Some(1080));
        assert_eq!(args.lux, vec![10.0, 200.0]);
        assert_eq!(args.captures, 2);
    }
}
