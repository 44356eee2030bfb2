//! Capture and analysis pipelines that sit between a camera session and the
//! screen: flash policy, frame enhancement, detection and overlay projection.
//!
//! The crate is split into focused modules:
//! - `config`: CLI configuration parsing.
//! - `pipeline`: Still-capture detection worker and the shared frame processor.
//! - `analysis`: Streaming analysis with backpressure by discard.
//! - `flash`: Light-adaptive flash directive and its monitor thread.
//! - `enhance`: Frame decode and brightness/contrast boost.
//! - `projection`: Source-to-view coordinate mapping.
//! - `telemetry`: Tracing subscribers, metrics recorder and thread helpers.

pub mod analysis;
pub mod config;
pub mod enhance;
pub mod flash;
pub mod pipeline;
pub mod projection;
pub mod telemetry;

/// Re-export session settings so callers can configure runs without reaching
/// into submodules.
pub use config::{SessionCliArgs, SessionConfig, TelemetryOptions};
pub use flash::{LightAdaptiveFlashPolicy, LightSample};
pub use pipeline::{CapturePipeline, DetectionReport, FrameProcessor, ScreenUpdate};
pub use projection::Projector;
