//! Detector service boundary plus the detection types, display filtering and
//! summaries shared by the capture and analysis pipelines.

pub mod detector;
pub mod selection;
pub mod summary;

pub use detector::{
    Detection, DetectionBox, DetectionKind, DetectionRecording, DetectorError, DetectorInput,
    DetectorService, FaceAttributes, Landmark, LandmarkKind, ObjectLabel, PixelRect, Point,
    ReplayDetector,
};
pub use selection::{DEFAULT_CONFIDENCE_THRESHOLD, DisplayFilter, DisplayMode};
