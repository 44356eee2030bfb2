use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Axis-aligned rectangle in pixel coordinates.
///
/// Edges are stored as given; a mirrored projection may produce `left > right`.
/// Use [`PixelRect::normalized`] before measuring or drawing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl PixelRect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    /// Same rectangle with `left <= right` and `top <= bottom`.
    pub fn normalized(&self) -> Self {
        Self {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).abs()
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).abs()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Detector rectangle with its confidence and optional tracker identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub rect: PixelRect,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_id: Option<i64>,
}

fn full_confidence() -> f32 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkKind {
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftCheek,
    RightCheek,
    NoseBase,
    MouthLeft,
    MouthRight,
    MouthBottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub kind: LandmarkKind,
    pub position: Point,
}

/// Classification probabilities reported for a face, each in `0.0..=1.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceAttributes {
    #[serde(default)]
    pub smiling: Option<f32>,
    #[serde(default)]
    pub left_eye_open: Option<f32>,
    #[serde(default)]
    pub right_eye_open: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectLabel {
    pub text: String,
    pub confidence: f32,
}

/// What the detector recognised inside the box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DetectionKind {
    Face(FaceAttributes),
    Object {
        #[serde(default)]
        labels: Vec<ObjectLabel>,
    },
    Text {
        text: String,
    },
    Barcode {
        #[serde(default)]
        payload: Option<String>,
        format: String,
    },
}

/// Single detector result in source-image pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: DetectionBox,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub landmarks: Vec<Landmark>,
    pub kind: DetectionKind,
}

impl Detection {
    /// Highest-confidence object label, ignoring labels at zero confidence.
    pub fn best_label(&self) -> Option<&ObjectLabel> {
        let DetectionKind::Object { labels } = &self.kind else {
            return None;
        };
        labels
            .iter()
            .filter(|label| label.confidence > 0.0)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    /// Confidence used for display filtering: the best label for objects,
    /// the box confidence otherwise.
    pub fn display_confidence(&self) -> f32 {
        match &self.kind {
            DetectionKind::Object { .. } => {
                self.best_label().map(|label| label.confidence).unwrap_or(0.0)
            }
            _ => self.bbox.confidence,
        }
    }
}

/// Upright frame handed to a detector together with the rotation the camera
/// reported for it.
#[derive(Debug, Clone)]
pub struct DetectorInput {
    pub image: RgbaImage,
    pub rotation_degrees: u16,
}

impl DetectorInput {
    pub fn new(image: RgbaImage, rotation_degrees: u16) -> Self {
        Self {
            image,
            rotation_degrees,
        }
    }

    /// Source dimensions as seen by the detector, after rotation.
    pub fn upright_size(&self) -> (u32, u32) {
        let (w, h) = self.image.dimensions();
        if self.rotation_degrees % 180 == 90 {
            (h, w)
        } else {
            (w, h)
        }
    }
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector input is empty")]
    EmptyInput,
    #[error("detector backend failed: {0}")]
    Backend(String),
    #[error("invalid detection recording: {0}")]
    Recording(#[from] serde_json::Error),
}

/// Opaque detection backend: image in, detections out.
///
/// Implementations are driven from a single worker thread and may keep state
/// between calls (trackers, caches).
pub trait DetectorService: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, input: &DetectorInput) -> Result<Vec<Detection>, DetectorError>;
}

/// Recorded detector output, one entry per analysed frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionRecording {
    pub source_width: u32,
    pub source_height: u32,
    pub frames: Vec<Vec<Detection>>,
}

impl DetectionRecording {
    pub fn from_json(json: &str) -> Result<Self, DetectorError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Detector that plays back a [`DetectionRecording`] frame by frame, wrapping
/// around at the end.
#[derive(Debug, Clone)]
pub struct ReplayDetector {
    frames: Vec<Vec<Detection>>,
    cursor: usize,
    confidence_threshold: f32,
}

impl ReplayDetector {
    pub fn new(recording: DetectionRecording) -> Self {
        Self {
            frames: recording.frames,
            cursor: 0,
            confidence_threshold: 0.0,
        }
    }

    /// Drop detections whose box confidence is below `confidence`.
    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }
}

impl DetectorService for ReplayDetector {
    fn name(&self) -> &str {
        "replay"
    }

    fn detect(&mut self, input: &DetectorInput) -> Result<Vec<Detection>, DetectorError> {
        if input.image.width() == 0 || input.image.height() == 0 {
            return Err(DetectorError::EmptyInput);
        }
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        let frame = &self.frames[self.cursor % self.frames.len()];
        self.cursor = self.cursor.wrapping_add(1);
        Ok(frame
            .iter()
            .filter(|det| det.bbox.confidence >= self.confidence_threshold)
            .cloned()
            .collect())
    }
}
