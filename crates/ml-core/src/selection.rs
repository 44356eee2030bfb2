//! Which detections an overlay shows.

use serde::{Deserialize, Serialize};

use crate::detector::Detection;

/// Confidence a detection needs before it is displayed.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// Every detection at or above the threshold.
    #[default]
    Multiple,
    /// Only the most confident detection at or above the threshold.
    Single,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayFilter {
    pub mode: DisplayMode,
    pub threshold: f32,
}

impl Default for DisplayFilter {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Multiple,
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl DisplayFilter {
    pub fn new(mode: DisplayMode, threshold: f32) -> Self {
        Self { mode, threshold }
    }

    /// Keep the detections this filter displays, preserving detector order.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let passing = detections
            .into_iter()
            .filter(|det| det.display_confidence() >= self.threshold);

        match self.mode {
            DisplayMode::Multiple => passing.collect(),
            DisplayMode::Single => passing
                .max_by(|a, b| a.display_confidence().total_cmp(&b.display_confidence()))
                .into_iter()
                .collect(),
        }
    }
}
