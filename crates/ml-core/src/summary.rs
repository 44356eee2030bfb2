//! Human-readable lines for result lists and overlay captions.

use crate::detector::{Detection, DetectionKind, FaceAttributes};

/// Shown when a text capture recognised nothing.
pub const NO_TEXT_DETECTED: &str = "No text detected";
const UNKNOWN_LABEL: &str = "Unknown";

fn percent(value: Option<f32>) -> String {
    match value {
        Some(p) => format!("{:.1}%", p * 100.0),
        None => "--".to_owned(),
    }
}

/// Caption drawn next to an object box, e.g. `cup 87.5%`.
pub fn object_caption(detection: &Detection) -> String {
    match detection.best_label() {
        Some(label) if !label.text.is_empty() => {
            format!("{} {:.1}%", label.text, label.confidence * 100.0)
        }
        Some(label) => format!("{UNKNOWN_LABEL} {:.1}%", label.confidence * 100.0),
        None => format!("{UNKNOWN_LABEL} 0.0%"),
    }
}

/// `ID: <n>` line drawn when tracking is enabled.
pub fn tracking_caption(detection: &Detection) -> Option<String> {
    detection.bbox.tracking_id.map(|id| format!("ID: {id}"))
}

fn face_lines(position: usize, tracking_id: Option<i64>, face: &FaceAttributes) -> Vec<String> {
    let id = tracking_id.unwrap_or(position as i64 + 1);
    vec![
        format!("Face #{id}"),
        format!("Smile probability: {}", percent(face.smiling)),
        format!("Right eye open: {}", percent(face.right_eye_open)),
        format!("Left eye open: {}", percent(face.left_eye_open)),
    ]
}

/// Summary lines for one detection at `position` in the result list.
pub fn summary_lines(position: usize, detection: &Detection) -> Vec<String> {
    match &detection.kind {
        DetectionKind::Face(face) => face_lines(position, detection.bbox.tracking_id, face),
        DetectionKind::Object { .. } => vec![object_caption(detection)],
        DetectionKind::Text { text } => vec![text.clone()],
        DetectionKind::Barcode { payload, format } => vec![format!(
            "{format}: {}",
            payload.as_deref().unwrap_or("--")
        )],
    }
}

/// Joined recognised text of a still capture, or [`NO_TEXT_DETECTED`].
///
/// The second value tells whether there is anything to copy or share.
pub fn recognized_text(detections: &[Detection]) -> (String, bool) {
    let text = detections
        .iter()
        .filter_map(|det| match &det.kind {
            DetectionKind::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        (NO_TEXT_DETECTED.to_owned(), false)
    } else {
        (text, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectionBox, ObjectLabel, PixelRect};

    fn with_kind(kind: DetectionKind, tracking_id: Option<i64>) -> Detection {
        Detection {
            bbox: DetectionBox {
                rect: PixelRect::default(),
                confidence: 1.0,
                tracking_id,
            },
            landmarks: Vec::new(),
            kind,
        }
    }

    #[test]
    fn face_lines_fall_back_to_position() {
        let face = FaceAttributes {
            smiling: Some(0.875),
            left_eye_open: None,
            right_eye_open: Some(0.5),
        };
        let lines = summary_lines(1, &with_kind(DetectionKind::Face(face.clone()), None));
        assert_eq!(
            lines,
            vec![
                "Face #2",
                "Smile probability: 87.5%",
                "Right eye open: 50.0%",
                "Left eye open: --",
            ]
        );
        let tracked = summary_lines(0, &with_kind(DetectionKind::Face(face), Some(17)));
        assert_eq!(tracked[0], "Face #17");
    }

    #[test]
    fn object_caption_uses_unknown_for_blank_labels() {
        let blank = with_kind(
            DetectionKind::Object {
                labels: vec![ObjectLabel {
                    text: String::new(),
                    confidence: 0.42,
                }],
            },
            Some(3),
        );
        assert_eq!(object_caption(&blank), "Unknown 42.0%");
        assert_eq!(tracking_caption(&blank).as_deref(), Some("ID: 3"));

        let unlabeled = with_kind(DetectionKind::Object { labels: vec![] }, None);
        assert_eq!(object_caption(&unlabeled), "Unknown 0.0%");
        assert!(tracking_caption(&unlabeled).is_none());
    }

    #[test]
    fn recognized_text_joins_blocks() {
        let blocks = [
            with_kind(DetectionKind::Text { text: "hello".into() }, None),
            with_kind(DetectionKind::Text { text: "  ".into() }, None),
            with_kind(DetectionKind::Text { text: "world".into() }, None),
        ];
        assert_eq!(recognized_text(&blocks), ("hello\nworld".to_owned(), true));
        assert_eq!(recognized_text(&[]), (NO_TEXT_DETECTED.to_owned(), false));
    }
}
