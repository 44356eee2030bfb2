//! Mapping of detector output from source-image pixels into view pixels.

use camera_session::{Rotation, Size};
use ml_core::{Detection, PixelRect, Point};

/// Source-to-view transform for one frame.
///
/// Detector coordinates are expressed in the upright source image, so a
/// quarter-turn rotation swaps the source dimensions before scaling. Only the
/// X axis is ever mirrored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Projector {
    source: Size,
    dest: Size,
    mirror: bool,
}

impl Projector {
    pub fn new(source: Size, dest: Size, mirror: bool, rotation: Rotation) -> Self {
        let source = if rotation.swaps_axes() {
            Size::new(source.height, source.width)
        } else {
            source
        };
        Self {
            source,
            dest,
            mirror,
        }
    }

    /// Upright source dimensions used for scaling.
    pub fn source(&self) -> Size {
        self.source
    }

    pub fn dest(&self) -> Size {
        self.dest
    }

    /// A zero-sized source cannot be projected.
    pub fn is_degenerate(&self) -> bool {
        self.source.width == 0 || self.source.height == 0
    }

    fn scale(&self) -> (f32, f32) {
        (
            self.dest.width as f32 / self.source.width as f32,
            self.dest.height as f32 / self.source.height as f32,
        )
    }

    fn map_x(&self, x: f32, scale_x: f32) -> f32 {
        if self.mirror {
            self.dest.width as f32 - x * scale_x
        } else {
            x * scale_x
        }
    }

    pub fn project_point(&self, point: Point) -> Option<Point> {
        if self.is_degenerate() {
            return None;
        }
        let (sx, sy) = self.scale();
        Some(Point {
            x: self.map_x(point.x, sx),
            y: point.y * sy,
        })
    }

    /// Project a rectangle edge by edge. Mirrored results have `left > right`.
    pub fn project_rect(&self, rect: &PixelRect) -> Option<PixelRect> {
        if self.is_degenerate() {
            return None;
        }
        Some(self.map_rect(rect, self.scale()))
    }

    fn map_rect(&self, rect: &PixelRect, (sx, sy): (f32, f32)) -> PixelRect {
        PixelRect {
            left: self.map_x(rect.left, sx),
            top: rect.top * sy,
            right: self.map_x(rect.right, sx),
            bottom: rect.bottom * sy,
        }
    }

    /// Move `detections` into view space, boxes and landmarks alike.
    ///
    /// Returns nothing at all for a degenerate source.
    pub fn project(&self, detections: Vec<Detection>) -> Vec<Detection> {
        if self.is_degenerate() {
            return Vec::new();
        }
        let (sx, sy) = self.scale();
        detections
            .into_iter()
            .map(|mut det| {
                det.bbox.rect = self.map_rect(&det.bbox.rect, (sx, sy));
                for landmark in &mut det.landmarks {
                    landmark.position = Point {
                        x: self.map_x(landmark.position.x, sx),
                        y: landmark.position.y * sy,
                    };
                }
                det
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ml_core::{DetectionBox, DetectionKind, Landmark, LandmarkKind};

    use super::*;

    fn face_at(rect: PixelRect, eye: Point) -> Detection {
        Detection {
            bbox: DetectionBox {
                rect,
                confidence: 0.9,
                tracking_id: Some(4),
            },
            landmarks: vec![Landmark {
                kind: LandmarkKind::LeftEye,
                position: eye,
            }],
            kind: DetectionKind::Face(Default::default()),
        }
    }

    #[test]
    fn mirrored_origin_lands_on_right_edge() {
        let projector = Projector::new(
            Size::new(640, 480),
            Size::new(640, 480),
            true,
            Rotation::Deg0,
        );
        let point = projector.project_point(Point { x: 0.0, y: 0.0 }).unwrap();
        assert_relative_eq!(point.x, 640.0);
        assert_relative_eq!(point.y, 0.0);
    }

    #[test]
    fn zero_source_yields_nothing() {
        for source in [Size::new(0, 480), Size::new(640, 0)] {
            let projector = Projector::new(source, Size::new(100, 100), false, Rotation::Deg0);
            let det = face_at(PixelRect::new(1.0, 1.0, 2.0, 2.0), Point::default());
            assert!(projector.project(vec![det]).is_empty());
            assert!(projector.project_point(Point::default()).is_none());
        }
    }

    #[test]
    fn scales_boxes_and_landmarks() {
        let projector = Projector::new(
            Size::new(480, 640),
            Size::new(960, 1280),
            false,
            Rotation::Deg0,
        );
        let projected = projector.project(vec![face_at(
            PixelRect::new(10.0, 20.0, 110.0, 220.0),
            Point { x: 50.0, y: 60.0 },
        )]);
        let det = &projected[0];
        assert_relative_eq!(det.bbox.rect.left, 20.0);
        assert_relative_eq!(det.bbox.rect.bottom, 440.0);
        assert_relative_eq!(det.landmarks[0].position.x, 100.0);
        assert_relative_eq!(det.landmarks[0].position.y, 120.0);
        assert_eq!(det.bbox.tracking_id, Some(4));
    }

    #[test]
    fn quarter_turn_swaps_source_axes() {
        let projector = Projector::new(
            Size::new(640, 480),
            Size::new(960, 1280),
            false,
            Rotation::Deg90,
        );
        assert_eq!(projector.source(), Size::new(480, 640));
        let rect = projector
            .project_rect(&PixelRect::new(0.0, 0.0, 480.0, 640.0))
            .unwrap();
        assert_relative_eq!(rect.right, 960.0);
        assert_relative_eq!(rect.bottom, 1280.0);
    }

    #[test]
    fn mirrored_rect_keeps_raw_edges() {
        let projector = Projector::new(
            Size::new(100, 100),
            Size::new(200, 200),
            true,
            Rotation::Deg0,
        );
        let rect = projector
            .project_rect(&PixelRect::new(10.0, 10.0, 30.0, 40.0))
            .unwrap();
        assert_relative_eq!(rect.left, 180.0);
        assert_relative_eq!(rect.right, 140.0);
        let upright = rect.normalized();
        assert_relative_eq!(upright.left, 140.0);
        assert_relative_eq!(upright.width(), 40.0);
    }
}
