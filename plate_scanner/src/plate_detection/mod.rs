pub mod bounding_box_render;
pub mod cascade;
pub mod contour_detector;
pub mod frame_processor;
pub mod local_ocr;
pub mod object_detector;
pub mod remote_ocr;
pub mod rtp_sink;
pub mod sinks;
pub mod suppressor;
pub mod video_reader;

use opencv::core::Rect;
use opencv::prelude::Mat;

/// Axis-aligned box in pixel coordinates, `(x1, y1)` inclusive top-left and
/// `(x2, y2)` exclusive bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_rect(rect: Rect) -> Self {
        Self::new(rect.x, rect.y, rect.x + rect.width, rect.y + rect.height)
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(self.x1, self.y1, self.width(), self.height())
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height() <= 0 {
            return 0.0;
        }
        self.width() as f64 / self.height() as f64
    }

    /// The part of the box lying inside a `cols` x `rows` image, or `None`
    /// when nothing of it does.
    pub fn clamp_to(&self, cols: i32, rows: i32) -> Option<BoundingBox> {
        let clamped = BoundingBox::new(
            self.x1.clamp(0, cols),
            self.y1.clamp(0, rows),
            self.x2.clamp(0, cols),
            self.y2.clamp(0, rows),
        );
        if clamped.width() <= 0 || clamped.height() <= 0 {
            return None;
        }
        Some(clamped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateRegion {
    pub bounding_box: BoundingBox,
    pub geometry_confidence: f32,
}

impl CandidateRegion {
    pub fn new(bounding_box: BoundingBox, geometry_confidence: f32) -> Self {
        Self {
            bounding_box,
            geometry_confidence,
        }
    }
}

/// Finds plate-shaped regions in a frame.
///
/// Implementations never fail: an internal error yields an empty list.
pub trait RegionDetector {
    fn detect(&mut self, frame: &Mat) -> Vec<CandidateRegion>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_round_trip_keeps_corners() {
        let bbox = BoundingBox::from_rect(Rect::new(10, 20, 120, 30));
        assert_eq!(bbox, BoundingBox::new(10, 20, 130, 50));
        assert_eq!(bbox.to_rect(), Rect::new(10, 20, 120, 30));
        assert_eq!(bbox.aspect_ratio(), 4.0);
    }

    #[test]
    fn clamp_trims_to_image_and_drops_empty_boxes() {
        let bbox = BoundingBox::new(-5, 10, 700, 40);
        assert_eq!(bbox.clamp_to(640, 480), Some(BoundingBox::new(0, 10, 640, 40)));

        let outside = BoundingBox::new(650, 10, 700, 40);
        assert_eq!(outside.clamp_to(640, 480), None);

        let flat = BoundingBox::new(10, 10, 50, 10);
        assert_eq!(flat.clamp_to(640, 480), None);
        assert_eq!(flat.aspect_ratio(), 0.0);
    }
}
