use log::{debug, warn};
use opencv::core::Point;
use opencv::core::Vector;
use opencv::imgproc::approx_poly_dp;
use opencv::imgproc::arc_length;
use opencv::imgproc::bilateral_filter;
use opencv::imgproc::bounding_rect;
use opencv::imgproc::canny;
use opencv::imgproc::contour_area;
use opencv::imgproc::cvt_color;
use opencv::imgproc::find_contours;
use opencv::imgproc::CHAIN_APPROX_SIMPLE;
use opencv::imgproc::COLOR_BGR2GRAY;
use opencv::imgproc::RETR_TREE;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use super::{BoundingBox, CandidateRegion, RegionDetector};
use crate::config::GeometryConfig;

/// Rectangular contour search over a Canny edge map.
///
/// Stateless: the same frame always yields the same candidates. Every region
/// that survives the geometry filter gets the same fixed confidence.
pub struct ContourPlateDetector {
    config: GeometryConfig,
}

impl ContourPlateDetector {
    pub fn new(config: GeometryConfig) -> Self {
        Self { config }
    }

    pub fn accepts(&self, bbox: &BoundingBox) -> bool {
        let aspect = bbox.aspect_ratio();
        aspect >= self.config.min_aspect
            && aspect <= self.config.max_aspect
            && bbox.width() > self.config.min_width
            && bbox.height() > self.config.min_height
    }

    pub fn find_candidates(&self, frame: &Mat) -> opencv::Result<Vec<CandidateRegion>> {
        if frame.empty() {
            return Ok(vec![]);
        }

        let mut grey = Mat::default();
        if frame.channels() == 1 {
            grey = frame.try_clone()?;
        } else {
            cvt_color(frame, &mut grey, COLOR_BGR2GRAY, 0)?;
        }

        let mut smoothed = Mat::default();
        bilateral_filter(
            &grey,
            &mut smoothed,
            self.config.bilateral_diameter,
            self.config.bilateral_sigma_color,
            self.config.bilateral_sigma_space,
            opencv::core::BORDER_DEFAULT,
        )?;

        let mut edges = Mat::default();
        canny(
            &smoothed,
            &mut edges,
            self.config.canny_low,
            self.config.canny_high,
            3,
            false,
        )?;

        let mut contours = Vector::<Vector<Point>>::new();
        find_contours(
            &edges,
            &mut contours,
            RETR_TREE,
            CHAIN_APPROX_SIMPLE,
            Point::default(),
        )?;

        let mut by_area = Vec::with_capacity(contours.len());
        for contour in contours {
            let area = contour_area(&contour, false)?;
            by_area.push((area, contour));
        }
        by_area.sort_by(|a, b| b.0.total_cmp(&a.0));
        by_area.truncate(self.config.max_contours);

        let mut candidates = vec![];
        for (_, contour) in by_area {
            let perimeter = arc_length(&contour, true)?;
            let mut approx = Vector::<Point>::new();
            approx_poly_dp(
                &contour,
                &mut approx,
                self.config.approx_epsilon * perimeter,
                true,
            )?;
            if approx.len() != 4 {
                continue;
            }

            let bbox = BoundingBox::from_rect(bounding_rect(&approx)?);
            if self.accepts(&bbox) {
                debug!(
                    "Plate candidate {:?} aspect {:.2}",
                    bbox,
                    bbox.aspect_ratio()
                );
                candidates.push(CandidateRegion::new(
                    bbox,
                    self.config.geometry_confidence,
                ));
            }
        }

        Ok(candidates)
    }
}

impl Default for ContourPlateDetector {
    fn default() -> Self {
        Self::new(GeometryConfig::default())
    }
}

impl RegionDetector for ContourPlateDetector {
    fn detect(&mut self, frame: &Mat) -> Vec<CandidateRegion> {
        match self.find_candidates(frame) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Contour detection failed, skipping frame: {}", e);
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Rect, Scalar, CV_8UC3};
    use opencv::imgproc::{rectangle, LINE_8};

    fn blank_frame() -> Mat {
        Mat::new_rows_cols_with_default(480, 640, CV_8UC3, Scalar::all(30.0)).unwrap()
    }

    fn draw_filled(frame: &mut Mat, rect: Rect) {
        rectangle(frame, rect, Scalar::all(235.0), -1, LINE_8, 0).unwrap();
    }

    #[test]
    fn geometry_filter_bounds() {
        let detector = ContourPlateDetector::default();

        assert!(detector.accepts(&BoundingBox::new(0, 0, 200, 50)));
        assert!(detector.accepts(&BoundingBox::new(0, 0, 120, 60)));
        assert!(detector.accepts(&BoundingBox::new(0, 0, 180, 30)));
        // Too square.
        assert!(!detector.accepts(&BoundingBox::new(0, 0, 100, 80)));
        // Too elongated.
        assert!(!detector.accepts(&BoundingBox::new(0, 0, 400, 50)));
        // Width and height are strict lower bounds.
        assert!(!detector.accepts(&BoundingBox::new(0, 0, 80, 30)));
        assert!(!detector.accepts(&BoundingBox::new(0, 0, 100, 20)));
    }

    #[test]
    fn thresholds_come_from_config() {
        let detector = ContourPlateDetector::new(GeometryConfig {
            min_width: 20,
            min_height: 5,
            ..Default::default()
        });
        assert!(detector.accepts(&BoundingBox::new(0, 0, 40, 10)));
    }

    #[test]
    fn uniform_frame_has_no_candidates() {
        let mut detector = ContourPlateDetector::default();
        assert!(detector.detect(&blank_frame()).is_empty());
    }

    #[test]
    fn empty_frame_has_no_candidates() {
        let mut detector = ContourPlateDetector::default();
        assert!(detector.detect(&Mat::default()).is_empty());
    }

    #[test]
    fn finds_plate_shaped_rectangle() {
        let mut frame = blank_frame();
        draw_filled(&mut frame, Rect::new(200, 200, 200, 50));

        let mut detector = ContourPlateDetector::default();
        let candidates = detector.detect(&frame);

        assert!(!candidates.is_empty());
        for candidate in &candidates {
            let bbox = candidate.bounding_box;
            assert!(bbox.aspect_ratio() >= 2.0 && bbox.aspect_ratio() <= 6.0);
            assert!(bbox.width() > 80 && bbox.height() > 20);
            assert!((bbox.x1 - 200).abs() <= 2 && (bbox.y1 - 200).abs() <= 2);
            assert_eq!(candidate.geometry_confidence, 0.85);
        }
    }

    #[test]
    fn ignores_square_and_small_shapes() {
        let mut frame = blank_frame();
        draw_filled(&mut frame, Rect::new(50, 50, 150, 150));
        draw_filled(&mut frame, Rect::new(400, 400, 60, 15));

        let mut detector = ContourPlateDetector::default();
        assert!(detector.detect(&frame).is_empty());
    }
}
