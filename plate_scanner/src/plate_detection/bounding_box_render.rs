use opencv::core::Point;
use opencv::core::Scalar;
use opencv::imgproc::put_text;
use opencv::imgproc::FONT_HERSHEY_SIMPLEX;
use opencv::imgproc::LINE_8;
use opencv::imgproc::{rectangle, LineTypes};
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use super::{BoundingBox, CandidateRegion};
use crate::error::Result;

/// Burns plate boxes and readings into frames.
pub struct BoundingBoxRender {
    color: Scalar,
    thickness_px: i32,
    font_scale: f64,
}

impl BoundingBoxRender {
    pub fn new(color: Scalar, thickness_px: i32, font_scale: f64) -> Self {
        Self {
            color,
            thickness_px,
            font_scale,
        }
    }

    fn draw_box(&self, image: &mut Mat, bbox: &BoundingBox) -> Result<()> {
        rectangle(
            image,
            bbox.to_rect(),
            self.color,
            self.thickness_px,
            LineTypes::LINE_4 as i32,
            0,
        )?;
        Ok(())
    }

    fn draw_label(&self, image: &mut Mat, bbox: &BoundingBox, label: &str) -> Result<()> {
        // Above the box, or just inside it when the box touches the top edge.
        let baseline = if bbox.y1 > 12 { bbox.y1 - 10 } else { bbox.y1 + 20 };
        put_text(
            image,
            label,
            Point::new(bbox.x1, baseline),
            FONT_HERSHEY_SIMPLEX,
            self.font_scale,
            self.color,
            2,
            LINE_8,
            false,
        )?;
        Ok(())
    }

    /// Candidate box, with `"TEXT (0.85)"` above it when something was read.
    pub fn draw_region(
        &self,
        image: &mut Mat,
        region: &CandidateRegion,
        text: Option<&str>,
    ) -> Result<()> {
        self.draw_box(image, &region.bounding_box)?;
        if let Some(text) = text.filter(|text| !text.is_empty()) {
            let label = format!("{} ({:.2})", text, region.geometry_confidence);
            self.draw_label(image, &region.bounding_box, &label)?;
        }
        Ok(())
    }

    /// Copy of `frame` with just this plate's box and text burned in.
    pub fn evidence(&self, frame: &Mat, bbox: &BoundingBox, plate_text: &str) -> Result<Mat> {
        let mut image = frame.try_clone()?;
        self.draw_box(&mut image, bbox)?;
        self.draw_label(&mut image, bbox, plate_text)?;
        Ok(image)
    }
}

impl Default for BoundingBoxRender {
    fn default() -> Self {
        Self::new(Scalar::from((0.0, 255.0, 0.0)), 2, 0.7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Vec3b, CV_8UC3};

    fn frame() -> Mat {
        Mat::new_rows_cols_with_default(120, 200, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    fn pixel(image: &Mat, row: i32, col: i32) -> Vec3b {
        *image.at_2d::<Vec3b>(row, col).unwrap()
    }

    #[test]
    fn evidence_leaves_source_frame_untouched() {
        let source = frame();
        let bbox = BoundingBox::new(20, 40, 180, 90);

        let evidence = BoundingBoxRender::default()
            .evidence(&source, &bbox, "ABC1234")
            .unwrap();

        assert_eq!(pixel(&evidence, 40, 100), Vec3b::from([0, 255, 0]));
        assert_eq!(pixel(&source, 40, 100), Vec3b::from([0, 0, 0]));
    }

    #[test]
    fn region_without_text_only_gets_a_box() {
        let mut image = frame();
        let region = CandidateRegion::new(BoundingBox::new(20, 40, 180, 90), 0.85);

        BoundingBoxRender::default()
            .draw_region(&mut image, &region, None)
            .unwrap();

        assert_eq!(pixel(&image, 40, 100), Vec3b::from([0, 255, 0]));
        // No label pixels above the box.
        assert_eq!(pixel(&image, 28, 30), Vec3b::from([0, 0, 0]));
    }
}
