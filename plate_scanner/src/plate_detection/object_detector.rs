use std::path::Path;

use log::warn;
use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::core::Size;
use opencv::core::Vector;
use opencv::core::CV_32F;
use opencv::dnn;
use opencv::dnn::blob_from_image;
use opencv::dnn::nms_boxes;
use opencv::dnn::Net;
use opencv::dnn::DNN_BACKEND_CUDA;
use opencv::dnn::DNN_BACKEND_OPENCV;
use opencv::dnn::DNN_TARGET_CPU;
use opencv::dnn::DNN_TARGET_CUDA;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::NetTrait;
use opencv::prelude::NetTraitConst;

use super::{BoundingBox, CandidateRegion, RegionDetector};
use crate::error::Result;

// Number of anchor rows a 640x640 YOLOv5 export produces.
const YOLOV5_ROWS: i32 = 25200;

/// A raw detection in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredBox {
    pub rect: Rect,
    pub confidence: f32,
}

/// Decodes one YOLOv5 output row, `[cx, cy, w, h, objectness, class...]`,
/// scaled by the input-to-image factors.
pub fn decode_row(row: &[f32], x_factor: f32, y_factor: f32) -> Option<ScoredBox> {
    if row.len() < 6 {
        return None;
    }
    let confidence = row[4];
    if confidence <= 0.4 || row[5] <= 0.25 {
        return None;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    let left = (cx - 0.5 * w) * x_factor;
    let top = (cy - 0.5 * h) * y_factor;
    Some(ScoredBox {
        rect: Rect::new(
            left as i32,
            top as i32,
            (w * x_factor) as i32,
            (h * y_factor) as i32,
        ),
        confidence,
    })
}

/// Plate detector backed by a single-class YOLOv5 ONNX model.
pub struct ObjectDetector {
    classifier: Net,
    input_size: i32,
}

impl ObjectDetector {
    pub fn plate_detector(model: &Path, use_gpu: bool) -> Result<Self> {
        let mut classifier = dnn::read_net_from_onnx(&model.to_string_lossy())?;

        if use_gpu {
            classifier.set_preferable_backend(DNN_BACKEND_CUDA)?;
            classifier.set_preferable_target(DNN_TARGET_CUDA)?;
        } else {
            classifier.set_preferable_backend(DNN_BACKEND_OPENCV)?;
            classifier.set_preferable_target(DNN_TARGET_CPU)?;
        }

        Ok(ObjectDetector {
            classifier,
            input_size: 640,
        })
    }

    fn post_process(
        &self,
        img_rows: i32,
        img_cols: i32,
        outputs: &Vector<Mat>,
    ) -> Result<Vec<CandidateRegion>> {
        let mut confidences = Vector::<f32>::default();
        let mut boxes = Vector::<Rect>::default();

        let x_factor = img_cols as f32 / self.input_size as f32;
        let y_factor = img_rows as f32 / self.input_size as f32;

        for data in outputs {
            for j in 0..YOLOV5_ROWS {
                let row = [
                    *data.at_3d::<f32>(0, j, 0)?,
                    *data.at_3d::<f32>(0, j, 1)?,
                    *data.at_3d::<f32>(0, j, 2)?,
                    *data.at_3d::<f32>(0, j, 3)?,
                    *data.at_3d::<f32>(0, j, 4)?,
                    *data.at_3d::<f32>(0, j, 5)?,
                ];
                if let Some(scored) = decode_row(&row, x_factor, y_factor) {
                    confidences.push(scored.confidence);
                    boxes.push(scored.rect);
                }
            }
        }

        let mut indices = Vector::<i32>::default();
        nms_boxes(&boxes, &confidences, 0.5, 0.4, &mut indices, 1.0, 0)?;

        let mut output = vec![];
        for i in indices {
            let rect = boxes.get(i as usize)?;
            let confidence = confidences.get(i as usize)?;
            output.push(CandidateRegion::new(BoundingBox::from_rect(rect), confidence));
        }
        Ok(output)
    }

    fn infer(&mut self, image: &Mat) -> Result<Vec<CandidateRegion>> {
        let blob = blob_from_image(
            image,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;

        self.classifier
            .set_input(&blob, "", 1.0, Scalar::default())?;

        let output_names = self.classifier.get_unconnected_out_layers_names()?;
        let mut output_values = Vector::<Mat>::default();
        self.classifier
            .forward(&mut output_values, &output_names)?;

        self.post_process(image.rows(), image.cols(), &output_values)
    }
}

impl RegionDetector for ObjectDetector {
    fn detect(&mut self, frame: &Mat) -> Vec<CandidateRegion> {
        if frame.empty() {
            return vec![];
        }
        match self.infer(frame) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Plate model inference failed: {}", e);
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_below_objectness_threshold_is_dropped() {
        assert_eq!(decode_row(&[320.0, 320.0, 100.0, 30.0, 0.3, 0.9], 1.0, 1.0), None);
        assert_eq!(decode_row(&[320.0, 320.0, 100.0, 30.0, 0.9, 0.2], 1.0, 1.0), None);
        assert_eq!(decode_row(&[320.0, 320.0], 1.0, 1.0), None);
    }

    #[test]
    fn row_is_scaled_back_to_image_coordinates() {
        let scored = decode_row(&[320.0, 320.0, 100.0, 30.0, 0.8, 0.9], 2.0, 0.75).unwrap();
        assert_eq!(scored.rect, Rect::new(540, 228, 200, 22));
        assert_eq!(scored.confidence, 0.8);
    }
}
