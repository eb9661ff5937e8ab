//! Frame-to-event orchestration.
//!
//! One call to [`FrameProcessor::process`] takes a frame all the way from
//! throttling to emitted [`DetectionEvent`]s. No network or disk I/O happens
//! here beyond what the recognition backends do themselves; persisting and
//! dispatching events is left to the caller.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use opencv::core::Size;
use opencv::imgproc::resize;
use opencv::imgproc::INTER_LINEAR;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use super::bounding_box_render::BoundingBoxRender;
use super::cascade::TextRecognitionCascade;
use super::contour_detector::ContourPlateDetector;
use super::local_ocr::LocalRecognizer;
use super::object_detector::ObjectDetector;
use super::remote_ocr::{OcrSpaceClient, PlateRecognizerClient};
use super::suppressor::DuplicateSuppressor;
use super::{BoundingBox, CandidateRegion, RegionDetector};
use crate::config::{PipelineConfig, ScannerConfig};
use crate::error::Result;
use crate::metrics::{CANDIDATES, FRAMES_PROCESSED, FRAMES_SEEN, OUTCOMES};

/// Terminal state of a frame (first two) or of one candidate region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped,
    NoCandidates,
    TextRejected,
    Duplicate(String),
    Accepted(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Skipped => "skipped",
            Outcome::NoCandidates => "no_candidates",
            Outcome::TextRejected => "text_rejected",
            Outcome::Duplicate(_) => "duplicate",
            Outcome::Accepted(_) => "accepted",
        }
    }
}

/// A validated, non-duplicate plate reading.
pub struct DetectionEvent {
    plate_text: String,
    bounding_box: BoundingBox,
    confidence: f32,
    timestamp: DateTime<Utc>,
    evidence: Mat,
}

impl DetectionEvent {
    pub fn new(
        plate_text: &str,
        bounding_box: BoundingBox,
        confidence: f32,
        timestamp: DateTime<Utc>,
        evidence: Mat,
    ) -> Self {
        Self {
            plate_text: plate_text.to_string(),
            bounding_box,
            confidence,
            timestamp,
            evidence,
        }
    }

    pub fn plate_text(&self) -> &str {
        &self.plate_text
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    /// Geometry confidence of the region the text was read from.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The processed frame with this plate's box and text burned in.
    pub fn evidence(&self) -> &Mat {
        &self.evidence
    }
}

impl std::fmt::Debug for DetectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionEvent")
            .field("plate_text", &self.plate_text)
            .field("bounding_box", &self.bounding_box)
            .field("confidence", &self.confidence)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

pub struct ProcessedFrame {
    /// False when the frame was throttled or empty and nothing ran on it.
    pub was_processed: bool,
    /// The frame as processed (possibly downscaled) with candidate boxes drawn.
    pub annotated: Mat,
    pub events: Vec<DetectionEvent>,
    pub outcomes: Vec<Outcome>,
}

pub struct FrameProcessor {
    config: PipelineConfig,
    detector: Box<dyn RegionDetector>,
    cascade: TextRecognitionCascade,
    suppressor: DuplicateSuppressor,
    render: BoundingBoxRender,
}

impl FrameProcessor {
    pub fn new(
        config: PipelineConfig,
        detector: Box<dyn RegionDetector>,
        cascade: TextRecognitionCascade,
        suppressor: DuplicateSuppressor,
    ) -> Self {
        Self {
            config,
            detector,
            cascade,
            suppressor,
            render: BoundingBoxRender::default(),
        }
    }

    pub fn with_render(mut self, render: BoundingBoxRender) -> Self {
        self.render = render;
        self
    }

    /// Wires up the detector and backends `config` asks for.
    pub fn from_config(config: &ScannerConfig) -> Result<Self> {
        config.validate()?;

        let detector: Box<dyn RegionDetector> = match &config.detector_model {
            Some(model) => {
                info!("Using plate model {:?}", model);
                Box::new(ObjectDetector::plate_detector(model, false)?)
            }
            None => Box::new(ContourPlateDetector::new(config.geometry.clone())),
        };

        let mut cascade = TextRecognitionCascade::builder(&config.text);
        if let Some(token) = config.plate_recognizer.active_credential() {
            // The primary service answers alone; local and fallback are never built.
            info!("Plate recognizer service answers every region");
            cascade = cascade.primary(Box::new(PlateRecognizerClient::new(
                &config.plate_recognizer,
                token,
            )?));
        } else {
            if config.local_ocr.enabled {
                cascade = cascade.local(Box::new(LocalRecognizer::tesseract(
                    &config.local_ocr,
                    &config.text,
                )?));
            }
            if let Some(api_key) = config.ocr_space.active_credential() {
                cascade = cascade.fallback(Box::new(OcrSpaceClient::new(
                    &config.ocr_space,
                    api_key,
                )?));
            }
        }

        Ok(Self::new(
            config.pipeline.clone(),
            detector,
            cascade.build(),
            DuplicateSuppressor::new(),
        ))
    }

    pub fn should_process(&self, frame_index: u64) -> bool {
        frame_index % self.config.frame_skip.get() == 0
    }

    /// Runs the whole pipeline over one frame.
    ///
    /// Only OpenCV failures on the frame as a whole (clone, resize) are
    /// returned as errors; everything that goes wrong with a single region
    /// just drops that region.
    pub fn process(&mut self, frame: &Mat, frame_index: u64) -> Result<ProcessedFrame> {
        FRAMES_SEEN.inc();
        if !self.should_process(frame_index) || frame.empty() {
            return self.finish(false, frame.try_clone()?, vec![], vec![Outcome::Skipped]);
        }
        FRAMES_PROCESSED.inc();

        let working = self.downscale(frame)?;
        let candidates = self.detector.detect(&working);
        CANDIDATES.inc_by(candidates.len() as u64);
        debug!("Frame {}: {} candidates", frame_index, candidates.len());

        let mut annotated = working.try_clone()?;
        if candidates.is_empty() {
            return self.finish(true, annotated, vec![], vec![Outcome::NoCandidates]);
        }

        let mut events = vec![];
        let mut outcomes = vec![];
        for region in &candidates {
            let (outcome, text) = match self.handle_region(&working, region) {
                Ok((outcome, event)) => {
                    let text = match &outcome {
                        Outcome::Accepted(text) | Outcome::Duplicate(text) => Some(text.clone()),
                        _ => None,
                    };
                    if let Some(event) = event {
                        events.push(event);
                    }
                    (outcome, text)
                }
                Err(e) => {
                    warn!("Skipping region {:?}: {}", region.bounding_box, e);
                    (Outcome::Skipped, None)
                }
            };

            if self.config.annotate_candidates {
                if let Err(e) = self.render.draw_region(&mut annotated, region, text.as_deref()) {
                    warn!("Cannot annotate region {:?}: {}", region.bounding_box, e);
                }
            }
            outcomes.push(outcome);
        }

        self.finish(true, annotated, events, outcomes)
    }

    fn finish(
        &self,
        was_processed: bool,
        annotated: Mat,
        events: Vec<DetectionEvent>,
        outcomes: Vec<Outcome>,
    ) -> Result<ProcessedFrame> {
        for outcome in &outcomes {
            OUTCOMES.with_label_values(&[outcome.label()]).inc();
        }
        Ok(ProcessedFrame {
            was_processed,
            annotated,
            events,
            outcomes,
        })
    }

    fn downscale(&self, frame: &Mat) -> Result<Mat> {
        let width = frame.cols();
        if width <= self.config.resize_width {
            return Ok(frame.try_clone()?);
        }

        let scale = self.config.resize_width as f64 / width as f64;
        let mut resized = Mat::default();
        resize(
            frame,
            &mut resized,
            Size::default(),
            scale,
            scale,
            INTER_LINEAR,
        )?;
        Ok(resized)
    }

    fn handle_region(
        &mut self,
        frame: &Mat,
        region: &CandidateRegion,
    ) -> Result<(Outcome, Option<DetectionEvent>)> {
        if region.geometry_confidence < self.config.confidence_threshold {
            return Ok((Outcome::Skipped, None));
        }
        let bbox = match region.bounding_box.clamp_to(frame.cols(), frame.rows()) {
            Some(bbox) => bbox,
            None => return Ok((Outcome::Skipped, None)),
        };

        let crop = frame.apply_1(bbox.to_rect())?.try_clone()?;
        if crop.empty() {
            return Ok((Outcome::Skipped, None));
        }

        let recognition = self.cascade.recognize(&crop);
        if !recognition.accepted {
            return Ok((Outcome::TextRejected, None));
        }
        let text = recognition.text;

        // Nothing after the suppressor may fail, or the plate would be
        // swallowed for a whole window.
        let evidence = match self.render.evidence(frame, &region.bounding_box, &text) {
            Ok(evidence) => evidence,
            Err(e) => {
                warn!("Cannot annotate evidence for {}: {}", text, e);
                frame.try_clone()?
            }
        };

        if self
            .suppressor
            .is_duplicate(&text, self.config.duplicate_window())
        {
            debug!("Duplicate: {} (skipped)", text);
            return Ok((Outcome::Duplicate(text), None));
        }

        info!(
            "Detected {} (confidence {:.2}, via {})",
            text,
            region.geometry_confidence,
            recognition.source.label()
        );
        let event = DetectionEvent::new(
            &text,
            region.bounding_box,
            region.geometry_confidence,
            Utc::now(),
            evidence,
        );
        Ok((Outcome::Accepted(text), Some(event)))
    }
}
