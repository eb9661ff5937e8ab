use std::ffi::CString;

use leptess::tesseract;
use leptess::tesseract::TessApi;
use log::{debug, warn};
use opencv::core::Size;
use opencv::core::BORDER_DEFAULT;
use opencv::imgproc::adaptive_threshold;
use opencv::imgproc::bilateral_filter;
use opencv::imgproc::cvt_color;
use opencv::imgproc::resize;
use opencv::imgproc::threshold;
use opencv::imgproc::ADAPTIVE_THRESH_GAUSSIAN_C;
use opencv::imgproc::COLOR_BGR2GRAY;
use opencv::imgproc::INTER_CUBIC;
use opencv::imgproc::THRESH_BINARY;
use opencv::imgproc::THRESH_OTSU;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;

use super::cascade::{RecognitionBackend, RecognitionSource, TextCleaner};
use crate::config::{LocalOcrConfig, TextConfig};
use crate::error::{Result, ScannerError};
use crate::metrics::BACKEND_FAILURES;

const PLATE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
// Treat the image as a single text line.
const PAGE_SEG_SINGLE_LINE: &str = "7";

/// Reads one line of text from a binarised single-channel image.
pub trait LineReader {
    fn read_line(&mut self, binary: &Mat) -> Result<String>;
}

pub struct TesseractLineReader {
    ocr: TessApi,
}

impl TesseractLineReader {
    pub fn new(config: &LocalOcrConfig) -> Result<Self> {
        let mut api = tesseract::TessApi::new(Some(config.tessdata_path.as_str()), &config.language)
            .map_err(|e| ScannerError::TesseractInit(format!("{:?}", e)))?;
        Self::restrict_to_plates(&mut api.raw)?;
        Ok(Self { ocr: api })
    }

    fn restrict_to_plates(raw: &mut tesseract_plumbing::TessBaseApi) -> Result<()> {
        let variables = [
            ("tessedit_char_whitelist", PLATE_ALPHABET),
            ("tessedit_pageseg_mode", PAGE_SEG_SINGLE_LINE),
        ];
        for (name, value) in variables {
            let name_c =
                CString::new(name).map_err(|e| ScannerError::TesseractInit(e.to_string()))?;
            let value_c =
                CString::new(value).map_err(|e| ScannerError::TesseractInit(e.to_string()))?;
            raw.set_variable(&name_c, &value_c)
                .map_err(|e| ScannerError::TesseractInit(format!("{} {:?}", name, e)))?;
        }
        Ok(())
    }
}

impl LineReader for TesseractLineReader {
    fn read_line(&mut self, binary: &Mat) -> Result<String> {
        let cols = binary.cols();
        let rows = binary.rows();
        let bytes = binary.data_bytes()?;
        self.ocr
            .raw
            .set_image(bytes, cols, rows, 1, cols)
            .map_err(|e| ScannerError::Tesseract(format!("{:?}", e)))?;
        let text = self
            .ocr
            .get_utf8_text()
            .map_err(|e| ScannerError::Tesseract(format!("{:?}", e)))?;
        Ok(text)
    }
}

/// Local recognition: upscale, denoise, binarise three ways and keep the
/// longest cleaned reading.
pub struct LocalRecognizer<R: LineReader> {
    reader: R,
    config: LocalOcrConfig,
    cleaner: TextCleaner,
}

impl LocalRecognizer<TesseractLineReader> {
    pub fn tesseract(config: &LocalOcrConfig, text: &TextConfig) -> Result<Self> {
        let reader = TesseractLineReader::new(config)?;
        Ok(Self::new(reader, config.clone(), text))
    }
}

impl<R: LineReader> LocalRecognizer<R> {
    pub fn new(reader: R, config: LocalOcrConfig, text: &TextConfig) -> Self {
        Self {
            reader,
            config,
            cleaner: TextCleaner::new(text.min_len, text.max_len),
        }
    }

    /// The three binarised variants: Otsu, adaptive Gaussian and fixed level.
    pub fn binarize(&self, region: &Mat) -> Result<Vec<Mat>> {
        let mut grey = Mat::default();
        if region.channels() == 1 {
            grey = region.try_clone()?;
        } else {
            cvt_color(region, &mut grey, COLOR_BGR2GRAY, 0)?;
        }

        let mut upscaled = Mat::default();
        resize(
            &grey,
            &mut upscaled,
            Size::default(),
            self.config.upscale,
            self.config.upscale,
            INTER_CUBIC,
        )?;

        let mut filtered = Mat::default();
        bilateral_filter(
            &upscaled,
            &mut filtered,
            self.config.bilateral_diameter,
            self.config.bilateral_sigma_color,
            self.config.bilateral_sigma_space,
            BORDER_DEFAULT,
        )?;

        let mut otsu = Mat::default();
        threshold(&filtered, &mut otsu, 0.0, 255.0, THRESH_BINARY | THRESH_OTSU)?;

        let mut adaptive = Mat::default();
        adaptive_threshold(
            &filtered,
            &mut adaptive,
            255.0,
            ADAPTIVE_THRESH_GAUSSIAN_C,
            THRESH_BINARY,
            self.config.adaptive_block_size,
            self.config.adaptive_c,
        )?;

        let mut fixed = Mat::default();
        threshold(
            &filtered,
            &mut fixed,
            self.config.fixed_threshold,
            255.0,
            THRESH_BINARY,
        )?;

        Ok(vec![otsu, adaptive, fixed])
    }

    pub fn read_plate(&mut self, region: &Mat) -> Result<String> {
        let mut best = String::new();
        for variant in self.binarize(region)? {
            let raw = match self.reader.read_line(&variant) {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("Local OCR variant failed: {}", e);
                    continue;
                }
            };
            let cleaned = self.cleaner.clean(&raw);
            // First longest wins on ties.
            if cleaned.len() > best.len() {
                best = cleaned;
            }
        }
        Ok(best)
    }
}

impl<R: LineReader> RecognitionBackend for LocalRecognizer<R> {
    fn source(&self) -> RecognitionSource {
        RecognitionSource::Local
    }

    fn extract_text(&mut self, region: &Mat) -> String {
        if region.empty() {
            return String::new();
        }
        match self.read_plate(region) {
            Ok(text) => text,
            Err(e) => {
                warn!("Local OCR failed: {}", e);
                BACKEND_FAILURES
                    .with_label_values(&[RecognitionSource::Local.label()])
                    .inc();
                String::new()
            }
        }
    }
}
