//! Scanner configuration.
//!
//! Every tunable of the pipeline lives here and is handed to the component that
//! needs it at construction time. Defaults reproduce the values the scanner was
//! calibrated with; [`ScannerConfig::from_env`] overlays the deployment's
//! environment variables on top of them.

use std::num::NonZeroU64;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, ScannerError};

const DEFAULT_FRAME_SKIP: NonZeroU64 = match NonZeroU64::new(3) {
    Some(skip) => skip,
    None => NonZeroU64::MIN,
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Only frames whose index is a multiple of this are processed.
    pub frame_skip: NonZeroU64,
    /// Frames wider than this are downscaled before detection.
    pub resize_width: i32,
    pub duplicate_window_secs: u64,
    /// Candidates scoring below this are dropped before OCR.
    pub confidence_threshold: f32,
    pub annotate_candidates: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_skip: DEFAULT_FRAME_SKIP,
            resize_width: 640,
            duplicate_window_secs: 60,
            confidence_threshold: 0.5,
            annotate_candidates: true,
        }
    }
}

impl PipelineConfig {
    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs(self.duplicate_window_secs)
    }
}

/// Geometry filter and edge-detection parameters of the contour detector.
///
/// The thresholds were tuned on close-range photos of a single plate style and
/// should be recalibrated for other camera placements.
#[derive(Debug, Clone)]
pub struct GeometryConfig {
    pub min_aspect: f64,
    pub max_aspect: f64,
    pub min_width: i32,
    pub min_height: i32,
    pub max_contours: usize,
    /// Polygon approximation tolerance as a fraction of the contour perimeter.
    pub approx_epsilon: f64,
    pub geometry_confidence: f32,
    pub canny_low: f64,
    pub canny_high: f64,
    pub bilateral_diameter: i32,
    pub bilateral_sigma_color: f64,
    pub bilateral_sigma_space: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            min_aspect: 2.0,
            max_aspect: 6.0,
            min_width: 80,
            min_height: 20,
            max_contours: 30,
            approx_epsilon: 0.02,
            geometry_confidence: 0.85,
            canny_low: 30.0,
            canny_high: 200.0,
            bilateral_diameter: 11,
            bilateral_sigma_color: 17.0,
            bilateral_sigma_space: 17.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextConfig {
    pub min_len: usize,
    pub max_len: usize,
    /// The remote fallback only runs when the local answer is shorter than this.
    pub fallback_below: usize,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            min_len: 4,
            max_len: 10,
            fallback_below: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalOcrConfig {
    pub enabled: bool,
    pub tessdata_path: String,
    pub language: String,
    pub upscale: f64,
    pub fixed_threshold: f64,
    pub adaptive_block_size: i32,
    pub adaptive_c: f64,
    pub bilateral_diameter: i32,
    pub bilateral_sigma_color: f64,
    pub bilateral_sigma_space: f64,
}

impl Default for LocalOcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tessdata_path: "/usr/share/tesseract-ocr/5/tessdata".to_string(),
            language: "eng".to_string(),
            upscale: 3.0,
            fixed_threshold: 150.0,
            adaptive_block_size: 11,
            adaptive_c: 2.0,
            bilateral_diameter: 11,
            bilateral_sigma_color: 17.0,
            bilateral_sigma_space: 17.0,
        }
    }
}

/// A credentialed HTTP recognition service.
#[derive(Debug, Clone)]
pub struct RemoteOcrConfig {
    pub enabled: bool,
    pub credential: Option<String>,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl RemoteOcrConfig {
    pub fn plate_recognizer() -> Self {
        Self {
            enabled: false,
            credential: None,
            endpoint: "https://api.platerecognizer.com/v1/plate-reader/".to_string(),
            timeout_secs: 10,
        }
    }

    pub fn ocr_space() -> Self {
        Self {
            enabled: true,
            credential: None,
            endpoint: "https://api.ocr.space/parse/image".to_string(),
            timeout_secs: 10,
        }
    }

    /// The credential, when the backend is switched on and actually has one.
    pub fn active_credential(&self) -> Option<&str> {
        match self.credential.as_deref() {
            Some(credential) if self.enabled && !credential.trim().is_empty() => Some(credential),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RemoteOcrConfig {
    fn default() -> Self {
        Self::ocr_space()
    }
}

#[derive(Debug, Clone)]
pub struct PreviewConfig {
    pub host: String,
    pub port: u16,
    pub fps: usize,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub pipeline: PipelineConfig,
    pub geometry: GeometryConfig,
    pub text: TextConfig,
    pub local_ocr: LocalOcrConfig,
    pub plate_recognizer: RemoteOcrConfig,
    pub ocr_space: RemoteOcrConfig,
    /// ONNX plate model; when set it replaces the contour detector.
    pub detector_model: Option<PathBuf>,
    pub gate_id: String,
    pub api_url: String,
    pub save_snapshots: bool,
    pub snapshot_dir: PathBuf,
    pub preview: Option<PreviewConfig>,
    pub profiling_url: Option<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            geometry: GeometryConfig::default(),
            text: TextConfig::default(),
            local_ocr: LocalOcrConfig::default(),
            plate_recognizer: RemoteOcrConfig::plate_recognizer(),
            ocr_space: RemoteOcrConfig::ocr_space(),
            detector_model: None,
            gate_id: "gate_01".to_string(),
            api_url: "http://localhost:3000/api/plates".to_string(),
            save_snapshots: true,
            snapshot_dir: PathBuf::from("./snapshots"),
            preview: None,
            profiling_url: None,
        }
    }
}

impl ScannerConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = Overlay { lookup: &lookup };

        env.parse("FRAME_SKIP", &mut config.pipeline.frame_skip)?;
        env.parse("RESIZE_WIDTH", &mut config.pipeline.resize_width)?;
        env.parse(
            "DUPLICATE_WINDOW_SECONDS",
            &mut config.pipeline.duplicate_window_secs,
        )?;
        env.parse(
            "CONFIDENCE_THRESHOLD",
            &mut config.pipeline.confidence_threshold,
        )?;
        env.parse("PLATE_MIN_LENGTH", &mut config.text.min_len)?;
        env.parse("PLATE_MAX_LENGTH", &mut config.text.max_len)?;

        env.flag("USE_LOCAL_OCR", &mut config.local_ocr.enabled);
        env.string("TESSDATA_PREFIX", &mut config.local_ocr.tessdata_path);
        env.string("TESSERACT_LANG", &mut config.local_ocr.language);

        env.flag("USE_PLATE_RECOGNIZER", &mut config.plate_recognizer.enabled);
        env.optional("PLATE_RECOGNIZER_TOKEN", &mut config.plate_recognizer.credential);
        env.flag("USE_OCR_SPACE_FALLBACK", &mut config.ocr_space.enabled);
        env.optional("OCR_SPACE_API_KEY", &mut config.ocr_space.credential);

        if let Some(model) = env.get("YOLO_MODEL") {
            config.detector_model = Some(PathBuf::from(model));
        }
        env.string("GATE_IDENTIFIER", &mut config.gate_id);
        env.string("API_URL", &mut config.api_url);
        env.flag("SAVE_SNAPSHOTS", &mut config.save_snapshots);
        if let Some(dir) = env.get("SNAPSHOT_DIR") {
            config.snapshot_dir = PathBuf::from(dir);
        }
        if let Some(host) = env.get("PREVIEW_HOST") {
            let mut port = 5000u16;
            let mut fps = 10usize;
            env.parse("PREVIEW_PORT", &mut port)?;
            env.parse("PREVIEW_FPS", &mut fps)?;
            config.preview = Some(PreviewConfig { host, port, fps });
        }
        env.optional("PYROSCOPE_URL", &mut config.profiling_url);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.resize_width <= 0 {
            return Err(ScannerError::Config("resize_width must be > 0".to_string()));
        }
        if self.pipeline.duplicate_window_secs == 0 {
            return Err(ScannerError::Config(
                "duplicate window must be > 0 seconds".to_string(),
            ));
        }
        if self.text.min_len == 0 || self.text.min_len > self.text.max_len {
            return Err(ScannerError::Config(format!(
                "invalid plate length bounds [{}, {}]",
                self.text.min_len, self.text.max_len
            )));
        }
        if self.geometry.min_aspect > self.geometry.max_aspect {
            return Err(ScannerError::Config(format!(
                "invalid aspect range [{}, {}]",
                self.geometry.min_aspect, self.geometry.max_aspect
            )));
        }
        if let Some(preview) = &self.preview {
            if preview.fps == 0 {
                return Err(ScannerError::Config("preview fps must be > 0".to_string()));
            }
        }
        Ok(())
    }
}

struct Overlay<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<'a, F: Fn(&str) -> Option<String>> Overlay<'a, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, target: &mut T) -> Result<()> {
        if let Some(raw) = self.get(key) {
            *target = raw
                .trim()
                .parse()
                .map_err(|_| ScannerError::Config(format!("{} has invalid value {:?}", key, raw)))?;
        }
        Ok(())
    }

    // Anything other than "true" switches the flag off.
    fn flag(&self, key: &str, target: &mut bool) {
        if let Some(raw) = self.get(key) {
            *target = raw.trim().eq_ignore_ascii_case("true");
        }
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(raw) = self.get(key) {
            *target = raw;
        }
    }

    fn optional(&self, key: &str, target: &mut Option<String>) {
        if let Some(raw) = self.get(key) {
            *target = Some(raw);
        }
    }
}
