use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScannerError {
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("failed to initialise tesseract: {0}")]
    TesseractInit(String),

    #[error("tesseract recognition failed: {0}")]
    Tesseract(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {service}")]
    Status { service: &'static str, status: u16 },

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("video stream error: {0}")]
    Stream(String),

    #[error("profiler error: {0}")]
    Profiler(String),
}

pub type Result<T> = std::result::Result<T, ScannerError>;
