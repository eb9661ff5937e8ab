use std::time::Duration;
use std::time::Instant;

use log::{info, warn};
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::VideoCaptureTrait;
use opencv::prelude::VideoCaptureTraitConst;
use opencv::videoio::VideoCapture;
use opencv::videoio::CAP_ANY;
use opencv::videoio::CAP_FFMPEG;
use opencv::videoio::CAP_PROP_BUFFERSIZE;

use crate::error::{Result, ScannerError};

/// Where frames come from.
///
/// `next_frame` returning `None` is a transient failure: callers pause and ask
/// again for as long as `is_open` holds.
pub trait FrameSource {
    fn is_open(&self) -> bool;
    fn next_frame(&mut self) -> Option<Mat>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSource {
    /// Phone camera app serving MJPEG over HTTP.
    Iphone(String),
    Rtsp(String),
    Webcam(i32),
    File { path: String, do_loop: bool },
}

impl CameraSource {
    fn open(&self) -> Result<VideoCapture> {
        let mut capture = match self {
            CameraSource::Iphone(url) => VideoCapture::from_file(url, CAP_ANY)?,
            CameraSource::Rtsp(url) => VideoCapture::from_file(url, CAP_FFMPEG)?,
            CameraSource::Webcam(device) => VideoCapture::new(*device, CAP_ANY)?,
            CameraSource::File { path, .. } => VideoCapture::from_file(path, CAP_ANY)?,
        };

        if !capture.is_opened()? {
            return Err(ScannerError::Stream(format!("cannot open {:?}", self)));
        }
        if !matches!(self, CameraSource::File { .. }) {
            // Live sources: always hand out the newest frame.
            capture.set(CAP_PROP_BUFFERSIZE, 1.0)?;
        }
        Ok(capture)
    }
}

pub struct VideoReader {
    source: CameraSource,
    capture: VideoCapture,
    fps_control: Instant,
    fps_wait: Option<Duration>,
}

impl VideoReader {
    pub fn open(source: CameraSource) -> Result<Self> {
        let capture = source.open()?;
        info!("Connected to {:?}", source);
        Ok(Self {
            source,
            capture,
            fps_control: Instant::now(),
            fps_wait: None,
        })
    }

    /// Never hand out frames faster than `fps`.
    pub fn with_fps_limit(mut self, fps: u64) -> Self {
        if fps > 0 {
            self.fps_wait = Some(Duration::from_millis(1000 / fps));
        }
        self
    }

    fn grab(&mut self) -> Result<Option<Mat>> {
        let mut image = Mat::default();
        let grabbed = self.capture.read(&mut image)?;

        if !grabbed || image.empty() {
            if let CameraSource::File { do_loop: true, .. } = self.source {
                self.capture = self.source.open()?;
                self.capture.read(&mut image)?;
            }
        }
        if image.empty() {
            return Ok(None);
        }
        Ok(Some(image))
    }

    fn pace(&mut self) {
        if let Some(fps_wait) = self.fps_wait {
            let elapsed = self.fps_control.elapsed();
            if fps_wait > elapsed {
                spin_sleep::sleep(fps_wait - elapsed);
            }
        }
        self.fps_control = Instant::now();
    }
}

impl FrameSource for VideoReader {
    fn is_open(&self) -> bool {
        self.capture.is_opened().unwrap_or(false)
    }

    fn next_frame(&mut self) -> Option<Mat> {
        let frame = match self.grab() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to grab frame: {}", e);
                None
            }
        };
        // A file that has run out closes the reader so the caller stops.
        if frame.is_none() {
            if let CameraSource::File { do_loop: false, .. } = self.source {
                if let Err(e) = self.capture.release() {
                    warn!("Cannot release {:?}: {}", self.source, e);
                }
            }
        }
        self.pace();
        frame
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            warn!("Cannot release {:?}: {}", self.source, e);
        }
    }
}
