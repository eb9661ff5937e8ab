use crossbeam::channel::bounded;
use crossbeam::channel::Receiver;
use crossbeam::channel::Sender;
use crossbeam::channel::TrySendError;
use gstreamer::parse_launch;
use gstreamer::prelude::*;
use gstreamer::prelude::MulDiv;
use gstreamer::Buffer;
use gstreamer::Caps;
use gstreamer_video::VideoCapsBuilder;
use gstreamer_video::VideoFormat;
use log::{debug, info, warn};
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;

use crate::config::PreviewConfig;
use crate::error::{Result, ScannerError};

// Frames waiting for the encoder; beyond this the newest frame is dropped.
const QUEUE_DEPTH: usize = 2;

pub fn create_caps(width: i32, height: i32, fps: usize) -> Caps {
    VideoCapsBuilder::new()
        .width(width)
        .height(height)
        .framerate(gstreamer::Fraction::new(fps as i32, 1))
        .format(VideoFormat::Bgr)
        .build()
}

fn stream_error<E: std::fmt::Display>(e: E) -> ScannerError {
    ScannerError::Stream(e.to_string())
}

/// Streams annotated frames as H.264 over RTP for live monitoring.
///
/// Frames are handed to the encoder through a short queue. When the encoder
/// falls behind, frames are dropped instead of stalling the caller.
pub struct RtpSink {
    pipeline: gstreamer::Pipeline,
    fps: usize,
    frames: u64,
    width: i32,
    height: i32,
    // Taken on drop so the encoder thread stops waiting for frames.
    buffer_s: Option<Sender<Buffer>>,
}

impl RtpSink {
    pub fn new(config: &PreviewConfig, width: i32, height: i32) -> Result<Self> {
        gstreamer::init().map_err(stream_error)?;
        let pipeline_str = format!(
            "appsrc name=src ! videoconvert ! x264enc tune=zerolatency bitrate=500 speed-preset=superfast ! rtph264pay ! udpsink host={} port={}",
            config.host, config.port
        );

        let pipeline = parse_launch(&pipeline_str)
            .map_err(stream_error)?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| ScannerError::Stream("launch line is not a pipeline".to_string()))?;

        let app_src = pipeline
            .by_name("src")
            .and_dynamic_cast::<gstreamer_app::AppSrc>()
            .ok_or_else(|| ScannerError::Stream("cannot find appsrc".to_string()))?;

        app_src.set_caps(Some(&create_caps(width, height, config.fps)));
        app_src.set_format(gstreamer::Format::Time);

        let (buffer_s, buffer_r) = bounded(QUEUE_DEPTH);
        Self::feed(&app_src, buffer_r);

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(stream_error)?;
        info!(
            "Streaming {}x{} preview to {}:{}",
            width, height, config.host, config.port
        );

        Ok(Self {
            pipeline,
            fps: config.fps,
            frames: 0,
            width,
            height,
            buffer_s: Some(buffer_s),
        })
    }

    // appsrc pulls: every need-data callback blocks until the next frame is
    // queued, or ends the stream once the sender is gone.
    fn feed(app_src: &gstreamer_app::AppSrc, receiver: Receiver<Buffer>) {
        app_src.set_callbacks(
            gstreamer_app::AppSrcCallbacks::builder()
                .need_data(move |appsrc, _| match receiver.recv() {
                    Ok(buffer) => {
                        if let Err(e) = appsrc.push_buffer(buffer) {
                            warn!("Cannot push buffer to preview stream: {:?}", e);
                        }
                    }
                    Err(_) => {
                        let _ = appsrc.end_of_stream();
                    }
                })
                .build(),
        );
    }

    pub fn push(&mut self, image: &Mat) -> Result<()> {
        if image.cols() != self.width || image.rows() != self.height {
            return Err(ScannerError::Stream(format!(
                "frame is {}x{}, stream expects {}x{}",
                image.cols(),
                image.rows(),
                self.width,
                self.height
            )));
        }

        let duration = gstreamer::ClockTime::SECOND
            .mul_div_floor(1, self.fps as u64)
            .ok_or_else(|| ScannerError::Stream("frame duration overflow".to_string()))?;
        let pts = duration * self.frames;

        // A clone is always continuous.
        let contiguous = image.try_clone()?;
        let mut buffer = Buffer::from_mut_slice(contiguous.data_bytes()?.to_vec());
        {
            let buffer = buffer.make_mut();
            buffer.set_duration(duration);
            buffer.set_pts(pts);
            buffer.set_dts(pts);
        }

        let sender = self
            .buffer_s
            .as_ref()
            .ok_or_else(|| ScannerError::Stream("preview stream closed".to_string()))?;
        match sender.try_send(buffer) {
            Ok(()) => self.frames += 1,
            Err(TrySendError::Full(_)) => debug!("Preview encoder busy, dropping frame"),
            Err(TrySendError::Disconnected(_)) => {
                return Err(ScannerError::Stream("preview stream closed".to_string()))
            }
        }
        Ok(())
    }
}

impl Drop for RtpSink {
    fn drop(&mut self) {
        drop(self.buffer_s.take());
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Cannot stop preview stream: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_describe_bgr_frames() {
        gstreamer::init().unwrap();
        let caps = create_caps(640, 360, 10);
        let structure = caps.structure(0).unwrap();
        assert_eq!(structure.get::<i32>("width").unwrap(), 640);
        assert_eq!(structure.get::<i32>("height").unwrap(), 360);
        assert_eq!(structure.get::<&str>("format").unwrap(), "BGR");
    }

    #[test]
    #[ignore = "needs the gstreamer x264 and udp plugins"]
    fn dropping_a_running_sink_returns() {
        use opencv::core::{Scalar, CV_8UC3};
        use std::sync::mpsc;
        use std::time::Duration;

        let (done_s, done_r) = mpsc::channel();
        std::thread::spawn(move || {
            let config = PreviewConfig {
                host: "127.0.0.1".to_string(),
                port: 5999,
                fps: 10,
            };
            let mut sink = RtpSink::new(&config, 64, 48).unwrap();
            let frame = Mat::new_rows_cols_with_default(48, 64, CV_8UC3, Scalar::all(80.0))
                .unwrap();
            sink.push(&frame).unwrap();
            std::thread::sleep(Duration::from_millis(200));
            drop(sink);
            done_s.send(()).unwrap();
        });

        assert!(done_r.recv_timeout(Duration::from_secs(10)).is_ok());
    }
}
