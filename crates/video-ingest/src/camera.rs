//! OpenCV-backed camera capture.

use opencv::{
    core::{self, MatTraitConstManual},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTrait},
};
use tracing::warn;

use crate::{
    reader::FrameProducer,
    source::parse_device_index,
    types::{CaptureError, Frame, FrameFormat},
};

pub struct OpenCvProducer {
    uri: String,
    target_size: (u32, u32),
    cap: Option<VideoCapture>,
    frame: Mat,
    scratch: Mat,
}

impl OpenCvProducer {
    pub fn new(uri: &str, target_size: (u32, u32)) -> Self {
        Self {
            uri: uri.to_string(),
            target_size,
            cap: None,
            frame: Mat::default(),
            scratch: Mat::default(),
        }
    }
}

impl FrameProducer for OpenCvProducer {
    fn name(&self) -> &str {
        &self.uri
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        let mut cap = open_video_capture(&self.uri)?;
        configure_camera(&mut cap, self.target_size, 30.0);
        self.cap = Some(cap);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let cap = self.cap.as_mut().ok_or(CaptureError::NotStarted)?;
        let (target_w, target_h) = self.target_size;

        loop {
            let grabbed = cap
                .read(&mut self.frame)
                .map_err(|e| CaptureError::Other(e.into()))?;
            if !grabbed {
                return Ok(None);
            }
            let size = self
                .frame
                .size()
                .map_err(|e| CaptureError::Other(e.into()))?;
            if size.width <= 0 {
                continue;
            }

            let working = if size.width != target_w as i32 || size.height != target_h as i32 {
                opencv::imgproc::resize(
                    &self.frame,
                    &mut self.scratch,
                    core::Size {
                        width: target_w as i32,
                        height: target_h as i32,
                    },
                    0.0,
                    0.0,
                    opencv::imgproc::INTER_LINEAR,
                )
                .map_err(|e| CaptureError::Other(e.into()))?;
                &self.scratch
            } else {
                &self.frame
            };

            let data = working
                .data_bytes()
                .map_err(|e| CaptureError::Other(e.into()))?
                .to_vec();
            return Frame::new(data, target_w, target_h, FrameFormat::Bgr8).map(Some);
        }
    }

    fn close(&mut self) {
        if let Some(mut cap) = self.cap.take() {
            let _ = cap.release();
        }
    }
}

/// Attempt to open a camera input either by index or URI.
fn open_video_capture(uri: &str) -> Result<VideoCapture, CaptureError> {
    if let Some(index) = parse_device_index(uri) {
        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::new(index, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open device #{index} with backend {backend}: {err}");
                }
            }
        }
    } else {
        match VideoCapture::from_file(uri, videoio::CAP_ANY) {
            Ok(cap) => {
                if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                    return Ok(cap);
                }
            }
            Err(err) => warn!("failed to open {uri}: {err}"),
        }
    }

    Err(CaptureError::Open {
        uri: uri.to_string(),
    })
}

fn configure_camera(cap: &mut VideoCapture, target_size: (u32, u32), fps: f64) {
    if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
        let _ = cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64);
    }
    let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, target_size.0 as f64);
    let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, target_size.1 as f64);
    let _ = cap.set(videoio::CAP_PROP_FPS, fps);
}
