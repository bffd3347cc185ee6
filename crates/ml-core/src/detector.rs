//! TorchScript-backed detector.
//!
//! Expects a module taking a `[1, 3, H, W]` float RGB tensor in `0..1` and
//! returning `[1, C, N]` predictions, where the first four channels are a
//! centre/size box in input pixels. With `C == 6` the remaining channels are
//! `(score, class_id)`; with `C > 6` they are per-class scores.

use std::{
    convert::TryFrom,
    path::{Path, PathBuf},
    sync::Arc,
};

use tch::{self, Device, Kind, Tensor};
use tracing::debug;
use video_ingest::{Frame, FrameFormat};

use crate::{
    analyzer::{AnalysisError, Analyzer, AnalyzerFactory},
    detection::{Detection, DetectionSummary, Region},
    labels::LabelMap,
};

/// Upper bound on detections kept per frame.
const MAX_DETECTIONS: usize = 512;

pub struct TorchDetector {
    module: tch::CModule,
    device: Device,
    labels: Arc<LabelMap>,
    confidence_threshold: f32,
}

impl TorchDetector {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        device: Device,
        labels: Arc<LabelMap>,
    ) -> Result<Self, AnalysisError> {
        let path = model_path.as_ref();
        let module =
            tch::CModule::load_on_device(path, device).map_err(|err| AnalysisError::ModelLoad {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            module,
            device,
            labels,
            confidence_threshold: 0.25,
        })
    }

    /// Override the confidence threshold used for filtering detections.
    pub fn with_confidence_threshold(mut self, confidence: f32) -> Self {
        self.confidence_threshold = confidence;
        self
    }

    pub fn device(&self) -> Device {
        self.device
    }

    fn frame_to_tensor(&self, frame: &Frame) -> Result<Tensor, AnalysisError> {
        let (w, h) = (frame.width as i64, frame.height as i64);
        let channels = frame.channels() as i64;
        let expected = (w * h * channels) as usize;
        if frame.data.len() != expected {
            return Err(AnalysisError::UnsupportedFrame(format!(
                "unexpected frame buffer size: got {} bytes, expected {expected}",
                frame.data.len()
            )));
        }

        let hwc = Tensor::from_slice(&frame.data)
            .to_device(self.device)
            .to_kind(Kind::Float)
            .view([1, h, w, channels]);
        let rgb = match frame.format {
            FrameFormat::Bgr8 => hwc.flip([3]),
            FrameFormat::Rgb8 => hwc,
            FrameFormat::Gray8 => hwc.repeat([1, 1, 1, 3]),
        };
        Ok(rgb.permute([0, 3, 1, 2]) / 255.0)
    }
}

impl Analyzer for TorchDetector {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionSummary, AnalysisError> {
        let input = self.frame_to_tensor(frame)?;
        let output = self
            .module
            .forward_ts(&[input])
            .map_err(|err| AnalysisError::Inference(err.to_string()))?;
        let shape = output.size();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(AnalysisError::Inference(format!(
                "unexpected detector output shape: {shape:?}"
            )));
        }
        let channels = shape[1];
        if channels < 6 {
            return Err(AnalysisError::Inference(format!(
                "detector output requires at least 6 channels, got {channels}"
            )));
        }

        let preds = output
            .to_device(Device::Cpu)
            .to_kind(Kind::Float)
            .squeeze_dim(0)
            .permute([1, 0])
            .contiguous();
        let rows = Vec::<Vec<f32>>::try_from(&preds)
            .map_err(|err| AnalysisError::Inference(err.to_string()))?;

        let mut detections = Vec::new();
        for row in rows {
            let (score, class_id) = if channels == 6 {
                (row[4], row[5] as i64)
            } else {
                row[4..]
                    .iter()
                    .enumerate()
                    .fold((f32::MIN, -1i64), |best, (idx, &score)| {
                        if score > best.0 { (score, idx as i64) } else { best }
                    })
            };
            if score < self.confidence_threshold {
                continue;
            }
            let (cx, cy, bw, bh) = (row[0], row[1], row[2], row[3]);
            detections.push(Detection {
                category: self.labels.name(class_id).to_string(),
                class_id,
                confidence: score,
                region: Region::from_pixels(
                    cx - bw / 2.0,
                    cy - bh / 2.0,
                    cx + bw / 2.0,
                    cy + bh / 2.0,
                    frame.width,
                    frame.height,
                ),
            });
            if detections.len() >= MAX_DETECTIONS {
                break;
            }
        }
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        debug!(frame = frame.sequence, count = detections.len(), "torch detections");

        Ok(DetectionSummary::new(detections))
    }
}

/// Loads one TorchScript module per pipeline worker.
#[derive(Clone)]
pub struct TorchDetectorFactory {
    pub model_path: PathBuf,
    pub labels: Arc<LabelMap>,
    pub confidence_threshold: f32,
    pub use_cpu: bool,
}

impl AnalyzerFactory for TorchDetectorFactory {
    fn create(&self, worker_index: usize) -> Result<Box<dyn Analyzer>, AnalysisError> {
        let device = if self.use_cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available()
        };
        let detector = TorchDetector::new(&self.model_path, device, self.labels.clone())?
            .with_confidence_threshold(self.confidence_threshold);
        debug!("worker #{worker_index}: detector loaded on {:?}", detector.device());
        Ok(Box::new(detector))
    }
}
