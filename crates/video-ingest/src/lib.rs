//! Frame capture for the vision pipeline.
//!
//! Every source is wrapped in a [`LatestFrameReader`]: a background thread
//! keeps only the newest frame so the pipeline reads at its own pace.

#[cfg(feature = "opencv")]
mod camera;
mod ffmpeg;
mod reader;
mod source;
mod synthetic;
mod types;

#[cfg(feature = "opencv")]
pub use camera::OpenCvProducer;
pub use ffmpeg::FfmpegProducer;
pub use reader::{FIRST_FRAME_TIMEOUT, FrameProducer, FrameSource, LatestFrameReader};
pub use source::{SYNTHETIC_FPS, SourceKind, open_source, parse_device_index};
pub use synthetic::SyntheticProducer;
pub use types::{CaptureError, Frame, FrameFormat};
