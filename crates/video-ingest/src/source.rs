//! Source identifier parsing and construction.

use crate::{
    ffmpeg::FfmpegProducer,
    reader::{FrameSource, LatestFrameReader},
    synthetic::SyntheticProducer,
    types::CaptureError,
};

/// Frame rate of the synthetic test pattern.
pub const SYNTHETIC_FPS: f64 = 30.0;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Where frames come from, inferred from the source identifier.
pub enum SourceKind {
    /// Built-in moving-box test pattern.
    Synthetic,
    /// Local capture device by index (`0`, `/dev/video2`).
    Device(i32),
    /// Network stream (`rtsp://`, `http://`, `udp://`, ...).
    Stream,
    /// Anything else is treated as a file path.
    File,
}

impl SourceKind {
    pub fn from_uri(uri: &str) -> Self {
        if uri.eq_ignore_ascii_case("synthetic") || uri.eq_ignore_ascii_case("test") {
            SourceKind::Synthetic
        } else if let Some(index) = parse_device_index(uri) {
            SourceKind::Device(index)
        } else if uri.contains("://") {
            SourceKind::Stream
        } else {
            SourceKind::File
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Synthetic => "synthetic",
            SourceKind::Device(_) => "device",
            SourceKind::Stream => "stream",
            SourceKind::File => "file",
        }
    }
}

/// Parse a `/dev/videoX` style URI or bare integer into a device index.
pub fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return (index >= 0).then_some(index);
    }
    let stripped = uri.strip_prefix("/dev/video")?;
    if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
        return stripped.parse::<i32>().ok();
    }
    None
}

/// Build a latest-frame source for `uri`, delivering BGR8 frames of `target_size`.
///
/// The source is returned unstarted; opening the device happens in
/// [`FrameSource::start`].
pub fn open_source(
    uri: &str,
    target_size: (u32, u32),
) -> Result<Box<dyn FrameSource>, CaptureError> {
    let (width, height) = target_size;
    match SourceKind::from_uri(uri) {
        SourceKind::Synthetic => Ok(Box::new(LatestFrameReader::new(SyntheticProducer::new(
            width,
            height,
            SYNTHETIC_FPS,
        )))),
        SourceKind::Device(_) => device_source(uri, target_size),
        SourceKind::Stream | SourceKind::File => Ok(Box::new(LatestFrameReader::new(
            FfmpegProducer::new(uri, target_size),
        ))),
    }
}

#[cfg(feature = "opencv")]
fn device_source(
    uri: &str,
    target_size: (u32, u32),
) -> Result<Box<dyn FrameSource>, CaptureError> {
    Ok(Box::new(LatestFrameReader::new(
        crate::camera::OpenCvProducer::new(uri, target_size),
    )))
}

#[cfg(not(feature = "opencv"))]
fn device_source(
    uri: &str,
    target_size: (u32, u32),
) -> Result<Box<dyn FrameSource>, CaptureError> {
    tracing::debug!("opencv feature disabled; capturing {uri} through ffmpeg v4l2");
    Ok(Box::new(LatestFrameReader::new(FfmpegProducer::new(
        uri,
        target_size,
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_indices() {
        assert_eq!(parse_device_index("0"), Some(0));
        assert_eq!(parse_device_index("/dev/video3"), Some(3));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("-1"), None);
        assert_eq!(parse_device_index("clip.mp4"), None);
    }

    #[test]
    fn kinds_from_uri() {
        assert_eq!(SourceKind::from_uri("synthetic"), SourceKind::Synthetic);
        assert_eq!(SourceKind::from_uri("1"), SourceKind::Device(1));
        assert_eq!(
            SourceKind::from_uri("rtsp://cam.local/stream"),
            SourceKind::Stream
        );
        assert_eq!(SourceKind::from_uri("walk.mp4"), SourceKind::File);
    }

    #[test]
    fn synthetic_source_starts_and_reads() {
        let mut source = open_source("synthetic", (64, 48)).unwrap();
        source.start().unwrap();
        let frame = source.read().unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
        source.stop();
    }
}
