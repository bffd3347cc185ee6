use std::{fmt, time::Duration};

use anyhow::Error;
use chrono::Utc;
use thiserror::Error;

/// Pixel layout of a frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
    Rgb8,
    Gray8,
}

impl FrameFormat {
    /// Bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            FrameFormat::Bgr8 | FrameFormat::Rgb8 => 3,
            FrameFormat::Gray8 => 1,
        }
    }
}

/// One captured image, `height × width × channels` bytes in row-major order.
///
/// Frames are moved from stage to stage; a stage that needs to keep one
/// around clones it.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
    /// Capture order index assigned when the frame enters the pipeline.
    pub sequence: u64,
}

impl Frame {
    /// Wrap a raw buffer, checking that its length matches the geometry.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Result<Self, CaptureError> {
        let expected = Self::byte_len(width, height, format);
        if data.len() != expected {
            return Err(CaptureError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format,
            sequence: 0,
        })
    }

    /// A uniformly filled frame, mostly useful for tests and placeholders.
    pub fn filled(width: u32, height: u32, format: FrameFormat, value: u8) -> Self {
        let data = vec![value; Self::byte_len(width, height, format)];
        Self {
            data,
            width,
            height,
            timestamp_ms: Utc::now().timestamp_millis(),
            format,
            sequence: 0,
        }
    }

    pub fn byte_len(width: u32, height: u32, format: FrameFormat) -> usize {
        (width as usize) * (height as usize) * format.channels()
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    /// Pixel at `(x, y)` as RGB, whatever the storage layout.
    pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = ((y as usize) * (self.width as usize) + x as usize) * self.channels();
        match self.format {
            FrameFormat::Bgr8 => [self.data[idx + 2], self.data[idx + 1], self.data[idx]],
            FrameFormat::Rgb8 => [self.data[idx], self.data[idx + 1], self.data[idx + 2]],
            FrameFormat::Gray8 => [self.data[idx]; 3],
        }
    }

    /// Overwrite the pixel at `(x, y)` from an RGB triple.
    pub fn set_rgb(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let idx = ((y as usize) * (self.width as usize) + x as usize) * self.channels();
        match self.format {
            FrameFormat::Bgr8 => {
                self.data[idx] = rgb[2];
                self.data[idx + 1] = rgb[1];
                self.data[idx + 2] = rgb[0];
            }
            FrameFormat::Rgb8 => self.data[idx..idx + 3].copy_from_slice(&rgb),
            FrameFormat::Gray8 => {
                let luma = (rgb[0] as u32 * 77 + rgb[1] as u32 * 150 + rgb[2] as u32 * 29) >> 8;
                self.data[idx] = luma as u8;
            }
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("video source has not been started")]
    NotStarted,
    #[error("no frame received from {source_name} within {waited:?}")]
    NoFrame {
        source_name: String,
        waited: Duration,
    },
    #[error("video source reached end of stream")]
    EndOfStream,
    #[error("frame buffer holds {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("{kind} capture is not available in this build (enable the `{feature}` feature)")]
    Unsupported {
        kind: &'static str,
        feature: &'static str,
    },
    #[error(transparent)]
    Other(#[from] Error),
}
