//! JPEG snapshot display: keeps the newest annotated frame on disk.

use std::{
    borrow::Cow,
    fs,
    path::PathBuf,
};

use anyhow::{Context, Result};
use image::{ExtendedColorType, codecs::jpeg::JpegEncoder};
use tracing::debug;
use video_ingest::{Frame, FrameFormat};
use vision::pipeline::{AnnotatedFrame, DisplayControl, FrameDisplay};

const DEFAULT_JPEG_QUALITY: u8 = 85;

pub struct JpegSnapshotDisplay {
    path: PathBuf,
    tmp_path: PathBuf,
    quality: u8,
    buffer: Vec<u8>,
    written: u64,
}

impl JpegSnapshotDisplay {
    pub fn new(path: PathBuf) -> Self {
        let tmp_path = path.with_extension("jpg.tmp");
        Self {
            path,
            tmp_path,
            quality: DEFAULT_JPEG_QUALITY,
            buffer: Vec::new(),
            written: 0,
        }
    }
}

impl FrameDisplay for JpegSnapshotDisplay {
    fn show(&mut self, frame: &AnnotatedFrame) -> Result<DisplayControl> {
        encode_jpeg(&frame.frame, self.quality, &mut self.buffer)?;
        fs::write(&self.tmp_path, &self.buffer)
            .with_context(|| format!("failed to write {}", self.tmp_path.display()))?;
        // Readers never observe a half-written file.
        fs::rename(&self.tmp_path, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        self.written += 1;
        Ok(DisplayControl::Continue)
    }

    fn close(&mut self) {
        debug!(
            "wrote {} snapshot(s) to {}",
            self.written,
            self.path.display()
        );
    }
}

fn encode_jpeg(frame: &Frame, quality: u8, out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    let (pixels, colour) = match frame.format {
        FrameFormat::Gray8 => (Cow::Borrowed(frame.data.as_slice()), ExtendedColorType::L8),
        FrameFormat::Rgb8 => (Cow::Borrowed(frame.data.as_slice()), ExtendedColorType::Rgb8),
        FrameFormat::Bgr8 => (
            Cow::Owned(
                frame
                    .data
                    .chunks_exact(3)
                    .flat_map(|px| [px[2], px[1], px[0]])
                    .collect(),
            ),
            ExtendedColorType::Rgb8,
        ),
    };
    JpegEncoder::new_with_quality(&mut *out, quality)
        .encode(&pixels, frame.width, frame.height, colour)
        .context("JPEG encoding failed")?;
    Ok(())
}
