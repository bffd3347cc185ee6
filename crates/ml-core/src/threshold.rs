//! Model-free blob detector.
//!
//! Marks pixels brighter than a luma threshold, groups them into 4-connected
//! components, and reports every component larger than a minimum area as one
//! detection. Pairs with the synthetic test pattern so the whole pipeline can
//! run without a trained model.

use video_ingest::Frame;

use crate::{
    analyzer::{AnalysisError, Analyzer},
    detection::{Detection, DetectionSummary, Region},
};

#[derive(Clone, Debug)]
pub struct ThresholdDetector {
    pub luma_threshold: u8,
    /// Minimum component size as a fraction of the frame area.
    pub min_area: f32,
    pub category: String,
    pub min_confidence: f32,
    mask: Vec<u8>,
    stack: Vec<usize>,
}

impl ThresholdDetector {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            luma_threshold: 160,
            min_area: 0.002,
            category: category.into(),
            min_confidence: 0.0,
            mask: Vec::new(),
            stack: Vec::new(),
        }
    }

    pub fn with_min_confidence(mut self, confidence: f32) -> Self {
        self.min_confidence = confidence;
        self
    }
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self::new(crate::labels::UNKNOWN_LABEL)
    }
}

const UNVISITED: u8 = 1;
const VISITED: u8 = 2;

impl Analyzer for ThresholdDetector {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionSummary, AnalysisError> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        if frame.data.len() != Frame::byte_len(frame.width, frame.height, frame.format) {
            return Err(AnalysisError::UnsupportedFrame(format!(
                "{}x{} frame carries {} bytes",
                width,
                height,
                frame.data.len()
            )));
        }

        self.mask.clear();
        self.mask.reserve(width * height);
        for y in 0..frame.height {
            for x in 0..frame.width {
                let [r, g, b] = frame.rgb_at(x, y);
                let luma = (r as u32 * 77 + g as u32 * 150 + b as u32 * 29) >> 8;
                let lit = (luma as u8) > self.luma_threshold;
                self.mask.push(if lit { UNVISITED } else { 0 });
            }
        }

        let min_pixels = ((width * height) as f32 * self.min_area).max(1.0) as usize;
        let mut detections = Vec::new();
        for start in 0..self.mask.len() {
            if self.mask[start] != UNVISITED {
                continue;
            }
            self.mask[start] = VISITED;
            self.stack.push(start);
            let (mut min_x, mut min_y, mut max_x, mut max_y) = (width, height, 0, 0);
            let mut area = 0usize;

            while let Some(idx) = self.stack.pop() {
                let x = idx % width;
                let y = idx / width;
                area += 1;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);

                let visit = |n: usize, mask: &mut Vec<u8>, stack: &mut Vec<usize>| {
                    if mask[n] == UNVISITED {
                        mask[n] = VISITED;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1, &mut self.mask, &mut self.stack);
                }
                if x + 1 < width {
                    visit(idx + 1, &mut self.mask, &mut self.stack);
                }
                if y > 0 {
                    visit(idx - width, &mut self.mask, &mut self.stack);
                }
                if y + 1 < height {
                    visit(idx + width, &mut self.mask, &mut self.stack);
                }
            }

            if area < min_pixels {
                continue;
            }
            let box_area = (max_x - min_x + 1) * (max_y - min_y + 1);
            let confidence = area as f32 / box_area as f32;
            if confidence < self.min_confidence {
                continue;
            }
            detections.push(Detection {
                category: self.category.clone(),
                class_id: -1,
                confidence,
                region: Region::from_pixels(
                    min_x as f32,
                    min_y as f32,
                    (max_x + 1) as f32,
                    (max_y + 1) as f32,
                    frame.width,
                    frame.height,
                ),
            });
        }

        Ok(DetectionSummary::new(detections))
    }
}
