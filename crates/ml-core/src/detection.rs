use serde::Serialize;

/// Axis-aligned box in normalised image coordinates (`0.0..=1.0`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Region {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Region {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left: left.clamp(0.0, 1.0),
            top: top.clamp(0.0, 1.0),
            right: right.clamp(0.0, 1.0),
            bottom: bottom.clamp(0.0, 1.0),
        }
    }

    /// Build from pixel corners of a `width × height` image.
    pub fn from_pixels(left: f32, top: f32, right: f32, bottom: f32, width: u32, height: u32) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        Self::new(left / w, top / h, right / w, bottom / h)
    }

    /// Pixel corners `[left, top, right, bottom]`, clamped inside the image.
    pub fn to_pixels(&self, width: u32, height: u32) -> [i32; 4] {
        let max_x = width.saturating_sub(1) as f32;
        let max_y = height.saturating_sub(1) as f32;
        [
            (self.left * width as f32).round().clamp(0.0, max_x) as i32,
            (self.top * height as f32).round().clamp(0.0, max_y) as i32,
            (self.right * width as f32).round().clamp(0.0, max_x) as i32,
            (self.bottom * height as f32).round().clamp(0.0, max_y) as i32,
        ]
    }

    pub fn area(&self) -> f32 {
        (self.right - self.left).max(0.0) * (self.bottom - self.top).max(0.0)
    }
}

/// One detected object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub category: String,
    pub class_id: i64,
    pub confidence: f32,
    pub region: Region,
}

/// Everything the analyzer found in one frame, in detector order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub detections: Vec<Detection>,
}

impl DetectionSummary {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    /// Drop detections scoring below `threshold`.
    pub fn above(mut self, threshold: f32) -> Self {
        self.detections.retain(|det| det.confidence >= threshold);
        self
    }
}

impl FromIterator<Detection> for DetectionSummary {
    fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
