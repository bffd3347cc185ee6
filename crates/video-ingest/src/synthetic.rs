//! Synthetic test-pattern source.
//!
//! Renders a dark background with bright boxes drifting across it at a fixed
//! frame rate. Useful for exercising the pipeline without a camera and as the
//! input for the threshold detector in `ml-core`.

use std::{
    thread,
    time::{Duration, Instant},
};

use chrono::Utc;

use crate::{
    reader::FrameProducer,
    types::{CaptureError, Frame, FrameFormat},
};

const BACKGROUND: [u8; 3] = [16, 16, 24];
const BOX_COLOUR: [u8; 3] = [235, 235, 235];

pub struct SyntheticProducer {
    width: u32,
    height: u32,
    frame_interval: Duration,
    limit: Option<u64>,
    produced: u64,
    next_deadline: Option<Instant>,
}

impl SyntheticProducer {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 30.0 };
        Self {
            width: width.max(8),
            height: height.max(8),
            frame_interval: Duration::from_secs_f64(1.0 / fps),
            limit: None,
            produced: 0,
            next_deadline: None,
        }
    }

    /// Stop after `frames` frames, turning the source into a finite stream.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    /// Render frame `index` of the pattern without pacing.
    pub fn render(&self, index: u64) -> Frame {
        let mut frame = Frame::filled(self.width, self.height, FrameFormat::Bgr8, 0);
        for y in 0..self.height {
            for x in 0..self.width {
                frame.set_rgb(x, y, BACKGROUND);
            }
        }

        let box_w = (self.width / 5).max(2);
        let box_h = (self.height / 4).max(2);
        let travel = (self.width - box_w) as u64;
        let offset: u64 = if travel == 0 {
            0
        } else {
            // Bounce back and forth across the frame.
            let phase = (index * 4) % (travel * 2);
            if phase < travel { phase } else { travel * 2 - phase }
        };
        fill(&mut frame, offset as u32, self.height / 8, box_w, box_h);

        // A second object shows up for half of every 60-frame cycle.
        if index % 60 < 30 {
            let small_w = (self.width / 8).max(2);
            let small_h = (self.height / 6).max(2);
            let x = self.width - small_w - self.width / 10;
            let y = self.height - small_h - self.height / 10;
            fill(&mut frame, x, y, small_w, small_h);
        }

        frame.timestamp_ms = Utc::now().timestamp_millis();
        frame
    }
}

fn fill(frame: &mut Frame, left: u32, top: u32, width: u32, height: u32) {
    let right = (left + width).min(frame.width);
    let bottom = (top + height).min(frame.height);
    for y in top..bottom {
        for x in left..right {
            frame.set_rgb(x, y, BOX_COLOUR);
        }
    }
}

impl FrameProducer for SyntheticProducer {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&mut self) -> Result<(), CaptureError> {
        self.next_deadline = Some(Instant::now());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }
        let deadline = self.next_deadline.unwrap_or_else(Instant::now);
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + self.frame_interval);

        let frame = self.render(self.produced);
        self.produced += 1;
        Ok(Some(frame))
    }
}
