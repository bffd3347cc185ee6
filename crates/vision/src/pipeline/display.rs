use tracing::info;

use crate::pipeline::AnnotatedFrame;

/// What the driver should do after a frame has been shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayControl {
    Continue,
    Quit,
}

/// Final stage of the pipeline, driven from the driver's thread.
pub trait FrameDisplay: Send {
    fn show(&mut self, frame: &AnnotatedFrame) -> anyhow::Result<DisplayControl>;

    fn close(&mut self) {}
}

/// Logs a one-line summary every `every` frames.
#[derive(Debug)]
pub struct HeadlessDisplay {
    every: u64,
    shown: u64,
}

impl HeadlessDisplay {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            shown: 0,
        }
    }
}

impl Default for HeadlessDisplay {
    fn default() -> Self {
        Self::new(30)
    }
}

impl FrameDisplay for HeadlessDisplay {
    fn show(&mut self, frame: &AnnotatedFrame) -> anyhow::Result<DisplayControl> {
        self.shown += 1;
        if self.shown % self.every == 0 {
            info!(
                frame = frame.sequence(),
                worker = frame.worker,
                detections = frame.summary.len(),
                "displayed {} frames",
                self.shown
            );
        }
        Ok(DisplayControl::Continue)
    }
}
