//! Where consolidated descriptions go once the window decides to speak.

mod describe;
mod speech;

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

pub use describe::{DescribePolicy, describe, quantity_phrase};
pub use speech::SpeechNarrator;

/// Receives narration text. Called from worker threads, never while the
/// consolidator's lock is held.
pub trait NarrationSink: Send + Sync {
    fn narrate(&self, text: &str, rate: u32);
}

/// Writes narrations to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNarrator;

impl NarrationSink for LogNarrator {
    fn narrate(&self, text: &str, rate: u32) {
        info!(rate, "narration: {text}");
    }
}

/// Keeps every narration in memory, oldest first.
#[derive(Debug, Default)]
pub struct RecordingNarrator {
    entries: Mutex<Vec<String>>,
}

impl RecordingNarrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NarrationSink for RecordingNarrator {
    fn narrate(&self, text: &str, _rate: u32) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_owned());
    }
}

/// Fans one narration out to several sinks in order.
#[derive(Clone, Default)]
pub struct Narrators {
    sinks: Vec<Arc<dyn NarrationSink>>,
}

impl Narrators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn NarrationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn push(&mut self, sink: Arc<dyn NarrationSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl NarrationSink for Narrators {
    fn narrate(&self, text: &str, rate: u32) {
        for sink in &self.sinks {
            sink.narrate(text, rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_reaches_every_sink() {
        let first = Arc::new(RecordingNarrator::new());
        let second = Arc::new(RecordingNarrator::new());
        let narrators = Narrators::new()
            .with(first.clone())
            .with(Arc::new(LogNarrator))
            .with(second.clone());

        narrators.narrate("I see a cat.", 200);
        narrators.narrate("I don't see anything.", 200);

        assert_eq!(narrators.len(), 3);
        assert_eq!(first.texts(), second.texts());
        assert_eq!(first.texts()[1], "I don't see anything.");
    }
}
