//! Sliding window of recent detection summaries and the narration trigger.
//!
//! Every worker calls [`StateConsolidator::update`] once per analysed frame.
//! Appending, evicting, counting and deciding whether to narrate happen under
//! one lock, so the `R`-th update of a concurrent run narrates exactly once.
//! The description is rendered and handed to the sink after the lock is
//! released.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use ml_core::DetectionSummary;
use serde::Serialize;
use tracing::debug;

use crate::narration::{DescribePolicy, NarrationSink, describe};

/// When the consolidator narrates on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NarrationSchedule {
    /// After every n-th update.
    Every(usize),
    /// Only when [`StateConsolidator::query`] is called.
    OnQuery,
}

impl NarrationSchedule {
    /// Negative rates follow the window length; zero disables automatic
    /// narration.
    pub fn from_rate(rate: i64, window: usize) -> Self {
        match rate {
            0 => NarrationSchedule::OnQuery,
            r if r < 0 => NarrationSchedule::Every(window.max(1)),
            r => NarrationSchedule::Every(r as usize),
        }
    }
}

/// The last `capacity` summaries, oldest first.
#[derive(Debug)]
pub struct SlidingWindow {
    entries: VecDeque<Arc<DetectionSummary>>,
    capacity: usize,
    frames_seen: u64,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            frames_seen: 0,
        }
    }

    /// Append and return whatever fell out of the window.
    pub fn push(&mut self, summary: Arc<DetectionSummary>) -> Option<Arc<DetectionSummary>> {
        self.entries.push_back(summary);
        self.frames_seen += 1;
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<DetectionSummary>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total pushes, including evicted entries.
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CategoryState {
    pub category: String,
    /// Number of window frames with at least one detection of this category.
    pub frames_present: usize,
    /// Largest per-frame count.
    pub max_count: usize,
    pub max_confidence: f32,
    pub mean_confidence: f32,
}

/// Aggregate of one window, categories in order of first appearance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConsolidatedState {
    /// `frames_seen` of the window when this state was taken.
    pub frame_index: u64,
    pub window_len: usize,
    pub categories: Vec<CategoryState>,
}

impl ConsolidatedState {
    pub fn from_window(window: &SlidingWindow) -> Self {
        let mut categories: Vec<CategoryState> = Vec::new();
        let mut confidence_sums: Vec<(f32, usize)> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for summary in window.iter() {
            let mut per_frame: Vec<(usize, usize)> = Vec::new();
            for detection in summary.iter() {
                let slot = *index
                    .entry(detection.category.as_str())
                    .or_insert_with(|| {
                        categories.push(CategoryState {
                            category: detection.category.clone(),
                            frames_present: 0,
                            max_count: 0,
                            max_confidence: 0.0,
                            mean_confidence: 0.0,
                        });
                        confidence_sums.push((0.0, 0));
                        categories.len() - 1
                    });
                let entry = &mut categories[slot];
                entry.max_confidence = entry.max_confidence.max(detection.confidence);
                let sums = &mut confidence_sums[slot];
                sums.0 += detection.confidence;
                sums.1 += 1;
                match per_frame.iter_mut().find(|(s, _)| *s == slot) {
                    Some((_, count)) => *count += 1,
                    None => per_frame.push((slot, 1)),
                }
            }
            for (slot, count) in per_frame {
                let entry = &mut categories[slot];
                entry.frames_present += 1;
                entry.max_count = entry.max_count.max(count);
            }
        }

        for (entry, (sum, n)) in categories.iter_mut().zip(confidence_sums) {
            if n > 0 {
                entry.mean_confidence = sum / n as f32;
            }
        }

        Self {
            frame_index: window.frames_seen(),
            window_len: window.len(),
            categories,
        }
    }

    /// Fraction of window frames that contained `category`.
    pub fn presence(&self, category: &CategoryState) -> f32 {
        if self.window_len == 0 {
            0.0
        } else {
            category.frames_present as f32 / self.window_len as f32
        }
    }

    pub fn category(&self, name: &str) -> Option<&CategoryState> {
        self.categories.iter().find(|c| c.category == name)
    }
}

/// A description produced from one window.
#[derive(Clone, Debug, Serialize)]
pub struct Narration {
    pub text: String,
    pub state: ConsolidatedState,
}

#[derive(Clone, Debug)]
pub struct ConsolidatorConfig {
    pub window: usize,
    pub schedule: NarrationSchedule,
    pub speech_rate: u32,
    pub policy: DescribePolicy,
}

impl Default for ConsolidatorConfig {
    fn default() -> Self {
        Self {
            window: 10,
            schedule: NarrationSchedule::Every(10),
            speech_rate: 240,
            policy: DescribePolicy::default(),
        }
    }
}

pub struct StateConsolidator {
    window: Mutex<SlidingWindow>,
    schedule: NarrationSchedule,
    speech_rate: u32,
    policy: DescribePolicy,
    sink: Arc<dyn NarrationSink>,
    narrations: AtomicU64,
}

impl StateConsolidator {
    pub fn new(config: ConsolidatorConfig, sink: Arc<dyn NarrationSink>) -> Self {
        Self {
            window: Mutex::new(SlidingWindow::new(config.window)),
            schedule: match config.schedule {
                NarrationSchedule::Every(0) => NarrationSchedule::OnQuery,
                schedule => schedule,
            },
            speech_rate: config.speech_rate,
            policy: config.policy,
            sink,
            narrations: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlidingWindow> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one frame's summary; narrates when the schedule says so.
    pub fn update(&self, summary: Arc<DetectionSummary>) -> Option<Narration> {
        let started = Instant::now();
        let due = {
            let mut window = self.lock();
            window.push(summary);
            match self.schedule {
                NarrationSchedule::Every(rate) if window.frames_seen() % rate as u64 == 0 => {
                    Some(ConsolidatedState::from_window(&window))
                }
                _ => None,
            }
        };
        metrics::histogram!("pipeline_consolidation_seconds")
            .record(started.elapsed().as_secs_f64());

        due.map(|state| self.narrate(state))
    }

    /// Narrate the current window immediately.
    pub fn query(&self) -> Narration {
        let state = ConsolidatedState::from_window(&self.lock());
        self.narrate(state)
    }

    fn narrate(&self, state: ConsolidatedState) -> Narration {
        let text = describe(&state, &self.policy);
        debug!(frame = state.frame_index, "narrating window: {text}");
        self.sink.narrate(&text, self.speech_rate);
        self.narrations.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("pipeline_narrations_total").increment(1);
        Narration { text, state }
    }

    /// Current window contents, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<DetectionSummary>> {
        self.lock().iter().cloned().collect()
    }

    pub fn frames_seen(&self) -> u64 {
        self.lock().frames_seen()
    }

    pub fn narrations(&self) -> u64 {
        self.narrations.load(Ordering::Relaxed)
    }

    pub fn schedule(&self) -> NarrationSchedule {
        self.schedule
    }
}
