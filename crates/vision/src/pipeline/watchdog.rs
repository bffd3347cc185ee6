//! Watchdog that reports stalled pipeline stages.
//!
//! Capture, the worker pool, and the display each emit heartbeats. When one of
//! them goes quiet for longer than the stall threshold the watchdog logs a
//! warning once, and logs again when the stage recovers. It never restarts
//! anything; a stage blocked on backpressure is expected to resume by itself.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::{info, warn};

use crate::pipeline::{PipelineError, telemetry};

/// Longest sleep between health checks.
const WATCHDOG_MAX_POLL: Duration = Duration::from_millis(250);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Logical components monitored by the watchdog.
pub enum HealthComponent {
    Capture,
    Worker,
    Display,
}

impl HealthComponent {
    pub const ALL: [HealthComponent; 3] = [
        HealthComponent::Capture,
        HealthComponent::Worker,
        HealthComponent::Display,
    ];

    /// Human readable label used in log messages and metrics.
    pub fn label(self) -> &'static str {
        match self {
            HealthComponent::Capture => "capture",
            HealthComponent::Worker => "analysis",
            HealthComponent::Display => "display",
        }
    }

    fn index(self) -> usize {
        match self {
            HealthComponent::Capture => 0,
            HealthComponent::Worker => 1,
            HealthComponent::Display => 2,
        }
    }
}

/// Last heartbeat per component, in milliseconds since the Unix epoch.
pub struct PipelineHealth {
    beats: [AtomicU64; 3],
}

impl PipelineHealth {
    /// Every component starts as if it had just beaten.
    pub fn new() -> Self {
        let now = current_millis();
        Self {
            beats: [
                AtomicU64::new(now),
                AtomicU64::new(now),
                AtomicU64::new(now),
            ],
        }
    }

    /// Register a heartbeat for the supplied component.
    pub fn beat(&self, component: HealthComponent) {
        self.beats[component.index()].store(current_millis(), Ordering::Relaxed);
    }

    /// Milliseconds since `component` last beat, as of `now`.
    pub fn silence_ms(&self, component: HealthComponent, now: u64) -> u64 {
        now.saturating_sub(self.beats[component.index()].load(Ordering::Relaxed))
    }

    /// Components quiet for longer than `threshold`.
    pub fn stale_components(&self, now: u64, threshold: Duration) -> Vec<HealthComponent> {
        let threshold = threshold.as_millis() as u64;
        HealthComponent::ALL
            .into_iter()
            .filter(|component| self.silence_ms(*component, now) > threshold)
            .collect()
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running watchdog thread.
pub struct Watchdog {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Watchdog {
    /// Spawn the watchdog thread that polls component health.
    pub fn spawn(health: Arc<PipelineHealth>, threshold: Duration) -> Result<Self, PipelineError> {
        let running = Arc::new(AtomicBool::new(true));
        let poll = (threshold / 4).clamp(Duration::from_millis(10), WATCHDOG_MAX_POLL);
        let handle = telemetry::spawn_thread("pipeline-watchdog", {
            let running = running.clone();
            move || {
                let mut stalled = [false; 3];
                while running.load(Ordering::Relaxed) {
                    thread::sleep(poll);
                    let now = current_millis();
                    for component in HealthComponent::ALL {
                        let silence = health.silence_ms(component, now);
                        let is_stale = silence > threshold.as_millis() as u64;
                        let was_stale = &mut stalled[component.index()];
                        if is_stale && !*was_stale {
                            warn!(
                                "{} stage has made no progress for {silence} ms",
                                component.label()
                            );
                            metrics::counter!("pipeline_stalls_total", "stage" => component.label())
                                .increment(1);
                        } else if !is_stale && *was_stale {
                            info!("{} stage resumed", component.label());
                        }
                        *was_stale = is_stale;
                    }
                }
            }
        })
        .map_err(PipelineError::spawn("watchdog"))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_components_are_stale() {
        let health = PipelineHealth::new();
        let later = current_millis() + 5_000;
        health.beat(HealthComponent::Worker);

        let stale = health.stale_components(later, Duration::from_secs(3));
        assert_eq!(stale.len(), 3);
        assert!(
            health
                .stale_components(current_millis(), Duration::from_secs(3))
                .is_empty()
        );
    }

    #[test]
    fn watchdog_stops_promptly() {
        let health = Arc::new(PipelineHealth::new());
        let watchdog = Watchdog::spawn(health.clone(), Duration::from_millis(40)).unwrap();
        std::thread::sleep(Duration::from_millis(120));
        health.beat(HealthComponent::Capture);
        watchdog.stop();
    }
}
