//! Elapsed-time and throughput instrumentation.

use std::{
    sync::{
        Arc, Mutex, OnceLock, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

/// Time source for [`RateMeter`].
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Clock that only moves when told to. For simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Frame counter plus start/stop timestamps.
///
/// `start` and `stop` take effect once; later calls are ignored. `update` only
/// counts while the meter is running and may be called from any thread.
#[derive(Debug)]
pub struct RateMeter<C: Clock = MonotonicClock> {
    clock: C,
    started: OnceLock<Instant>,
    stopped: OnceLock<Instant>,
    frames: AtomicU64,
}

impl RateMeter {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock)
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> RateMeter<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            started: OnceLock::new(),
            stopped: OnceLock::new(),
            frames: AtomicU64::new(0),
        }
    }

    pub fn start(&self) -> &Self {
        if self.started.set(self.clock.now()).is_ok() {
            self.frames.store(0, Ordering::SeqCst);
        }
        self
    }

    pub fn update(&self) {
        if self.is_running() {
            self.frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stop(&self) {
        if self.started.get().is_some() {
            let _ = self.stopped.set(self.clock.now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.get().is_some() && self.stopped.get().is_none()
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Stop − start, or now − start while running. `None` before `start`.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = *self.started.get()?;
        let end = self
            .stopped
            .get()
            .copied()
            .unwrap_or_else(|| self.clock.now());
        Some(end.saturating_duration_since(started))
    }

    /// Frames per second; 0.0 until some time has elapsed.
    pub fn fps(&self) -> f64 {
        match self.elapsed() {
            Some(elapsed) if !elapsed.is_zero() => self.frames() as f64 / elapsed.as_secs_f64(),
            _ => 0.0,
        }
    }
}
