//! Latest-frame capture reader.
//!
//! A background thread pulls frames from a blocking [`FrameProducer`] as fast
//! as the device delivers them and keeps only the most recent one. Consumers
//! call [`FrameSource::read`], which never waits on the device: it hands back
//! a copy of whatever frame is newest, so calling it faster than the device
//! rate yields duplicates and calling it slower skips frames.

use std::{
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::types::{CaptureError, Frame};

/// How long `read` waits for the very first frame after `start`.
pub const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
/// How long `stop` waits for the capture thread before detaching it.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Capture contract consumed by the pipeline driver.
pub trait FrameSource: Send {
    /// Open the device and begin capturing. Fails if the source is unavailable.
    fn start(&mut self) -> Result<(), CaptureError>;
    /// Most recent frame; may repeat a frame already returned.
    fn read(&mut self) -> Result<Frame, CaptureError>;
    /// Stop capturing and release the device.
    fn stop(&mut self);
}

/// Blocking frame supplier driven by [`LatestFrameReader`]'s thread.
pub trait FrameProducer: Send + 'static {
    fn name(&self) -> &str;
    /// Acquire the underlying device. Called on the caller's thread by `start`.
    fn open(&mut self) -> Result<(), CaptureError>;
    /// Block until the next frame. `Ok(None)` marks the end of a finite stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
    fn close(&mut self) {}
}

enum ProducerStatus {
    Running,
    Finished,
    Failed(Option<CaptureError>),
}

struct Slot {
    latest: Option<Frame>,
    status: ProducerStatus,
}

struct Shared {
    slot: Mutex<Slot>,
    arrived: Condvar,
}

pub struct LatestFrameReader<P: FrameProducer> {
    name: String,
    producer: Option<P>,
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    first_frame_timeout: Duration,
}

impl<P: FrameProducer> LatestFrameReader<P> {
    pub fn new(producer: P) -> Self {
        Self {
            name: producer.name().to_string(),
            producer: Some(producer),
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    latest: None,
                    status: ProducerStatus::Running,
                }),
                arrived: Condvar::new(),
            }),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            first_frame_timeout: FIRST_FRAME_TIMEOUT,
        }
    }

    pub fn with_first_frame_timeout(mut self, timeout: Duration) -> Self {
        self.first_frame_timeout = timeout;
        self
    }
}

impl<P: FrameProducer> FrameSource for LatestFrameReader<P> {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let mut producer = self.producer.take().ok_or(CaptureError::NotStarted)?;
        producer.open()?;

        let shared = self.shared.clone();
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.name))
            .spawn(move || capture_loop(producer, shared, stop))
            .map_err(|err| CaptureError::Other(err.into()))?;
        self.handle = Some(handle);
        debug!(source = %self.name, "capture thread started");
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.handle.is_none() {
            return Err(CaptureError::NotStarted);
        }
        let deadline = Instant::now() + self.first_frame_timeout;
        let mut slot = self
            .shared
            .slot
            .lock()
            .map_err(|_| CaptureError::Other(anyhow!("capture slot poisoned")))?;
        loop {
            match &mut slot.status {
                ProducerStatus::Failed(err) => {
                    return Err(err.take().unwrap_or(CaptureError::EndOfStream));
                }
                ProducerStatus::Finished => return Err(CaptureError::EndOfStream),
                ProducerStatus::Running => {}
            }
            if let Some(frame) = slot.latest.as_ref() {
                return Ok(frame.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CaptureError::NoFrame {
                    source_name: self.name.clone(),
                    waited: self.first_frame_timeout,
                });
            }
            slot = self
                .shared
                .arrived
                .wait_timeout(slot, deadline - now)
                .map_err(|_| CaptureError::Other(anyhow!("capture slot poisoned")))?
                .0;
        }
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        let Some(handle) = self.handle.take() else {
            return;
        };
        let deadline = Instant::now() + STOP_JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            let _ = handle.join();
        } else {
            warn!(source = %self.name, "capture thread still blocked on the device; detaching");
        }
    }
}

impl<P: FrameProducer> Drop for LatestFrameReader<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop<P: FrameProducer>(mut producer: P, shared: Arc<Shared>, stop: Arc<AtomicBool>) {
    let outcome = loop {
        if stop.load(Ordering::Relaxed) {
            break ProducerStatus::Finished;
        }
        match producer.next_frame() {
            Ok(Some(frame)) => {
                if let Ok(mut slot) = shared.slot.lock() {
                    slot.latest = Some(frame);
                }
                shared.arrived.notify_all();
            }
            Ok(None) => break ProducerStatus::Finished,
            Err(err) => break ProducerStatus::Failed(Some(err)),
        }
    };
    producer.close();
    if let Ok(mut slot) = shared.slot.lock() {
        slot.status = outcome;
    }
    shared.arrived.notify_all();
}
