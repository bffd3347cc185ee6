//! Capture → bounded queue → analysis workers → bounded queue → display.

mod channel;
pub mod config;
mod consolidator;
mod display;
mod driver;
mod error;
mod rate;
mod reorder;
pub mod telemetry;
pub mod watchdog;
mod workers;

pub use channel::{BoundedChannel, GetError, PutError};
pub use config::{PipelineCliArgs, PipelineConfig, TelemetryOptions};
pub use consolidator::{
    CategoryState, ConsolidatedState, ConsolidatorConfig, Narration, NarrationSchedule,
    SlidingWindow, StateConsolidator,
};
pub use display::{DisplayControl, FrameDisplay, HeadlessDisplay};
pub use driver::{PipelineDriver, PipelineParts, RunReport, StopHandle, StopReason};
pub use error::PipelineError;
pub use rate::{Clock, ManualClock, MonotonicClock, RateMeter};
pub use reorder::ReorderBuffer;
pub use watchdog::{HealthComponent, PipelineHealth, Watchdog};
pub use workers::{AnnotatedFrame, PoolStats, ShutdownOutcome, WorkerPool, WorkerSetup};
