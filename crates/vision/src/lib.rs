//! Real-time frame pipeline that analyses a video source with a pool of
//! workers and narrates what it has been seeing over a sliding window.

pub mod narration;
pub mod pipeline;

pub use narration::{LogNarrator, NarrationSink, Narrators, RecordingNarrator, SpeechNarrator};
pub use pipeline::{
    PipelineCliArgs, PipelineConfig, PipelineDriver, PipelineError, PipelineParts, RunReport,
    StopReason,
};
