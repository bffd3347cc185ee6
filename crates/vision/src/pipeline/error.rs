use std::io;

use thiserror::Error;
use video_ingest::CaptureError;

/// Failures that stop the pipeline from starting or force it to abort.
///
/// Per-frame analysis problems never surface here; workers log and skip them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("capture source failed")]
    Capture(#[from] CaptureError),
    #[error("analysis backend failed to initialise: {0}")]
    AnalyzerInit(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to spawn {what} thread")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        PipelineError::Config(message.into())
    }

    pub(crate) fn spawn(what: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| PipelineError::Spawn { what, source }
    }
}
