//! Contracts between the pipeline and its analysis collaborators.

use std::path::PathBuf;

use anyhow::Error;
use thiserror::Error;
use video_ingest::Frame;

use crate::detection::DetectionSummary;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("annotation failed: {0}")]
    Annotation(String),
    #[error("failed to load model {path:?}: {reason}")]
    ModelLoad { path: PathBuf, reason: String },
    #[error(transparent)]
    Other(#[from] Error),
}

/// Turns a frame into the set of objects seen in it.
///
/// Each pipeline worker owns its own analyzer, so implementations may keep
/// per-instance scratch state without synchronisation.
pub trait Analyzer: Send {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionSummary, AnalysisError>;
}

/// Builds one analyzer per worker. Called on the worker's own thread.
pub trait AnalyzerFactory: Send + Sync {
    fn create(&self, worker_index: usize) -> Result<Box<dyn Analyzer>, AnalysisError>;
}

impl<F> AnalyzerFactory for F
where
    F: Fn(usize) -> Result<Box<dyn Analyzer>, AnalysisError> + Send + Sync,
{
    fn create(&self, worker_index: usize) -> Result<Box<dyn Analyzer>, AnalysisError> {
        self(worker_index)
    }
}

/// Overlays detections onto a frame. Shared by all workers.
pub trait Annotator: Send + Sync {
    fn annotate(&self, frame: Frame, summary: &DetectionSummary) -> Result<Frame, AnalysisError>;
}

/// Annotator that hands frames through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl Annotator for PassThrough {
    fn annotate(&self, frame: Frame, _summary: &DetectionSummary) -> Result<Frame, AnalysisError> {
        Ok(frame)
    }
}
