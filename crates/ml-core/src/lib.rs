//! Detection types and the analysis/annotation contracts the pipeline drives.
//!
//! Enable the `with-tch` feature to pull in the `tch` crate and the
//! TorchScript detector.

mod analyzer;
mod annotate;
mod detection;
pub mod labels;
mod threshold;

#[cfg(feature = "with-tch")]
pub mod detector;

pub use analyzer::{AnalysisError, Analyzer, AnalyzerFactory, Annotator, PassThrough};
pub use annotate::BoxAnnotator;
pub use detection::{Detection, DetectionSummary, Region};
pub use labels::LabelMap;
pub use threshold::ThresholdDetector;

#[cfg(feature = "with-tch")]
pub use tch;
