//! Builds the concrete source, analyzers and sinks for a pipeline run.

use std::sync::Arc;

use anyhow::{Context, Result};
use ml_core::{AnalysisError, Analyzer, AnalyzerFactory, BoxAnnotator, LabelMap, ThresholdDetector};
use tracing::info;
use vision::{
    LogNarrator, Narrators, PipelineConfig, PipelineParts, SpeechNarrator,
    pipeline::{FrameDisplay, HeadlessDisplay},
};

use crate::display::JpegSnapshotDisplay;

/// Category reported by the built-in detector for bright regions.
const THRESHOLD_CATEGORY: &str = "bright object";

pub fn build_parts(config: &PipelineConfig) -> Result<PipelineParts> {
    let source = video_ingest::open_source(&config.source, (config.width, config.height))
        .with_context(|| format!("Failed to create source for {}", config.source))?;

    let labels = match &config.labels_path {
        Some(path) => LabelMap::from_file(path)?,
        None => LabelMap::coco(),
    };

    let display: Box<dyn FrameDisplay> = match &config.snapshot_path {
        Some(path) => {
            info!("writing annotated frames to {}", path.display());
            Box::new(JpegSnapshotDisplay::new(path.clone()))
        }
        None => Box::new(HeadlessDisplay::default()),
    };

    let mut narrators = Narrators::new().with(Arc::new(LogNarrator));
    if let Some(command) = &config.speech_command {
        narrators.push(Arc::new(SpeechNarrator::spawn(command)?));
    }

    Ok(PipelineParts {
        source,
        factory: analyzer_factory(config, labels)?,
        annotator: Arc::new(BoxAnnotator::default()),
        display,
        narrator: Arc::new(narrators),
    })
}

fn analyzer_factory(config: &PipelineConfig, labels: LabelMap) -> Result<Arc<dyn AnalyzerFactory>> {
    if let Some(model_path) = &config.model_path {
        return torch_factory(config, model_path.clone(), labels);
    }
    info!(
        "no --model given; using the built-in brightness detector ({} categories known)",
        labels.len()
    );
    let confidence = config.confidence;
    Ok(Arc::new(
        move |_: usize| -> Result<Box<dyn Analyzer>, AnalysisError> {
            Ok(Box::new(
                ThresholdDetector::new(THRESHOLD_CATEGORY).with_min_confidence(confidence),
            ))
        },
    ))
}

#[cfg(feature = "with-tch")]
fn torch_factory(
    config: &PipelineConfig,
    model_path: std::path::PathBuf,
    labels: LabelMap,
) -> Result<Arc<dyn AnalyzerFactory>> {
    Ok(Arc::new(ml_core::detector::TorchDetectorFactory {
        model_path,
        labels: Arc::new(labels),
        confidence_threshold: config.confidence,
        use_cpu: config.use_cpu,
    }))
}

#[cfg(not(feature = "with-tch"))]
fn torch_factory(
    _config: &PipelineConfig,
    model_path: std::path::PathBuf,
    _labels: LabelMap,
) -> Result<Arc<dyn AnalyzerFactory>> {
    anyhow::bail!(
        "cannot load {}: this build has no TorchScript support (enable the `with-tch` feature)",
        model_path.display()
    )
}
