use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use ml_core::{
    AnalysisError, Analyzer, BoxAnnotator, Detection, DetectionSummary, PassThrough, Region,
    ThresholdDetector,
};
use video_ingest::{CaptureError, Frame, FrameFormat, FrameSource};
use vision::{
    PipelineConfig, PipelineDriver, PipelineError, PipelineParts, RecordingNarrator, StopReason,
    pipeline::{AnnotatedFrame, DisplayControl, FrameDisplay, StopHandle},
};

/// Plays back a fixed number of frames, then reports end of stream.
struct ScriptedSource {
    remaining: VecDeque<Frame>,
    fail_start: bool,
    fail_first_read: bool,
    pace: Duration,
}

impl ScriptedSource {
    fn frames(count: usize) -> Self {
        Self {
            remaining: (0..count)
                .map(|_| Frame::filled(8, 8, FrameFormat::Bgr8, 0))
                .collect(),
            fail_start: false,
            fail_first_read: false,
            pace: Duration::ZERO,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.fail_start {
            return Err(CaptureError::Open {
                uri: "scripted".into(),
            });
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.fail_first_read {
            return Err(CaptureError::NoFrame {
                source_name: "scripted".into(),
                waited: Duration::from_millis(1),
            });
        }
        thread::sleep(self.pace);
        self.remaining.pop_front().ok_or(CaptureError::EndOfStream)
    }

    fn stop(&mut self) {}
}

/// Records displayed sequence numbers; optionally quits or stops after `limit`.
#[derive(Clone, Default)]
struct CollectingDisplay {
    shown: Arc<Mutex<Vec<u64>>>,
    quit_after: Option<usize>,
    stop_after: Option<(usize, StopHandle)>,
}

impl FrameDisplay for CollectingDisplay {
    fn show(&mut self, frame: &AnnotatedFrame) -> anyhow::Result<DisplayControl> {
        let mut shown = self.shown.lock().unwrap();
        shown.push(frame.sequence());
        if let Some((limit, handle)) = &self.stop_after {
            if shown.len() >= *limit {
                handle.request_stop();
            }
        }
        match self.quit_after {
            Some(limit) if shown.len() >= limit => Ok(DisplayControl::Quit),
            _ => Ok(DisplayControl::Continue),
        }
    }
}

/// Reports one "dog" per frame, and fails on the listed sequence numbers.
struct DogSpotter {
    fail_on: Vec<u64>,
    jitter: bool,
    delay: Duration,
}

impl Analyzer for DogSpotter {
    fn detect(&mut self, frame: &Frame) -> Result<DetectionSummary, AnalysisError> {
        if self.jitter {
            thread::sleep(Duration::from_millis((frame.sequence * 7) % 5));
        }
        thread::sleep(self.delay);
        if self.fail_on.contains(&frame.sequence) {
            return Err(AnalysisError::Inference("scripted failure".into()));
        }
        Ok(DetectionSummary::new(vec![Detection {
            category: "dog".into(),
            class_id: 16,
            confidence: 0.9,
            region: Region::new(0.1, 0.1, 0.4, 0.4),
        }]))
    }
}

fn config(workers: usize, queue_size: usize) -> PipelineConfig {
    PipelineConfig {
        source: "scripted".into(),
        workers,
        queue_size,
        window: 4,
        update_rate: -1,
        min_presence: 0.5,
        confidence: 0.0,
        get_timeout: Duration::from_millis(500),
        put_timeout: Duration::from_millis(500),
        shutdown_grace: Duration::from_secs(2),
        ..Default::default()
    }
}

fn parts(
    source: ScriptedSource,
    display: CollectingDisplay,
    fail_on: Vec<u64>,
) -> (PipelineParts, Arc<RecordingNarrator>) {
    let narrator = Arc::new(RecordingNarrator::new());
    let parts = PipelineParts {
        source: Box::new(source),
        factory: Arc::new(move |_: usize| -> Result<Box<dyn Analyzer>, AnalysisError> {
            Ok(Box::new(DogSpotter {
                fail_on: fail_on.clone(),
                jitter: true,
                delay: Duration::ZERO,
            }))
        }),
        annotator: Arc::new(PassThrough),
        display: Box::new(display),
        narrator: narrator.clone(),
    };
    (parts, narrator)
}

#[test]
fn runs_until_end_of_stream() {
    let display = CollectingDisplay::default();
    let shown = display.shown.clone();
    let (parts, narrator) = parts(ScriptedSource::frames(40), display, Vec::new());

    let report = PipelineDriver::new(config(3, 2), parts)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert!(report.is_clean());
    assert_eq!(report.frames_captured, 40);
    let shown = shown.lock().unwrap();
    assert_eq!(report.frames_displayed, shown.len() as u64);
    assert!(!shown.is_empty());
    let unique: HashSet<u64> = shown.iter().copied().collect();
    assert_eq!(unique.len(), shown.len(), "a frame was displayed twice");
    assert!(shown.iter().all(|seq| (1..=40).contains(seq)));

    assert_eq!(report.narrations, narrator.len() as u64);
    assert!(report.narrations >= 1);
    assert!(narrator.texts().iter().all(|text| text == "I see a dog."));
}

#[test]
fn failed_frame_does_not_stop_the_run() {
    let display = CollectingDisplay::default();
    let shown = display.shown.clone();
    let (parts, _) = parts(ScriptedSource::frames(12), display, vec![5]);

    let report = PipelineDriver::new(config(2, 3), parts)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert_eq!(report.analysis_failures, 1);
    assert!(!shown.lock().unwrap().contains(&5));
    assert!(report.frames_displayed >= 1);
}

#[test]
fn stops_at_frame_limit() {
    let display = CollectingDisplay::default();
    let (parts, _) = parts(ScriptedSource::frames(200), display, Vec::new());
    let config = PipelineConfig {
        max_frames: Some(10),
        ..config(2, 2)
    };

    let report = PipelineDriver::new(config, parts).unwrap().run().unwrap();
    assert_eq!(report.stop_reason, StopReason::FrameLimit);
    assert_eq!(report.frames_displayed, 10);
    assert!(report.frames_captured >= 10);
}

#[test]
fn display_can_quit() {
    let display = CollectingDisplay {
        quit_after: Some(3),
        ..Default::default()
    };
    let (parts, _) = parts(ScriptedSource::frames(500), display, Vec::new());
    let report = PipelineDriver::new(config(2, 2), parts)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(report.stop_reason, StopReason::DisplayQuit);
    assert!(report.frames_displayed >= 3);
    assert!(report.frames_captured < 500);
}

#[test]
fn stop_handle_ends_the_run() {
    let stop = StopHandle::new();
    let display = CollectingDisplay {
        stop_after: Some((4, stop.clone())),
        ..Default::default()
    };
    let (parts, _) = parts(ScriptedSource::frames(500), display, Vec::new());
    let report = PipelineDriver::new(config(2, 2), parts)
        .unwrap()
        .with_stop_handle(stop.clone())
        .run()
        .unwrap();
    assert!(stop.is_stop_requested());
    assert_eq!(report.stop_reason, StopReason::Requested);
    assert!(report.frames_captured < 500);
}

#[test]
fn ordered_mode_displays_in_capture_order() {
    let display = CollectingDisplay::default();
    let shown = display.shown.clone();
    let (parts, _) = parts(ScriptedSource::frames(60), display, vec![9, 30]);
    let config = PipelineConfig {
        ordered: true,
        reorder_depth: 4,
        ..config(4, 3)
    };

    let report = PipelineDriver::new(config, parts).unwrap().run().unwrap();
    let shown = shown.lock().unwrap();
    assert!(shown.windows(2).all(|pair| pair[0] < pair[1]), "{shown:?}");
    assert!(!shown.contains(&9) && !shown.contains(&30));
    assert!(report.reorder_skipped >= 2);
}

#[test]
fn source_that_cannot_open_is_a_setup_failure() {
    let mut source = ScriptedSource::frames(5);
    source.fail_start = true;
    let (open_parts, _) = parts(source, CollectingDisplay::default(), Vec::new());
    let err = PipelineDriver::new(config(2, 2), open_parts)
        .unwrap()
        .run()
        .unwrap_err();
    assert!(matches!(err, PipelineError::Capture(CaptureError::Open { .. })));

    let mut source = ScriptedSource::frames(5);
    source.fail_first_read = true;
    let (parts, _) = parts(source, CollectingDisplay::default(), Vec::new());
    let err = PipelineDriver::new(config(2, 2), parts)
        .unwrap()
        .run()
        .unwrap_err();
    assert!(matches!(err, PipelineError::Capture(CaptureError::NoFrame { .. })));
}

#[test]
fn analyzer_that_cannot_load_is_a_setup_failure() {
    let (mut parts, _) = parts(ScriptedSource::frames(5), CollectingDisplay::default(), Vec::new());
    parts.factory = Arc::new(|_: usize| -> Result<Box<dyn Analyzer>, AnalysisError> {
        Err(AnalysisError::ModelLoad {
            path: "yolo.torchscript".into(),
            reason: "file not found".into(),
        })
    });
    let err = PipelineDriver::new(config(2, 2), parts)
        .unwrap()
        .run()
        .unwrap_err();
    assert!(matches!(err, PipelineError::AnalyzerInit(_)));
}

#[test]
fn invalid_config_is_rejected_before_start() {
    let (parts, _) = parts(ScriptedSource::frames(1), CollectingDisplay::default(), Vec::new());
    let err = PipelineDriver::new(config(0, 2), parts).err().unwrap();
    assert!(matches!(err, PipelineError::Config(_)));
}

#[test]
fn synthetic_source_is_narrated_end_to_end() {
    let display = CollectingDisplay::default();
    let narrator = Arc::new(RecordingNarrator::new());
    let config = PipelineConfig {
        source: "synthetic".into(),
        width: 160,
        height: 120,
        window: 5,
        update_rate: 5,
        max_frames: Some(12),
        ..config(2, 2)
    };
    let parts = PipelineParts {
        source: video_ingest::open_source(&config.source, (config.width, config.height)).unwrap(),
        factory: Arc::new(|_: usize| -> Result<Box<dyn Analyzer>, AnalysisError> {
            Ok(Box::new(ThresholdDetector::new("box")))
        }),
        annotator: Arc::new(BoxAnnotator::default()),
        display: Box::new(display),
        narrator: narrator.clone(),
    };

    let report = PipelineDriver::new(config, parts).unwrap().run().unwrap();
    assert_eq!(report.stop_reason, StopReason::FrameLimit);
    assert_eq!(report.analysis_failures, 0);
    assert!(report.narrations >= 2);
    assert!(
        narrator.texts().iter().all(|text| text.starts_with("I see")),
        "{:?}",
        narrator.texts()
    );
}

#[test]
fn slow_workers_push_back_on_capture() {
    let display = CollectingDisplay::default();
    let shown = display.shown.clone();
    let (mut parts, _) = parts(ScriptedSource::frames(12), display, Vec::new());
    parts.factory = Arc::new(|_: usize| -> Result<Box<dyn Analyzer>, AnalysisError> {
        Ok(Box::new(DogSpotter {
            fail_on: Vec::new(),
            jitter: false,
            delay: Duration::from_millis(40),
        }))
    });
    let config = PipelineConfig {
        put_timeout: Duration::from_millis(5),
        get_timeout: Duration::from_millis(1),
        ..config(1, 1)
    };

    let report = PipelineDriver::new(config, parts).unwrap().run().unwrap();

    assert_eq!(report.stop_reason, StopReason::EndOfStream);
    assert_eq!(report.frames_captured, 12);
    assert!(report.backpressure_timeouts > 0);
    let shown = shown.lock().unwrap();
    assert!(!shown.is_empty());
    let unique: HashSet<u64> = shown.iter().copied().collect();
    assert_eq!(unique.len(), shown.len(), "a frame was displayed twice");
    assert_eq!(report.frames_displayed, shown.len() as u64);
}
