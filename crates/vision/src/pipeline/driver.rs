//! Pipeline supervisor tying together capture, the analysis workers, and the
//! display.
//!
//! The driver runs on the caller's thread. Each iteration reads the newest
//! frame, pushes it into the input channel (blocking while the workers are
//! behind), takes one annotated frame from the output channel, and shows it.
//! On stop it shuts the worker pool down, releases the source and display,
//! and reports what happened.

use std::{
    fs, io,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use ml_core::{AnalyzerFactory, Annotator};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};
use video_ingest::{CaptureError, Frame, FrameSource};

use crate::{
    narration::NarrationSink,
    pipeline::{
        AnnotatedFrame, BoundedChannel, DisplayControl, FrameDisplay, GetError, PipelineConfig,
        PipelineError, PutError, RateMeter, ReorderBuffer, ShutdownOutcome, StateConsolidator,
        Watchdog, WorkerPool, WorkerSetup,
        watchdog::{HealthComponent, PipelineHealth},
    },
};

/// Collaborators the driver is assembled from.
pub struct PipelineParts {
    pub source: Box<dyn FrameSource>,
    pub factory: Arc<dyn AnalyzerFactory>,
    pub annotator: Arc<dyn Annotator>,
    pub display: Box<dyn FrameDisplay>,
    pub narrator: Arc<dyn NarrationSink>,
}

/// Cloneable handle that asks a running driver to stop after the current
/// iteration.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum StopReason {
    /// Stop handle (Ctrl+C, `q`) fired.
    Requested,
    /// The display asked to quit.
    DisplayQuit,
    /// `max_frames` frames were displayed.
    FrameLimit,
    /// The source ran out of frames.
    EndOfStream,
    /// The source failed after delivering at least one frame.
    CaptureFailed(String),
}

/// Summary of one run, serialisable for `--report`.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub source: String,
    pub workers: usize,
    pub queue_size: usize,
    pub stop_reason: StopReason,
    pub frames_captured: u64,
    pub frames_displayed: u64,
    pub frames_analyzed: u64,
    pub analysis_failures: u64,
    pub display_errors: u64,
    pub backpressure_timeouts: u64,
    pub narrations: u64,
    pub reorder_skipped: u64,
    pub elapsed_secs: f64,
    pub fps: f64,
    pub analysis_fps: f64,
    pub shutdown: ShutdownOutcome,
}

impl RunReport {
    /// Whether the process should exit successfully.
    pub fn is_clean(&self) -> bool {
        !matches!(self.stop_reason, StopReason::CaptureFailed(_))
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(io::BufWriter::new(file), self)?;
        Ok(())
    }
}

pub struct PipelineDriver {
    config: PipelineConfig,
    source: Box<dyn FrameSource>,
    factory: Arc<dyn AnalyzerFactory>,
    annotator: Arc<dyn Annotator>,
    display: Box<dyn FrameDisplay>,
    consolidator: Arc<StateConsolidator>,
    stop: StopHandle,
}

impl PipelineDriver {
    pub fn new(config: PipelineConfig, parts: PipelineParts) -> Result<Self, PipelineError> {
        config.validate()?;
        let consolidator = Arc::new(StateConsolidator::new(
            config.consolidator(),
            parts.narrator,
        ));
        Ok(Self {
            config,
            source: parts.source,
            factory: parts.factory,
            annotator: parts.annotator,
            display: parts.display,
            consolidator,
            stop: StopHandle::default(),
        })
    }

    /// Share an existing stop handle, e.g. one already wired to a signal handler.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Shared consolidator, for on-demand narration while running.
    pub fn consolidator(&self) -> Arc<StateConsolidator> {
        self.consolidator.clone()
    }

    /// Run until a stop condition, then shut down.
    ///
    /// Fails only when the pipeline could not start: the source did not open
    /// or never produced a frame, or an analyzer could not be built.
    pub fn run(self) -> Result<RunReport, PipelineError> {
        let Self {
            config,
            mut source,
            factory,
            annotator,
            mut display,
            consolidator,
            stop,
        } = self;
        let _run_span = info_span!(
            "pipeline.run",
            source = %config.source,
            workers = config.workers,
            queue = config.queue_size,
            window = config.window,
            ordered = config.ordered
        )
        .entered();

        source.start()?;

        let health = Arc::new(PipelineHealth::new());
        let input: Arc<BoundedChannel<Frame>> = Arc::new(BoundedChannel::new(config.queue_size));
        let output: Arc<BoundedChannel<AnnotatedFrame>> =
            Arc::new(BoundedChannel::new(config.queue_size));
        let setup = WorkerSetup {
            workers: config.workers,
            factory,
            annotator,
            consolidator: consolidator.clone(),
            health: health.clone(),
        };
        let mut pool = match WorkerPool::spawn(setup, input.clone(), output.clone()) {
            Ok(pool) => pool,
            Err(err) => {
                source.stop();
                return Err(err);
            }
        };
        let watchdog = match Watchdog::spawn(health.clone(), config.stall_warning) {
            Ok(watchdog) => Some(watchdog),
            Err(err) => {
                warn!("running without stall detection: {err}");
                None
            }
        };

        info!(
            "pipeline running: {} worker(s), queue size {}, window {} ({:?})",
            config.workers,
            config.queue_size,
            config.window,
            consolidator.schedule()
        );

        let meter = RateMeter::new();
        meter.start();
        let mut presenter = Presenter {
            display: display.as_mut(),
            reorder: config
                .ordered
                .then(|| ReorderBuffer::starting_at(1, config.reorder_depth)),
            health: &health,
            meter: &meter,
            displayed: 0,
            display_errors: 0,
            quit: false,
        };
        let mut captured: u64 = 0;
        let mut backpressure_timeouts: u64 = 0;
        let mut setup_failure: Option<CaptureError> = None;

        let stop_reason = 'run: loop {
            if stop.is_stop_requested() {
                break StopReason::Requested;
            }
            if presenter.quit {
                break StopReason::DisplayQuit;
            }
            if let Some(max_frames) = config.max_frames {
                if presenter.displayed >= max_frames {
                    break StopReason::FrameLimit;
                }
            }
            let iteration = Instant::now();

            let frame = match info_span!("capture.read").in_scope(|| source.read()) {
                Ok(frame) => frame,
                Err(CaptureError::EndOfStream) => break StopReason::EndOfStream,
                Err(err) if captured == 0 => {
                    let reason = StopReason::CaptureFailed(err.to_string());
                    setup_failure = Some(err);
                    break reason;
                }
                Err(err) => {
                    error!("capture failed: {err}");
                    break StopReason::CaptureFailed(err.to_string());
                }
            };
            health.beat(HealthComponent::Capture);
            captured += 1;
            metrics::counter!("pipeline_frames_captured_total").increment(1);
            let mut pending = frame.with_sequence(captured);

            loop {
                match input.put_timeout(pending, config.put_timeout) {
                    Ok(()) => break,
                    Err(PutError::Timeout(frame)) => {
                        backpressure_timeouts += 1;
                        metrics::counter!("pipeline_backpressure_timeouts_total").increment(1);
                        warn!(
                            "input queue full for {} ms; capture is waiting on the workers",
                            config.put_timeout.as_millis()
                        );
                        while let Ok(annotated) = output.try_get() {
                            presenter.accept(annotated);
                        }
                        if stop.is_stop_requested() {
                            break 'run StopReason::Requested;
                        }
                        pending = frame;
                    }
                    Err(_) => break 'run StopReason::Requested,
                }
            }
            metrics::gauge!("pipeline_queue_depth", "queue" => "input").set(input.len() as f64);

            match info_span!("output.get").in_scope(|| output.get_timeout(config.get_timeout)) {
                Ok(annotated) => {
                    metrics::gauge!("pipeline_queue_depth", "queue" => "output")
                        .set(output.len() as f64);
                    presenter.accept(annotated);
                }
                Err(GetError::Timeout) => {
                    backpressure_timeouts += 1;
                    metrics::counter!("pipeline_backpressure_timeouts_total").increment(1);
                    warn!(
                        "no annotated frame within {} ms",
                        config.get_timeout.as_millis()
                    );
                }
                Err(_) => break StopReason::Requested,
            }

            debug!(
                "elapsed time: {:.2} ms",
                iteration.elapsed().as_secs_f64() * 1_000.0
            );
        };

        if stop_reason == StopReason::EndOfStream {
            presenter.flush();
        }
        meter.stop();
        let reorder_skipped = presenter.reorder.as_ref().map_or(0, |r| r.skipped());
        let (displayed, display_errors) = (presenter.displayed, presenter.display_errors);
        drop(presenter);

        let shutdown = pool.shutdown(config.shutdown_grace);
        let stats = pool.stats();
        let analysis_fps = pool.throughput();
        source.stop();
        display.close();
        if let Some(watchdog) = watchdog {
            watchdog.stop();
        }

        if let Some(err) = setup_failure {
            return Err(PipelineError::Capture(err));
        }

        let elapsed = meter.elapsed().unwrap_or_default().as_secs_f64();
        let fps = meter.fps();
        info!("stopping pipeline: {stop_reason:?}");
        info!("elapsed time (total): {elapsed:.2}");
        info!("approx. FPS: {fps:.2}");
        metrics::gauge!("pipeline_fps").set(fps);
        metrics::counter!("pipeline_reorder_skipped_total").increment(reorder_skipped);

        Ok(RunReport {
            source: config.source.clone(),
            workers: config.workers,
            queue_size: config.queue_size,
            stop_reason,
            frames_captured: captured,
            frames_displayed: displayed,
            frames_analyzed: stats.processed,
            analysis_failures: stats.failures,
            display_errors,
            backpressure_timeouts,
            narrations: consolidator.narrations(),
            reorder_skipped,
            elapsed_secs: elapsed,
            fps,
            analysis_fps,
            shutdown,
        })
    }
}

/// Display-side bookkeeping: optional reordering, heartbeats, and counters.
struct Presenter<'a> {
    display: &'a mut dyn FrameDisplay,
    reorder: Option<ReorderBuffer<AnnotatedFrame>>,
    health: &'a PipelineHealth,
    meter: &'a RateMeter,
    displayed: u64,
    display_errors: u64,
    quit: bool,
}

impl Presenter<'_> {
    fn accept(&mut self, annotated: AnnotatedFrame) {
        let ready = match self.reorder.as_mut() {
            Some(reorder) => reorder.push(annotated.sequence(), annotated),
            None => vec![annotated],
        };
        for annotated in ready {
            self.show(annotated);
        }
    }

    fn flush(&mut self) {
        let remaining = self
            .reorder
            .as_mut()
            .map(ReorderBuffer::flush)
            .unwrap_or_default();
        for annotated in remaining {
            self.show(annotated);
        }
    }

    fn show(&mut self, annotated: AnnotatedFrame) {
        let _span = info_span!("display", frame = annotated.sequence()).entered();
        match self.display.show(&annotated) {
            Ok(DisplayControl::Continue) => {}
            Ok(DisplayControl::Quit) => self.quit = true,
            Err(err) => {
                self.display_errors += 1;
                warn!("display failed on frame #{}: {err:#}", annotated.sequence());
            }
        }
        self.health.beat(HealthComponent::Display);
        self.meter.update();
        self.displayed += 1;
        metrics::counter!("pipeline_frames_displayed_total").increment(1);
    }
}
