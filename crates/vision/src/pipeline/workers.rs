//! Analysis worker threads.
//!
//! Each worker builds its own analyzer, then loops: take a frame from the input
//! channel, detect, annotate, feed the consolidator, hand the result to the
//! output channel, bump the rate meter. A frame that fails analysis is logged
//! and dropped; the worker carries on with the next one. Output order across
//! workers is not defined.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use ml_core::{AnalysisError, Analyzer, AnalyzerFactory, Annotator, DetectionSummary};
use serde::Serialize;
use tracing::{debug, info_span, warn};
use video_ingest::Frame;

use crate::pipeline::{
    BoundedChannel, PipelineError, RateMeter, StateConsolidator,
    telemetry,
    watchdog::{HealthComponent, PipelineHealth},
};

/// A frame after analysis, ready for display.
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub summary: Arc<DetectionSummary>,
    pub worker: usize,
    pub analysis_time: Duration,
}

impl AnnotatedFrame {
    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }
}

/// Everything a worker pool is built from.
#[derive(Clone)]
pub struct WorkerSetup {
    pub workers: usize,
    pub factory: Arc<dyn AnalyzerFactory>,
    pub annotator: Arc<dyn Annotator>,
    pub consolidator: Arc<StateConsolidator>,
    pub health: Arc<PipelineHealth>,
}

#[derive(Debug, Default)]
struct PoolCounters {
    processed: AtomicU64,
    failures: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub processed: u64,
    pub failures: u64,
}

/// How [`WorkerPool::shutdown`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ShutdownOutcome {
    /// Every worker exited within the grace period.
    Graceful { discarded: usize },
    /// Some workers were still busy and were abandoned.
    Forced { discarded: usize, abandoned: usize },
}

struct WorkerContext {
    index: usize,
    input: Arc<BoundedChannel<Frame>>,
    output: Arc<BoundedChannel<AnnotatedFrame>>,
    annotator: Arc<dyn Annotator>,
    consolidator: Arc<StateConsolidator>,
    health: Arc<PipelineHealth>,
    meter: Arc<RateMeter>,
    counters: Arc<PoolCounters>,
    stop: Arc<AtomicBool>,
}

/// Reports a worker's exit to the pool, including exits by unwinding.
struct ExitNotice {
    index: usize,
    done_tx: Sender<usize>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.done_tx.try_send(self.index);
    }
}

pub struct WorkerPool {
    handles: Vec<thread::JoinHandle<()>>,
    done_rx: Receiver<usize>,
    input: Arc<BoundedChannel<Frame>>,
    output: Arc<BoundedChannel<AnnotatedFrame>>,
    meter: Arc<RateMeter>,
    counters: Arc<PoolCounters>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Start `setup.workers` threads and wait until each has built its analyzer.
    ///
    /// If any analyzer fails to build, every worker is stopped and the first
    /// failure is returned.
    pub fn spawn(
        setup: WorkerSetup,
        input: Arc<BoundedChannel<Frame>>,
        output: Arc<BoundedChannel<AnnotatedFrame>>,
    ) -> Result<Self, PipelineError> {
        let workers = setup.workers.max(1);
        let meter = Arc::new(RateMeter::new());
        let counters = Arc::new(PoolCounters::default());
        let stop = Arc::new(AtomicBool::new(false));
        let (init_tx, init_rx) =
            crossbeam_channel::bounded::<Result<String, String>>(workers);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<usize>(workers);

        let mut pool = Self {
            handles: Vec::with_capacity(workers),
            done_rx,
            input: input.clone(),
            output: output.clone(),
            meter: meter.clone(),
            counters: counters.clone(),
            stop: stop.clone(),
        };

        for index in 0..workers {
            let ctx = WorkerContext {
                index,
                input: input.clone(),
                output: output.clone(),
                annotator: setup.annotator.clone(),
                consolidator: setup.consolidator.clone(),
                health: setup.health.clone(),
                meter: meter.clone(),
                counters: counters.clone(),
                stop: stop.clone(),
            };
            let factory = setup.factory.clone();
            let init_tx = init_tx.clone();
            let exit = ExitNotice {
                index,
                done_tx: done_tx.clone(),
            };
            let spawned = telemetry::spawn_thread(format!("analysis-{index}"), move || {
                let _exit = exit;
                let analyzer = match factory.create(index) {
                    Ok(analyzer) => {
                        if init_tx
                            .send(Ok(format!("worker #{index}: analyzer ready")))
                            .is_err()
                        {
                            return;
                        }
                        analyzer
                    }
                    Err(err) => {
                        let _ = init_tx.send(Err(format!(
                            "worker #{index}: failed to build analyzer: {err}"
                        )));
                        return;
                    }
                };
                drop(init_tx);
                worker_loop(analyzer, ctx);
            });
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(err) => {
                    pool.abort();
                    return Err(PipelineError::spawn("analysis worker")(err));
                }
            }
        }
        drop(init_tx);
        drop(done_tx);

        for _ in 0..workers {
            match init_rx.recv() {
                Ok(Ok(message)) => debug!("{message}"),
                Ok(Err(message)) => {
                    pool.abort();
                    return Err(PipelineError::AnalyzerInit(message));
                }
                Err(_) => {
                    pool.abort();
                    return Err(PipelineError::AnalyzerInit(
                        "analysis worker exited before reporting readiness".to_string(),
                    ));
                }
            }
        }

        meter.start();
        Ok(pool)
    }

    /// Close both channels and wait for every worker.
    fn abort(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.input.close();
        self.output.close();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// Stop accepting work, drop queued frames, and wait up to `grace` for
    /// workers to finish what they hold. Workers still busy after that are
    /// abandoned as in [`terminate`](Self::terminate).
    pub fn shutdown(&mut self, grace: Duration) -> ShutdownOutcome {
        self.input.close();
        let discarded = self.input.clear();
        self.output.close();

        let deadline = Instant::now() + grace;
        let mut exited = 0;
        while exited < self.handles.len() {
            match self.done_rx.recv_deadline(deadline) {
                Ok(index) => {
                    debug!("analysis worker #{index} exited");
                    exited += 1;
                }
                Err(_) => break,
            }
        }
        self.meter.stop();

        let abandoned = self.handles.len() - exited;
        if abandoned == 0 {
            for handle in self.handles.drain(..) {
                if handle.join().is_err() {
                    warn!("analysis worker panicked");
                }
            }
            debug!(discarded, "worker pool shut down gracefully");
            ShutdownOutcome::Graceful { discarded }
        } else {
            self.detach_busy();
            warn!(
                "{abandoned} analysis worker(s) still busy after {} ms; abandoning their frames",
                grace.as_millis()
            );
            ShutdownOutcome::Forced {
                discarded,
                abandoned,
            }
        }
    }

    /// Stop immediately without waiting. Frames queued or in flight are lost;
    /// busy workers exit once their current analysis returns.
    pub fn terminate(mut self) -> usize {
        self.terminate_now()
    }

    fn terminate_now(&mut self) -> usize {
        self.stop.store(true, Ordering::SeqCst);
        self.input.close();
        self.input.clear();
        self.output.close();
        self.output.clear();
        self.meter.stop();
        self.detach_busy()
    }

    /// Join finished workers, detach the rest, and return how many were detached.
    fn detach_busy(&mut self) -> usize {
        self.stop.store(true, Ordering::SeqCst);
        let mut abandoned = 0;
        for handle in self.handles.drain(..) {
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!("analysis worker panicked");
                }
            } else {
                abandoned += 1;
            }
        }
        abandoned
    }

    /// Frames per second completed by the pool.
    pub fn throughput(&self) -> f64 {
        self.meter.fps()
    }

    pub fn meter(&self) -> &Arc<RateMeter> {
        &self.meter
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.terminate_now();
        }
    }
}

fn worker_loop(mut analyzer: Box<dyn Analyzer>, ctx: WorkerContext) {
    let _worker_span = info_span!("worker", index = ctx.index).entered();
    loop {
        if ctx.stop.load(Ordering::Relaxed) {
            break;
        }
        let Ok(frame) = ctx.input.get() else {
            break;
        };
        if ctx.stop.load(Ordering::Relaxed) {
            break;
        }
        ctx.health.beat(HealthComponent::Worker);
        let sequence = frame.sequence;
        let _frame_span = info_span!("analyse", frame = sequence).entered();

        let result = match process_guarded(analyzer.as_mut(), &ctx, frame) {
            Ok(result) => result,
            Err(err) => {
                record_failure(&ctx, sequence, &err);
                continue;
            }
        };
        if ctx.output.put(result).is_err() {
            debug!("output channel closed; worker #{} exiting", ctx.index);
            break;
        }
        ctx.meter.update();
        ctx.counters.processed.fetch_add(1, Ordering::Relaxed);
        ctx.health.beat(HealthComponent::Worker);
    }
}

/// Detect, annotate and consolidate one frame. A panic anywhere in the
/// collaborators costs only this frame.
fn process_guarded(
    analyzer: &mut dyn Analyzer,
    ctx: &WorkerContext,
    frame: Frame,
) -> Result<AnnotatedFrame, AnalysisError> {
    match panic::catch_unwind(AssertUnwindSafe(|| process(analyzer, ctx, frame))) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(AnalysisError::Inference(format!("frame processing panicked: {message}")))
        }
    }
}

fn process(
    analyzer: &mut dyn Analyzer,
    ctx: &WorkerContext,
    frame: Frame,
) -> Result<AnnotatedFrame, AnalysisError> {
    let started = Instant::now();
    let summary = Arc::new(analyzer.detect(&frame)?);
    let analysis_time = started.elapsed();
    metrics::histogram!("pipeline_analysis_seconds").record(analysis_time.as_secs_f64());

    let annotated = ctx.annotator.annotate(frame, &summary)?;
    ctx.consolidator.update(summary.clone());

    Ok(AnnotatedFrame {
        frame: annotated,
        summary,
        worker: ctx.index,
        analysis_time,
    })
}

fn record_failure(ctx: &WorkerContext, sequence: u64, err: &AnalysisError) {
    warn!("frame #{sequence} dropped by worker #{}: {err}", ctx.index);
    ctx.counters.failures.fetch_add(1, Ordering::Relaxed);
    metrics::counter!("pipeline_analysis_failures_total").increment(1);
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use ml_core::{Detection, PassThrough, Region};
    use video_ingest::FrameFormat;

    use super::*;
    use crate::{
        narration::RecordingNarrator,
        pipeline::{ConsolidatorConfig, NarrationSchedule},
    };

    /// Fails on every frame whose sequence is a multiple of `fail_every`.
    struct Flaky {
        fail_every: u64,
        delay: Duration,
    }

    impl Analyzer for Flaky {
        fn detect(&mut self, frame: &Frame) -> Result<DetectionSummary, AnalysisError> {
            thread::sleep(self.delay);
            if self.fail_every > 0 && frame.sequence % self.fail_every == 0 {
                return Err(AnalysisError::Inference(format!(
                    "frame {} rejected",
                    frame.sequence
                )));
            }
            Ok(DetectionSummary::new(vec![Detection {
                category: "cat".into(),
                class_id: 15,
                confidence: 0.8,
                region: Region::new(0.0, 0.0, 0.5, 0.5),
            }]))
        }
    }

    fn setup(workers: usize, fail_every: u64, delay: Duration) -> (WorkerSetup, Arc<StateConsolidator>) {
        let consolidator = Arc::new(StateConsolidator::new(
            ConsolidatorConfig {
                window: 4,
                schedule: NarrationSchedule::Every(4),
                ..Default::default()
            },
            Arc::new(RecordingNarrator::new()),
        ));
        let factory = move |_index: usize| -> Result<Box<dyn Analyzer>, AnalysisError> {
            Ok(Box::new(Flaky { fail_every, delay }))
        };
        let setup = WorkerSetup {
            workers,
            factory: Arc::new(factory),
            annotator: Arc::new(PassThrough),
            consolidator: consolidator.clone(),
            health: Arc::new(PipelineHealth::new()),
        };
        (setup, consolidator)
    }

    fn frame(sequence: u64) -> Frame {
        Frame::filled(4, 4, FrameFormat::Gray8, 0).with_sequence(sequence)
    }

    #[test]
    fn failed_frame_is_skipped_and_others_delivered() {
        let (setup, consolidator) = setup(3, 7, Duration::ZERO);
        let input = Arc::new(BoundedChannel::new(4));
        let output = Arc::new(BoundedChannel::new(16));
        let mut pool = WorkerPool::spawn(setup, input.clone(), output.clone()).unwrap();

        for sequence in 1..=10 {
            input.put(frame(sequence)).unwrap();
        }
        let mut seen = HashSet::new();
        for _ in 0..9 {
            let annotated = output.get_timeout(Duration::from_secs(5)).unwrap();
            seen.insert(annotated.sequence());
        }
        assert!(!seen.contains(&7));
        assert_eq!(seen.len(), 9);
        assert_eq!(
            output.get_timeout(Duration::from_millis(100)).unwrap_err(),
            crate::pipeline::GetError::Timeout
        );

        let stats = pool.stats();
        assert_eq!(stats, PoolStats { processed: 9, failures: 1 });
        assert_eq!(consolidator.frames_seen(), 9);
        assert!(matches!(
            pool.shutdown(Duration::from_secs(2)),
            ShutdownOutcome::Graceful { .. }
        ));
    }

    #[test]
    fn idle_workers_exit_when_input_closes() {
        let (setup, _) = setup(4, 0, Duration::ZERO);
        let input: Arc<BoundedChannel<Frame>> = Arc::new(BoundedChannel::new(2));
        let output = Arc::new(BoundedChannel::new(2));
        let mut pool = WorkerPool::spawn(setup, input.clone(), output).unwrap();
        assert_eq!(pool.workers(), 4);

        thread::sleep(Duration::from_millis(20));
        let outcome = pool.shutdown(Duration::from_secs(2));
        assert_eq!(outcome, ShutdownOutcome::Graceful { discarded: 0 });
        assert!(input.put(frame(1)).unwrap_err().is_closed());
    }

    #[test]
    fn busy_workers_are_abandoned_after_grace() {
        let (setup, _) = setup(1, 0, Duration::from_millis(500));
        let input = Arc::new(BoundedChannel::new(4));
        let output = Arc::new(BoundedChannel::new(4));
        let mut pool = WorkerPool::spawn(setup, input.clone(), output).unwrap();

        input.put(frame(1)).unwrap();
        input.put(frame(2)).unwrap();
        thread::sleep(Duration::from_millis(50));

        let outcome = pool.shutdown(Duration::from_millis(20));
        assert_eq!(
            outcome,
            ShutdownOutcome::Forced {
                discarded: 1,
                abandoned: 1
            }
        );
    }

    #[test]
    fn analyzer_init_failure_is_reported() {
        let (mut setup, _) = setup(3, 0, Duration::ZERO);
        setup.factory = Arc::new(|index: usize| -> Result<Box<dyn Analyzer>, AnalysisError> {
            if index == 1 {
                Err(AnalysisError::ModelLoad {
                    path: "missing.pt".into(),
                    reason: "not found".into(),
                })
            } else {
                Ok(Box::new(Flaky {
                    fail_every: 0,
                    delay: Duration::ZERO,
                }))
            }
        });
        let input: Arc<BoundedChannel<Frame>> = Arc::new(BoundedChannel::new(2));
        let output = Arc::new(BoundedChannel::new(2));

        let err = WorkerPool::spawn(setup, input.clone(), output.clone())
            .err()
            .expect("spawn fails");
        assert!(matches!(err, PipelineError::AnalyzerInit(ref message) if message.contains("#1")));
        assert!(input.is_closed());
        assert!(output.is_closed());
    }

    #[test]
    fn panicking_analyzer_only_loses_the_frame() {
        struct Panicky;
        impl Analyzer for Panicky {
            fn detect(&mut self, frame: &Frame) -> Result<DetectionSummary, AnalysisError> {
                if frame.sequence == 2 {
                    panic!("bad frame");
                }
                Ok(DetectionSummary::empty())
            }
        }
        let (mut setup, _) = setup(1, 0, Duration::ZERO);
        setup.factory = Arc::new(|_: usize| -> Result<Box<dyn Analyzer>, AnalysisError> {
            Ok(Box::new(Panicky))
        });
        let input = Arc::new(BoundedChannel::new(4));
        let output = Arc::new(BoundedChannel::new(4));
        let pool = WorkerPool::spawn(setup, input.clone(), output.clone()).unwrap();

        for sequence in 1..=3 {
            input.put(frame(sequence)).unwrap();
        }
        let first = output.get_timeout(Duration::from_secs(5)).unwrap();
        let second = output.get_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((first.sequence(), second.sequence()), (1, 3));
        assert_eq!(pool.stats().failures, 1);
        pool.terminate();
    }

    #[test]
    fn panicking_annotator_only_loses_the_frame() {
        struct Brittle;
        impl Annotator for Brittle {
            fn annotate(
                &self,
                frame: Frame,
                _summary: &DetectionSummary,
            ) -> Result<Frame, AnalysisError> {
                if frame.sequence == 2 {
                    panic!("overlay out of bounds");
                }
                Ok(frame)
            }
        }
        let (mut setup, consolidator) = setup(1, 0, Duration::ZERO);
        setup.annotator = Arc::new(Brittle);
        let input = Arc::new(BoundedChannel::new(4));
        let output = Arc::new(BoundedChannel::new(4));
        let mut pool = WorkerPool::spawn(setup, input.clone(), output.clone()).unwrap();

        for sequence in 1..=3 {
            input.put(frame(sequence)).unwrap();
        }
        let first = output.get_timeout(Duration::from_secs(5)).unwrap();
        let second = output.get_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((first.sequence(), second.sequence()), (1, 3));
        assert_eq!(pool.stats(), PoolStats { processed: 2, failures: 1 });
        assert_eq!(consolidator.frames_seen(), 2);
        assert!(matches!(
            pool.shutdown(Duration::from_secs(2)),
            ShutdownOutcome::Graceful { .. }
        ));
    }

    #[test]
    fn panicking_narration_sink_keeps_the_worker_alive() {
        struct Shouty;
        impl crate::narration::NarrationSink for Shouty {
            fn narrate(&self, _text: &str, _rate: u32) {
                panic!("speaker unplugged");
            }
        }
        let (mut setup, _) = setup(1, 0, Duration::ZERO);
        setup.consolidator = Arc::new(StateConsolidator::new(
            ConsolidatorConfig {
                window: 2,
                schedule: NarrationSchedule::Every(2),
                ..Default::default()
            },
            Arc::new(Shouty),
        ));
        let input = Arc::new(BoundedChannel::new(4));
        let output = Arc::new(BoundedChannel::new(4));
        let mut pool = WorkerPool::spawn(setup, input.clone(), output.clone()).unwrap();

        for sequence in 1..=3 {
            input.put(frame(sequence)).unwrap();
        }
        let first = output.get_timeout(Duration::from_secs(5)).unwrap();
        let second = output.get_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((first.sequence(), second.sequence()), (1, 3));
        assert_eq!(pool.stats().failures, 1);
        pool.shutdown(Duration::from_secs(2));
    }
}
