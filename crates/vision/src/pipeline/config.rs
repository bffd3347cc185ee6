//! Configuration parsing for the narration pipeline.
//!
//! This module owns translation of CLI arguments into a `PipelineConfig`
//! struct which downstream stages use without re-parsing flags.

use std::{path::PathBuf, time::Duration};

use clap::Args;

use crate::{
    narration::DescribePolicy,
    pipeline::{ConsolidatorConfig, NarrationSchedule, PipelineError},
};

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stage in the pipeline.
pub struct PipelineConfig {
    /// Device index, device path, stream URL, file path, or `synthetic`.
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Number of analysis workers (N).
    pub workers: usize,
    /// Capacity of both the input and the output queue (Q).
    pub queue_size: usize,
    /// Frames in the consolidation window (W).
    pub window: usize,
    /// Raw update rate (R) as given on the command line.
    pub update_rate: i64,
    pub speech_rate: u32,
    /// TorchScript detector; the threshold detector is used when absent.
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub confidence: f32,
    pub min_presence: f32,
    pub speech_command: Option<String>,
    /// Re-sequence annotated frames before display.
    pub ordered: bool,
    pub reorder_depth: usize,
    /// Stop after this many displayed frames.
    pub max_frames: Option<u64>,
    /// Write the newest annotated frame to this JPEG.
    pub snapshot_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub put_timeout: Duration,
    pub get_timeout: Duration,
    pub shutdown_grace: Duration,
    pub stall_warning: Duration,
    /// Force CPU inference.
    pub use_cpu: bool,
    pub verbose: bool,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing and metrics export.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Write the Prometheus text exposition here on exit.
    pub metrics_path: Option<PathBuf>,
    /// Default the log filter to `debug` instead of `info`.
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            width: 480,
            height: 360,
            workers: 2,
            queue_size: 5,
            window: 10,
            update_rate: -1,
            speech_rate: 240,
            model_path: None,
            labels_path: None,
            confidence: 0.5,
            min_presence: 0.5,
            speech_command: None,
            ordered: false,
            reorder_depth: 10,
            max_frames: None,
            snapshot_path: None,
            report_path: None,
            put_timeout: Duration::from_millis(1_000),
            get_timeout: Duration::from_millis(2_000),
            shutdown_grace: Duration::from_millis(2_000),
            stall_warning: Duration::from_millis(3_000),
            use_cpu: false,
            verbose: false,
            telemetry: TelemetryOptions::default(),
        }
    }
}

impl PipelineConfig {
    pub fn schedule(&self) -> NarrationSchedule {
        NarrationSchedule::from_rate(self.update_rate, self.window)
    }

    pub fn consolidator(&self) -> ConsolidatorConfig {
        ConsolidatorConfig {
            window: self.window,
            schedule: self.schedule(),
            speech_rate: self.speech_rate,
            policy: DescribePolicy {
                min_presence: self.min_presence,
                min_confidence: self.confidence,
            },
        }
    }

    /// Reject values no pipeline could run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::config(
                "capture width and height must be positive",
            ));
        }
        if self.workers == 0 {
            return Err(PipelineError::config("--num-workers must be at least 1"));
        }
        if self.queue_size == 0 {
            return Err(PipelineError::config("--queue-size must be at least 1"));
        }
        if self.window == 0 {
            return Err(PipelineError::config("--window must be at least 1"));
        }
        if self.speech_rate == 0 {
            return Err(PipelineError::config("--speech-rate must be positive"));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(PipelineError::config("--confidence must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.min_presence) {
            return Err(PipelineError::config("--min-presence must be within 0..=1"));
        }
        if self.max_frames == Some(0) {
            return Err(PipelineError::config("--max-frames must be at least 1"));
        }
        if self.put_timeout.is_zero() || self.get_timeout.is_zero() {
            return Err(PipelineError::config("queue timeouts must be positive"));
        }
        Ok(())
    }
}

/// CLI arguments for the pipeline.
#[derive(Debug, Args)]
pub struct PipelineCliArgs {
    /// Capture source: device index, /dev/videoN, rtsp:// URL, video file, or `synthetic`.
    #[arg(short = 's', long = "source", value_name = "URI", default_value = "0")]
    pub source: String,
    /// Capture width in pixels.
    #[arg(short = 'W', long = "width", value_name = "PX", default_value_t = 480)]
    pub width: u32,
    /// Capture height in pixels.
    #[arg(short = 'H', long = "height", value_name = "PX", default_value_t = 360)]
    pub height: u32,
    /// Number of analysis workers.
    #[arg(short = 'n', long = "num-workers", value_name = "N", default_value_t = 2)]
    pub num_workers: usize,
    /// Capacity of the input and output queues.
    #[arg(short = 'q', long = "queue-size", value_name = "N", default_value_t = 5)]
    pub queue_size: usize,
    /// Frames kept in the consolidation window.
    #[arg(short = 'f', long = "window", value_name = "FRAMES", default_value_t = 10)]
    pub window: usize,
    /// Narrate every R frames; negative follows --window, 0 only on request.
    #[arg(
        short = 'u',
        long = "update-rate",
        value_name = "R",
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    pub update_rate: i64,
    /// Speech rate passed to the speech command.
    #[arg(short = 'r', long = "speech-rate", value_name = "WPM", default_value_t = 240)]
    pub speech_rate: u32,

    /// TorchScript detector module.
    #[arg(long = "model", value_name = "PATH")]
    pub model: Option<PathBuf>,
    /// Class names, one per line (defaults to the COCO list).
    #[arg(long = "labels", value_name = "PATH")]
    pub labels: Option<PathBuf>,
    /// Minimum detection confidence.
    #[arg(long = "confidence", value_name = "SCORE", default_value_t = 0.5)]
    pub confidence: f32,
    /// Fraction of window frames an object must appear in to be mentioned.
    #[arg(long = "min-presence", value_name = "FRACTION", default_value_t = 0.5)]
    pub min_presence: f32,
    /// Speak narrations with this command, e.g. "espeak -s" or "say -r".
    #[arg(long = "speech-command", value_name = "CMD")]
    pub speech_command: Option<String>,
    /// Display frames in capture order.
    #[arg(long = "ordered", action = clap::ArgAction::SetTrue)]
    pub ordered: bool,
    /// Frames held back while waiting for a missing one (default 2 x queue size).
    #[arg(long = "reorder-depth", value_name = "N")]
    pub reorder_depth: Option<usize>,
    /// Stop after this many displayed frames.
    #[arg(long = "max-frames", value_name = "N")]
    pub max_frames: Option<u64>,
    /// Keep the newest annotated frame in this JPEG file.
    #[arg(long = "snapshot", value_name = "PATH")]
    pub snapshot: Option<PathBuf>,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,

    /// Warn when the input queue stays full this long.
    #[arg(long = "put-timeout-ms", value_name = "MS", default_value_t = 1_000)]
    pub put_timeout_ms: u64,
    /// Warn when no annotated frame arrives within this long.
    #[arg(long = "get-timeout-ms", value_name = "MS", default_value_t = 2_000)]
    pub get_timeout_ms: u64,
    /// Time workers get to finish before being abandoned at shutdown.
    #[arg(long = "shutdown-grace-ms", value_name = "MS", default_value_t = 2_000)]
    pub shutdown_grace_ms: u64,
    /// Log a stall when a stage makes no progress for this long.
    #[arg(long = "stall-warn-ms", value_name = "MS", default_value_t = 3_000)]
    pub stall_warn_ms: u64,

    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Write Prometheus metrics here on exit.
    #[arg(long = "metrics-out", value_name = "PATH")]
    pub metrics_out: Option<PathBuf>,
    /// Write the run report as JSON.
    #[arg(long = "report", value_name = "PATH")]
    pub report: Option<PathBuf>,
    /// Debug logging, including per-iteration latency.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
}

impl TryFrom<PipelineCliArgs> for PipelineConfig {
    type Error = PipelineError;

    fn try_from(args: PipelineCliArgs) -> Result<Self, Self::Error> {
        let source = args.source.trim().to_string();
        if source.is_empty() {
            return Err(PipelineError::config("--source must not be empty"));
        }
        let speech_command = match args.speech_command {
            Some(command) if command.trim().is_empty() => {
                return Err(PipelineError::config("--speech-command must not be empty"));
            }
            other => other,
        };
        let reorder_depth = args
            .reorder_depth
            .unwrap_or_else(|| args.queue_size.saturating_mul(2));

        let config = Self {
            source,
            width: args.width,
            height: args.height,
            workers: args.num_workers,
            queue_size: args.queue_size,
            window: args.window,
            update_rate: args.update_rate,
            speech_rate: args.speech_rate,
            model_path: args.model,
            labels_path: args.labels,
            confidence: args.confidence,
            min_presence: args.min_presence,
            speech_command,
            ordered: args.ordered,
            reorder_depth,
            max_frames: args.max_frames,
            snapshot_path: args.snapshot,
            report_path: args.report,
            put_timeout: Duration::from_millis(args.put_timeout_ms),
            get_timeout: Duration::from_millis(args.get_timeout_ms),
            shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
            stall_warning: Duration::from_millis(args.stall_warn_ms),
            use_cpu: args.use_cpu,
            verbose: args.verbose,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
                metrics_path: args.metrics_out,
                verbose: args.verbose,
            },
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: PipelineCliArgs,
    }

    fn parse(argv: &[&str]) -> Result<PipelineConfig, PipelineError> {
        let harness = Harness::try_parse_from(std::iter::once("test").chain(argv.iter().copied()))
            .expect("arguments parse");
        PipelineConfig::try_from(harness.args)
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.source, "0");
        assert_eq!((config.width, config.height), (480, 360));
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_size, 5);
        assert_eq!(config.window, 10);
        assert_eq!(config.schedule(), NarrationSchedule::Every(10));
        assert_eq!(config.speech_rate, 240);
        assert_eq!(config.reorder_depth, 10);
    }

    #[test]
    fn short_flags_and_negative_rate() {
        let config = parse(&[
            "-s", "synthetic", "-n", "4", "-q", "3", "-f", "6", "-u", "-1", "-r", "180",
        ])
        .unwrap();
        assert_eq!(config.source, "synthetic");
        assert_eq!(config.workers, 4);
        assert_eq!(config.reorder_depth, 6);
        assert_eq!(config.schedule(), NarrationSchedule::Every(6));

        let on_query = parse(&["-u", "0"]).unwrap();
        assert_eq!(on_query.schedule(), NarrationSchedule::OnQuery);
    }

    #[test]
    fn rejects_degenerate_values() {
        for argv in [
            &["-n", "0"][..],
            &["-q", "0"],
            &["-f", "0"],
            &["--confidence", "1.5"],
            &["--max-frames", "0"],
            &["-s", "  "],
        ] {
            assert!(
                matches!(parse(argv), Err(PipelineError::Config(_))),
                "{argv:?} should be rejected"
            );
        }
    }
}
