use clap::Parser;
use vision::PipelineCliArgs;

/// Watch a video source, detect objects on a pool of workers, and narrate
/// what has been in view.
///
/// Type `q` and Enter to quit, or just Enter to hear the current description.
#[derive(Debug, Parser)]
#[command(name = "vision-narrator", version)]
pub struct Cli {
    #[command(flatten)]
    pub pipeline: PipelineCliArgs,
}
