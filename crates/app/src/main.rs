mod cli;
mod display;
mod setup;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use vision::{
    PipelineConfig, PipelineDriver,
    pipeline::{StopHandle, telemetry},
};

use crate::cli::Cli;

fn main() {
    // Usage errors exit with status 2 from inside clap.
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:?}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = PipelineConfig::try_from(cli.pipeline)?;
    let _telemetry = telemetry::enter_runtime(&config.telemetry);
    if config.telemetry.metrics_path.is_some() && telemetry::init_metrics_recorder().is_none() {
        warn!("metrics recorder unavailable; --metrics-out will not be written");
    }

    let stop = StopHandle::new();
    signals::install_ctrlc(stop.clone());

    let parts = setup::build_parts(&config)?;
    let report_path = config.report_path.clone();
    let metrics_path = config.telemetry.metrics_path.clone();

    let driver = PipelineDriver::new(config, parts)?.with_stop_handle(stop.clone());
    signals::spawn_stdin_watcher(stop, driver.consolidator());
    info!("running; press Ctrl+C or type `q` and Enter to stop");

    let report = driver.run()?;

    if let Some(path) = report_path {
        report
            .write_json(&path)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    }
    if let Some(path) = metrics_path {
        if let Err(err) = telemetry::write_metrics(&path) {
            warn!("failed to write metrics to {}: {err}", path.display());
        }
    }

    Ok(if report.is_clean() { 0 } else { 1 })
}
