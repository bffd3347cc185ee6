//! Telemetry helpers for tracing spans and Prometheus metrics.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::OnceLock,
    thread,
    time::Duration,
};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{
    filter::{EnvFilter, filter_fn},
    fmt,
    layer::SubscriberExt,
    prelude::*,
};

use crate::pipeline::config::TelemetryOptions;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Guard returned when a telemetry subscriber has been installed for the current thread.
pub struct TelemetryGuard {
    _default_guard: tracing::subscriber::DefaultGuard,
    chrome_guard: Option<tracing_chrome::FlushGuard>,
    chrome_trace_path: Option<PathBuf>,
}

/// Install the global metrics recorder once and return the Prometheus handle.
///
/// Returns `None` when another recorder was installed first.
pub fn init_metrics_recorder() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Some(handle);
    }
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    if let Err(err) = metrics::set_global_recorder(recorder) {
        tracing::warn!("metrics recorder already installed: {err}");
        return None;
    }

    let handle = PROM_HANDLE.get_or_init(|| handle);
    let upkeep_handle = handle.clone();
    if let Err(err) = spawn_thread("prometheus-upkeep", move || {
        loop {
            thread::sleep(Duration::from_secs(5));
            upkeep_handle.run_upkeep();
        }
    }) {
        tracing::warn!("failed to spawn prometheus upkeep thread: {err}");
    }
    Some(handle)
}

/// Access the Prometheus handle when already initialised.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}

/// Write the current Prometheus exposition to `path`.
pub fn write_metrics(path: &Path) -> io::Result<()> {
    let Some(handle) = prometheus_handle() else {
        return Err(io::Error::other("metrics recorder not installed"));
    };
    let mut file = fs::File::create(path)?;
    file.write_all(handle.render().as_bytes())?;
    file.flush()
}

/// Install tracing subscribers for the current thread based on telemetry options.
///
/// Threads started through [`spawn_thread`] inherit the subscriber.
pub fn enter_runtime(opts: &TelemetryOptions) -> TelemetryGuard {
    let default_level = if opts.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (chrome_layer_opt, chrome_guard) = if let Some(path) = opts.chrome_trace_path.as_ref() {
        match build_chrome_layer(path) {
            Ok((layer, guard)) => (Some(layer), Some(guard)),
            Err(err) => {
                tracing::warn!(
                    "failed to initialise chrome trace writer at {}: {err}",
                    path.display()
                );
                (None, None)
            }
        }
    } else {
        (None, None)
    };

    let span_only_filter = filter_fn(|metadata| metadata.is_span());

    let default_guard = match chrome_layer_opt {
        Some(chrome) => tracing::subscriber::set_default(
            tracing_subscriber::registry()
                .with(chrome.with_filter(span_only_filter))
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_timer(fmt::time::uptime())
                        .with_filter(env_filter),
                )
                .with(tracing_error::ErrorLayer::default()),
        ),
        None => tracing::subscriber::set_default(
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_timer(fmt::time::uptime())
                        .with_filter(env_filter),
                )
                .with(tracing_error::ErrorLayer::default()),
        ),
    };

    TelemetryGuard {
        _default_guard: default_guard,
        chrome_guard,
        chrome_trace_path: opts.chrome_trace_path.clone(),
    }
}

/// Spawn a thread that inherits the current tracing dispatcher.
pub fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn build_chrome_layer(
    path: &Path,
) -> Result<
    (
        tracing_chrome::ChromeLayer<tracing_subscriber::Registry>,
        tracing_chrome::FlushGuard,
    ),
    io::Error,
> {
    let file = fs::File::create(path)?;
    let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .trace_style(tracing_chrome::TraceStyle::Threaded)
        .build();
    Ok((layer, guard))
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(guard) = self.chrome_guard.take() {
            guard.flush();
            drop(guard);
            if let Some(path) = self.chrome_trace_path.as_ref() {
                tracing::debug!("chrome trace written to {}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;

    #[test]
    fn spawned_threads_are_named() {
        let handle = spawn_thread("telemetry-test", || {
            thread::current().name().map(str::to_owned)
        })
        .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("telemetry-test"));
    }

    #[test]
    fn runtime_guard_writes_chrome_trace() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace.json");
        let ran = Arc::new(AtomicBool::new(false));
        {
            let _guard = enter_runtime(&TelemetryOptions {
                chrome_trace_path: Some(trace.clone()),
                ..Default::default()
            });
            let _span = tracing::info_span!("telemetry.test").entered();
            let ran = ran.clone();
            spawn_thread("traced", move || ran.store(true, Ordering::SeqCst))
                .unwrap()
                .join()
                .unwrap();
        }
        assert!(ran.load(Ordering::SeqCst));
        assert!(trace.is_file());
    }
}
