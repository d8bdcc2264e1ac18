//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by bookforge and provides
//! functions for initializing, registering, and exporting them.

use prometheus::{CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all bookforge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Jobs that reached a terminal status, labeled by status.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of jobs currently being processed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Stage runs, labeled by stage and outcome.
pub static STAGES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Artifacts that left the pipeline, labeled by page type and outcome.
pub static ARTIFACTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Regenerations issued by the validation loop.
pub static REGENERATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Generation call latency in seconds, labeled by model.
pub static GENERATION_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling it more than once keeps the first registration.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let jobs_total = CounterVec::new(
        Opts::new("bookforge_jobs_total", "Jobs that reached a terminal status"),
        &["status"],
    )?;

    let jobs_in_progress = Gauge::new(
        "bookforge_jobs_in_progress",
        "Number of jobs currently being processed",
    )?;

    let stages_total = CounterVec::new(
        Opts::new("bookforge_stages_total", "Stage runs by outcome"),
        &["stage", "outcome"],
    )?;

    let artifacts_total = CounterVec::new(
        Opts::new("bookforge_artifacts_total", "Artifacts by final outcome"),
        &["page_type", "outcome"],
    )?;

    let regenerations_total = CounterVec::new(
        Opts::new(
            "bookforge_regenerations_total",
            "Regenerations issued by the validation loop",
        ),
        &["page_type"],
    )?;

    let generation_latency = HistogramVec::new(
        HistogramOpts::new(
            "bookforge_generation_latency_seconds",
            "Generation call latency in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["model"],
    )?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(stages_total.clone()))?;
    registry.register(Box::new(artifacts_total.clone()))?;
    registry.register(Box::new(regenerations_total.clone()))?;
    registry.register(Box::new(generation_latency.clone()))?;

    // A concurrent initializer may have won; its metrics stay in place.
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = STAGES_TOTAL.set(stages_total);
    let _ = ARTIFACTS_TOTAL.set(artifacts_total);
    let _ = REGENERATIONS_TOTAL.set(regenerations_total);
    let _ = GENERATION_LATENCY.set(generation_latency);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
