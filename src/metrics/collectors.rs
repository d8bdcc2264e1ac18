//! Recording helpers over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run.

use super::prometheus::{
    ARTIFACTS_TOTAL, GENERATION_LATENCY, JOBS_IN_PROGRESS, JOBS_TOTAL, REGENERATIONS_TOTAL,
    STAGES_TOTAL,
};
use crate::artifact::PageType;
use crate::job::JobStatus;
use crate::pipeline::stage::StageName;

/// Metrics collector for pipeline events.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn job_started(&self) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.inc();
        }
    }

    /// Records a terminal status and releases the in-progress slot.
    pub fn job_finished(&self, status: JobStatus) {
        if let Some(gauge) = JOBS_IN_PROGRESS.get() {
            gauge.dec();
        }
        if let Some(counter) = JOBS_TOTAL.get() {
            counter.with_label_values(&[&status.to_string()]).inc();
        }
    }

    pub fn stage_finished(&self, stage: StageName, ok: bool) {
        if let Some(counter) = STAGES_TOTAL.get() {
            let outcome = if ok { "completed" } else { "failed" };
            counter.with_label_values(&[stage.as_str(), outcome]).inc();
        }
    }

    pub fn artifact_finished(&self, page_type: PageType, passed: bool) {
        if let Some(counter) = ARTIFACTS_TOTAL.get() {
            let outcome = if passed { "passed" } else { "failed" };
            counter
                .with_label_values(&[&page_type.to_string(), outcome])
                .inc();
        }
    }

    pub fn regeneration(&self, page_type: PageType) {
        if let Some(counter) = REGENERATIONS_TOTAL.get() {
            counter.with_label_values(&[&page_type.to_string()]).inc();
        }
    }

    pub fn generation_latency(&self, model: &str, elapsed_ms: u64) {
        if let Some(histogram) = GENERATION_LATENCY.get() {
            histogram
                .with_label_values(&[model])
                .observe(elapsed_ms as f64 / 1000.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_collector_records() {
        init_metrics().expect("metrics init");
        let collector = MetricsCollector::new();
        collector.job_started();
        collector.stage_finished(StageName::Planning, true);
        collector.artifact_finished(PageType::Cover, false);
        collector.regeneration(PageType::Page);
        collector.generation_latency("dry-run", 250);
        collector.job_finished(JobStatus::Completed);

        let text = export_metrics();
        assert!(text.contains("bookforge_stages_total"));
        assert!(text.contains("bookforge_regenerations_total"));
        assert!(text.contains("bookforge_generation_latency_seconds"));
    }
}
