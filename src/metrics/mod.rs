//! Prometheus-based monitoring.
//!
//! ```ignore
//! use bookforge::metrics::{export_metrics, init_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().job_started();
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{
    export_metrics, init_metrics, ARTIFACTS_TOTAL, GENERATION_LATENCY, JOBS_IN_PROGRESS,
    JOBS_TOTAL, REGENERATIONS_TOTAL, REGISTRY, STAGES_TOTAL,
};
