//! External service interfaces and their shipped implementations.
//!
//! The pipeline only talks to generation, validation and repair through the
//! traits below. `dry_run` and `template` provide deterministic offline
//! implementations, `repair` provides rule-based and LLM-backed repair.

pub mod dry_run;
pub mod repair;
pub mod template;

use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::artifact::{GenerationResult, PromptDescriptor, QcResult};
use crate::book::VisualFingerprint;
use crate::error::ServiceError;

pub use dry_run::{DryRunGenerator, DryRunValidator};
pub use repair::{LlmRepair, RuleRepair};
pub use template::template_stages;

/// One call to the generation service.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub descriptor: PromptDescriptor,
    /// Reference artifacts to condition on; empty when none apply.
    pub reference_paths: Vec<PathBuf>,
    /// Deterministic location the artifact must be written to.
    pub output_path: PathBuf,
}

/// Renders an artifact from a descriptor.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &RenderRequest) -> Result<GenerationResult, ServiceError>;
}

/// Scores an artifact against the descriptor and fingerprint.
#[async_trait]
pub trait ValidationService: Send + Sync {
    async fn validate(
        &self,
        result: &GenerationResult,
        descriptor: &PromptDescriptor,
        fingerprint: &VisualFingerprint,
    ) -> Result<QcResult, ServiceError>;
}

/// Produces a revised descriptor targeting the issues a QC check found.
#[async_trait]
pub trait RepairService: Send + Sync {
    async fn repair(
        &self,
        descriptor: &PromptDescriptor,
        qc: &QcResult,
        fingerprint: &VisualFingerprint,
    ) -> Result<PromptDescriptor, ServiceError>;
}

/// Runs `fut` under an optional deadline.
///
/// An elapsed deadline is reported as [`ServiceError::Timeout`], converted
/// into the future's own error type.
pub async fn with_deadline<T, E, F>(deadline: Option<Duration>, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<ServiceError>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| E::from(ServiceError::Timeout(limit.as_millis() as u64)))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_deadline_passes_through() {
        let value = with_deadline(Some(Duration::from_secs(1)), async { Ok::<_, ServiceError>(7) })
            .await
            .expect("no timeout");
        assert_eq!(value, 7);

        let value = with_deadline(None, async { Ok::<_, ServiceError>(3) })
            .await
            .expect("no deadline");
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result = with_deadline(Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ServiceError>(())
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Timeout(10))));
    }
}
