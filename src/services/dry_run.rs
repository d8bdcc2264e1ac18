//! Offline generation and validation.
//!
//! The generator writes a small placeholder file containing the prompt it was
//! asked to render; the validator scores any existing artifact with a fixed
//! score. Together they let the whole pipeline run without network access.

use async_trait::async_trait;
use std::time::Instant;

use super::{GenerationService, RenderRequest, ValidationService};
use crate::artifact::{GenerationMetadata, GenerationResult, PromptDescriptor, QcResult, QualityMetrics};
use crate::book::VisualFingerprint;
use crate::error::ServiceError;

/// Model name recorded in dry-run generation metadata.
pub const DRY_RUN_MODEL: &str = "dry-run";

/// Writes placeholder artifacts.
#[derive(Debug, Clone, Default)]
pub struct DryRunGenerator;

impl DryRunGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GenerationService for DryRunGenerator {
    async fn generate(&self, request: &RenderRequest) -> Result<GenerationResult, ServiceError> {
        let started = Instant::now();
        let descriptor = &request.descriptor;

        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut body = format!(
            "prompt: {}\nnegative: {}\nversion: {}\n",
            descriptor.full_prompt(),
            descriptor.negative_prompt(),
            descriptor.version
        );
        for reference in &request.reference_paths {
            body.push_str(&format!("reference: {}\n", reference.display()));
        }
        tokio::fs::write(&request.output_path, body).await?;

        let mut metadata = GenerationMetadata::new(DRY_RUN_MODEL, descriptor.version);
        metadata.generation_time_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            page_number = descriptor.page_number,
            path = %request.output_path.display(),
            "Dry-run artifact written"
        );

        Ok(GenerationResult::succeeded(
            descriptor.page_number,
            request.output_path.clone(),
            metadata,
        ))
    }
}

/// Scores every existing artifact with a fixed score.
#[derive(Debug, Clone)]
pub struct DryRunValidator {
    score: f64,
    threshold: f64,
}

impl DryRunValidator {
    pub fn new(score: f64, threshold: f64) -> Self {
        Self { score, threshold }
    }
}

impl Default for DryRunValidator {
    fn default() -> Self {
        Self::new(8.0, 7.0)
    }
}

#[async_trait]
impl ValidationService for DryRunValidator {
    async fn validate(
        &self,
        result: &GenerationResult,
        descriptor: &PromptDescriptor,
        _fingerprint: &VisualFingerprint,
    ) -> Result<QcResult, ServiceError> {
        let Some(path) = result.path() else {
            return Ok(QcResult::synthetic_failure(
                descriptor.page_number,
                None,
                "No image to validate",
            ));
        };
        if tokio::fs::metadata(path).await.is_err() {
            return Ok(QcResult::synthetic_failure(
                descriptor.page_number,
                Some(path.to_path_buf()),
                format!("Image file not found: {}", path.display()),
            ));
        }

        let qc = QcResult::scored(
            descriptor.page_number,
            Some(path.to_path_buf()),
            QualityMetrics::uniform(self.score),
            self.threshold,
        );
        if qc.passed {
            Ok(qc)
        } else {
            Ok(qc.with_issues(vec![format!(
                "Overall score {:.1} below threshold {:.1}",
                self.score, self.threshold
            )]))
        }
    }
}
