//! Per-artifact validate / fix / regenerate loop.
//!
//! ```text
//! Validate --passed--> Complete
//!    |  \--failed, retries exhausted--> Failed
//!    |failed, retries left
//!    v
//!   Fix --repair error--> Failed
//!    |
//!    v
//! Regenerate --> Validate
//! ```
//!
//! At most `max_retries` regenerate cycles run per artifact. Validation
//! service errors and missing artifacts become synthetic failed QC results,
//! so the loop itself never errors.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::generation::references_for;
use crate::artifact::{GenerationMetadata, GenerationResult, PromptDescriptor, QcResult};
use crate::book::VisualFingerprint;
use crate::job::{JobStore, PageStatus, PageUpdate};
use crate::metrics::MetricsCollector;
use crate::services::{
    with_deadline, GenerationService, RenderRequest, RepairService, ValidationService,
};
use crate::storage::JobStorage;

/// States of the validation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    Validate,
    Fix,
    Regenerate,
    Complete,
    Failed,
}

impl ValidationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ValidationState::Complete | ValidationState::Failed)
    }
}

impl fmt::Display for ValidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationState::Validate => write!(f, "validate"),
            ValidationState::Fix => write!(f, "fix"),
            ValidationState::Regenerate => write!(f, "regenerate"),
            ValidationState::Complete => write!(f, "complete"),
            ValidationState::Failed => write!(f, "failed"),
        }
    }
}

/// Everything shared by the loops of one job.
#[derive(Clone)]
pub struct ValidationContext {
    pub job_id: String,
    pub store: Arc<JobStore>,
    pub storage: JobStorage,
    pub generator: Arc<dyn GenerationService>,
    pub validator: Arc<dyn ValidationService>,
    pub repairer: Arc<dyn RepairService>,
    pub fingerprint: VisualFingerprint,
    pub user_references: Vec<PathBuf>,
    pub max_retries: u32,
    pub timeout: Option<Duration>,
}

impl fmt::Debug for ValidationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationContext")
            .field("job_id", &self.job_id)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Final state of one artifact after its loop terminated.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub page_number: i32,
    pub state: ValidationState,
    /// The descriptor the last artifact was rendered from.
    pub descriptor: PromptDescriptor,
    pub generation: GenerationResult,
    pub qc: Option<QcResult>,
    pub retry_count: u32,
    /// Generation time across the initial render and every regeneration.
    pub generation_time_ms: u64,
    pub error: Option<String>,
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        self.state == ValidationState::Complete
    }
}

/// The loop for a single artifact.
pub struct ValidationMachine<'a> {
    ctx: &'a ValidationContext,
    state: ValidationState,
    descriptor: PromptDescriptor,
    generation: GenerationResult,
    output_path: PathBuf,
    qc: Option<QcResult>,
    retries: u32,
    generation_time_ms: u64,
    error: Option<String>,
    metrics: MetricsCollector,
}

impl<'a> ValidationMachine<'a> {
    /// Starts in [`ValidationState::Validate`] with the pool's result.
    pub fn new(
        ctx: &'a ValidationContext,
        descriptor: PromptDescriptor,
        generation: GenerationResult,
    ) -> Self {
        let output_path = ctx.storage.artifact_path(&ctx.job_id, descriptor.page_number);
        Self {
            ctx,
            state: ValidationState::Validate,
            generation_time_ms: generation.metadata.generation_time_ms,
            descriptor,
            generation,
            output_path,
            qc: None,
            retries: 0,
            error: None,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn state(&self) -> ValidationState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn descriptor(&self) -> &PromptDescriptor {
        &self.descriptor
    }

    fn page_number(&self) -> i32 {
        self.descriptor.page_number
    }

    async fn set_page(&self, update: PageUpdate) {
        self.ctx
            .store
            .update_page(&self.ctx.job_id, self.page_number(), update)
            .await;
    }

    /// Performs one transition and returns the new state.
    ///
    /// Terminal states are absorbing.
    pub async fn step(&mut self) -> ValidationState {
        let next = match self.state {
            ValidationState::Validate => self.validate().await,
            ValidationState::Fix => self.fix().await,
            ValidationState::Regenerate => self.regenerate().await,
            terminal => return terminal,
        };
        if next.is_terminal() {
            self.finish(next).await;
        }
        self.state = next;
        next
    }

    /// Steps until a terminal state is reached.
    pub async fn run(mut self) -> ValidationOutcome {
        while !self.state.is_terminal() {
            self.step().await;
        }
        ValidationOutcome {
            page_number: self.page_number(),
            state: self.state,
            descriptor: self.descriptor,
            generation: self.generation,
            qc: self.qc,
            retry_count: self.retries,
            generation_time_ms: self.generation_time_ms,
            error: self.error,
        }
    }

    async fn validate(&mut self) -> ValidationState {
        let page_number = self.page_number();
        self.set_page(PageUpdate::status(PageStatus::Validating)).await;

        let qc = if self.generation.has_image() {
            match with_deadline(
                self.ctx.timeout,
                self.ctx
                    .validator
                    .validate(&self.generation, &self.descriptor, &self.ctx.fingerprint),
            )
            .await
            {
                Ok(qc) => qc.normalized(),
                Err(e) => {
                    tracing::warn!(
                        job_id = %self.ctx.job_id,
                        page_number = page_number,
                        error = %e,
                        "Validation service failed"
                    );
                    QcResult::synthetic_failure(page_number, self.generation.image_path.clone(), e.to_string())
                }
            }
        } else {
            QcResult::synthetic_failure(page_number, None, "No image to validate")
        };

        self.set_page(PageUpdate::default().with_qc(qc.clone())).await;

        let next = if qc.passed {
            ValidationState::Complete
        } else if self.retries < self.ctx.max_retries {
            ValidationState::Fix
        } else {
            ValidationState::Failed
        };
        tracing::debug!(
            job_id = %self.ctx.job_id,
            page_number = page_number,
            score = qc.metrics.overall_score,
            passed = qc.passed,
            retries = self.retries,
            next = %next,
            "Artifact validated"
        );
        self.qc = Some(qc);
        next
    }

    async fn fix(&mut self) -> ValidationState {
        let page_number = self.page_number();
        self.set_page(PageUpdate::status(PageStatus::Fixing)).await;

        let qc = self.qc.clone().unwrap_or_else(|| {
            QcResult::synthetic_failure(page_number, None, "No validation result")
        });
        match with_deadline(
            self.ctx.timeout,
            self.ctx
                .repairer
                .repair(&self.descriptor, &qc, &self.ctx.fingerprint),
        )
        .await
        {
            Ok(revised) => {
                self.descriptor = self.descriptor.adopt_revision(revised);
                tracing::debug!(
                    job_id = %self.ctx.job_id,
                    page_number = page_number,
                    version = self.descriptor.version,
                    "Descriptor revised"
                );
                ValidationState::Regenerate
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.ctx.job_id,
                    page_number = page_number,
                    error = %e,
                    "Repair failed"
                );
                self.error = Some(format!("Repair failed: {}", e));
                ValidationState::Failed
            }
        }
    }

    async fn regenerate(&mut self) -> ValidationState {
        let page_number = self.page_number();
        self.retries += 1;
        self.set_page(PageUpdate::status(PageStatus::Generating).with_retry())
            .await;
        self.metrics.regeneration(self.descriptor.page_type);

        let request = RenderRequest {
            descriptor: self.descriptor.clone(),
            reference_paths: references_for(
                &self.descriptor,
                &self.ctx.user_references,
                self.ctx.fingerprint.anchor_path.as_deref(),
            ),
            output_path: self.output_path.clone(),
        };
        let mut result = match with_deadline(self.ctx.timeout, self.ctx.generator.generate(&request)).await {
            Ok(result) => result,
            Err(e) => GenerationResult::failed(
                page_number,
                e.to_string(),
                GenerationMetadata::new("unknown", self.descriptor.version),
            ),
        };
        result.metadata.retry_count = self.retries;
        self.generation_time_ms += result.metadata.generation_time_ms;

        if let (true, Some(path)) = (result.has_image(), result.path()) {
            self.set_page(PageUpdate::default().with_image(path)).await;
        } else {
            tracing::warn!(
                job_id = %self.ctx.job_id,
                page_number = page_number,
                retry = self.retries,
                error = result.error_message.as_deref().unwrap_or("no artifact"),
                "Regeneration produced no artifact"
            );
        }
        self.generation = result;
        ValidationState::Validate
    }

    async fn finish(&mut self, terminal: ValidationState) {
        let passed = terminal == ValidationState::Complete;
        self.metrics
            .artifact_finished(self.descriptor.page_type, passed);

        let update = if passed {
            PageUpdate::status(PageStatus::Completed)
        } else {
            let error = self.error.clone().unwrap_or_else(|| {
                format!("Quality check failed after {} retries", self.retries)
            });
            PageUpdate::status(PageStatus::Failed).with_error(error)
        };
        self.set_page(update).await;
    }
}
