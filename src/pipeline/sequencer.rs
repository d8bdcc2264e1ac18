//! Stage sequencer.
//!
//! Runs the fixed graph row by row:
//!
//! | Row | Stages                                        | Progress |
//! |-----|-----------------------------------------------|----------|
//! | 1   | normalization                                 | 5        |
//! | 2   | planning, visual_analysis                     | 15       |
//! | 3   | anchor_generation                             | 25       |
//! | 4   | cover_prompt, back_cover_prompt, page_prompts | 35       |
//! | 5   | prompt_review                                 | 50       |
//! | 6   | image_generation                              | 55 to 75 |
//! | 7   | illustration_review                           | 78       |
//! | 8   | design_review                                 | 85       |
//! | 9   | validation                                    | 90       |
//! | 10  | finalization                                  | 95, 100  |
//!
//! Stages in one row run concurrently and join before the next row starts.
//! A stage failure fails the job and skips every stage not yet started.
//! Cancellation is observed between rows.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::batch::BatchCoordinator;
use super::config::PipelineConfig;
use super::generation::GenerationPool;
use super::package::{assemble, PackageParts};
use super::repair::ValidationContext;
use super::stage::{StageInput, StageName, StageOutput, StageSet};
use crate::artifact::{GenerationResult, PromptDescriptor};
use crate::book::FinalPackage;
use crate::error::{PipelineError, StageError};
use crate::job::{page_sequence, JobStatus, JobStore, JobUpdate};
use crate::metrics::MetricsCollector;
use crate::services::{with_deadline, GenerationService, RepairService, ValidationService};
use crate::storage::JobStorage;

/// The pluggable parts of a pipeline.
#[derive(Clone)]
pub struct PipelineServices {
    pub stages: StageSet,
    pub generator: Arc<dyn GenerationService>,
    pub validator: Arc<dyn ValidationService>,
    pub repairer: Arc<dyn RepairService>,
}

impl std::fmt::Debug for PipelineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineServices")
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

/// Drives one job through the stage graph.
pub struct StageSequencer {
    config: PipelineConfig,
    store: Arc<JobStore>,
    storage: JobStorage,
    services: PipelineServices,
    pool: GenerationPool,
    batch: BatchCoordinator,
    metrics: MetricsCollector,
}

impl StageSequencer {
    pub fn new(
        config: PipelineConfig,
        store: Arc<JobStore>,
        storage: JobStorage,
        services: PipelineServices,
    ) -> Self {
        let pool = GenerationPool::new(
            Arc::clone(&services.generator),
            Arc::clone(&store),
            storage.clone(),
            &config,
        );
        let batch = BatchCoordinator::new(config.batch_mode, config.generation_concurrency);
        Self {
            config,
            store,
            storage,
            services,
            pool,
            batch,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn storage(&self) -> &JobStorage {
        &self.storage
    }

    /// Runs a registered job to a terminal status.
    ///
    /// On failure the job is marked failed with the error message; on
    /// cancellation it is left cancelled. The store marks the remaining
    /// stages skipped as part of the terminal transition.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn run(&self, job_id: &str) -> Result<FinalPackage, PipelineError> {
        if !self
            .store
            .update_status(job_id, JobUpdate::status(JobStatus::Processing))
            .await
        {
            return Err(match self.store.get(job_id).await {
                Some(_) => PipelineError::Cancelled(job_id.to_string()),
                None => PipelineError::JobNotFound(job_id.to_string()),
            });
        }
        self.metrics.job_started();
        info!("Pipeline started");

        let started = Instant::now();
        let outcome = self.execute(job_id, started).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &outcome {
            Ok(package) => {
                self.store
                    .update_status(
                        job_id,
                        JobUpdate::status(JobStatus::Completed).with_progress(100),
                    )
                    .await;
                self.metrics.job_finished(JobStatus::Completed);
                info!(
                    elapsed_ms = elapsed_ms,
                    total_retries = package.total_retries,
                    needing_attention = package.pages_needing_attention.len(),
                    "Pipeline completed"
                );
            }
            Err(PipelineError::Cancelled(_)) | Err(PipelineError::JobNotFound(_)) => {
                self.metrics.job_finished(JobStatus::Cancelled);
                info!(elapsed_ms = elapsed_ms, "Pipeline stopped");
            }
            Err(e) => {
                self.store
                    .update_status(
                        job_id,
                        JobUpdate::status(JobStatus::Failed).with_error(e.to_string()),
                    )
                    .await;
                self.metrics.job_finished(JobStatus::Failed);
                warn!(elapsed_ms = elapsed_ms, error = %e, "Pipeline failed");
            }
        }
        outcome
    }

    async fn execute(&self, job_id: &str, started: Instant) -> Result<FinalPackage, PipelineError> {
        let job = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;
        self.storage.prepare(job_id).await?;
        let page_count = job.request.page_count;
        let mut input = StageInput::new(job_id, job.request, job.reference_paths);

        // Row 1
        self.checkpoint(job_id, StageName::Normalization).await?;
        input.profile = Some(
            self.authoring(job_id, &input, StageName::Normalization, StageOutput::into_profile)
                .await?,
        );

        // Row 2
        self.checkpoint(job_id, StageName::Planning).await?;
        let (plan, fingerprint) = tokio::join!(
            self.authoring(job_id, &input, StageName::Planning, StageOutput::into_plan),
            self.authoring(
                job_id,
                &input,
                StageName::VisualAnalysis,
                StageOutput::into_fingerprint
            ),
        );
        input.plan = Some(plan?);
        input.fingerprint = Some(fingerprint?);

        // Row 3
        self.checkpoint(job_id, StageName::AnchorGeneration).await?;
        let anchor = self.anchor(job_id, &input).await?;
        if let (Some(fingerprint), Some(path)) = (input.fingerprint.as_mut(), anchor) {
            fingerprint.anchor_path = Some(path);
        }

        // Row 4
        self.checkpoint(job_id, StageName::CoverPrompt).await?;
        let (cover, back_cover, pages) = tokio::join!(
            self.authoring(job_id, &input, StageName::CoverPrompt, StageOutput::into_descriptors),
            self.authoring(
                job_id,
                &input,
                StageName::BackCoverPrompt,
                StageOutput::into_descriptors
            ),
            self.authoring(job_id, &input, StageName::PagePrompts, StageOutput::into_descriptors),
        );
        let mut descriptors = cover?;
        descriptors.extend(pages?);
        descriptors.extend(back_cover?);
        input.descriptors = descriptors;

        // Row 5
        self.checkpoint(job_id, StageName::PromptReview).await?;
        input.descriptors = self
            .authoring(job_id, &input, StageName::PromptReview, move |output, stage| {
                let reviewed = output.into_descriptors(stage)?;
                order_descriptors(reviewed, page_count, stage)
            })
            .await?;

        // Row 6
        self.checkpoint(job_id, StageName::ImageGeneration).await?;
        let generations = self.generate(job_id, &input).await?;

        // Row 7
        self.checkpoint(job_id, StageName::IllustrationReview).await?;
        input.pages = self.page_snapshot(job_id).await?;
        let review = self
            .authoring(
                job_id,
                &input,
                StageName::IllustrationReview,
                StageOutput::into_illustration_review,
            )
            .await?;
        debug!(
            notes = review.notes.len(),
            approved = review.approved,
            "Illustration review recorded"
        );

        // Row 8
        self.checkpoint(job_id, StageName::DesignReview).await?;
        input.pages = self.page_snapshot(job_id).await?;
        let design_review = self
            .authoring(job_id, &input, StageName::DesignReview, StageOutput::into_design_review)
            .await?;
        if !design_review.approved {
            warn!(
                score = design_review.average_score(),
                pages = ?design_review.pages_needing_attention,
                "Design review not approved"
            );
        }

        // Row 9
        self.checkpoint(job_id, StageName::Validation).await?;
        let (input, generations) = (&input, &generations);
        let report = self
            .stage(job_id, StageName::Validation, move || async move {
                let fingerprint = input.require_fingerprint(StageName::Validation)?;
                let ctx = ValidationContext {
                    job_id: job_id.to_string(),
                    store: Arc::clone(&self.store),
                    storage: self.storage.clone(),
                    generator: Arc::clone(&self.services.generator),
                    validator: Arc::clone(&self.services.validator),
                    repairer: Arc::clone(&self.services.repairer),
                    fingerprint: fingerprint.clone(),
                    user_references: input.reference_paths.clone(),
                    max_retries: input.request.max_retries.unwrap_or(self.config.max_retries),
                    timeout: self.config.service_timeout,
                };
                let items = input
                    .descriptors
                    .iter()
                    .cloned()
                    .zip(generations.iter().cloned())
                    .collect();
                Ok::<_, StageError>(self.batch.run(&ctx, items).await)
            })
            .await?;

        // Row 10
        self.checkpoint(job_id, StageName::Finalization).await?;
        let (design_review, report) = (&design_review, &report);
        self.stage(job_id, StageName::Finalization, move || async move {
            let stage = StageName::Finalization;
            let package = assemble(PackageParts {
                job_id,
                request: &input.request,
                plan: input.require_plan(stage)?,
                fingerprint: input.require_fingerprint(stage)?,
                design_review: Some(design_review),
                report,
                output_directory: self.storage.outputs_dir(job_id),
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
            let path = self
                .storage
                .write_result(job_id, &package)
                .await
                .map_err(|e| StageError::failed(stage.as_str(), e.to_string()))?;
            self.store.set_result(job_id, path, package.clone()).await;
            Ok::<_, StageError>(package)
        })
        .await
    }

    /// Stops if the job is no longer active, then reports the row's progress.
    async fn checkpoint(&self, job_id: &str, stage: StageName) -> Result<(), PipelineError> {
        if !self.store.is_active(job_id).await {
            return Err(match self.store.get(job_id).await {
                Some(_) => PipelineError::Cancelled(job_id.to_string()),
                None => PipelineError::JobNotFound(job_id.to_string()),
            });
        }
        self.store
            .update_status(job_id, JobUpdate::progress(stage.progress()).with_step(stage))
            .await;
        Ok(())
    }

    /// Runs `body` as `stage`, recording it in the job and retrying in place
    /// up to `stage_attempts` times.
    async fn stage<T, F, Fut>(&self, job_id: &str, stage: StageName, body: F) -> Result<T, PipelineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let attempts = self.config.stage_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            self.store.start_stage(job_id, stage).await;
            debug!(stage = %stage, attempt = attempt, "Stage started");

            match body().await {
                Ok(value) => {
                    self.store.complete_stage(job_id, stage, None).await;
                    self.metrics.stage_finished(stage, true);
                    debug!(stage = %stage, "Stage completed");
                    return Ok(value);
                }
                Err(e) => {
                    last_error = e.to_string();
                    self.store
                        .complete_stage(job_id, stage, Some(last_error.clone()))
                        .await;
                    self.metrics.stage_finished(stage, false);
                    warn!(
                        stage = %stage,
                        attempt = attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Stage failed"
                    );
                }
            }
        }

        Err(PipelineError::Stage {
            stage: stage.to_string(),
            message: last_error,
        })
    }

    /// Runs a pluggable authoring stage and extracts its typed output.
    async fn authoring<T, X>(
        &self,
        job_id: &str,
        input: &StageInput,
        stage: StageName,
        extract: X,
    ) -> Result<T, PipelineError>
    where
        X: Fn(StageOutput, StageName) -> Result<T, StageError>,
    {
        let extract = &extract;
        self.stage(job_id, stage, move || async move {
            let author = self.services.stages.get(stage)?;
            let output = with_deadline(self.config.service_timeout, author.run(input)).await?;
            extract(output, stage)
        })
        .await
    }

    /// Authors the character sheet prompt and renders it.
    ///
    /// An unsuccessful render is tolerated and yields no anchor.
    async fn anchor(&self, job_id: &str, input: &StageInput) -> Result<Option<PathBuf>, PipelineError> {
        let stage = StageName::AnchorGeneration;
        self.stage(job_id, stage, move || async move {
            let author = self.services.stages.get(stage)?;
            let output = with_deadline(self.config.service_timeout, author.run(input)).await?;
            let descriptor = output.into_anchor_prompt(stage)?;

            let result = self
                .pool
                .generate_anchor(job_id, &descriptor, &input.reference_paths)
                .await;
            match result.path() {
                Some(path) if result.has_image() => Ok::<_, StageError>(Some(path.to_path_buf())),
                _ => {
                    warn!(
                        error = result.error_message.as_deref().unwrap_or("no artifact"),
                        "Character reference sheet not generated, continuing without anchor"
                    );
                    Ok(None)
                }
            }
        })
        .await
    }

    async fn generate(
        &self,
        job_id: &str,
        input: &StageInput,
    ) -> Result<Vec<GenerationResult>, PipelineError> {
        let anchor = input
            .fingerprint
            .as_ref()
            .and_then(|f| f.anchor_path.as_deref());
        self.stage(job_id, StageName::ImageGeneration, move || async move {
            Ok::<_, StageError>(self
                .pool
                .generate_all(job_id, &input.descriptors, &input.reference_paths, anchor)
                .await)
        })
        .await
    }

    async fn page_snapshot(&self, job_id: &str) -> Result<Vec<crate::job::PageState>, PipelineError> {
        self.store
            .get(job_id)
            .await
            .map(|job| job.pages)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))
    }
}

/// Puts reviewed descriptors in book order, requiring exactly one per page.
fn order_descriptors(
    mut descriptors: Vec<PromptDescriptor>,
    page_count: u32,
    stage: StageName,
) -> Result<Vec<PromptDescriptor>, StageError> {
    let expected = page_sequence(page_count);
    let mut ordered = Vec::with_capacity(expected.len());
    for page_number in expected {
        let index = descriptors
            .iter()
            .position(|d| d.page_number == page_number)
            .ok_or_else(|| {
                StageError::failed(
                    stage.as_str(),
                    format!("no descriptor for page {}", page_number),
                )
            })?;
        ordered.push(descriptors.swap_remove(index));
    }
    if !descriptors.is_empty() {
        return Err(StageError::failed(
            stage.as_str(),
            format!("{} unexpected descriptors", descriptors.len()),
        ));
    }
    Ok(ordered)
}
