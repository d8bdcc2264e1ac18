//! Control surface over the pipeline: submit, poll, fetch, cancel, delete.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::config::PipelineConfig;
use super::sequencer::{PipelineServices, StageSequencer};
use crate::book::{BookRequest, FinalPackage};
use crate::error::{PipelineError, StorageError};
use crate::job::{JobStatus, JobStatusView, JobStore, JobSummary};
use crate::services::{template_stages, DryRunGenerator, DryRunValidator, RuleRepair};
use crate::storage::{is_valid_name, JobAssets, JobStorage};

/// Outcome of asking for a job's final package.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultLookup {
    Ready(Box<FinalPackage>),
    NotFound,
    /// The job exists but has no package; carries its current status.
    NotReady(JobStatus),
}

impl ResultLookup {
    pub fn ready(self) -> Option<FinalPackage> {
        match self {
            ResultLookup::Ready(package) => Some(*package),
            _ => None,
        }
    }
}

/// Entry point for callers of the pipeline.
#[derive(Clone)]
pub struct PipelineService {
    sequencer: Arc<StageSequencer>,
}

impl std::fmt::Debug for PipelineService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineService")
            .field("storage_root", &self.storage().root())
            .finish_non_exhaustive()
    }
}

impl PipelineService {
    /// Creates a service with its own job store, storing under
    /// `config.storage_root`.
    pub fn new(config: PipelineConfig, services: PipelineServices) -> Self {
        Self::with_store(config, Arc::new(JobStore::new()), services)
    }

    pub fn with_store(config: PipelineConfig, store: Arc<JobStore>, services: PipelineServices) -> Self {
        let storage = JobStorage::new(config.storage_root.clone());
        Self {
            sequencer: Arc::new(StageSequencer::new(config, store, storage, services)),
        }
    }

    /// A fully offline pipeline: template authoring, placeholder artifacts,
    /// fixed-score validation and rule-based repair.
    pub fn dry_run(config: PipelineConfig) -> Self {
        let services = PipelineServices {
            stages: template_stages(),
            generator: Arc::new(DryRunGenerator::new()),
            validator: Arc::new(DryRunValidator::new(8.0, config.validation_threshold)),
            repairer: Arc::new(RuleRepair::new()),
        };
        Self::new(config, services)
    }

    /// Fresh random job id.
    pub fn new_job_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn store(&self) -> &Arc<JobStore> {
        self.sequencer.store()
    }

    pub fn storage(&self) -> &JobStorage {
        self.sequencer.storage()
    }

    /// Reserves the id, then copies the reference images into the job
    /// directory. The reservation is released if the copy fails.
    async fn register(
        &self,
        job_id: &str,
        request: BookRequest,
        references: &[PathBuf],
    ) -> Result<(), PipelineError> {
        if !is_valid_name(job_id) {
            return Err(PipelineError::InvalidJobId(job_id.to_string()));
        }
        request.validate()?;
        self.store()
            .create(job_id, request, Vec::new())
            .await
            .ok_or_else(|| PipelineError::JobExists(job_id.to_string()))?;

        let saved = match self.store_references(job_id, references).await {
            Ok(saved) => saved,
            Err(e) => {
                self.store().delete(job_id).await;
                if let Err(cleanup) = self.storage().cleanup(job_id).await {
                    tracing::warn!(job_id = %job_id, error = %cleanup, "Failed to remove job directory");
                }
                return Err(e.into());
            }
        };
        self.store().set_reference_paths(job_id, saved).await;

        tracing::info!(
            job_id = %job_id,
            references = references.len(),
            "Job registered"
        );
        Ok(())
    }

    async fn store_references(
        &self,
        job_id: &str,
        references: &[PathBuf],
    ) -> Result<Vec<PathBuf>, StorageError> {
        self.storage().prepare(job_id).await?;
        self.storage().save_references(job_id, references).await
    }

    /// Registers the job and runs it in the background.
    ///
    /// The returned handle resolves to the run's outcome; dropping it does
    /// not stop the run.
    pub async fn submit(
        &self,
        job_id: &str,
        request: BookRequest,
        references: &[PathBuf],
    ) -> Result<JoinHandle<Result<FinalPackage, PipelineError>>, PipelineError> {
        self.register(job_id, request, references).await?;
        let sequencer = Arc::clone(&self.sequencer);
        let job_id = job_id.to_string();
        Ok(tokio::spawn(async move { sequencer.run(&job_id).await }))
    }

    /// Registers the job and runs it to completion.
    pub async fn run(
        &self,
        job_id: &str,
        request: BookRequest,
        references: &[PathBuf],
    ) -> Result<FinalPackage, PipelineError> {
        self.register(job_id, request, references).await?;
        self.sequencer.run(job_id).await
    }

    pub async fn status(&self, job_id: &str) -> Option<JobStatusView> {
        self.store().get(job_id).await.map(|job| job.status_view())
    }

    /// The final package, falling back to the persisted record when the
    /// in-memory copy is gone.
    pub async fn result(&self, job_id: &str) -> ResultLookup {
        let Some(job) = self.store().get(job_id).await else {
            return ResultLookup::NotFound;
        };
        if let Some(package) = job.result {
            return ResultLookup::Ready(Box::new(package));
        }
        if job.status == JobStatus::Completed {
            if let Ok(package) = self.storage().read_result(job_id).await {
                return ResultLookup::Ready(Box::new(package));
            }
        }
        ResultLookup::NotReady(job.status)
    }

    /// Like [`result`](Self::result), with each page's image inlined as a
    /// base64 `data:` URL where the file still exists.
    pub async fn result_with_images(&self, job_id: &str) -> ResultLookup {
        match self.result(job_id).await {
            ResultLookup::Ready(mut package) => {
                self.storage().embed_images(&mut package).await;
                ResultLookup::Ready(package)
            }
            other => other,
        }
    }

    /// Marks an active job cancelled. The run stops at its next row boundary.
    ///
    /// Returns false for unknown or already finished jobs.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let cancelled = self
            .store()
            .update_status(job_id, crate::job::JobUpdate::status(JobStatus::Cancelled))
            .await;
        if cancelled {
            tracing::info!(job_id = %job_id, "Job cancelled");
        }
        cancelled
    }

    /// Removes the job record and its directory. In-flight service calls are
    /// not interrupted.
    ///
    /// Returns false, touching nothing on disk, for unknown or invalid ids.
    pub async fn delete(&self, job_id: &str) -> bool {
        if !is_valid_name(job_id) || !self.store().delete(job_id).await {
            return false;
        }
        if let Err(e) = self.storage().cleanup(job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to remove job directory");
        }
        tracing::info!(job_id = %job_id, "Job deleted");
        true
    }

    pub async fn list(&self, limit: usize) -> Vec<JobSummary> {
        self.store().list(limit).await
    }

    /// Reference and output filenames stored for a job.
    pub fn assets(&self, job_id: &str) -> Result<JobAssets, PipelineError> {
        if !is_valid_name(job_id) {
            return Err(PipelineError::InvalidJobId(job_id.to_string()));
        }
        Ok(self.storage().list_assets(job_id)?)
    }

    /// Location of a stored asset by filename. Names that are not a single
    /// path component resolve to nothing.
    pub fn asset_path(&self, job_id: &str, filename: &str) -> Option<PathBuf> {
        self.storage().asset_path(job_id, filename)
    }
}
