//! Runs the validation loop over every artifact of a job.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::config::BatchMode;
use super::repair::{ValidationContext, ValidationMachine, ValidationOutcome};
use crate::artifact::{GenerationResult, PromptDescriptor};

/// Aggregate of one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One outcome per artifact, in input order.
    pub outcomes: Vec<ValidationOutcome>,
    pub total_retries: u32,
}

impl BatchReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed()).count()
    }

    /// Pages whose loop ended without a passing QC.
    pub fn failed_pages(&self) -> Vec<i32> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed())
            .map(|o| o.page_number)
            .collect()
    }

    pub fn outcome(&self, page_number: i32) -> Option<&ValidationOutcome> {
        self.outcomes.iter().find(|o| o.page_number == page_number)
    }
}

/// Schedules the per-artifact loops sequentially or in parallel.
#[derive(Debug, Clone, Copy)]
pub struct BatchCoordinator {
    mode: BatchMode,
    concurrency: usize,
}

impl BatchCoordinator {
    pub fn new(mode: BatchMode, concurrency: usize) -> Self {
        Self {
            mode,
            concurrency: concurrency.max(1),
        }
    }

    /// Drives every artifact to a terminal state. Never fails.
    pub async fn run(
        &self,
        ctx: &ValidationContext,
        items: Vec<(PromptDescriptor, GenerationResult)>,
    ) -> BatchReport {
        tracing::info!(
            job_id = %ctx.job_id,
            artifacts = items.len(),
            mode = %self.mode,
            max_retries = ctx.max_retries,
            "Validating artifacts"
        );

        let outcomes = match self.mode {
            BatchMode::Sequential => {
                let mut outcomes = Vec::with_capacity(items.len());
                for (descriptor, generation) in items {
                    outcomes.push(ValidationMachine::new(ctx, descriptor, generation).run().await);
                }
                outcomes
            }
            BatchMode::Parallel => {
                let permits = Arc::new(Semaphore::new(self.concurrency));
                let tasks = items.into_iter().map(|(descriptor, generation)| {
                    let permits = Arc::clone(&permits);
                    async move {
                        // The semaphore is never closed.
                        let _permit = permits.acquire_owned().await.ok();
                        ValidationMachine::new(ctx, descriptor, generation).run().await
                    }
                });
                join_all(tasks).await
            }
        };

        let report = BatchReport {
            total_retries: outcomes.iter().map(|o| o.retry_count).sum(),
            outcomes,
        };
        let failed = report.failed_pages();
        if failed.is_empty() {
            tracing::info!(
                job_id = %ctx.job_id,
                passed = report.passed(),
                total_retries = report.total_retries,
                "All artifacts passed validation"
            );
        } else {
            tracing::warn!(
                job_id = %ctx.job_id,
                passed = report.passed(),
                failed = ?failed,
                total_retries = report.total_retries,
                "Some artifacts did not pass validation"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{GenerationMetadata, QcResult, QualityMetrics};
    use crate::book::{BookRequest, VisualFingerprint};
    use crate::error::ServiceError;
    use crate::job::JobStore;
    use crate::services::{
        DryRunGenerator, GenerationService, RenderRequest, RuleRepair, ValidationService,
    };
    use crate::storage::JobStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Fails odd pages forever, tracking concurrent calls.
    struct OddPagesFail {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ValidationService for OddPagesFail {
        async fn validate(
            &self,
            result: &GenerationResult,
            descriptor: &PromptDescriptor,
            _fingerprint: &VisualFingerprint,
        ) -> Result<QcResult, ServiceError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let score = if descriptor.page_number % 2 == 1 { 2.0 } else { 9.0 };
            Ok(QcResult::scored(
                descriptor.page_number,
                result.image_path.clone(),
                QualityMetrics::uniform(score),
                7.0,
            ))
        }
    }

    async fn setup(dir: &TempDir, validator: Arc<OddPagesFail>) -> (ValidationContext, Vec<(PromptDescriptor, GenerationResult)>) {
        let store = Arc::new(JobStore::new());
        store
            .create("job", BookRequest::new("Book", 4), vec![])
            .await
            .expect("created");
        let ctx = ValidationContext {
            job_id: "job".to_string(),
            store,
            storage: JobStorage::new(dir.path()),
            generator: Arc::new(DryRunGenerator::new()),
            validator,
            repairer: Arc::new(RuleRepair::new()),
            fingerprint: VisualFingerprint::default(),
            user_references: Vec::new(),
            max_retries: 1,
            timeout: None,
        };

        let mut items = Vec::new();
        for page in 1..=4 {
            let descriptor = PromptDescriptor::new(page, format!("page {}", page));
            let generation = ctx
                .generator
                .generate(&RenderRequest {
                    descriptor: descriptor.clone(),
                    reference_paths: Vec::new(),
                    output_path: ctx.storage.artifact_path("job", page),
                })
                .await
                .unwrap_or_else(|e| {
                    GenerationResult::failed(page, e.to_string(), GenerationMetadata::new("x", 1))
                });
            items.push((descriptor, generation));
        }
        (ctx, items)
    }

    fn validator() -> Arc<OddPagesFail> {
        Arc::new(OddPagesFail {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_sequential_batch_aggregates_retries() {
        let dir = TempDir::new().expect("temp dir");
        let validator = validator();
        let (ctx, items) = setup(&dir, Arc::clone(&validator)).await;

        let report = BatchCoordinator::new(BatchMode::Sequential, 2)
            .run(&ctx, items)
            .await;

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.failed_pages(), vec![1, 3]);
        assert_eq!(report.total_retries, 2);
        assert_eq!(report.passed(), 2);
        assert_eq!(validator.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(report.outcome(3).map(|o| o.retry_count), Some(1));

        let job = ctx.store.get("job").await.expect("exists");
        assert_eq!(job.total_retries, 2);
    }

    #[tokio::test]
    async fn test_parallel_batch_respects_cap_and_order() {
        let dir = TempDir::new().expect("temp dir");
        let validator = validator();
        let (ctx, items) = setup(&dir, Arc::clone(&validator)).await;

        let report = BatchCoordinator::new(BatchMode::Parallel, 2)
            .run(&ctx, items)
            .await;

        let order: Vec<i32> = report.outcomes.iter().map(|o| o.page_number).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
        assert!(validator.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(report.total_retries, 2);
    }
}
