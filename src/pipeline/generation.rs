//! Generation worker pool.
//!
//! Renders one artifact per descriptor with at most `generation_concurrency`
//! calls in flight. Each artifact gets `generation_attempts` tries with a
//! fixed delay between them. A failed artifact never fails the stage; its
//! page is marked failed and the validation loop deals with it later.

use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use super::config::PipelineConfig;
use super::stage::generation_progress;
use crate::artifact::{GenerationMetadata, GenerationResult, PromptDescriptor};
use crate::job::{JobStore, JobUpdate, PageStatus, PageUpdate};
use crate::metrics::MetricsCollector;
use crate::services::{with_deadline, GenerationService, RenderRequest};
use crate::storage::JobStorage;

/// Reference artifacts handed to a descriptor's generation call.
///
/// Descriptors that opt out (the back cover always does) get none.
pub fn references_for(
    descriptor: &PromptDescriptor,
    user_references: &[PathBuf],
    anchor: Option<&Path>,
) -> Vec<PathBuf> {
    if !descriptor.wants_references() {
        return Vec::new();
    }
    let mut refs: Vec<PathBuf> = descriptor.reference_paths.clone();
    for path in user_references.iter().map(PathBuf::as_path).chain(anchor) {
        if !refs.iter().any(|r| r == path) {
            refs.push(path.to_path_buf());
        }
    }
    refs
}

/// Bounded-concurrency generation with attempt-level retry.
pub struct GenerationPool {
    generator: Arc<dyn GenerationService>,
    store: Arc<JobStore>,
    storage: JobStorage,
    permits: Arc<Semaphore>,
    attempts: u32,
    retry_delay: Duration,
    timeout: Option<Duration>,
    metrics: MetricsCollector,
}

impl GenerationPool {
    pub fn new(
        generator: Arc<dyn GenerationService>,
        store: Arc<JobStore>,
        storage: JobStorage,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            generator,
            store,
            storage,
            permits: Arc::new(Semaphore::new(config.generation_concurrency.max(1))),
            attempts: config.generation_attempts.max(1),
            retry_delay: config.generation_retry_delay,
            timeout: config.service_timeout,
            metrics: MetricsCollector::new(),
        }
    }

    /// Generates every descriptor, returning one result per descriptor in
    /// input order.
    ///
    /// Page status moves to generating when a permit is acquired and to
    /// completed or failed when the artifact is done. Job progress advances
    /// proportionally from 55 to 75.
    pub async fn generate_all(
        &self,
        job_id: &str,
        descriptors: &[PromptDescriptor],
        user_references: &[PathBuf],
        anchor: Option<&Path>,
    ) -> Vec<GenerationResult> {
        let total = descriptors.len();
        let done = AtomicUsize::new(0);

        tracing::info!(job_id = %job_id, artifacts = total, "Generating artifacts");

        let tasks = descriptors.iter().map(|descriptor| {
            let done = &done;
            async move {
                let result = self
                    .generate_page(job_id, descriptor, user_references, anchor)
                    .await;
                let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
                self.store
                    .update_status(job_id, JobUpdate::progress(generation_progress(finished, total)))
                    .await;
                result
            }
        });
        let results = join_all(tasks).await;

        let failed = results.iter().filter(|r| !r.has_image()).count();
        if failed > 0 {
            tracing::warn!(
                job_id = %job_id,
                failed = failed,
                total = total,
                "Some artifacts failed to generate"
            );
        } else {
            tracing::info!(job_id = %job_id, total = total, "All artifacts generated");
        }
        results
    }

    async fn generate_page(
        &self,
        job_id: &str,
        descriptor: &PromptDescriptor,
        user_references: &[PathBuf],
        anchor: Option<&Path>,
    ) -> GenerationResult {
        let page_number = descriptor.page_number;
        let Ok(_permit) = self.permits.acquire().await else {
            return GenerationResult::missing(page_number, Some("generation pool closed".to_string()));
        };

        self.store
            .update_page(job_id, page_number, PageUpdate::status(PageStatus::Generating))
            .await;

        let request = RenderRequest {
            descriptor: descriptor.clone(),
            reference_paths: references_for(descriptor, user_references, anchor),
            output_path: self.storage.artifact_path(job_id, page_number),
        };
        let result = self.generate_with_retry(job_id, &request).await;

        let update = match (result.has_image(), result.path()) {
            (true, Some(path)) => PageUpdate::status(PageStatus::Completed).with_image(path),
            _ => PageUpdate::status(PageStatus::Failed).with_error(
                result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "generation failed".to_string()),
            ),
        };
        self.store.update_page(job_id, page_number, update).await;
        result
    }

    /// Renders the character reference sheet under the same concurrency cap.
    pub async fn generate_anchor(
        &self,
        job_id: &str,
        descriptor: &PromptDescriptor,
        user_references: &[PathBuf],
    ) -> GenerationResult {
        let Ok(_permit) = self.permits.acquire().await else {
            return GenerationResult::missing(
                descriptor.page_number,
                Some("generation pool closed".to_string()),
            );
        };
        let request = RenderRequest {
            descriptor: descriptor.clone(),
            reference_paths: references_for(descriptor, user_references, None),
            output_path: self.storage.anchor_path(job_id),
        };
        self.generate_with_retry(job_id, &request).await
    }

    /// Calls the generation service up to `attempts` times.
    ///
    /// Service errors and unsuccessful results both count as failed attempts.
    /// The returned result carries the attempt index in `metadata.retry_count`.
    async fn generate_with_retry(&self, job_id: &str, request: &RenderRequest) -> GenerationResult {
        let page_number = request.descriptor.page_number;
        let mut last_error = String::from("generation not attempted");

        for attempt in 0..self.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }

            let started = Instant::now();
            let outcome = with_deadline(self.timeout, self.generator.generate(request)).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(mut result) if result.has_image() => {
                    result.metadata.retry_count = attempt;
                    if result.metadata.generation_time_ms == 0 {
                        result.metadata.generation_time_ms = elapsed_ms;
                    }
                    self.metrics
                        .generation_latency(&result.metadata.model_used, elapsed_ms);
                    tracing::debug!(
                        job_id = %job_id,
                        page_number = page_number,
                        attempt = attempt + 1,
                        elapsed_ms = elapsed_ms,
                        "Artifact generated"
                    );
                    return result;
                }
                Ok(result) => {
                    last_error = result
                        .error_message
                        .unwrap_or_else(|| "generation returned no artifact".to_string());
                }
                Err(e) => last_error = e.to_string(),
            }

            tracing::warn!(
                job_id = %job_id,
                page_number = page_number,
                attempt = attempt + 1,
                max_attempts = self.attempts,
                error = %last_error,
                "Generation attempt failed"
            );
        }

        let mut metadata = GenerationMetadata::new("unknown", request.descriptor.version);
        metadata.retry_count = self.attempts.saturating_sub(1);
        GenerationResult::failed(page_number, last_error, metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{BACK_COVER_PAGE_NUMBER, COVER_PAGE_NUMBER};
    use crate::book::BookRequest;
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Tracks concurrent calls and fails selected pages a number of times.
    struct MockGenerator {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        failures_left: Mutex<HashMap<i32, usize>>,
        seen: Mutex<Vec<RenderRequest>>,
    }

    impl MockGenerator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                failures_left: Mutex::new(HashMap::new()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing(self, page_number: i32, times: usize) -> Self {
            self.failures_left
                .lock()
                .expect("lock not poisoned")
                .insert(page_number, times);
            self
        }
    }

    #[async_trait]
    impl GenerationService for MockGenerator {
        async fn generate(&self, request: &RenderRequest) -> Result<GenerationResult, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.seen
                .lock()
                .expect("lock not poisoned")
                .push(request.clone());

            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let page = request.descriptor.page_number;
            let should_fail = {
                let mut failures = self.failures_left.lock().expect("lock not poisoned");
                match failures.get_mut(&page) {
                    Some(left) if *left > 0 => {
                        *left -= 1;
                        true
                    }
                    _ => false,
                }
            };
            if should_fail {
                return Err(ServiceError::Unavailable("renderer busy".to_string()));
            }
            Ok(GenerationResult::succeeded(
                page,
                request.output_path.clone(),
                GenerationMetadata::new("mock", request.descriptor.version),
            ))
        }
    }

    fn descriptors(page_count: i32) -> Vec<PromptDescriptor> {
        let mut all = vec![PromptDescriptor::new(COVER_PAGE_NUMBER, "cover")];
        all.extend((1..=page_count).map(|n| PromptDescriptor::new(n, format!("page {}", n))));
        all.push(PromptDescriptor::new(BACK_COVER_PAGE_NUMBER, "back"));
        all
    }

    async fn setup(
        generator: Arc<MockGenerator>,
        page_count: u32,
        config: &PipelineConfig,
    ) -> (TempDir, Arc<JobStore>, GenerationPool) {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(JobStore::new());
        store
            .create("job", BookRequest::new("Book", page_count), vec![])
            .await
            .expect("created");
        let pool = GenerationPool::new(
            generator,
            Arc::clone(&store),
            JobStorage::new(dir.path()),
            config,
        );
        (dir, store, pool)
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::new().with_generation_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let generator = Arc::new(MockGenerator::new());
        let config = fast_config().with_generation_concurrency(2);
        let (_dir, store, pool) = setup(Arc::clone(&generator), 8, &config).await;

        let results = pool.generate_all("job", &descriptors(8), &[], None).await;

        assert_eq!(results.len(), 10);
        assert!(results.iter().all(|r| r.has_image()));
        assert!(generator.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 10);

        let job = store.get("job").await.expect("exists");
        assert_eq!(job.progress_percent, 75);
        assert!(job.pages.iter().all(|p| p.status == PageStatus::Completed));
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt() {
        let generator = Arc::new(MockGenerator::new().failing(1, 2));
        let (_dir, store, pool) = setup(Arc::clone(&generator), 1, &fast_config()).await;

        let results = pool.generate_all("job", &descriptors(1), &[], None).await;

        let page = results.iter().find(|r| r.page_number == 1).expect("page 1");
        assert!(page.has_image());
        assert_eq!(page.metadata.retry_count, 2);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 5);

        let job = store.get("job").await.expect("exists");
        assert_eq!(job.page(1).map(|p| p.status), Some(PageStatus::Completed));
    }

    #[tokio::test]
    async fn test_exhausted_artifact_is_flagged_without_failing_others() {
        let generator = Arc::new(MockGenerator::new().failing(2, 10));
        let (_dir, store, pool) = setup(Arc::clone(&generator), 3, &fast_config()).await;

        let results = pool.generate_all("job", &descriptors(3), &[], None).await;

        let failed: Vec<i32> = results
            .iter()
            .filter(|r| !r.has_image())
            .map(|r| r.page_number)
            .collect();
        assert_eq!(failed, vec![2]);

        let job = store.get("job").await.expect("exists");
        let page = job.page(2).expect("page 2");
        assert_eq!(page.status, PageStatus::Failed);
        assert!(page.error.as_deref().is_some_and(|e| e.contains("renderer busy")));
        assert_eq!(job.page(1).map(|p| p.status), Some(PageStatus::Completed));
    }

    #[tokio::test]
    async fn test_back_cover_gets_no_references() {
        let generator = Arc::new(MockGenerator::new());
        let (dir, _store, pool) = setup(Arc::clone(&generator), 1, &fast_config()).await;
        let user_ref = dir.path().join("reference_00.jpg");
        let anchor = dir.path().join("character_ref.png");

        let mut back = PromptDescriptor::new(BACK_COVER_PAGE_NUMBER, "back");
        back.render_params.use_reference_images = false;
        let all = vec![PromptDescriptor::new(1, "page"), back];
        pool.generate_all("job", &all, &[user_ref.clone()], Some(&anchor))
            .await;

        let seen = generator.seen.lock().expect("lock not poisoned").clone();
        for request in seen {
            if request.descriptor.page_number == BACK_COVER_PAGE_NUMBER {
                assert!(request.reference_paths.is_empty());
                assert!(request.output_path.ends_with("back_cover.png"));
            } else {
                assert_eq!(request.reference_paths, vec![user_ref.clone(), anchor.clone()]);
                assert!(request.output_path.ends_with("page_01.png"));
            }
        }
    }

    #[tokio::test]
    async fn test_anchor_generation_writes_reference_sheet() {
        let generator = Arc::new(MockGenerator::new());
        let (_dir, _store, pool) = setup(Arc::clone(&generator), 1, &fast_config()).await;

        let descriptor = PromptDescriptor::new(crate::artifact::ANCHOR_PAGE_NUMBER, "sheet");
        let result = pool.generate_anchor("job", &descriptor, &[]).await;

        assert!(result.has_image());
        assert!(result
            .path()
            .is_some_and(|p| p.ends_with("character_ref.png")));
    }
}
