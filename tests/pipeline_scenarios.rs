//! End-to-end pipeline scenarios against the offline services.
//!
//! Every test runs in its own temporary storage root; generation and
//! validation are replaced where a scenario needs a specific failure.

use async_trait::async_trait;
use bookforge::artifact::{GenerationResult, COVER_PAGE_NUMBER};
use bookforge::book::{BookRequest, LifeStory, PhaseMemories};
use bookforge::error::{PipelineError, ServiceError, StageError};
use bookforge::job::{Job, JobEvent, JobStatus, PageStatus, StageStatus};
use bookforge::pipeline::{
    PipelineConfig, PipelineService, PipelineServices, Stage, StageInput, StageName, StageOutput,
};
use bookforge::services::{
    template_stages, DryRunGenerator, DryRunValidator, GenerationService, RenderRequest, RuleRepair,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn request(pages: u32) -> BookRequest {
    let story = LifeStory {
        young: PhaseMemories {
            memories: vec!["Climbing the old oak tree".to_string()],
            ..PhaseMemories::default()
        },
        adult: PhaseMemories {
            memories: vec!["Opening the bakery".to_string()],
            key_events: vec!["Wedding in the village church".to_string()],
            emotions: vec!["pride".to_string()],
        },
        ..LifeStory::default()
    };
    BookRequest::new("Nonna's Kitchen", pages).with_story(story)
}

fn config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig::new()
        .with_storage_root(dir.path().join("storage"))
        .with_generation_retry_delay(Duration::from_millis(1))
}

fn services(generator: Arc<dyn GenerationService>, score: f64) -> PipelineServices {
    PipelineServices {
        stages: template_stages(),
        generator,
        validator: Arc::new(DryRunValidator::new(score, 7.0)),
        repairer: Arc::new(RuleRepair::new()),
    }
}

/// Wraps the dry-run generator with failure injection and concurrency tracking.
#[derive(Default)]
struct InstrumentedGenerator {
    inner: DryRunGenerator,
    fail_page: Option<i32>,
    delay_ms: u64,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pages_seen: Mutex<Vec<i32>>,
}

#[async_trait]
impl GenerationService for InstrumentedGenerator {
    async fn generate(&self, request: &RenderRequest) -> Result<GenerationResult, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages_seen
            .lock()
            .expect("lock not poisoned")
            .push(request.descriptor.page_number);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_page == Some(request.descriptor.page_number) {
            return Err(ServiceError::Unavailable("content policy".to_string()));
        }
        self.inner.generate(request).await
    }
}

/// Fails its slot on every call.
struct RefusingStage {
    slot: StageName,
    calls: AtomicUsize,
}

impl RefusingStage {
    fn new(slot: StageName) -> Self {
        Self {
            slot,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Stage for RefusingStage {
    fn name(&self) -> StageName {
        self.slot
    }

    async fn run(&self, _input: &StageInput) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StageError::failed(self.slot.as_str(), "no output produced"))
    }
}

/// Delays and counts the template author for its slot.
struct SlowStage {
    inner: Arc<dyn Stage>,
    delay_ms: u64,
    calls: AtomicUsize,
}

impl SlowStage {
    fn new(slot: StageName, delay_ms: u64) -> Self {
        let inner = template_stages()
            .get(slot)
            .expect("template author")
            .clone();
        Self {
            inner,
            delay_ms,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> StageName {
        self.inner.name()
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        self.inner.run(input).await
    }
}

fn stage_status(job: &Job, stage: StageName) -> Option<StageStatus> {
    job.stage(stage).map(|s| s.status)
}

#[tokio::test]
async fn test_happy_path_produces_every_page() {
    let dir = TempDir::new().expect("temp dir");
    let service = PipelineService::dry_run(config(&dir));
    let photo = dir.path().join("nonna.jpg");
    std::fs::write(&photo, b"jpeg").expect("write");

    let package = service
        .run("book-1", request(3), &[photo])
        .await
        .expect("pipeline completes");

    assert_eq!(package.total_pages, 5);
    assert_eq!(package.pages.len(), 3);
    assert_eq!(package.total_retries, 0);
    assert!(package.pages_needing_attention.is_empty());
    assert!(package
        .all_pages()
        .all(|p| p.qc_passed && p.image_filename.is_some()));

    let job = service.store().get("book-1").await.expect("exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress_percent, 100);
    assert!(job.stages.iter().all(|s| s.status == StageStatus::Completed));
    assert!(job.pages.iter().all(|p| p.status == PageStatus::Completed));

    let storage = service.storage();
    assert!(storage.anchor_path("book-1").exists());
    assert!(storage.result_path("book-1").exists());
    let persisted = storage.read_result("book-1").await.expect("persisted");
    assert_eq!(persisted.book_id, "book-1");
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let dir = TempDir::new().expect("temp dir");
    let service = PipelineService::dry_run(config(&dir));
    let mut events = service.store().subscribe();

    service
        .run("book-1", request(4), &[])
        .await
        .expect("pipeline completes");

    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let JobEvent::Status { progress: p, .. } = event {
            progress.push(p);
        }
    }
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    assert_eq!(progress.last().copied(), Some(100));
    assert!(progress.contains(&55));
    assert!(progress.contains(&75));
}

#[tokio::test]
async fn test_planning_failure_stops_before_generation() {
    let dir = TempDir::new().expect("temp dir");
    let generator = Arc::new(InstrumentedGenerator::default());
    let planner = Arc::new(RefusingStage::new(StageName::Planning));
    let mut services = services(generator.clone(), 8.0);
    services.stages = services.stages.with_stage(planner.clone());
    let service = PipelineService::new(config(&dir), services);

    let err = service
        .run("book-1", request(2), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Stage { ref stage, .. } if stage == "planning"));
    assert_eq!(planner.calls.load(Ordering::SeqCst), 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

    let status = service.status("book-1").await.expect("exists");
    assert_eq!(status.status, JobStatus::Failed);
    assert!(status
        .error
        .as_deref()
        .is_some_and(|e| e.contains("no output produced")));
    assert!(!status.result_available);
}

#[tokio::test]
async fn test_planning_failure_waits_for_visual_analysis() {
    let dir = TempDir::new().expect("temp dir");
    let generator = Arc::new(InstrumentedGenerator::default());
    let planner = Arc::new(RefusingStage::new(StageName::Planning));
    let analysis = Arc::new(SlowStage::new(StageName::VisualAnalysis, 50));
    let mut services = services(generator.clone(), 8.0);
    services.stages = services
        .stages
        .with_stage(planner.clone())
        .with_stage(analysis.clone());
    let service = PipelineService::new(config(&dir), services);

    let err = service
        .run("book-1", request(2), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Stage { ref stage, .. } if stage == "planning"));
    assert_eq!(analysis.calls.load(Ordering::SeqCst), 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

    // The sibling ran to completion before the row reported the failure.
    let job = service.store().get("book-1").await.expect("exists");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(stage_status(&job, StageName::Planning), Some(StageStatus::Failed));
    assert_eq!(
        stage_status(&job, StageName::VisualAnalysis),
        Some(StageStatus::Completed)
    );
    for stage in &StageName::ALL[3..] {
        assert_eq!(stage_status(&job, *stage), Some(StageStatus::Skipped), "{}", stage);
    }
}

#[tokio::test]
async fn test_back_cover_failure_waits_for_prompt_row() {
    let dir = TempDir::new().expect("temp dir");
    let generator = Arc::new(InstrumentedGenerator::default());
    let back_cover = Arc::new(RefusingStage::new(StageName::BackCoverPrompt));
    let cover = Arc::new(SlowStage::new(StageName::CoverPrompt, 30));
    let pages = Arc::new(SlowStage::new(StageName::PagePrompts, 30));
    let mut services = services(generator.clone(), 8.0);
    services.stages = services
        .stages
        .with_stage(back_cover.clone())
        .with_stage(cover.clone())
        .with_stage(pages.clone());
    let service = PipelineService::new(config(&dir), services);

    let err = service
        .run("book-1", request(2), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Stage { ref stage, .. } if stage == "back_cover_prompt"));
    assert_eq!(back_cover.calls.load(Ordering::SeqCst), 1);
    assert_eq!(cover.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pages.calls.load(Ordering::SeqCst), 1);
    // Only the anchor was rendered.
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

    let job = service.store().get("book-1").await.expect("exists");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        stage_status(&job, StageName::BackCoverPrompt),
        Some(StageStatus::Failed)
    );
    assert_eq!(stage_status(&job, StageName::CoverPrompt), Some(StageStatus::Completed));
    assert_eq!(stage_status(&job, StageName::PagePrompts), Some(StageStatus::Completed));
    assert_eq!(stage_status(&job, StageName::PromptReview), Some(StageStatus::Skipped));
    assert_eq!(
        stage_status(&job, StageName::ImageGeneration),
        Some(StageStatus::Skipped)
    );
}

#[tokio::test]
async fn test_failed_status_is_the_last_job_event() {
    let dir = TempDir::new().expect("temp dir");
    let generator = Arc::new(InstrumentedGenerator::default());
    let mut services = services(generator, 8.0);
    services.stages = services
        .stages
        .with_stage(Arc::new(RefusingStage::new(StageName::Planning)));
    let service = PipelineService::new(config(&dir), services);
    let mut events = service.store().subscribe();

    service
        .run("book-1", request(2), &[])
        .await
        .unwrap_err();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    let failed_at = received
        .iter()
        .position(|e| matches!(e, JobEvent::Status { status: JobStatus::Failed, .. }))
        .expect("failed status published");
    let last_skip = received
        .iter()
        .rposition(|e| matches!(e, JobEvent::Stage { status: StageStatus::Skipped, .. }))
        .expect("skipped stages published");
    assert!(last_skip < failed_at, "{:?}", received);
    assert_eq!(failed_at, received.len() - 1);
}

#[tokio::test]
async fn test_single_generation_failure_flags_page() {
    let dir = TempDir::new().expect("temp dir");
    let generator = Arc::new(InstrumentedGenerator {
        fail_page: Some(2),
        ..InstrumentedGenerator::default()
    });
    let service = PipelineService::new(config(&dir), services(generator.clone(), 8.0));

    let package = service
        .run("book-1", request(3), &[])
        .await
        .expect("pipeline completes despite one page");

    assert_eq!(package.pages_needing_attention, vec![2]);
    let page_two = &package.pages[1];
    assert_eq!(page_two.page_number, 2);
    assert!(page_two.image_filename.is_none());
    assert!(!page_two.qc_passed);
    assert!(package.pages[0].qc_passed);
    assert!(package.cover.qc_passed);

    let job = service.store().get("book-1").await.expect("exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.page(2).map(|p| p.status), Some(PageStatus::Failed));
    assert_eq!(job.page(1).map(|p| p.status), Some(PageStatus::Completed));

    // Three pool attempts plus one regeneration per repair cycle.
    let page_two_calls = generator
        .pages_seen
        .lock()
        .expect("lock not poisoned")
        .iter()
        .filter(|p| **p == 2)
        .count();
    assert_eq!(page_two_calls, 3 + 2);
}

#[tokio::test]
async fn test_always_failing_validation_exhausts_retries() {
    let dir = TempDir::new().expect("temp dir");
    let generator = Arc::new(InstrumentedGenerator::default());
    let service = PipelineService::new(config(&dir), services(generator, 2.0));

    let package = service
        .run("book-1", request(10), &[])
        .await
        .expect("job still completes");

    assert_eq!(package.total_pages, 12);
    assert_eq!(package.pages_needing_attention.len(), 12);
    assert_eq!(package.total_retries, 24);
    for page in &package.pages {
        assert_eq!(page.generation_attempts, 3);
        assert!(!page.qc_passed);
        assert!(page.requires_regeneration);
    }

    let job = service.store().get("book-1").await.expect("exists");
    assert_eq!(job.status, JobStatus::Completed);
    for page in job.pages.iter().filter(|p| p.page_number > COVER_PAGE_NUMBER) {
        assert_eq!(page.retry_count, 2);
        assert_eq!(page.status, PageStatus::Failed);
        assert!(page.last_qc.as_ref().is_some_and(|qc| qc.requires_regeneration));
    }
}

#[tokio::test]
async fn test_per_job_retry_override() {
    let dir = TempDir::new().expect("temp dir");
    let generator = Arc::new(InstrumentedGenerator::default());
    let service = PipelineService::new(config(&dir), services(generator, 2.0));

    let mut request = request(2);
    request.max_retries = Some(0);
    let package = service
        .run("book-1", request, &[])
        .await
        .expect("completes");

    assert_eq!(package.total_retries, 0);
    assert!(package.all_pages().all(|p| p.generation_attempts == 1));
}

#[tokio::test]
async fn test_generation_concurrency_is_capped() {
    let dir = TempDir::new().expect("temp dir");
    let generator = Arc::new(InstrumentedGenerator {
        delay_ms: 20,
        ..InstrumentedGenerator::default()
    });
    let service = PipelineService::new(
        config(&dir).with_generation_concurrency(2),
        services(generator.clone(), 8.0),
    );

    service
        .run("book-1", request(6), &[])
        .await
        .expect("completes");

    // Anchor plus eight book pages.
    assert_eq!(generator.calls.load(Ordering::SeqCst), 9);
    assert_eq!(generator.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancel_stops_at_next_row() {
    let dir = TempDir::new().expect("temp dir");
    let generator = Arc::new(InstrumentedGenerator {
        delay_ms: 100,
        ..InstrumentedGenerator::default()
    });
    let service = PipelineService::new(config(&dir), services(generator.clone(), 8.0));

    let handle = service
        .submit("book-1", request(2), &[])
        .await
        .expect("submitted");

    // Wait until the first artifact is being rendered.
    for _ in 0..200 {
        if generator.calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(service.cancel("book-1").await);

    let err = handle.await.expect("joined").unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled(_)));

    let job = service.store().get("book-1").await.expect("exists");
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.result.is_none());
    assert_eq!(
        job.stage(StageName::Finalization).map(|s| s.status),
        Some(StageStatus::Skipped)
    );
    assert!(!service.storage().result_path("book-1").exists());
}
