//! Process-local job registry.
//!
//! Every mutation takes the registry write lock once, so readers always see a
//! consistent job. Reads hand out cloned snapshots. Unknown ids are reported
//! through `Option`/`bool` return values.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};

use super::record::{
    Job, JobStatus, JobSummary, JobUpdate, PageStatus, PageUpdate, StageStatus,
};
use crate::book::{BookRequest, FinalPackage};
use crate::pipeline::stage::StageName;

/// Default number of jobs returned by [`JobStore::list`].
pub const DEFAULT_LIST_LIMIT: usize = 100;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Change notifications published after each successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Status {
        job_id: String,
        status: JobStatus,
        progress: u8,
        current_step: Option<StageName>,
    },
    Stage {
        job_id: String,
        stage: StageName,
        status: StageStatus,
    },
    Page {
        job_id: String,
        page_number: i32,
        status: PageStatus,
        retry_count: u32,
    },
    ResultReady {
        job_id: String,
    },
    Deleted {
        job_id: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Status { job_id, .. }
            | JobEvent::Stage { job_id, .. }
            | JobEvent::Page { job_id, .. }
            | JobEvent::ResultReady { job_id }
            | JobEvent::Deleted { job_id } => job_id,
        }
    }
}

/// Shared registry of jobs keyed by id.
pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
    events: broadcast::Sender<JobEvent>,
    next_seq: AtomicU64,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            jobs: RwLock::new(HashMap::new()),
            events,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Subscribe to change notifications for all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: JobEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Registers a new job with every stage pending and `page_count + 2` pages.
    ///
    /// Returns `None` if a job with this id already exists.
    pub async fn create(
        &self,
        job_id: &str,
        request: BookRequest,
        reference_paths: Vec<PathBuf>,
    ) -> Option<Job> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(job_id) {
            return None;
        }
        let mut job = Job::new(job_id, request, reference_paths);
        job.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        jobs.insert(job_id.to_string(), job.clone());
        tracing::debug!(job_id = %job_id, pages = job.pages.len(), "Job created");
        Some(job)
    }

    /// Snapshot of a job.
    pub async fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// True while the job exists and has not reached a terminal status.
    pub async fn is_active(&self, job_id: &str) -> bool {
        self.jobs
            .read()
            .await
            .get(job_id)
            .is_some_and(|job| !job.status.is_terminal())
    }

    /// Applies a job-level update.
    ///
    /// Progress is clamped to 0-100 and never decreases. Entering processing
    /// stamps `started_at`, entering a terminal status stamps `completed_at`,
    /// each only once. Terminal jobs ignore all further updates.
    ///
    /// Entering a terminal status marks every still-pending stage skipped in
    /// the same critical section; their stage events are published before
    /// the status event.
    ///
    /// Returns false for unknown or terminal jobs.
    pub async fn update_status(&self, job_id: &str, update: JobUpdate) -> bool {
        let (skipped, event) = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(job_id) else {
                return false;
            };
            if job.status.is_terminal() {
                return false;
            }

            let now = Utc::now();
            let mut skipped = Vec::new();
            if let Some(status) = update.status {
                job.status = status;
                if status == JobStatus::Processing && job.started_at.is_none() {
                    job.started_at = Some(now);
                }
                if status.is_terminal() {
                    if job.completed_at.is_none() {
                        job.completed_at = Some(now);
                    }
                    for state in job.stages.iter_mut() {
                        if state.status == StageStatus::Pending {
                            state.status = StageStatus::Skipped;
                            state.completed_at = Some(now);
                            skipped.push(state.name);
                        }
                    }
                }
            }
            if let Some(progress) = update.progress {
                job.progress_percent = job.progress_percent.max(progress.min(100));
            }
            if let Some(step) = update.current_step {
                job.current_step = Some(step);
            }
            if let Some(error) = update.error {
                job.error = Some(error);
            }
            job.updated_at = now;

            let event = JobEvent::Status {
                job_id: job_id.to_string(),
                status: job.status,
                progress: job.progress_percent,
                current_step: job.current_step,
            };
            (skipped, event)
        };
        for stage in skipped {
            self.publish(JobEvent::Stage {
                job_id: job_id.to_string(),
                stage,
                status: StageStatus::Skipped,
            });
        }
        self.publish(event);
        true
    }

    /// Marks a stage in progress and makes it the current step.
    ///
    /// A failed stage may be restarted; the attempt counter records it.
    pub async fn start_stage(&self, job_id: &str, stage: StageName) -> bool {
        self.set_stage(job_id, stage, StageStatus::InProgress, None)
            .await
    }

    /// Marks a stage completed, or failed when `error` is present.
    pub async fn complete_stage(
        &self,
        job_id: &str,
        stage: StageName,
        error: Option<String>,
    ) -> bool {
        let status = if error.is_some() {
            StageStatus::Failed
        } else {
            StageStatus::Completed
        };
        self.set_stage(job_id, stage, status, error).await
    }

    async fn set_stage(
        &self,
        job_id: &str,
        stage: StageName,
        status: StageStatus,
        error: Option<String>,
    ) -> bool {
        {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(job_id) else {
                return false;
            };
            let now = Utc::now();
            let terminal = job.status.is_terminal();
            let Some(state) = job.stage_mut(stage) else {
                return false;
            };
            // Stages skipped by a terminal transition stay skipped.
            if terminal && state.status == StageStatus::Skipped {
                return false;
            }
            state.status = status;
            match status {
                StageStatus::InProgress => {
                    state.attempts += 1;
                    state.started_at = Some(now);
                    state.completed_at = None;
                    state.error = None;
                }
                _ => {
                    state.completed_at = Some(now);
                    state.error = error;
                }
            }
            if status == StageStatus::InProgress {
                job.current_step = Some(stage);
            }
            job.updated_at = now;
        }
        self.publish(JobEvent::Stage {
            job_id: job_id.to_string(),
            stage,
            status,
        });
        true
    }

    /// Applies a page-level update.
    pub async fn update_page(&self, job_id: &str, page_number: i32, update: PageUpdate) -> bool {
        let event = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(job_id) else {
                return false;
            };
            let Some(page) = job.page_mut(page_number) else {
                return false;
            };
            if let Some(status) = update.status {
                page.status = status;
            }
            if let Some(path) = update.image_path {
                page.image_path = Some(path);
            }
            if let Some(error) = update.error {
                page.error = Some(error);
            }
            if let Some(qc) = update.qc {
                page.last_qc = Some(qc);
            }
            let incremented = update.increment_retry;
            if incremented {
                page.retry_count += 1;
            }
            let event = JobEvent::Page {
                job_id: job_id.to_string(),
                page_number,
                status: page.status,
                retry_count: page.retry_count,
            };
            if incremented {
                job.total_retries += 1;
            }
            job.updated_at = Utc::now();
            event
        };
        self.publish(event);
        true
    }

    /// Records where the job's reference images were saved.
    pub async fn set_reference_paths(&self, job_id: &str, paths: Vec<PathBuf>) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return false;
        };
        job.reference_paths = paths;
        job.updated_at = Utc::now();
        true
    }

    /// Stores the final package and the location of its serialized record.
    pub async fn set_result(&self, job_id: &str, path: PathBuf, package: FinalPackage) -> bool {
        {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_mut(job_id) else {
                return false;
            };
            job.result_path = Some(path);
            job.result = Some(package);
            job.updated_at = Utc::now();
        }
        self.publish(JobEvent::ResultReady {
            job_id: job_id.to_string(),
        });
        true
    }

    /// Most recently created jobs first.
    pub async fn list(&self, limit: usize) -> Vec<JobSummary> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<&Job> = jobs.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.seq.cmp(&a.seq)));
        all.into_iter().take(limit).map(Job::summary).collect()
    }

    /// Removes a job. Returns false if it did not exist.
    pub async fn delete(&self, job_id: &str) -> bool {
        let removed = self.jobs.write().await.remove(job_id).is_some();
        if removed {
            self.publish(JobEvent::Deleted {
                job_id: job_id.to_string(),
            });
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
