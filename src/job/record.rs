//! Job, stage and page state records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::artifact::{PageType, QcResult, BACK_COVER_PAGE_NUMBER, COVER_PAGE_NUMBER};
use crate::book::{BookRequest, FinalPackage};
use crate::pipeline::stage::StageName;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Status of a single stage of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Failed | StageStatus::Skipped
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::InProgress => write!(f, "in_progress"),
            StageStatus::Completed => write!(f, "completed"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Status of a single page artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    Pending,
    Generating,
    Validating,
    Fixing,
    Completed,
    Failed,
}

impl PageStatus {
    /// Working states must always be followed by another transition.
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            PageStatus::Generating | PageStatus::Validating | PageStatus::Fixing
        )
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageStatus::Pending => write!(f, "pending"),
            PageStatus::Generating => write!(f, "generating"),
            PageStatus::Validating => write!(f, "validating"),
            PageStatus::Fixing => write!(f, "fixing"),
            PageStatus::Completed => write!(f, "completed"),
            PageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// State of one stage within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub name: StageName,
    pub status: StageStatus,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StageState {
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::Pending,
            attempts: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// State of one page artifact within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    pub page_number: i32,
    pub page_type: PageType,
    pub status: PageStatus,
    pub retry_count: u32,
    pub image_path: Option<PathBuf>,
    pub error: Option<String>,
    pub last_qc: Option<QcResult>,
}

impl PageState {
    pub fn new(page_number: i32) -> Self {
        Self {
            page_number,
            page_type: PageType::from_page_number(page_number),
            status: PageStatus::Pending,
            retry_count: 0,
            image_path: None,
            error: None,
            last_qc: None,
        }
    }
}

/// Page numbers of a book in order: cover, content pages, back cover.
pub fn page_sequence(page_count: u32) -> Vec<i32> {
    let mut numbers = Vec::with_capacity(page_count as usize + 2);
    numbers.push(COVER_PAGE_NUMBER);
    numbers.extend(1..=page_count as i32);
    numbers.push(BACK_COVER_PAGE_NUMBER);
    numbers
}

/// Full state of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub current_step: Option<StageName>,
    pub progress_percent: u8,
    /// One entry per stage, in graph order.
    pub stages: Vec<StageState>,
    /// One entry per page, in book order.
    pub pages: Vec<PageState>,
    pub request: BookRequest,
    pub reference_paths: Vec<PathBuf>,
    pub result_path: Option<PathBuf>,
    pub result: Option<FinalPackage>,
    pub error: Option<String>,
    pub total_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Job {
    pub fn new(id: impl Into<String>, request: BookRequest, reference_paths: Vec<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: JobStatus::Queued,
            current_step: None,
            progress_percent: 0,
            stages: StageName::ALL.iter().copied().map(StageState::new).collect(),
            pages: page_sequence(request.page_count)
                .into_iter()
                .map(PageState::new)
                .collect(),
            request,
            reference_paths,
            result_path: None,
            result: None,
            error: None,
            total_retries: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            seq: 0,
        }
    }

    pub fn stage(&self, name: StageName) -> Option<&StageState> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub(crate) fn stage_mut(&mut self, name: StageName) -> Option<&mut StageState> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    pub fn page(&self, page_number: i32) -> Option<&PageState> {
        self.pages.iter().find(|p| p.page_number == page_number)
    }

    pub(crate) fn page_mut(&mut self, page_number: i32) -> Option<&mut PageState> {
        self.pages.iter_mut().find(|p| p.page_number == page_number)
    }

    /// Projection suitable for status polling.
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            job_id: self.id.clone(),
            status: self.status,
            current_step: self.current_step,
            progress_percent: self.progress_percent,
            steps: self
                .stages
                .iter()
                .map(|s| StepView {
                    name: s.name,
                    status: s.status,
                    error: s.error.clone(),
                })
                .collect(),
            pages: self
                .pages
                .iter()
                .map(|p| PageView {
                    page_number: p.page_number,
                    page_type: p.page_type,
                    status: p.status,
                    retry_count: p.retry_count,
                })
                .collect(),
            error: self.error.clone(),
            result_available: self.result.is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id.clone(),
            title: self.request.title.clone(),
            status: self.status,
            progress_percent: self.progress_percent,
            created_at: self.created_at,
        }
    }
}

/// Partial update of job-level fields, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub current_step: Option<StageName>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_step(mut self, step: StageName) -> Self {
        self.current_step = Some(step);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Partial update of one page, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct PageUpdate {
    pub status: Option<PageStatus>,
    pub image_path: Option<PathBuf>,
    pub error: Option<String>,
    pub increment_retry: bool,
    pub qc: Option<QcResult>,
}

impl PageUpdate {
    pub fn status(status: PageStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(path.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_retry(mut self) -> Self {
        self.increment_retry = true;
        self
    }

    pub fn with_qc(mut self, qc: QcResult) -> Self {
        self.qc = Some(qc);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepView {
    pub name: StageName,
    pub status: StageStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageView {
    pub page_number: i32,
    pub page_type: PageType,
    pub status: PageStatus,
    pub retry_count: u32,
}

/// Serializable status snapshot returned by the control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub current_step: Option<StageName>,
    pub progress_percent: u8,
    pub steps: Vec<StepView>,
    pub pages: Vec<PageView>,
    pub error: Option<String>,
    pub result_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One row of a job listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub title: String,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_sequence_order() {
        assert_eq!(page_sequence(3), vec![0, 1, 2, 3, -1]);
        assert_eq!(page_sequence(0), vec![0, -1]);
    }

    #[test]
    fn test_new_job_layout() {
        let job = Job::new("job-1", BookRequest::new("Title", 10), vec![]);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.pages.len(), 12);
        assert_eq!(job.pages[0].page_type, PageType::Cover);
        assert_eq!(job.pages[11].page_type, PageType::BackCover);
        assert_eq!(job.stages.len(), StageName::ALL.len());
        assert!(job
            .stages
            .iter()
            .all(|s| s.status == StageStatus::Pending));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(StageStatus::InProgress.to_string(), "in_progress");
        assert_eq!(PageStatus::Fixing.to_string(), "fixing");
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(PageStatus::Validating.is_working());
        assert!(!PageStatus::Failed.is_working());
    }

    #[test]
    fn test_status_view_projection() {
        let job = Job::new("job-2", BookRequest::new("Title", 2), vec![]);
        let view = job.status_view();
        assert_eq!(view.job_id, "job-2");
        assert_eq!(view.pages.len(), 4);
        assert_eq!(view.steps.len(), StageName::ALL.len());
        assert!(!view.result_available);
    }
}
