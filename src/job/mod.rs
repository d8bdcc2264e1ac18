//! Job state tracking.
//!
//! [`JobStore`] is the only shared mutable state of the pipeline. Everything
//! else reads snapshots from it or writes through its atomic mutations.

pub mod record;
pub mod store;

pub use record::{
    page_sequence, Job, JobStatus, JobStatusView, JobSummary, JobUpdate, PageState, PageStatus,
    PageUpdate, PageView, StageState, StageStatus, StepView,
};
pub use store::{JobEvent, JobStore, DEFAULT_LIST_LIMIT};
