//! Pipeline orchestration for memory book illustration.
//!
//! This module turns a [`BookRequest`](crate::book::BookRequest) into a
//! finished, validated set of illustrations.
//!
//! # Architecture
//!
//! - **Stage**: the fixed stage graph and the pluggable authoring interface
//! - **Sequencer**: runs the graph row by row, recording progress in the job store
//! - **Generation**: bounded-concurrency worker pool with attempt-level retry
//! - **Repair**: per-artifact validate / fix / regenerate state machine
//! - **Batch**: runs the state machine over every artifact
//! - **Package**: assembles the final package
//! - **Service**: the control surface callers use
//!
//! # Pipeline Flow
//!
//! 1. **Normalization**: the request is cleaned into a profile
//! 2. **Planning / Visual analysis**: narrative plan and visual fingerprint, concurrently
//! 3. **Anchor**: a character reference sheet is rendered once per job
//! 4. **Prompts**: cover, back cover and page descriptors, concurrently, then reviewed
//! 5. **Generation**: every descriptor is rendered under the concurrency cap
//! 6. **Reviews**: illustration and design reviews over the generated set
//! 7. **Validation**: each artifact is validated and repaired up to `max_retries` times
//! 8. **Finalization**: the package is written to `outputs/result.json`
//!
//! # Example
//!
//! ```rust,ignore
//! use bookforge::book::BookRequest;
//! use bookforge::pipeline::{PipelineConfig, PipelineService};
//!
//! let config = PipelineConfig::from_env()?;
//! let service = PipelineService::dry_run(config);
//!
//! let job_id = PipelineService::new_job_id();
//! let handle = service.submit(&job_id, request, &references).await?;
//!
//! while let Some(status) = service.status(&job_id).await {
//!     println!("{}% {:?}", status.progress_percent, status.current_step);
//!     if status.status.is_terminal() {
//!         break;
//!     }
//!     tokio::time::sleep(std::time::Duration::from_millis(500)).await;
//! }
//! ```
//!
//! # Configuration
//!
//! ```rust,ignore
//! // Via builder pattern
//! let config = PipelineConfig::new()
//!     .with_generation_concurrency(4)
//!     .with_max_retries(3)
//!     .with_batch_mode(BatchMode::Parallel);
//!
//! // Via environment variables
//! let config = PipelineConfig::from_env()?;
//! ```

pub mod batch;
pub mod config;
pub mod generation;
pub mod package;
pub mod repair;
pub mod sequencer;
pub mod service;
pub mod stage;

// Re-export main types for convenience
pub use batch::{BatchCoordinator, BatchReport};
pub use config::{BatchMode, ConfigError, PipelineConfig};
pub use generation::GenerationPool;
pub use package::{assemble, PackageParts};
pub use repair::{ValidationContext, ValidationMachine, ValidationOutcome, ValidationState};
pub use sequencer::{PipelineServices, StageSequencer};
pub use service::{PipelineService, ResultLookup};
pub use stage::{Stage, StageInput, StageName, StageOutput, StageSet};
