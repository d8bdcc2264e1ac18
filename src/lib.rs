//! bookforge: illustration pipeline for personalized memory books.
//!
//! A book request moves through a fixed graph of stages (normalization,
//! planning, prompt authoring, image generation, reviews, validation and
//! packaging). Image generation runs through a bounded worker pool and every
//! artifact goes through a validate/repair/regenerate loop before the final
//! package is written.

// Core modules
pub mod artifact;
pub mod book;
pub mod cli;
pub mod error;
pub mod job;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use error::{LlmError, PipelineError, ServiceError, StageError, StorageError};
pub use pipeline::{PipelineConfig, PipelineService, PipelineServices};
