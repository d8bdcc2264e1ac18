//! Error types for bookforge operations.
//!
//! Each subsystem gets its own enum:
//! - External service calls (generation, validation, repair)
//! - Authoring stages
//! - Job storage on disk
//! - LLM API interactions
//! - Pipeline orchestration

use thiserror::Error;

/// Failures reported by an external service call.
///
/// These are treated as transient: the generation pool retries them and the
/// validation loop converts them into failed QC results.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Service call timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid service response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by an authoring stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage '{stage}' failed: {message}")]
    Failed { stage: String, message: String },

    #[error("Stage '{stage}' produced unexpected output: expected {expected}")]
    UnexpectedOutput { stage: String, expected: String },

    #[error("Stage '{stage}' is missing required input: {input}")]
    MissingInput { stage: String, input: String },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl StageError {
    /// Convenience constructor for a plain stage failure.
    pub fn failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Errors from the per-job storage layout.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job directory not found: {0}")]
    JobNotFound(String),

    #[error("Invalid path component: {0:?}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: BOOKFORGE_LLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP client construction failed: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

impl From<LlmError> for ServiceError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::ParseError(msg) => ServiceError::InvalidResponse(msg),
            other => ServiceError::Unavailable(other.to_string()),
        }
    }
}

/// Errors surfaced by the pipeline control surface and sequencer.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Job {0} was cancelled")]
    Cancelled(String),

    #[error("Job {0} already exists")]
    JobExists(String),

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("Invalid job id {0:?}: must be a non-empty name without path separators")]
    InvalidJobId(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::pipeline::config::ConfigError),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] crate::book::RequestError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_error_display() {
        let err = StageError::failed("planning", "empty plan");
        assert_eq!(err.to_string(), "Stage 'planning' failed: empty plan");
    }

    #[test]
    fn test_llm_parse_error_maps_to_invalid_response() {
        let err: ServiceError = LlmError::ParseError("bad json".to_string()).into();
        assert!(matches!(err, ServiceError::InvalidResponse(_)));

        let err: ServiceError = LlmError::RateLimited("slow down".to_string()).into();
        assert!(matches!(err, ServiceError::Unavailable(_)));
    }

    #[test]
    fn test_pipeline_stage_error_message() {
        let err = PipelineError::Stage {
            stage: "normalization".to_string(),
            message: "no memories".to_string(),
        };
        assert_eq!(err.to_string(), "Stage normalization failed: no memories");
    }
}
