//! Generation service results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Provenance of one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub generation_id: String,
    pub model_used: String,
    pub generation_time_ms: u64,
    pub retry_count: u32,
    pub prompt_version: u32,
    pub timestamp: DateTime<Utc>,
}

impl GenerationMetadata {
    pub fn new(model_used: impl Into<String>, prompt_version: u32) -> Self {
        Self {
            generation_id: Uuid::new_v4().to_string(),
            model_used: model_used.into(),
            generation_time_ms: 0,
            retry_count: 0,
            prompt_version,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of a single generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub page_number: i32,
    pub success: bool,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    pub metadata: GenerationMetadata,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl GenerationResult {
    pub fn succeeded(page_number: i32, path: impl Into<PathBuf>, metadata: GenerationMetadata) -> Self {
        Self {
            page_number,
            success: true,
            image_path: Some(path.into()),
            metadata,
            error_message: None,
        }
    }

    pub fn failed(page_number: i32, error: impl Into<String>, metadata: GenerationMetadata) -> Self {
        Self {
            page_number,
            success: false,
            image_path: None,
            metadata,
            error_message: Some(error.into()),
        }
    }

    /// A result with no artifact, used when validating a page whose
    /// generation never succeeded.
    pub fn missing(page_number: i32, error: Option<String>) -> Self {
        Self {
            page_number,
            success: false,
            image_path: None,
            metadata: GenerationMetadata::new("none", 0),
            error_message: error,
        }
    }

    /// True when the call succeeded and produced a location.
    pub fn has_image(&self) -> bool {
        self.success && self.image_path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }
}
