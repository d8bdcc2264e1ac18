//! Pipeline configuration for the book orchestrator.
//!
//! Covers generation concurrency and retry policy, the validation/repair
//! budget, batch scheduling, optional service timeouts and the storage root.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// How the batch coordinator schedules the per-page validation loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// One page at a time, in page order.
    #[default]
    Sequential,
    /// All pages at once, capped by the generation concurrency.
    Parallel,
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchMode::Sequential => write!(f, "sequential"),
            BatchMode::Parallel => write!(f, "parallel"),
        }
    }
}

impl FromStr for BatchMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" | "seq" => Ok(BatchMode::Sequential),
            "parallel" | "par" => Ok(BatchMode::Parallel),
            other => Err(ConfigError::InvalidValue {
                key: "batch_mode".to_string(),
                message: format!("expected 'sequential' or 'parallel', got '{}'", other),
            }),
        }
    }
}

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Generation settings
    /// Maximum number of generation calls in flight at once.
    pub generation_concurrency: usize,
    /// Attempts per artifact inside the generation pool.
    pub generation_attempts: u32,
    /// Fixed delay between generation attempts.
    pub generation_retry_delay: Duration,

    // Validation settings
    /// Maximum regenerate cycles per artifact in the repair loop.
    pub max_retries: u32,
    /// Minimum overall score (0-10) for an artifact to pass QC.
    pub validation_threshold: f64,
    /// Scheduling of the per-artifact validation loops.
    pub batch_mode: BatchMode,

    // Sequencer settings
    /// Attempts per authoring stage before the job fails.
    pub stage_attempts: u32,
    /// Optional deadline applied to every external service call.
    pub service_timeout: Option<Duration>,

    // Storage settings
    /// Root directory under which per-job directories are created.
    pub storage_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generation_concurrency: 2,
            generation_attempts: 3,
            generation_retry_delay: Duration::from_secs(1),

            max_retries: 2,
            validation_threshold: 7.0,
            batch_mode: BatchMode::Sequential,

            stage_attempts: 1,
            service_timeout: None,

            storage_root: PathBuf::from("./storage"),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BOOKFORGE_GENERATION_CONCURRENCY`: Concurrent generation calls (default: 2)
    /// - `BOOKFORGE_GENERATION_ATTEMPTS`: Attempts per artifact (default: 3)
    /// - `BOOKFORGE_GENERATION_RETRY_DELAY_MS`: Delay between attempts (default: 1000)
    /// - `BOOKFORGE_MAX_RETRIES`: Repair cycles per artifact (default: 2)
    /// - `BOOKFORGE_VALIDATION_THRESHOLD`: Passing score 0-10 (default: 7.0)
    /// - `BOOKFORGE_BATCH_MODE`: `sequential` or `parallel` (default: sequential)
    /// - `BOOKFORGE_STAGE_ATTEMPTS`: Attempts per authoring stage (default: 1)
    /// - `BOOKFORGE_SERVICE_TIMEOUT_SECS`: Per-call deadline, unset for none
    /// - `BOOKFORGE_STORAGE_ROOT`: Storage root directory (default: ./storage)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value or the
    /// resulting configuration does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("BOOKFORGE_GENERATION_CONCURRENCY") {
            config.generation_concurrency =
                parse_env_value(&val, "BOOKFORGE_GENERATION_CONCURRENCY")?;
        }

        if let Ok(val) = std::env::var("BOOKFORGE_GENERATION_ATTEMPTS") {
            config.generation_attempts = parse_env_value(&val, "BOOKFORGE_GENERATION_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("BOOKFORGE_GENERATION_RETRY_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "BOOKFORGE_GENERATION_RETRY_DELAY_MS")?;
            config.generation_retry_delay = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("BOOKFORGE_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "BOOKFORGE_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("BOOKFORGE_VALIDATION_THRESHOLD") {
            config.validation_threshold = parse_env_value(&val, "BOOKFORGE_VALIDATION_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("BOOKFORGE_BATCH_MODE") {
            config.batch_mode = val.parse()?;
        }

        if let Ok(val) = std::env::var("BOOKFORGE_STAGE_ATTEMPTS") {
            config.stage_attempts = parse_env_value(&val, "BOOKFORGE_STAGE_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("BOOKFORGE_SERVICE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "BOOKFORGE_SERVICE_TIMEOUT_SECS")?;
            config.service_timeout = Some(Duration::from_secs(secs));
        }

        if let Ok(val) = std::env::var("BOOKFORGE_STORAGE_ROOT") {
            config.storage_root = PathBuf::from(val);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "generation_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.generation_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "generation_attempts must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=10.0).contains(&self.validation_threshold) {
            return Err(ConfigError::ValidationFailed(
                "validation_threshold must be between 0.0 and 10.0".to_string(),
            ));
        }

        if self.stage_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "stage_attempts must be greater than 0".to_string(),
            ));
        }

        if matches!(self.service_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "service_timeout must be greater than 0 when set".to_string(),
            ));
        }

        if self.storage_root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "storage_root cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the generation concurrency cap.
    pub fn with_generation_concurrency(mut self, k: usize) -> Self {
        self.generation_concurrency = k;
        self
    }

    /// Builder method to set attempts per artifact.
    pub fn with_generation_attempts(mut self, attempts: u32) -> Self {
        self.generation_attempts = attempts;
        self
    }

    /// Builder method to set the delay between generation attempts.
    pub fn with_generation_retry_delay(mut self, delay: Duration) -> Self {
        self.generation_retry_delay = delay;
        self
    }

    /// Builder method to set the repair cycle budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder method to set the QC passing threshold.
    pub fn with_validation_threshold(mut self, threshold: f64) -> Self {
        self.validation_threshold = threshold;
        self
    }

    /// Builder method to set the batch mode.
    pub fn with_batch_mode(mut self, mode: BatchMode) -> Self {
        self.batch_mode = mode;
        self
    }

    /// Builder method to set attempts per authoring stage.
    pub fn with_stage_attempts(mut self, attempts: u32) -> Self {
        self.stage_attempts = attempts;
        self
    }

    /// Builder method to set the per-call service timeout.
    pub fn with_service_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.service_timeout = timeout;
        self
    }

    /// Builder method to set the storage root.
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}
