//! Quality-check results.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Scores on a 0-10 scale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub overall_score: f64,
    pub technical_quality: f64,
    pub artistic_quality: f64,
    pub style_consistency: f64,
    pub character_accuracy: f64,
    pub narrative_fit: f64,
}

impl QualityMetrics {
    /// All six scores set to `score`.
    pub fn uniform(score: f64) -> Self {
        Self {
            overall_score: score,
            technical_quality: score,
            artistic_quality: score,
            style_consistency: score,
            character_accuracy: score,
            narrative_fit: score,
        }
        .clamped()
    }

    /// Clamps every score into [0, 10].
    pub fn clamped(self) -> Self {
        let c = |v: f64| v.clamp(0.0, 10.0);
        Self {
            overall_score: c(self.overall_score),
            technical_quality: c(self.technical_quality),
            artistic_quality: c(self.artistic_quality),
            style_consistency: c(self.style_consistency),
            character_accuracy: c(self.character_accuracy),
            narrative_fit: c(self.narrative_fit),
        }
    }
}

/// Result of validating one artifact against the fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcResult {
    pub page_number: i32,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    pub passed: bool,
    pub metrics: QualityMetrics,
    #[serde(default)]
    pub issues_found: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub requires_regeneration: bool,
    pub fingerprint_match_score: f64,
}

impl QcResult {
    /// Builds a result from scores, deciding `passed` against `threshold`.
    pub fn scored(
        page_number: i32,
        image_path: Option<PathBuf>,
        metrics: QualityMetrics,
        threshold: f64,
    ) -> Self {
        let metrics = metrics.clamped();
        let passed = metrics.overall_score >= threshold;
        Self {
            page_number,
            image_path,
            passed,
            fingerprint_match_score: (metrics.character_accuracy / 10.0).clamp(0.0, 1.0),
            metrics,
            issues_found: Vec::new(),
            suggestions: Vec::new(),
            requires_regeneration: !passed,
        }
    }

    /// Synthetic failing result used when there is nothing to validate or
    /// the validation service itself failed.
    pub fn synthetic_failure(
        page_number: i32,
        image_path: Option<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            page_number,
            image_path,
            passed: false,
            metrics: QualityMetrics::default(),
            issues_found: vec![format!("Validation error: {}", reason.into())],
            suggestions: vec!["Regenerate the image".to_string()],
            requires_regeneration: true,
            fingerprint_match_score: 0.0,
        }
    }

    pub fn with_issues(mut self, issues: Vec<String>) -> Self {
        self.issues_found = issues;
        self
    }

    /// Re-applies range constraints after deserializing a service response.
    pub fn normalized(mut self) -> Self {
        self.metrics = self.metrics.clamped();
        self.fingerprint_match_score = self.fingerprint_match_score.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scored_against_threshold() {
        let passing = QcResult::scored(1, None, QualityMetrics::uniform(7.0), 7.0);
        assert!(passing.passed);
        assert!(!passing.requires_regeneration);
        assert!((passing.fingerprint_match_score - 0.7).abs() < 1e-9);

        let failing = QcResult::scored(1, None, QualityMetrics::uniform(6.9), 7.0);
        assert!(!failing.passed);
        assert!(failing.requires_regeneration);
    }

    #[test]
    fn test_scores_are_clamped() {
        let metrics = QualityMetrics::uniform(14.0);
        assert!((metrics.overall_score - 10.0).abs() < f64::EPSILON);

        let qc = QcResult {
            fingerprint_match_score: 3.0,
            ..QcResult::scored(2, None, QualityMetrics::uniform(-2.0), 7.0)
        }
        .normalized();
        assert!((qc.fingerprint_match_score - 1.0).abs() < f64::EPSILON);
        assert!(qc.metrics.narrative_fit.abs() < f64::EPSILON);
    }

    #[test]
    fn test_synthetic_failure() {
        let qc = QcResult::synthetic_failure(3, None, "No image to validate");
        assert!(!qc.passed);
        assert!(qc.requires_regeneration);
        assert!(qc.metrics.overall_score.abs() < f64::EPSILON);
        assert_eq!(qc.issues_found, vec!["Validation error: No image to validate"]);
        assert_eq!(qc.suggestions, vec!["Regenerate the image"]);
    }
}
