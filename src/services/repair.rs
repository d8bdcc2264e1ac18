//! Prompt repair services.
//!
//! [`RuleRepair`] rewrites a descriptor deterministically from the QC scores
//! and issues. [`LlmRepair`] asks a text model for a targeted revision and
//! falls back to the rule-based repair whenever the model call or its output
//! cannot be used.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::RepairService;
use crate::artifact::{PromptDescriptor, QcResult};
use crate::book::VisualFingerprint;
use crate::error::ServiceError;
use crate::llm::{CompletionRequest, LlmProvider, Message};
use crate::utils::extract_json_object;

/// Scores below this trigger emphasis of the corresponding prompt section.
const EMPHASIS_THRESHOLD: f64 = 7.0;

const STYLE_EMPHASIS: &str = "Strictly follow the specified illustration style.";

/// System prompt for the LLM repair call.
const REPAIR_SYSTEM_PROMPT: &str = r#"You repair image-generation prompts for an illustrated memory book.

Rules:
- Target ONLY the issues listed in the QC results
- Preserve every element that was already correct
- Keep the original scene and emotional intent
- Strengthen the character description so it matches the reference description exactly
- Add negative constraints that prevent the listed issues
- The image must contain NO text, letters, numbers, signs or captions

Respond with ONLY a JSON object:
{
  "main_prompt": "string",
  "character_description": "string",
  "scene_description": "string",
  "style_prompt": "string",
  "negative_constraints": ["string", ...],
  "revision_notes": ["string", ...]
}"#;

/// Deterministic repair from QC scores and issues.
#[derive(Debug, Clone, Default)]
pub struct RuleRepair;

impl RuleRepair {
    pub fn new() -> Self {
        Self
    }

    /// Builds the revised descriptor. Never fails.
    pub fn revise(
        &self,
        descriptor: &PromptDescriptor,
        qc: &QcResult,
        fingerprint: &VisualFingerprint,
    ) -> PromptDescriptor {
        let character = if fingerprint.character_description.is_empty() {
            descriptor.character_description.clone()
        } else {
            fingerprint.character_description.clone()
        };

        let mut main_prompt = descriptor.main_prompt.clone();
        if qc.metrics.character_accuracy < EMPHASIS_THRESHOLD && !character.is_empty() {
            main_prompt = format!("IMPORTANT: {}. {}", character, main_prompt);
        }
        if qc.metrics.style_consistency < EMPHASIS_THRESHOLD {
            main_prompt = format!("{}. {}", main_prompt, STYLE_EMPHASIS);
        }

        let mut negatives = descriptor.negative_constraints.clone();
        for issue in &qc.issues_found {
            if let Some(constraint) = issue_to_constraint(issue) {
                if !negatives.contains(&constraint) {
                    negatives.push(constraint);
                }
            }
        }

        let revised = PromptDescriptor {
            main_prompt,
            character_description: character,
            negative_constraints: negatives,
            revision_notes: vec![
                "Manual fix applied".to_string(),
                format!("Issues addressed: {}", qc.issues_found.join(", ")),
            ],
            ..descriptor.clone()
        };
        descriptor.adopt_revision(revised)
    }
}

/// Turns a QC issue into a negative constraint.
///
/// Issues about missing elements cannot be expressed as negatives.
fn issue_to_constraint(issue: &str) -> Option<String> {
    let lower = issue.to_lowercase();
    if lower.contains("wrong") {
        let stripped = lower.replace("wrong", "");
        let stripped = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        (!stripped.is_empty()).then_some(stripped)
    } else if lower.contains("missing") {
        None
    } else {
        let trimmed = lower.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

#[async_trait]
impl RepairService for RuleRepair {
    async fn repair(
        &self,
        descriptor: &PromptDescriptor,
        qc: &QcResult,
        fingerprint: &VisualFingerprint,
    ) -> Result<PromptDescriptor, ServiceError> {
        Ok(self.revise(descriptor, qc, fingerprint))
    }
}

/// Settings for [`LlmRepair`].
#[derive(Debug, Clone)]
pub struct LlmRepairConfig {
    /// Model to ask; empty uses the provider default.
    pub model: String,
    /// Language revision notes should be written in.
    pub language: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for LlmRepairConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            language: "en".to_string(),
            temperature: 0.4,
            max_tokens: 1500,
        }
    }
}

impl LlmRepairConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct RepairResponse {
    main_prompt: String,
    #[serde(default)]
    character_description: Option<String>,
    #[serde(default)]
    scene_description: Option<String>,
    #[serde(default)]
    style_prompt: Option<String>,
    #[serde(default)]
    negative_constraints: Option<Vec<String>>,
    #[serde(default)]
    revision_notes: Vec<String>,
}

/// Model-driven repair with rule-based fallback.
pub struct LlmRepair {
    llm: Arc<dyn LlmProvider>,
    config: LlmRepairConfig,
    fallback: RuleRepair,
}

impl std::fmt::Debug for LlmRepair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmRepair")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LlmRepair {
    /// Name used in log records.
    pub const AGENT_NAME: &'static str = "llm_repair";

    pub fn new(llm: Arc<dyn LlmProvider>, config: LlmRepairConfig) -> Self {
        Self {
            llm,
            config,
            fallback: RuleRepair::new(),
        }
    }

    fn build_user_prompt(
        &self,
        descriptor: &PromptDescriptor,
        qc: &QcResult,
        fingerprint: &VisualFingerprint,
    ) -> String {
        let mut parts = vec![
            format!("User language: {}", self.config.language),
            String::new(),
            "=== ORIGINAL PROMPT ===".to_string(),
            format!("Main prompt: {}", descriptor.main_prompt),
            format!("Character: {}", descriptor.character_description),
            format!("Scene: {}", descriptor.scene_description),
            format!("Style: {}", descriptor.style_prompt),
            format!("Negative: {}", descriptor.negative_constraints.join(", ")),
            String::new(),
            "=== QC RESULTS ===".to_string(),
            format!("Overall score: {:.1}/10", qc.metrics.overall_score),
            format!("Character accuracy: {:.1}/10", qc.metrics.character_accuracy),
            format!("Style consistency: {:.1}/10", qc.metrics.style_consistency),
            "Issues found:".to_string(),
        ];
        parts.extend(qc.issues_found.iter().map(|i| format!("  - {}", i)));
        parts.push("Suggestions:".to_string());
        parts.extend(qc.suggestions.iter().map(|s| format!("  - {}", s)));
        parts.push(String::new());
        parts.push("=== CORRECT CHARACTER DESCRIPTION ===".to_string());
        parts.push(fingerprint.character_description.clone());
        parts.push(format!(
            "Revision notes MUST be written in {}.",
            self.config.language
        ));
        parts.join("\n")
    }

    async fn ask_model(
        &self,
        descriptor: &PromptDescriptor,
        qc: &QcResult,
        fingerprint: &VisualFingerprint,
    ) -> Result<PromptDescriptor, ServiceError> {
        let request = CompletionRequest::new(
            self.config.model.clone(),
            vec![
                Message::system(REPAIR_SYSTEM_PROMPT),
                Message::user(self.build_user_prompt(descriptor, qc, fingerprint)),
            ],
        )
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens);

        let response = self.llm.complete(request).await?;
        let content = response
            .first_content()
            .ok_or_else(|| ServiceError::InvalidResponse("empty completion".to_string()))?;
        let json = extract_json_object(content)
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        let parsed: RepairResponse = serde_json::from_str(&json)
            .map_err(|e| ServiceError::InvalidResponse(format!("Invalid JSON: {}", e)))?;

        if parsed.main_prompt.trim().is_empty() {
            return Err(ServiceError::InvalidResponse(
                "repair returned an empty main_prompt".to_string(),
            ));
        }

        let mut notes = parsed.revision_notes;
        if notes.is_empty() {
            notes.push(format!("Fixed issues: {}", qc.issues_found.join(", ")));
            notes.push(format!("Applied suggestions: {}", qc.suggestions.join(", ")));
        }

        let revised = PromptDescriptor {
            main_prompt: parsed.main_prompt,
            character_description: parsed
                .character_description
                .unwrap_or_else(|| descriptor.character_description.clone()),
            scene_description: parsed
                .scene_description
                .unwrap_or_else(|| descriptor.scene_description.clone()),
            style_prompt: parsed
                .style_prompt
                .unwrap_or_else(|| descriptor.style_prompt.clone()),
            negative_constraints: parsed
                .negative_constraints
                .unwrap_or_else(|| descriptor.negative_constraints.clone()),
            revision_notes: notes,
            ..descriptor.clone()
        };
        Ok(descriptor.adopt_revision(revised))
    }
}

#[async_trait]
impl RepairService for LlmRepair {
    async fn repair(
        &self,
        descriptor: &PromptDescriptor,
        qc: &QcResult,
        fingerprint: &VisualFingerprint,
    ) -> Result<PromptDescriptor, ServiceError> {
        match self.ask_model(descriptor, qc, fingerprint).await {
            Ok(revised) => Ok(revised),
            Err(e) => {
                tracing::warn!(
                    agent = Self::AGENT_NAME,
                    page_number = descriptor.page_number,
                    error = %e,
                    "Model repair failed, applying rule-based repair"
                );
                Ok(self.fallback.revise(descriptor, qc, fingerprint))
            }
        }
    }
}
