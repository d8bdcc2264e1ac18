//! The fixed stage graph and the uniform authoring-stage interface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::artifact::PromptDescriptor;
use crate::book::{
    BookRequest, DesignReview, IllustrationReview, NarrativePlan, NormalizedProfile,
    VisualFingerprint,
};
use crate::error::StageError;
use crate::job::PageState;

/// Every stage of the pipeline graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Normalization,
    Planning,
    VisualAnalysis,
    AnchorGeneration,
    CoverPrompt,
    BackCoverPrompt,
    PagePrompts,
    PromptReview,
    ImageGeneration,
    IllustrationReview,
    DesignReview,
    Validation,
    Finalization,
}

impl StageName {
    /// All stages in graph order.
    pub const ALL: [StageName; 13] = [
        StageName::Normalization,
        StageName::Planning,
        StageName::VisualAnalysis,
        StageName::AnchorGeneration,
        StageName::CoverPrompt,
        StageName::BackCoverPrompt,
        StageName::PagePrompts,
        StageName::PromptReview,
        StageName::ImageGeneration,
        StageName::IllustrationReview,
        StageName::DesignReview,
        StageName::Validation,
        StageName::Finalization,
    ];

    /// Progress reported when the stage's row starts.
    pub fn progress(&self) -> u8 {
        match self {
            StageName::Normalization => 5,
            StageName::Planning | StageName::VisualAnalysis => 15,
            StageName::AnchorGeneration => 25,
            StageName::CoverPrompt | StageName::BackCoverPrompt | StageName::PagePrompts => 35,
            StageName::PromptReview => 50,
            StageName::ImageGeneration => GENERATION_PROGRESS_START,
            StageName::IllustrationReview => 78,
            StageName::DesignReview => 85,
            StageName::Validation => 90,
            StageName::Finalization => 95,
        }
    }

    /// Stages backed by a pluggable [`Stage`] implementation.
    pub fn is_authoring(&self) -> bool {
        !matches!(
            self,
            StageName::ImageGeneration | StageName::Validation | StageName::Finalization
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Normalization => "normalization",
            StageName::Planning => "planning",
            StageName::VisualAnalysis => "visual_analysis",
            StageName::AnchorGeneration => "anchor_generation",
            StageName::CoverPrompt => "cover_prompt",
            StageName::BackCoverPrompt => "back_cover_prompt",
            StageName::PagePrompts => "page_prompts",
            StageName::PromptReview => "prompt_review",
            StageName::ImageGeneration => "image_generation",
            StageName::IllustrationReview => "illustration_review",
            StageName::DesignReview => "design_review",
            StageName::Validation => "validation",
            StageName::Finalization => "finalization",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress when image generation starts.
pub const GENERATION_PROGRESS_START: u8 = 55;
/// Progress once every artifact has been generated.
pub const GENERATION_PROGRESS_END: u8 = 75;

/// Proportional progress inside the image generation stage.
pub fn generation_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return GENERATION_PROGRESS_END;
    }
    let span = f64::from(GENERATION_PROGRESS_END - GENERATION_PROGRESS_START);
    let fraction = (done.min(total) as f64) / (total as f64);
    GENERATION_PROGRESS_START + (fraction * span).round() as u8
}

/// Snapshot of everything produced so far, handed to each authoring stage.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub job_id: String,
    pub request: BookRequest,
    pub reference_paths: Vec<PathBuf>,
    pub profile: Option<NormalizedProfile>,
    pub plan: Option<NarrativePlan>,
    pub fingerprint: Option<VisualFingerprint>,
    pub descriptors: Vec<PromptDescriptor>,
    /// Page states at the time the stage starts; filled for review stages.
    pub pages: Vec<PageState>,
}

impl StageInput {
    pub fn new(job_id: impl Into<String>, request: BookRequest, reference_paths: Vec<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            request,
            reference_paths,
            profile: None,
            plan: None,
            fingerprint: None,
            descriptors: Vec::new(),
            pages: Vec::new(),
        }
    }

    pub fn require_profile(&self, stage: StageName) -> Result<&NormalizedProfile, StageError> {
        self.profile.as_ref().ok_or_else(|| missing(stage, "normalized profile"))
    }

    pub fn require_plan(&self, stage: StageName) -> Result<&NarrativePlan, StageError> {
        self.plan.as_ref().ok_or_else(|| missing(stage, "narrative plan"))
    }

    pub fn require_fingerprint(&self, stage: StageName) -> Result<&VisualFingerprint, StageError> {
        self.fingerprint
            .as_ref()
            .ok_or_else(|| missing(stage, "visual fingerprint"))
    }
}

fn missing(stage: StageName, input: &str) -> StageError {
    StageError::MissingInput {
        stage: stage.to_string(),
        input: input.to_string(),
    }
}

/// What an authoring stage hands back to the sequencer.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Profile(NormalizedProfile),
    Plan(NarrativePlan),
    Fingerprint(VisualFingerprint),
    /// Descriptor for the character reference sheet.
    AnchorPrompt(PromptDescriptor),
    Descriptors(Vec<PromptDescriptor>),
    IllustrationReview(IllustrationReview),
    DesignReview(DesignReview),
}

fn unexpected(stage: StageName, expected: &str) -> StageError {
    StageError::UnexpectedOutput {
        stage: stage.to_string(),
        expected: expected.to_string(),
    }
}

impl StageOutput {
    pub fn into_profile(self, stage: StageName) -> Result<NormalizedProfile, StageError> {
        match self {
            StageOutput::Profile(p) => Ok(p),
            _ => Err(unexpected(stage, "profile")),
        }
    }

    pub fn into_plan(self, stage: StageName) -> Result<NarrativePlan, StageError> {
        match self {
            StageOutput::Plan(p) => Ok(p),
            _ => Err(unexpected(stage, "plan")),
        }
    }

    pub fn into_fingerprint(self, stage: StageName) -> Result<VisualFingerprint, StageError> {
        match self {
            StageOutput::Fingerprint(f) => Ok(f),
            _ => Err(unexpected(stage, "fingerprint")),
        }
    }

    pub fn into_anchor_prompt(self, stage: StageName) -> Result<PromptDescriptor, StageError> {
        match self {
            StageOutput::AnchorPrompt(d) => Ok(d),
            _ => Err(unexpected(stage, "anchor prompt")),
        }
    }

    pub fn into_descriptors(self, stage: StageName) -> Result<Vec<PromptDescriptor>, StageError> {
        match self {
            StageOutput::Descriptors(d) => Ok(d),
            _ => Err(unexpected(stage, "descriptors")),
        }
    }

    pub fn into_illustration_review(
        self,
        stage: StageName,
    ) -> Result<IllustrationReview, StageError> {
        match self {
            StageOutput::IllustrationReview(r) => Ok(r),
            _ => Err(unexpected(stage, "illustration review")),
        }
    }

    pub fn into_design_review(self, stage: StageName) -> Result<DesignReview, StageError> {
        match self {
            StageOutput::DesignReview(r) => Ok(r),
            _ => Err(unexpected(stage, "design review")),
        }
    }
}

/// A pluggable authoring stage.
#[async_trait]
pub trait Stage: Send + Sync {
    /// The graph slot this implementation fills.
    fn name(&self) -> StageName;

    /// Produce this stage's output from the current snapshot.
    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError>;
}

/// The authoring implementations selected for one pipeline instance.
#[derive(Clone, Default)]
pub struct StageSet {
    stages: HashMap<StageName, Arc<dyn Stage>>,
}

impl fmt::Debug for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.stages.keys().collect();
        names.sort();
        f.debug_struct("StageSet").field("stages", &names).finish()
    }
}

impl StageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `stage` in the slot it names, replacing any previous one.
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.insert(stage.name(), stage);
        self
    }

    pub fn get(&self, name: StageName) -> Result<&Arc<dyn Stage>, StageError> {
        self.stages
            .get(&name)
            .ok_or_else(|| StageError::failed(name.as_str(), "no implementation configured"))
    }

    /// Authoring slots that have no implementation.
    pub fn missing(&self) -> Vec<StageName> {
        StageName::ALL
            .iter()
            .copied()
            .filter(|name| name.is_authoring() && !self.stages.contains_key(name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(StageName);

    #[async_trait]
    impl Stage for Noop {
        fn name(&self) -> StageName {
            self.0
        }

        async fn run(&self, _input: &StageInput) -> Result<StageOutput, StageError> {
            Ok(StageOutput::Descriptors(vec![]))
        }
    }

    #[test]
    fn test_progress_schedule_is_monotonic() {
        let progress: Vec<u8> = StageName::ALL.iter().map(|s| s.progress()).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(StageName::Normalization.progress(), 5);
        assert_eq!(StageName::Finalization.progress(), 95);
    }

    #[test]
    fn test_generation_progress() {
        assert_eq!(generation_progress(0, 12), 55);
        assert_eq!(generation_progress(6, 12), 65);
        assert_eq!(generation_progress(12, 12), 75);
        assert_eq!(generation_progress(20, 12), 75);
        assert_eq!(generation_progress(0, 0), 75);
    }

    #[test]
    fn test_stage_name_display() {
        assert_eq!(StageName::VisualAnalysis.to_string(), "visual_analysis");
        assert!(StageName::Planning.is_authoring());
        assert!(!StageName::ImageGeneration.is_authoring());
    }

    #[test]
    fn test_stage_set_replace_and_missing() {
        let set = StageSet::new()
            .with_stage(Arc::new(Noop(StageName::Planning)))
            .with_stage(Arc::new(Noop(StageName::Planning)));
        assert!(set.get(StageName::Planning).is_ok());
        assert!(set.get(StageName::Normalization).is_err());
        let missing = set.missing();
        assert_eq!(missing.len(), 9);
        assert!(!missing.contains(&StageName::Planning));
    }

    #[test]
    fn test_unexpected_output() {
        let err = StageOutput::Descriptors(vec![])
            .into_plan(StageName::Planning)
            .unwrap_err();
        assert!(err.to_string().contains("expected plan"));
    }
}
