//! Deterministic authoring stages.
//!
//! Each stage derives its output from the request and earlier outputs using
//! fixed templates. Useful for dry runs, local testing, and as the default
//! stage set when no model-backed authoring is configured.

use async_trait::async_trait;
use std::sync::Arc;

use crate::artifact::{
    PromptDescriptor, ANCHOR_PAGE_NUMBER, BACK_COVER_PAGE_NUMBER, COVER_PAGE_NUMBER,
};
use crate::book::{
    CoverConcept, DesignReview, IllustrationReview, LifePhase, NarrativePlan, NormalizedProfile,
    PagePlan, PhaseSummary, VisualFingerprint,
};
use crate::error::StageError;
use crate::job::PageStatus;
use crate::pipeline::stage::{Stage, StageInput, StageName, StageOutput, StageSet};

const DEFAULT_SUBJECT: &str = "the protagonist";
const DEFAULT_THEMES: &[&str] = &["family", "memories", "love"];
const MAX_THEMES: usize = 5;

/// One deterministic authoring stage.
#[derive(Debug, Clone, Copy)]
pub struct TemplateAuthor {
    slot: StageName,
}

impl TemplateAuthor {
    pub fn new(slot: StageName) -> Self {
        Self { slot }
    }
}

/// A [`StageSet`] filled with template authors for every authoring slot.
pub fn template_stages() -> StageSet {
    StageName::ALL
        .iter()
        .copied()
        .filter(StageName::is_authoring)
        .fold(StageSet::new(), |set, slot| {
            set.with_stage(Arc::new(TemplateAuthor::new(slot)))
        })
}

#[async_trait]
impl Stage for TemplateAuthor {
    fn name(&self) -> StageName {
        self.slot
    }

    async fn run(&self, input: &StageInput) -> Result<StageOutput, StageError> {
        let stage = self.slot;
        match stage {
            StageName::Normalization => normalize(input).map(StageOutput::Profile),
            StageName::Planning => plan(input).map(StageOutput::Plan),
            StageName::VisualAnalysis => analyze(input).map(StageOutput::Fingerprint),
            StageName::AnchorGeneration => anchor_prompt(input).map(StageOutput::AnchorPrompt),
            StageName::CoverPrompt => cover_prompt(input).map(|d| StageOutput::Descriptors(vec![d])),
            StageName::BackCoverPrompt => {
                back_cover_prompt(input).map(|d| StageOutput::Descriptors(vec![d]))
            }
            StageName::PagePrompts => page_prompts(input).map(StageOutput::Descriptors),
            StageName::PromptReview => review_prompts(input).map(StageOutput::Descriptors),
            StageName::IllustrationReview => {
                Ok(StageOutput::IllustrationReview(review_illustrations(input)))
            }
            StageName::DesignReview => Ok(StageOutput::DesignReview(review_design(input))),
            StageName::ImageGeneration | StageName::Validation | StageName::Finalization => Err(
                StageError::failed(stage.as_str(), "not an authoring stage"),
            ),
        }
    }
}

fn normalize(input: &StageInput) -> Result<NormalizedProfile, StageError> {
    fn clean(items: &[String]) -> Vec<String> {
        items
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    let request = &input.request;

    let phases: Vec<PhaseSummary> = LifePhase::ALL
        .iter()
        .filter_map(|phase| {
            let raw = request.story.phase(*phase);
            let mut memories = clean(&raw.memories);
            memories.extend(clean(&raw.key_events));
            let emotions = clean(&raw.emotions);
            (!memories.is_empty()).then(|| PhaseSummary {
                phase: *phase,
                memories,
                emotions,
            })
        })
        .collect();

    if phases.is_empty() {
        return Err(StageError::failed(
            StageName::Normalization.as_str(),
            "request contains no memories to illustrate",
        ));
    }

    let mut themes: Vec<String> = Vec::new();
    for emotion in phases.iter().flat_map(|p| p.emotions.iter()) {
        let emotion = emotion.to_lowercase();
        if !themes.contains(&emotion) {
            themes.push(emotion);
        }
    }
    if themes.is_empty() {
        themes = DEFAULT_THEMES.iter().map(|s| s.to_string()).collect();
    }
    themes.truncate(MAX_THEMES);

    Ok(NormalizedProfile {
        subject_name: request
            .subject_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SUBJECT)
            .to_string(),
        title: request.title.trim().to_string(),
        style: request.style,
        language: request.user_language.clone(),
        phases,
        themes,
    })
}

fn plan(input: &StageInput) -> Result<NarrativePlan, StageError> {
    let stage = StageName::Planning;
    let profile = input.require_profile(stage)?;
    let page_count = input.request.page_count as usize;

    let moments: Vec<(&PhaseSummary, &String)> = profile
        .phases
        .iter()
        .flat_map(|phase| phase.memories.iter().map(move |m| (phase, m)))
        .collect();
    if moments.is_empty() || page_count == 0 {
        return Err(StageError::failed(stage.as_str(), "nothing to plan"));
    }

    // Spread the available moments evenly over the pages, in life order.
    let pages = (0..page_count)
        .map(|i| {
            let (phase, memory) = moments[i * moments.len() / page_count];
            PagePlan {
                page_number: i as i32 + 1,
                life_phase: phase.phase,
                memory_reference: memory.clone(),
                scene_description: format!(
                    "{} during their {} years: {}",
                    profile.subject_name, phase.phase, memory
                ),
                emotional_tone: phase
                    .emotions
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "warm".to_string()),
                narrative_text: Some(memory.clone()),
            }
        })
        .collect();

    let mood = profile.themes.first().cloned().unwrap_or_else(|| "warm".to_string());
    Ok(NarrativePlan {
        book_title: profile.title.clone(),
        cover: CoverConcept {
            subject: format!("portrait of {} smiling", profile.subject_name),
            mood: mood.clone(),
            symbolic_elements: profile.themes.clone(),
        },
        back_cover: CoverConcept {
            subject: "symbolic still life of treasured keepsakes".to_string(),
            mood,
            symbolic_elements: profile.themes.clone(),
        },
        pages,
    })
}

fn analyze(input: &StageInput) -> Result<VisualFingerprint, StageError> {
    let profile = input.require_profile(StageName::VisualAnalysis)?;
    let references = input.reference_paths.len();
    let character_description = if references > 0 {
        format!(
            "{}, with the face, hair and build shown in the {} reference photo(s)",
            profile.subject_name, references
        )
    } else {
        format!(
            "{}, a kind person with consistent facial features and hairstyle",
            profile.subject_name
        )
    };

    Ok(VisualFingerprint {
        character_description,
        style_notes: profile.style.style_prompt().to_string(),
        consistency_notes: vec![
            "Keep facial features identical on every page".to_string(),
            "Age the character naturally across life phases".to_string(),
        ],
        do_not_change: vec!["eye color".to_string(), "face shape".to_string()],
        anchor_path: None,
    })
}

fn base_descriptor(
    input: &StageInput,
    stage: StageName,
    page_number: i32,
    main_prompt: String,
) -> Result<PromptDescriptor, StageError> {
    let fingerprint = input.require_fingerprint(stage)?;
    let mut descriptor = PromptDescriptor::new(page_number, main_prompt)
        .with_character(fingerprint.character_description.clone())
        .with_style(input.request.style.style_prompt());
    descriptor.render_params.style_preset = input.request.style.to_string();
    Ok(descriptor)
}

fn anchor_prompt(input: &StageInput) -> Result<PromptDescriptor, StageError> {
    let stage = StageName::AnchorGeneration;
    let profile = input.require_profile(stage)?;
    let descriptor = base_descriptor(
        input,
        stage,
        ANCHOR_PAGE_NUMBER,
        format!(
            "Character reference sheet of {}: front view, side view and three-quarter view on a plain background",
            profile.subject_name
        ),
    )?;
    Ok(descriptor)
}

fn cover_prompt(input: &StageInput) -> Result<PromptDescriptor, StageError> {
    let stage = StageName::CoverPrompt;
    let plan = input.require_plan(stage)?;
    let descriptor = base_descriptor(
        input,
        stage,
        COVER_PAGE_NUMBER,
        format!("Book cover illustration, {}", plan.cover.subject),
    )?
    .with_scene(format!(
        "{} mood with {}, space reserved at the top for the title",
        plan.cover.mood,
        plan.cover.symbolic_elements.join(", ")
    ));
    Ok(descriptor)
}

fn back_cover_prompt(input: &StageInput) -> Result<PromptDescriptor, StageError> {
    let stage = StageName::BackCoverPrompt;
    let plan = input.require_plan(stage)?;
    let mut descriptor = base_descriptor(
        input,
        stage,
        BACK_COVER_PAGE_NUMBER,
        format!("Back cover illustration, {}", plan.back_cover.subject),
    )?
    .with_scene(format!("{} mood", plan.back_cover.mood));
    descriptor.character_description.clear();
    descriptor.render_params.use_reference_images = false;
    Ok(descriptor)
}

fn page_prompts(input: &StageInput) -> Result<Vec<PromptDescriptor>, StageError> {
    let stage = StageName::PagePrompts;
    let plan = input.require_plan(stage)?;
    plan.pages
        .iter()
        .map(|page| {
            Ok(base_descriptor(
                input,
                stage,
                page.page_number,
                format!(
                    "Illustration of a {} memory: {}",
                    page.emotional_tone, page.memory_reference
                ),
            )?
            .with_scene(page.scene_description.clone()))
        })
        .collect()
}

fn review_prompts(input: &StageInput) -> Result<Vec<PromptDescriptor>, StageError> {
    let stage = StageName::PromptReview;
    let fingerprint = input.require_fingerprint(stage)?;
    let expected = input.request.page_count as usize + 2;
    if input.descriptors.len() != expected {
        return Err(StageError::failed(
            stage.as_str(),
            format!(
                "expected {} descriptors, got {}",
                expected,
                input.descriptors.len()
            ),
        ));
    }

    Ok(input
        .descriptors
        .iter()
        .cloned()
        .map(|mut descriptor| {
            if descriptor.style_prompt.is_empty() {
                descriptor.style_prompt = fingerprint.style_notes.clone();
            }
            if descriptor.page_number != BACK_COVER_PAGE_NUMBER
                && descriptor.character_description.is_empty()
            {
                descriptor.character_description = fingerprint.character_description.clone();
            }
            for item in &fingerprint.do_not_change {
                let constraint = format!("altered {}", item);
                if !descriptor.negative_constraints.contains(&constraint) {
                    descriptor.negative_constraints.push(constraint);
                }
            }
            descriptor
        })
        .collect())
}

fn review_illustrations(input: &StageInput) -> IllustrationReview {
    let notes: Vec<(i32, String)> = input
        .pages
        .iter()
        .filter(|p| p.status == PageStatus::Failed || p.image_path.is_none())
        .map(|p| {
            (
                p.page_number,
                p.error
                    .clone()
                    .unwrap_or_else(|| "no illustration was produced".to_string()),
            )
        })
        .collect();
    IllustrationReview {
        approved: notes.is_empty(),
        notes,
    }
}

fn review_design(input: &StageInput) -> DesignReview {
    let total = input.pages.len().max(1) as f64;
    let attention: Vec<i32> = input
        .pages
        .iter()
        .filter(|p| p.image_path.is_none() || p.status == PageStatus::Failed)
        .map(|p| p.page_number)
        .collect();
    let score = 10.0 * (total - attention.len() as f64) / total;
    DesignReview {
        overall_cohesion: score,
        style_consistency_score: score,
        character_consistency: score,
        global_issues: if attention.is_empty() {
            Vec::new()
        } else {
            vec![format!("{} page(s) without a usable illustration", attention.len())]
        },
        approved: attention.is_empty(),
        pages_needing_attention: attention,
    }
}
