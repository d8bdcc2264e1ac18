//! Intermediate authoring records: profile, plan, fingerprint and reviews.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::request::{BookStyle, LifePhase};

/// Memories of one phase after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: LifePhase,
    pub memories: Vec<String>,
    pub emotions: Vec<String>,
}

/// Cleaned-up view of the request that later stages plan from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProfile {
    pub subject_name: String,
    pub title: String,
    pub style: BookStyle,
    pub language: String,
    /// Only phases that carry at least one memory, in life order.
    pub phases: Vec<PhaseSummary>,
    pub themes: Vec<String>,
}

/// Plan for a single content page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagePlan {
    pub page_number: i32,
    pub life_phase: LifePhase,
    pub memory_reference: String,
    pub scene_description: String,
    pub emotional_tone: String,
    #[serde(default)]
    pub narrative_text: Option<String>,
}

/// Concept for the front or back cover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverConcept {
    pub subject: String,
    pub mood: String,
    #[serde(default)]
    pub symbolic_elements: Vec<String>,
}

/// Page-by-page plan of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativePlan {
    pub book_title: String,
    pub cover: CoverConcept,
    pub back_cover: CoverConcept,
    pub pages: Vec<PagePlan>,
}

impl NarrativePlan {
    pub fn page(&self, page_number: i32) -> Option<&PagePlan> {
        self.pages.iter().find(|p| p.page_number == page_number)
    }
}

/// Visual traits every illustration must reproduce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualFingerprint {
    pub character_description: String,
    pub style_notes: String,
    #[serde(default)]
    pub consistency_notes: Vec<String>,
    #[serde(default)]
    pub do_not_change: Vec<String>,
    /// Location of the generated character reference sheet, if any.
    #[serde(default)]
    pub anchor_path: Option<PathBuf>,
}

/// Art-direction notes on the prompt set, one entry per reviewed page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IllustrationReview {
    pub notes: Vec<(i32, String)>,
    pub approved: bool,
}

/// Whole-book design review over the generated artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignReview {
    pub overall_cohesion: f64,
    pub style_consistency_score: f64,
    pub character_consistency: f64,
    #[serde(default)]
    pub global_issues: Vec<String>,
    #[serde(default)]
    pub pages_needing_attention: Vec<i32>,
    pub approved: bool,
}

impl DesignReview {
    pub fn average_score(&self) -> f64 {
        (self.overall_cohesion + self.style_consistency_score + self.character_consistency) / 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_page_lookup() {
        let plan = NarrativePlan {
            book_title: "A Life".to_string(),
            cover: CoverConcept {
                subject: "portrait".to_string(),
                mood: "warm".to_string(),
                symbolic_elements: vec![],
            },
            back_cover: CoverConcept {
                subject: "garden".to_string(),
                mood: "calm".to_string(),
                symbolic_elements: vec![],
            },
            pages: vec![PagePlan {
                page_number: 1,
                life_phase: LifePhase::Young,
                memory_reference: "lake".to_string(),
                scene_description: "a child by the lake".to_string(),
                emotional_tone: "joyful".to_string(),
                narrative_text: None,
            }],
        };
        assert!(plan.page(1).is_some());
        assert!(plan.page(2).is_none());
    }

    #[test]
    fn test_design_review_average() {
        let review = DesignReview {
            overall_cohesion: 9.0,
            style_consistency_score: 6.0,
            character_consistency: 9.0,
            global_issues: vec![],
            pages_needing_attention: vec![],
            approved: true,
        };
        assert!((review.average_score() - 8.0).abs() < f64::EPSILON);
    }
}
