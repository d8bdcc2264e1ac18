//! The final package returned for a completed job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::plan::{DesignReview, NarrativePlan, VisualFingerprint};
use super::request::{BookStyle, LifePhase};
use crate::artifact::PageType;

/// One page of the finished book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookPage {
    pub page_number: i32,
    pub page_type: PageType,
    /// Filename relative to the job's output directory.
    #[serde(default)]
    pub image_filename: Option<String>,
    /// Inline `data:` URL, only filled when a caller asks for embedded images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data_url: Option<String>,
    #[serde(default)]
    pub narrative_text: Option<String>,
    #[serde(default)]
    pub life_phase: Option<LifePhase>,
    #[serde(default)]
    pub memory_reference: Option<String>,
    pub generation_attempts: u32,
    pub qc_passed: bool,
    pub requires_regeneration: bool,
}

/// Everything a caller needs to render the finished book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalPackage {
    pub book_id: String,
    pub title: String,
    pub style: BookStyle,
    pub created_at: DateTime<Utc>,
    pub cover: BookPage,
    pub back_cover: BookPage,
    pub pages: Vec<BookPage>,
    pub total_pages: usize,
    pub narrative_plan: NarrativePlan,
    pub fingerprint: VisualFingerprint,
    #[serde(default)]
    pub design_review: Option<DesignReview>,
    pub total_generation_time_ms: u64,
    pub total_retries: u32,
    pub output_directory: PathBuf,
    /// Pages whose final QC failed or that have no artifact.
    #[serde(default)]
    pub pages_needing_attention: Vec<i32>,
}

impl FinalPackage {
    /// All pages in book order: cover, content, back cover.
    pub fn all_pages(&self) -> impl Iterator<Item = &BookPage> {
        std::iter::once(&self.cover)
            .chain(self.pages.iter())
            .chain(std::iter::once(&self.back_cover))
    }

    pub fn all_pages_mut(&mut self) -> impl Iterator<Item = &mut BookPage> {
        std::iter::once(&mut self.cover)
            .chain(self.pages.iter_mut())
            .chain(std::iter::once(&mut self.back_cover))
    }
}
