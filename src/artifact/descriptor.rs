//! Prompt descriptors and deterministic artifact naming.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Page number reserved for the front cover.
pub const COVER_PAGE_NUMBER: i32 = 0;
/// Page number reserved for the back cover.
pub const BACK_COVER_PAGE_NUMBER: i32 = -1;
/// Page number carried by the character reference descriptor. The anchor is
/// not part of the book and never appears among a job's pages.
pub const ANCHOR_PAGE_NUMBER: i32 = -2;
/// Output filename of the character reference sheet.
pub const ANCHOR_FILENAME: &str = "character_ref.png";

const NO_TEXT_INSTRUCTION: &str = "IMPORTANT: Do NOT include any text, letters, words, numbers, \
captions, titles, labels, signs, or typography anywhere in the image. The image must be purely \
visual with zero written content";

const DEFAULT_NEGATIVES: &[&str] = &[
    "blurry",
    "low quality",
    "distorted",
    "deformed",
    "ugly",
    "duplicate",
    "watermark",
    "text",
    "signature",
    "letters",
    "words",
    "numbers",
    "typography",
    "captions",
    "labels",
    "signs",
    "written content",
];

/// Kind of page an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Cover,
    Page,
    BackCover,
}

impl PageType {
    /// Derives the page type from the numbering convention.
    pub fn from_page_number(page_number: i32) -> Self {
        match page_number {
            COVER_PAGE_NUMBER => PageType::Cover,
            BACK_COVER_PAGE_NUMBER => PageType::BackCover,
            _ => PageType::Page,
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageType::Cover => write!(f, "cover"),
            PageType::Page => write!(f, "page"),
            PageType::BackCover => write!(f, "back_cover"),
        }
    }
}

/// Deterministic output filename for a page artifact.
///
/// Regenerations write to the same name, so the latest attempt always wins.
pub fn artifact_filename(page_number: i32) -> String {
    match PageType::from_page_number(page_number) {
        PageType::Cover => "cover.png".to_string(),
        PageType::BackCover => "back_cover.png".to_string(),
        PageType::Page => format!("page_{:02}.png", page_number),
    }
}

/// Rendering parameters passed through to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    pub width: u32,
    pub height: u32,
    pub style_preset: String,
    pub guidance_scale: f64,
    pub num_inference_steps: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    pub use_reference_images: bool,
    pub reference_weight: f64,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            style_preset: "cartoon".to_string(),
            guidance_scale: 7.5,
            num_inference_steps: 50,
            seed: None,
            use_reference_images: true,
            reference_weight: 0.8,
        }
    }
}

/// Everything the generation service needs to render one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub page_number: i32,
    pub page_type: PageType,
    pub main_prompt: String,
    #[serde(default)]
    pub character_description: String,
    #[serde(default)]
    pub scene_description: String,
    #[serde(default)]
    pub style_prompt: String,
    #[serde(default)]
    pub negative_constraints: Vec<String>,
    #[serde(default)]
    pub render_params: RenderParams,
    #[serde(default)]
    pub reference_paths: Vec<PathBuf>,
    #[serde(default)]
    pub revision_notes: Vec<String>,
    pub version: u32,
}

impl PromptDescriptor {
    /// Creates a version-1 descriptor for `page_number`.
    pub fn new(page_number: i32, main_prompt: impl Into<String>) -> Self {
        Self {
            page_number,
            page_type: PageType::from_page_number(page_number),
            main_prompt: main_prompt.into(),
            character_description: String::new(),
            scene_description: String::new(),
            style_prompt: String::new(),
            negative_constraints: Vec::new(),
            render_params: RenderParams::default(),
            reference_paths: Vec::new(),
            revision_notes: Vec::new(),
            version: 1,
        }
    }

    pub fn with_character(mut self, description: impl Into<String>) -> Self {
        self.character_description = description.into();
        self
    }

    pub fn with_scene(mut self, description: impl Into<String>) -> Self {
        self.scene_description = description.into();
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style_prompt = style.into();
        self
    }

    /// Joins all prompt parts, always ending with the no-text instruction.
    pub fn full_prompt(&self) -> String {
        let mut parts = vec![self.main_prompt.clone()];
        if !self.character_description.is_empty() {
            parts.push(format!("Character: {}", self.character_description));
        }
        if !self.scene_description.is_empty() {
            parts.push(format!("Scene: {}", self.scene_description));
        }
        if !self.style_prompt.is_empty() {
            parts.push(self.style_prompt.clone());
        }
        parts.push(NO_TEXT_INSTRUCTION.to_string());
        parts.join(". ")
    }

    /// Default negatives followed by this descriptor's own constraints.
    pub fn negative_prompt(&self) -> String {
        DEFAULT_NEGATIVES
            .iter()
            .map(|s| s.to_string())
            .chain(self.negative_constraints.iter().cloned())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Whether the generation call should carry reference artifacts.
    ///
    /// The back cover is never rendered against references.
    pub fn wants_references(&self) -> bool {
        self.page_type != PageType::BackCover && self.render_params.use_reference_images
    }

    /// Accepts a revision produced by a repair, pinning its identity to this
    /// descriptor and stamping the next version.
    pub fn adopt_revision(&self, mut revised: PromptDescriptor) -> PromptDescriptor {
        revised.page_number = self.page_number;
        revised.page_type = self.page_type;
        revised.version = self.version + 1;
        revised
    }
}
