//! Incoming book request.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Upper bound on content pages for a single book.
pub const MAX_PAGE_COUNT: u32 = 40;

/// Request validation failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RequestError {
    #[error("Book title cannot be empty")]
    EmptyTitle,

    #[error("page_count must be between 1 and {max}, got {got}")]
    PageCount { got: u32, max: u32 },

    #[error("At least one memory, event or emotion is required")]
    NoMemories,
}

/// Illustration style for the whole book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookStyle {
    Coloring,
    #[default]
    Cartoon,
    Anime,
    Watercolor,
}

impl BookStyle {
    /// Rendering direction shared by every prompt of the book.
    pub fn style_prompt(&self) -> &'static str {
        match self {
            BookStyle::Coloring => {
                "black and white line art, clean outlines, no shading, coloring book page"
            }
            BookStyle::Cartoon => "warm cartoon illustration, soft colors, rounded shapes",
            BookStyle::Anime => "anime illustration, expressive eyes, cel shading",
            BookStyle::Watercolor => "watercolor painting, soft washes, textured paper",
        }
    }
}

impl fmt::Display for BookStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookStyle::Coloring => write!(f, "coloring"),
            BookStyle::Cartoon => write!(f, "cartoon"),
            BookStyle::Anime => write!(f, "anime"),
            BookStyle::Watercolor => write!(f, "watercolor"),
        }
    }
}

/// The four life phases a memory book walks through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifePhase {
    Young,
    Adolescent,
    Adult,
    Elderly,
}

impl LifePhase {
    pub const ALL: [LifePhase; 4] = [
        LifePhase::Young,
        LifePhase::Adolescent,
        LifePhase::Adult,
        LifePhase::Elderly,
    ];
}

impl fmt::Display for LifePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifePhase::Young => write!(f, "young"),
            LifePhase::Adolescent => write!(f, "adolescent"),
            LifePhase::Adult => write!(f, "adult"),
            LifePhase::Elderly => write!(f, "elderly"),
        }
    }
}

/// Memories collected for one life phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseMemories {
    pub memories: Vec<String>,
    pub key_events: Vec<String>,
    pub emotions: Vec<String>,
}

impl PhaseMemories {
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty() && self.key_events.is_empty() && self.emotions.is_empty()
    }
}

/// The questionnaire answers, one entry per life phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifeStory {
    pub young: PhaseMemories,
    pub adolescent: PhaseMemories,
    pub adult: PhaseMemories,
    pub elderly: PhaseMemories,
}

impl LifeStory {
    pub fn phase(&self, phase: LifePhase) -> &PhaseMemories {
        match phase {
            LifePhase::Young => &self.young,
            LifePhase::Adolescent => &self.adolescent,
            LifePhase::Adult => &self.adult,
            LifePhase::Elderly => &self.elderly,
        }
    }

    pub fn is_empty(&self) -> bool {
        LifePhase::ALL.iter().all(|p| self.phase(*p).is_empty())
    }
}

fn default_language() -> String {
    "en".to_string()
}

/// A user's request for one memory book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRequest {
    pub title: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub style: BookStyle,
    pub page_count: u32,
    #[serde(default = "default_language")]
    pub user_language: String,
    #[serde(default)]
    pub subject_name: Option<String>,
    #[serde(default)]
    pub story: LifeStory,
    /// Per-job override of the repair cycle budget.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl BookRequest {
    pub fn new(title: impl Into<String>, page_count: u32) -> Self {
        Self {
            title: title.into(),
            date: None,
            style: BookStyle::default(),
            page_count,
            user_language: default_language(),
            subject_name: None,
            story: LifeStory::default(),
            max_retries: None,
        }
    }

    pub fn with_style(mut self, style: BookStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_story(mut self, story: LifeStory) -> Self {
        self.story = story;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Checks the request before a job is registered for it.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.title.trim().is_empty() {
            return Err(RequestError::EmptyTitle);
        }
        if self.page_count == 0 || self.page_count > MAX_PAGE_COUNT {
            return Err(RequestError::PageCount {
                got: self.page_count,
                max: MAX_PAGE_COUNT,
            });
        }
        if self.story.is_empty() {
            return Err(RequestError::NoMemories);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn story() -> LifeStory {
        LifeStory {
            young: PhaseMemories {
                memories: vec!["Summers at the lake".to_string()],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_request_validation() {
        let request = BookRequest::new("Grandma's Story", 10).with_story(story());
        assert!(request.validate().is_ok());

        let empty_title = BookRequest::new("  ", 10).with_story(story());
        assert_eq!(empty_title.validate(), Err(RequestError::EmptyTitle));

        let no_pages = BookRequest::new("Title", 0).with_story(story());
        assert!(matches!(
            no_pages.validate(),
            Err(RequestError::PageCount { got: 0, .. })
        ));

        let no_story = BookRequest::new("Title", 10);
        assert_eq!(no_story.validate(), Err(RequestError::NoMemories));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let json = r#"{
            "title": "A Life",
            "page_count": 3,
            "story": { "adult": { "memories": ["First job"] } }
        }"#;
        let request: BookRequest = serde_json::from_str(json).expect("valid request");
        assert_eq!(request.style, BookStyle::Cartoon);
        assert_eq!(request.user_language, "en");
        assert!(request.max_retries.is_none());
        assert_eq!(request.story.adult.memories, vec!["First job"]);
        assert!(request.story.young.is_empty());
    }

    #[test]
    fn test_style_display_and_serde() {
        assert_eq!(BookStyle::Watercolor.to_string(), "watercolor");
        let style: BookStyle = serde_json::from_str("\"anime\"").expect("valid style");
        assert_eq!(style, BookStyle::Anime);
        assert!(BookStyle::Coloring.style_prompt().contains("line art"));
    }
}
