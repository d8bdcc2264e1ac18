//! Book content records.
//!
//! These are the payloads that authoring stages exchange: the incoming
//! request, the normalized profile and narrative plan, the visual
//! fingerprint, reviews, and the final package handed back to callers.

pub mod package;
pub mod plan;
pub mod request;

pub use package::{BookPage, FinalPackage};
pub use plan::{
    CoverConcept, DesignReview, IllustrationReview, NarrativePlan, NormalizedProfile, PagePlan,
    PhaseSummary, VisualFingerprint,
};
pub use request::{BookRequest, BookStyle, LifePhase, LifeStory, PhaseMemories, RequestError};
