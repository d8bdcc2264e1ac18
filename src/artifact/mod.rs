//! Artifact records: prompt descriptors, generation results and QC results.

pub mod descriptor;
pub mod generation;
pub mod qc;

pub use descriptor::{
    artifact_filename, PageType, PromptDescriptor, RenderParams, ANCHOR_FILENAME,
    ANCHOR_PAGE_NUMBER, BACK_COVER_PAGE_NUMBER, COVER_PAGE_NUMBER,
};
pub use generation::{GenerationMetadata, GenerationResult};
pub use qc::{QcResult, QualityMetrics};
