//! Final package assembly.

use chrono::Utc;
use std::path::PathBuf;

use super::batch::BatchReport;
use super::repair::ValidationOutcome;
use crate::artifact::{PageType, BACK_COVER_PAGE_NUMBER, COVER_PAGE_NUMBER};
use crate::book::{BookPage, BookRequest, DesignReview, FinalPackage, NarrativePlan, VisualFingerprint};
use crate::job::page_sequence;

/// Inputs gathered by the sequencer for the finalization stage.
#[derive(Debug)]
pub struct PackageParts<'a> {
    pub job_id: &'a str,
    pub request: &'a BookRequest,
    pub plan: &'a NarrativePlan,
    pub fingerprint: &'a VisualFingerprint,
    pub design_review: Option<&'a DesignReview>,
    pub report: &'a BatchReport,
    pub output_directory: PathBuf,
    /// Wall-clock time of the whole run so far.
    pub elapsed_ms: u64,
}

fn book_page(page_number: i32, outcome: Option<&ValidationOutcome>, plan: &NarrativePlan) -> BookPage {
    let page_plan = plan.page(page_number);
    let image_filename = outcome
        .filter(|o| o.generation.has_image())
        .and_then(|o| o.generation.path())
        .and_then(|p| p.file_name())
        .map(|name| name.to_string_lossy().into_owned());
    let qc = outcome.and_then(|o| o.qc.as_ref());

    BookPage {
        page_number,
        page_type: PageType::from_page_number(page_number),
        image_filename,
        image_data_url: None,
        narrative_text: page_plan.and_then(|p| p.narrative_text.clone()),
        life_phase: page_plan.map(|p| p.life_phase),
        memory_reference: page_plan.map(|p| p.memory_reference.clone()),
        generation_attempts: outcome.map_or(1, |o| o.retry_count + 1),
        qc_passed: qc.is_some_and(|q| q.passed),
        requires_regeneration: qc.map_or(true, |q| q.requires_regeneration),
    }
}

/// Builds the package from the validation report.
///
/// Every page of the book appears exactly once; pages without an outcome or
/// artifact are kept and listed in `pages_needing_attention`.
pub fn assemble(parts: PackageParts<'_>) -> FinalPackage {
    let numbers = page_sequence(parts.request.page_count);
    let page = |n: i32| book_page(n, parts.report.outcome(n), parts.plan);

    let cover = page(COVER_PAGE_NUMBER);
    let back_cover = page(BACK_COVER_PAGE_NUMBER);
    let mut pages: Vec<BookPage> = numbers
        .iter()
        .copied()
        .filter(|n| *n > COVER_PAGE_NUMBER)
        .map(page)
        .collect();
    pages.sort_by_key(|p| p.page_number);

    let mut package = FinalPackage {
        book_id: parts.job_id.to_string(),
        title: parts.request.title.clone(),
        style: parts.request.style,
        created_at: Utc::now(),
        cover,
        back_cover,
        pages,
        total_pages: numbers.len(),
        narrative_plan: parts.plan.clone(),
        fingerprint: parts.fingerprint.clone(),
        design_review: parts.design_review.cloned(),
        total_generation_time_ms: parts.elapsed_ms,
        total_retries: parts.report.total_retries,
        output_directory: parts.output_directory,
        pages_needing_attention: Vec::new(),
    };
    package.pages_needing_attention = package
        .all_pages()
        .filter(|p| !p.qc_passed || p.image_filename.is_none())
        .map(|p| p.page_number)
        .collect();
    package
}
