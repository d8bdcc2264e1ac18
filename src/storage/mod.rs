//! On-disk storage for job inputs and outputs.

pub mod layout;

pub use layout::{is_valid_name, mime_type, JobAssets, JobStorage, RESULT_FILENAME};
