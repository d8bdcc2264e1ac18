//! Command-line interface for bookforge.
//!
//! Provides commands for running a book through the pipeline and for
//! inspecting the results and assets a run left in storage.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};
