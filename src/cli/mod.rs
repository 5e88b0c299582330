//! Command-line interface for comicrawl.

mod commands;
mod helpers;

pub use commands::{is_verbose, run};
