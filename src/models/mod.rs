//! Data models for comicrawl.

mod catalog;
mod job;
mod target;

pub use catalog::{CatalogSummary, ChapterStub};
pub use job::{CrawlJob, JobKind, JobStatus};
pub use target::{CrawlTarget, TargetStatus};
