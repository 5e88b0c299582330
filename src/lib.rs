//! comicrawl - crawl orchestration for third-party comic sources.
//!
//! Targets are registered per source URL, crawled through a bounded pool of
//! headless browsers by per-site adapters, and merged into a production
//! catalog with their images migrated into owned storage.
//!
//! ```text
//! Scheduler ──► JobQueue ──► Worker ──► CrawlEngine ──► SiteAdapter ──► BrowserPool
//!                                            │
//!                                            └──► SyncPipeline ──► catalog + AssetStore
//! ```

pub mod adapters;
pub mod admin;
pub mod browser;
pub mod cli;
pub mod config;
pub mod engine;
pub mod models;
pub mod queue;
pub mod repository;
pub mod runtime;
pub mod scheduler;
pub mod sync;
