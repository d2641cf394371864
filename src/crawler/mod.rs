//! Crawler module for forum activity crawling
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with politeness limits and session login
//! - Crawl orchestration over search, thread and profile pages
//! - Recurring job scheduling

mod coordinator;
mod fetcher;
mod scheduler;

pub use coordinator::{
    CategoryCounts, CrawlError, Crawler, DiscoverySummary, MemberListSummary, OperationReport,
    ProfileSummary, ReconcileSource, ReconcileSummary, RefreshSummary, RegistrationSummary,
    SharedStorage, SingleThreadSummary, ThreadCrawlSummary, ThreadEvent, EXPORT_PASSWORD_KEY,
    EXPORT_USERNAME_KEY, LAST_EXPORT_SYNC_KEY,
};
pub use fetcher::{
    build_http_client, CommandRenderer, FetchResult, Fetcher, PageRenderer, RenderError,
};
pub use scheduler::{CrawlJobs, Intervals, Job, Scheduler};
